//! The component node: exactly one nested child graph.

use crate::builder::NestedSpec;
use crate::error::{EngineError, Result};
use crate::graph::{EvalContext, Graph};
use crate::node::NodeBody;

use super::{ChildGraph, CHILD_TICK_TAG};

/// Owns one child graph built from a nested builder, with named input
/// projections into child stub nodes and one output projection back out.
/// The child is built at start and torn down at stop.
pub struct ComponentNode {
    spec: NestedSpec,
    child: Option<ChildGraph>,
}

impl ComponentNode {
    /// A component over the given nested wiring.
    pub fn new(spec: NestedSpec) -> Self {
        ComponentNode { spec, child: None }
    }

    fn child_mut(&mut self) -> Result<&mut ChildGraph> {
        self.child
            .as_mut()
            .ok_or_else(|| EngineError::NotStarted("component child graph".to_owned()))
    }

    /// Copies parent inputs into the child's stub sources. When
    /// `changed_only`, only inputs modified this tick are projected.
    fn project_inputs(&mut self, cx: &mut EvalContext<'_>, changed_only: bool) -> Result<()> {
        let now = cx.now();
        let mut staged: Vec<(usize, crate::types::Value)> = Vec::new();
        for (index, input) in cx.core.nodes[cx.node].inputs.iter().enumerate() {
            let Some(&target) = self.spec.input_node_ids.get(&input.name) else {
                continue;
            };
            let view = cx.input(index)?;
            if !view.valid()? {
                continue;
            }
            if changed_only && !view.modified(now)? {
                continue;
            }
            staged.push((target, cx.input_value(index)?));
        }
        let child = self.child_mut()?;
        for (target, value) in staged {
            child.inject(target, now, value)?;
        }
        Ok(())
    }

    fn drive_and_project(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let now = cx.now();
        let output_node = self.spec.output_node_id;
        let child = self.child_mut()?;
        child.drive(now)?;
        let projected = child.output_if_modified(output_node, now)?;
        if let Some(value) = projected {
            cx.output()?.set_value(value)?;
        }
        let next = self.child_mut()?.next_after(now.next())?;
        if let Some(when) = next {
            cx.schedule(when, CHILD_TICK_TAG);
        }
        Ok(())
    }
}

impl NodeBody for ComponentNode {
    fn start(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let child = ChildGraph::build(cx.core, cx.node, 0, &self.spec.builder, cx.now())?;
        self.child = Some(child);
        self.project_inputs(cx, false)?;
        self.drive_and_project(cx)
    }

    fn eval(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        self.project_inputs(cx, true)?;
        self.drive_and_project(cx)
    }

    fn stop(&mut self, _cx: &mut EvalContext<'_>) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            child.shutdown()?;
        }
        Ok(())
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Graph)) {
        if let Some(child) = &self.child {
            visit(&child.graph);
        }
    }
}
