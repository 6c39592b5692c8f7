//! The non-associative reduce node: a linear chain of combiner graphs.

use crate::builder::ReduceSpec;
use crate::error::Result;
use crate::graph::{EvalContext, Graph};
use crate::node::NodeBody;

use super::{ChildGraph, CHILD_TICK_TAG};

/// Left-folds a TSD's values through a chain of combiner child graphs, in
/// the dict's slot (insertion) order: link 0 combines the zero element with
/// the first value, each later link the previous link's output with the
/// next value. The chain grows and shrinks with the dict.
pub struct ChainReduceNode {
    spec: ReduceSpec,
    links: Vec<ChildGraph>,
    next_ordinal: usize,
}

impl ChainReduceNode {
    /// A chain reduce over the given combiner wiring.
    pub fn new(spec: ReduceSpec) -> Self {
        ChainReduceNode {
            spec,
            links: Vec::new(),
            next_ordinal: 0,
        }
    }
}

impl NodeBody for ChainReduceNode {
    fn eval(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let now = cx.now();
        let key_input = cx.core.nodes[cx.node]
            .input_index(&self.spec.key_arg)
            .ok_or_else(|| crate::error::EngineError::NotBound(self.spec.key_arg.clone()))?;
        let items = cx.input(key_input)?.items()?;

        // Resize the chain to the dict.
        while self.links.len() > items.len() {
            let mut link = self.links.pop().expect("len checked");
            link.shutdown()?;
        }
        while self.links.len() < items.len() {
            let ordinal = self.next_ordinal;
            self.next_ordinal += 1;
            self.links.push(ChildGraph::build(
                cx.core,
                cx.node,
                ordinal,
                &self.spec.builder,
                now,
            )?);
        }

        // Left fold: order dependence is the point, so every link past the
        // first change recomputes.
        let mut accumulator = self.spec.zero.clone();
        for (link, (_, value)) in self.links.iter_mut().zip(items.iter()) {
            link.inject(self.spec.lhs_node_id, now, accumulator)?;
            link.inject(self.spec.rhs_node_id, now, value.clone())?;
            link.drive(now)?;
            accumulator = link.output_value(self.spec.output_node_id)?;
        }
        cx.output()?.set_value(accumulator)?;

        let after = now.next();
        let mut earliest: Option<crate::time::EngineTime> = None;
        for link in &mut self.links {
            if let Some(when) = link.next_after(after)? {
                earliest = Some(earliest.map_or(when, |current| current.min(when)));
            }
        }
        if let Some(when) = earliest {
            cx.schedule(when, CHILD_TICK_TAG);
        }
        Ok(())
    }

    fn stop(&mut self, _cx: &mut EvalContext<'_>) -> Result<()> {
        while let Some(mut link) = self.links.pop() {
            link.shutdown()?;
        }
        Ok(())
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Graph)) {
        for link in &self.links {
            visit(&link.graph);
        }
    }
}
