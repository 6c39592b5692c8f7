//! Nested-graph nodes: component, map, mesh, reduce, and chain reduce.
//!
//! A nested node owns one or more child graphs and drives them in-line: on
//! eval it applies parent input changes (possibly growing or shrinking the
//! child set), drives each child's own scheduler to quiescence at the current
//! engine time, projects child outputs back into its own output, and
//! self-schedules at the earliest future time any child has work.

pub mod chain;
pub mod component;
pub mod map;
pub mod mesh;
pub mod reduce;

pub use chain::ChainReduceNode;
pub use component::ComponentNode;
pub use map::MapNode;
pub use mesh::{MeshHandle, MeshNode};
pub use reduce::ReduceNode;

use itertools::Itertools;

use crate::builder::{BuildEnv, GraphBuilder, MapSpec};
use crate::error::Result;
use crate::graph::{EvalContext, Graph, GraphCore};
use crate::node::NodeId;
use crate::time::EngineTime;
use crate::types::Value;

/// Tag nested nodes schedule their own wake-ups with when a child graph has
/// future work.
pub(crate) const CHILD_TICK_TAG: u64 = 1;

/// One owned child graph.
pub(crate) struct ChildGraph {
    pub graph: Graph,
}

impl ChildGraph {
    /// Builds and starts a child graph at `at`, nested under `node`.
    pub fn build(
        core: &GraphCore,
        node: NodeId,
        ordinal: usize,
        builder: &GraphBuilder,
        at: EngineTime,
    ) -> Result<ChildGraph> {
        let env = BuildEnv::nested(core, node.raw(), ordinal);
        let mut graph = builder.build(env)?;
        graph.start(at)?;
        Ok(ChildGraph { graph })
    }

    /// Writes a stub node's output inside the child.
    pub fn inject(&mut self, node: usize, at: EngineTime, value: Value) -> Result<()> {
        self.graph
            .inject_output(NodeId::from_raw(node), at, value)
    }

    /// Drives the child's scheduler through every tick at or before `now`.
    pub fn drive(&mut self, now: EngineTime) -> Result<()> {
        self.graph.drive_to(now)
    }

    /// The value of a child node's output, when modified at `now`.
    pub fn output_if_modified(&self, node: usize, now: EngineTime) -> Result<Option<Value>> {
        let view = self.graph.output_view(NodeId::from_raw(node))?;
        if view.modified(now)? {
            Ok(Some(view.value()?))
        } else {
            Ok(None)
        }
    }

    /// The value of a child node's output regardless of modification.
    pub fn output_value(&self, node: usize) -> Result<Value> {
        self.graph.output_view(NodeId::from_raw(node))?.value()
    }

    /// The child's next scheduled time strictly after `after`.
    pub fn next_after(&mut self, after: EngineTime) -> Result<Option<EngineTime>> {
        self.graph.next_time(after)
    }

    /// Stops and tears the child down.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.graph.is_started() {
            self.graph.stop()?;
        }
        self.graph.dispose()
    }
}

/// A keyed family of child graphs, one per key of a TSD input. Shared by the
/// map and mesh nodes; only the intra-tick evaluation order differs.
pub(crate) struct KeyedFamily {
    pub spec: MapSpec,
    pub members: Vec<FamilyMember>,
    next_ordinal: usize,
}

/// One per-key child instance.
pub(crate) struct FamilyMember {
    pub key: Value,
    pub child: ChildGraph,
}

impl KeyedFamily {
    pub fn new(spec: MapSpec) -> Self {
        KeyedFamily {
            spec,
            members: Vec::new(),
            next_ordinal: 0,
        }
    }

    pub fn member_index(&self, key: &Value) -> Option<usize> {
        self.members.iter().position(|member| member.key == *key)
    }

    /// Reconciles the child set against the keyed input and re-injects
    /// changed projections. Returns the member indices that need driving,
    /// in member order.
    pub fn reconcile(&mut self, cx: &mut EvalContext<'_>) -> Result<Vec<usize>> {
        let now = cx.now();
        let key_input = cx.core.nodes[cx.node]
            .input_index(&self.spec.key_arg)
            .ok_or_else(|| crate::error::EngineError::NotBound(self.spec.key_arg.clone()))?;

        let view = cx.input(key_input)?;
        let items = view.items()?;
        let modified_keys = view.modified_keys(now)?;

        // Whole (non-multiplexed) inputs that changed this tick, and their
        // child projections.
        let mut whole_changed: Vec<(usize, Value)> = Vec::new();
        for (index, input) in cx.core.nodes[cx.node].inputs.iter().enumerate() {
            if input.name == self.spec.key_arg
                || self.spec.multiplexed_args.contains(&input.name)
            {
                continue;
            }
            let Some(&target) = self.spec.nested.input_node_ids.get(&input.name) else {
                continue;
            };
            let input_view = cx.input(index)?;
            if input_view.valid()? && input_view.modified(now)? {
                whole_changed.push((target, cx.input_value(index)?));
            }
        }

        // Per-key (multiplexed) inputs that changed this tick.
        let mut keyed_changed: Vec<(usize, usize, Vec<Value>)> = Vec::new();
        for name in self.spec.multiplexed_args.clone() {
            let Some(&target) = self.spec.nested.input_node_ids.get(&name) else {
                continue;
            };
            let Some(index) = cx.core.nodes[cx.node].input_index(&name) else {
                continue;
            };
            let keys = cx.input(index)?.modified_keys(now)?;
            keyed_changed.push((index, target, keys));
        }

        let mut touched: Vec<usize> = Vec::new();

        // Shrink: keys gone from the input tear their child down; the
        // projected entry leaves the output with them.
        for position in (0..self.members.len()).rev() {
            let gone = !items
                .iter()
                .any(|(key, _)| *key == self.members[position].key);
            if gone {
                let mut member = self.members.remove(position);
                member.child.shutdown()?;
                cx.output()?.remove(&member.key)?;
            }
        }

        // Grow: fresh keys get a child graph, wired with the key, the
        // current whole inputs, and their slice of each multiplexed input.
        for (key, value) in &items {
            if self.member_index(key).is_some() {
                continue;
            }
            let ordinal = self.next_ordinal;
            self.next_ordinal += 1;
            let mut child = ChildGraph::build(
                cx.core,
                cx.node,
                ordinal,
                &self.spec.nested.builder,
                now,
            )?;
            child.inject(self.spec.key_node_id, now, key.clone())?;
            if let Some(&target) = self.spec.nested.input_node_ids.get(&self.spec.key_arg) {
                child.inject(target, now, value.clone())?;
            }
            for (index, input) in cx.core.nodes[cx.node].inputs.iter().enumerate() {
                if input.name == self.spec.key_arg {
                    continue;
                }
                let Some(&target) = self.spec.nested.input_node_ids.get(&input.name) else {
                    continue;
                };
                if self.spec.multiplexed_args.contains(&input.name) {
                    if let Some(slice) = cx.input(index)?.get_item(key)? {
                        child.inject(target, now, slice)?;
                    }
                } else if cx.input(index)?.valid()? {
                    child.inject(target, now, cx.input_value(index)?)?;
                }
            }
            self.members.push(FamilyMember {
                key: key.clone(),
                child,
            });
            touched.push(self.members.len() - 1);
        }

        // Update: keys whose slice of the key input changed this tick.
        for key in &modified_keys {
            let Some(position) = self.member_index(key) else {
                continue;
            };
            if let Some(&target) = self.spec.nested.input_node_ids.get(&self.spec.key_arg) {
                if let Some(value) = cx.input(key_input)?.get_item(key)? {
                    self.members[position].child.inject(target, now, value)?;
                }
            }
            touched.push(position);
        }

        // Updates of multiplexed companions.
        for (index, target, keys) in keyed_changed {
            for key in keys {
                let Some(position) = self.member_index(&key) else {
                    continue;
                };
                if let Some(value) = cx.input(index)?.get_item(&key)? {
                    self.members[position].child.inject(target, now, value)?;
                }
                touched.push(position);
            }
        }

        // Whole-input changes reach every child.
        if !whole_changed.is_empty() {
            for (position, member) in self.members.iter_mut().enumerate() {
                for (target, value) in &whole_changed {
                    member.child.inject(*target, now, value.clone())?;
                }
                touched.push(position);
            }
        }

        Ok(touched.into_iter().sorted().dedup().collect())
    }

    /// Member indices whose child has queued work due at or before `now`,
    /// e.g. a wake-up armed on an earlier tick.
    pub fn due_members(&mut self, now: EngineTime) -> Result<Vec<usize>> {
        let mut due = Vec::new();
        for (position, member) in self.members.iter_mut().enumerate() {
            let next = member.child.next_after(EngineTime::MIN)?;
            if next.is_some_and(|when| when <= now) {
                due.push(position);
            }
        }
        Ok(due)
    }

    /// Drives the given members in order and projects modified child outputs
    /// into the keyed parent output.
    pub fn drive(
        &mut self,
        cx: &mut EvalContext<'_>,
        order: impl IntoIterator<Item = usize>,
    ) -> Result<()> {
        let now = cx.now();
        for position in order {
            let member = &mut self.members[position];
            member.child.drive(now)?;
            if let Some(value) = member
                .child
                .output_if_modified(self.spec.nested.output_node_id, now)?
            {
                let key = member.key.clone();
                cx.output()?.insert(key, value)?;
            }
        }
        Ok(())
    }

    /// Schedules the owning node at the earliest future time any child has
    /// queued work.
    pub fn reschedule(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let after = cx.now().next();
        let mut earliest: Option<EngineTime> = None;
        for member in &mut self.members {
            if let Some(when) = member.child.next_after(after)? {
                earliest = Some(earliest.map_or(when, |current| current.min(when)));
            }
        }
        if let Some(when) = earliest {
            cx.schedule(when, CHILD_TICK_TAG);
        }
        Ok(())
    }

    /// Tears every child down, newest first.
    pub fn shutdown_all(&mut self) -> Result<()> {
        while let Some(mut member) = self.members.pop() {
            member.child.shutdown()?;
        }
        Ok(())
    }

    /// Visits every child graph, for life-cycle enumeration.
    pub fn visit(&self, visit: &mut dyn FnMut(&Graph)) {
        for member in &self.members {
            visit(&member.child.graph);
        }
    }
}
