//! Graphs: node and time-series ownership, traits, and life-cycle.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::arena::SlotVec;
use crate::error::{EngineError, Result};
use crate::events::ObserverRegistry;
use crate::node::{NodeBody, NodeId, NodeMeta, NodeTag};
use crate::time::EngineTime;
use crate::ts::reference::sync_ref_subscription;
use crate::ts::{ActivationSink, TsArena, TsOutputView, TsView, ViewData};
use crate::types::Value;

/// An ordered path naming a graph: empty for the root, extended by
/// `(owning node index, instance ordinal)` for each nesting level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(Vec<usize>);

impl GraphId {
    /// The root graph's id.
    pub fn root() -> Self {
        GraphId(Vec::new())
    }

    /// The id of a nested graph owned by `node`, instance `ordinal`.
    pub fn child(&self, node: usize, ordinal: usize) -> Self {
        let mut path = self.0.clone();
        path.push(node);
        path.push(ordinal);
        GraphId(path)
    }

    /// The raw component sequence.
    pub fn path(&self) -> &[usize] {
        &self.0
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "root");
        }
        write!(f, "root")?;
        for component in &self.0 {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

/// A parent-chained mapping from names to opaque values, copy-on-write at
/// graph boundaries: lookups walk parents until found.
#[derive(Clone, Default)]
pub struct Traits {
    inner: Rc<TraitsNode>,
}

#[derive(Default)]
struct TraitsNode {
    parent: Option<Traits>,
    map: RefCell<FxHashMap<String, Rc<dyn Any>>>,
}

impl Traits {
    /// A fresh, empty root.
    pub fn new() -> Self {
        Self::default()
    }

    /// A child layer over `self`; writes land in the child only.
    pub fn chain(&self) -> Traits {
        Traits {
            inner: Rc::new(TraitsNode {
                parent: Some(self.clone()),
                map: RefCell::new(FxHashMap::default()),
            }),
        }
    }

    /// Sets a trait in this layer.
    pub fn set(&self, name: impl Into<String>, value: Rc<dyn Any>) {
        self.inner.map.borrow_mut().insert(name.into(), value);
    }

    /// Looks a trait up, walking parent layers.
    pub fn get(&self, name: &str) -> Option<Rc<dyn Any>> {
        if let Some(found) = self.inner.map.borrow().get(name) {
            return Some(Rc::clone(found));
        }
        self.inner.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// Typed lookup.
    pub fn get_as<T: 'static + Clone>(&self, name: &str) -> Option<T> {
        self.get(name)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }
}

/// Where a graph is in its life-cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphStatus {
    /// Built, not yet started.
    Created,
    /// Start in progress; re-entry is a bug.
    Starting,
    /// Running.
    Started,
    /// Stop in progress.
    Stopping,
    /// Stopped; may be disposed.
    Stopped,
    /// Storage torn down.
    Disposed,
}

/// The data half of a graph: everything node bodies may touch during eval.
pub struct GraphCore {
    /// This graph's id path.
    pub id: GraphId,
    /// Display name.
    pub name: String,
    /// Node metadata in index order.
    pub nodes: SlotVec<NodeTag, NodeMeta>,
    /// Time-series arena.
    pub arena: TsArena,
    /// Time-ordered multimap of scheduled node firings; insertion order is
    /// preserved within one time.
    pub queue: BTreeMap<EngineTime, Vec<NodeId>>,
    /// Activations produced by fan-out during the current operation.
    pub pending: ActivationSink,
    /// Current engine time.
    pub now: EngineTime,
    /// Parent-chained traits.
    pub traits: Traits,
    /// Push-source node subset.
    pub push_sources: Vec<NodeId>,
    /// Pull-source node subset.
    pub pull_sources: Vec<NodeId>,
    /// Life-cycle position.
    pub status: GraphStatus,
    /// Life-cycle observers shared with nested graphs.
    pub observers: ObserverRegistry,
    /// Cooperative stop flag, checked at tick boundaries.
    pub stop_flag: Arc<AtomicBool>,
    /// Wake signal push producers buzz, shared down to nested graphs.
    pub wake: Arc<crate::push::WakeSignal>,
}

impl GraphCore {
    /// Queues `node` at `when` (clamped forward to the current engine time),
    /// keeping at most one entry per `(time, node)` pair.
    pub fn schedule_node(&mut self, node: NodeId, when: EngineTime) {
        let when = if self.now.is_set() { when.max(self.now) } else { when };
        let entries = self.queue.entry(when).or_default();
        if !entries.contains(&node) {
            entries.push(node);
        }
    }

    /// Retracts a queued `(time, node)` entry.
    pub fn retract_node(&mut self, node: NodeId, when: EngineTime) {
        if let Some(entries) = self.queue.get_mut(&when) {
            entries.retain(|entry| *entry != node);
            if entries.is_empty() {
                self.queue.remove(&when);
            }
        }
    }

    /// Moves activations gathered outside a tick into the queue.
    pub fn fold_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (node, when) in pending {
            self.schedule_node(node, when);
        }
    }

    /// The earliest queued firing time.
    pub fn next_queued(&self) -> Option<EngineTime> {
        self.queue.keys().next().copied()
    }

    /// Rendered node path for events and errors.
    pub fn node_path(&self, node: NodeId) -> String {
        format!("{}/{}:{}", self.id, node.raw(), self.nodes[node].name)
    }

    /// True when a stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }
}

/// A graph: core state plus the behavior of each node.
pub struct Graph {
    /// Shared data half.
    pub core: GraphCore,
    /// Node bodies, parallel to `core.nodes`.
    pub bodies: SlotVec<NodeTag, RefCell<Box<dyn NodeBody>>>,
}

impl Graph {
    /// Starts every node in index order, guarded against re-entry.
    ///
    /// Activates each node's default-active inputs first, so modifications
    /// produced by `start` bodies propagate immediately.
    pub fn start(&mut self, at: EngineTime) -> Result<()> {
        match self.core.status {
            GraphStatus::Created | GraphStatus::Stopped => {}
            _ => return Err(EngineError::AlreadyStarted(self.core.id.to_string())),
        }
        self.core.status = GraphStatus::Starting;
        self.core.now = at;
        let observers = self.core.observers.clone();
        observers.before_start_graph(&self.core.id);

        for node in self.core.nodes.keys().collect::<Vec<_>>() {
            observers.before_node_start(&self.core.id, node.raw());
            self.activate_default_inputs(node);
            let outcome = {
                let mut body = self.bodies[node].borrow_mut();
                body.start(&mut EvalContext {
                    core: &mut self.core,
                    node,
                    tag: None,
                })
            };
            outcome?;
            self.core.nodes[node].started = true;
            observers.after_node_start(&self.core.id, node.raw());
        }

        self.core.status = GraphStatus::Started;
        observers.after_start_graph(&self.core.id);
        self.core.fold_pending();
        Ok(())
    }

    /// Stops every node in reverse index order, deactivating and unbinding
    /// inputs so that teardown finds no live binds.
    pub fn stop(&mut self) -> Result<()> {
        if self.core.status != GraphStatus::Started {
            return Err(EngineError::NotStarted(self.core.id.to_string()));
        }
        self.core.status = GraphStatus::Stopping;
        let observers = self.core.observers.clone();
        observers.before_stop_graph(&self.core.id);

        for node in self.core.nodes.keys().collect::<Vec<_>>().into_iter().rev() {
            observers.before_node_stop(&self.core.id, node.raw());
            let outcome = {
                let mut body = self.bodies[node].borrow_mut();
                body.stop(&mut EvalContext {
                    core: &mut self.core,
                    node,
                    tag: None,
                })
            };
            outcome?;
            let meta = &mut self.core.nodes[node];
            let notifier = meta.notifier();
            for input in &mut meta.inputs {
                input.make_passive(&mut self.core.arena, notifier);
                input.un_bind_output(&mut self.core.arena, notifier);
            }
            meta.started = false;
            observers.after_node_stop(&self.core.id, node.raw());
        }

        self.core.status = GraphStatus::Stopped;
        observers.after_stop_graph(&self.core.id);
        Ok(())
    }

    /// Tears the arena down in reverse construction order.
    ///
    /// Any output still carrying bound observers is a structural bug,
    /// surfaced as `DanglingBind`.
    pub fn dispose(&mut self) -> Result<()> {
        match self.core.status {
            GraphStatus::Created | GraphStatus::Stopped => {}
            GraphStatus::Disposed => return Ok(()),
            _ => return Err(EngineError::AlreadyStarted(self.core.id.to_string())),
        }
        for (node, meta) in self.core.nodes.iter() {
            if let Some(output) = meta.output {
                let count = self.core.arena[output].observers().len();
                if count > 0 {
                    return Err(EngineError::DanglingBind {
                        node: node.raw(),
                        count,
                    });
                }
            }
        }
        self.core.arena.clear_reverse();
        self.core.queue.clear();
        self.core.status = GraphStatus::Disposed;
        Ok(())
    }

    /// Whether the graph is between `start` and `stop`.
    pub fn is_started(&self) -> bool {
        self.core.status == GraphStatus::Started
    }

    /// Visits the child graphs of every nested node, for life-cycle
    /// observer enumeration.
    pub fn visit_nested(&self, visit: &mut dyn FnMut(&Graph)) {
        for node in self.core.nodes.keys() {
            self.bodies[node].borrow().visit_children(visit);
        }
    }

    /// Read view over a node's main output.
    pub fn output_view(&self, node: NodeId) -> Result<TsView<'_>> {
        let output = self.core.nodes[node]
            .output
            .ok_or_else(|| EngineError::NotBound(self.core.node_path(node)))?;
        Ok(TsView::new(&self.core.arena, ViewData::root(output)))
    }

    /// Writes a node's main output from outside a tick, folding the
    /// resulting activations into the queue. Used to inject values into
    /// stub sources of nested graphs.
    pub fn inject_output(&mut self, node: NodeId, at: EngineTime, value: Value) -> Result<()> {
        let output = self.core.nodes[node]
            .output
            .ok_or_else(|| EngineError::NotBound(self.core.node_path(node)))?;
        let GraphCore { arena, pending, .. } = &mut self.core;
        TsOutputView::new(arena, pending, at, ViewData::root(output)).set_value(value)?;
        self.core.fold_pending();
        Ok(())
    }

    fn activate_default_inputs(&mut self, node: NodeId) {
        let meta = &mut self.core.nodes[node];
        let notifier = meta.notifier();
        for input in &mut meta.inputs {
            if input.default_active {
                input.make_active(&mut self.core.arena, notifier);
            }
        }
    }

    /// Evaluates one node at the current engine time, publishing recoverable
    /// user errors to the node's error output when it has one.
    pub(crate) fn eval_node(&mut self, node: NodeId) -> Result<()> {
        let now = self.core.now;
        let observers = self.core.observers.clone();
        observers.before_node_eval(&self.core.id, node.raw(), now);
        let tag = self.core.nodes[node].scheduler.pop_due(now);
        let outcome = {
            let mut body = self.bodies[node].borrow_mut();
            body.eval(&mut EvalContext {
                core: &mut self.core,
                node,
                tag,
            })
        };
        self.sync_ref_inputs(node);
        let result = match outcome {
            Err(err) if err.is_recoverable() && self.core.nodes[node].error_output.is_some() => {
                let error_output = self.core.nodes[node].error_output.expect("checked above");
                let GraphCore { arena, pending, .. } = &mut self.core;
                TsOutputView::new(arena, pending, now, ViewData::root(error_output))
                    .set_value(Value::Str(err.to_string()))?;
                Ok(())
            }
            other => other,
        };
        observers.after_node_eval(&self.core.id, node.raw(), now);
        result
    }

    /// Re-aims REF subscriptions after a node observed a retarget.
    fn sync_ref_inputs(&mut self, node: NodeId) {
        let GraphCore { nodes, arena, .. } = &mut self.core;
        let meta = &mut nodes[node];
        let notifier = meta.notifier();
        for input in &mut meta.inputs {
            sync_ref_subscription(input, arena, notifier);
        }
    }
}

/// What a node body sees while starting, evaluating, or stopping.
pub struct EvalContext<'a> {
    /// The owning graph's data half.
    pub core: &'a mut GraphCore,
    /// The node being driven.
    pub node: NodeId,
    /// Tag of the wake-up entry due this tick, if the node was woken by its
    /// scheduler.
    pub tag: Option<u64>,
}

impl EvalContext<'_> {
    /// Current engine time.
    pub fn now(&self) -> EngineTime {
        self.core.now
    }

    /// Alias of [`EvalContext::now`], matching the engine-clock vocabulary.
    pub fn evaluation_time(&self) -> EngineTime {
        self.core.now
    }

    /// The earliest future firing already queued in this graph.
    pub fn next_scheduled_time(&self) -> Option<EngineTime> {
        self.core.next_queued()
    }

    /// The wall clock, independent of the engine clock.
    pub fn wall_clock_now(&self) -> EngineTime {
        EngineTime::wall_clock()
    }

    /// The graph's id path.
    pub fn graph_id(&self) -> &GraphId {
        &self.core.id
    }

    /// The graph's traits.
    pub fn traits(&self) -> &Traits {
        &self.core.traits
    }

    /// Number of declared inputs.
    pub fn input_count(&self) -> usize {
        self.core.nodes[self.node].inputs.len()
    }

    /// Read view over the `index`th input.
    pub fn input(&self, index: usize) -> Result<TsView<'_>> {
        self.core.nodes[self.node].inputs[index].view(&self.core.arena)
    }

    /// Read view over the named input.
    pub fn input_by_name(&self, name: &str) -> Result<TsView<'_>> {
        let index = self.core.nodes[self.node]
            .input_index(name)
            .ok_or_else(|| EngineError::NotBound(name.to_owned()))?;
        self.input(index)
    }

    /// The `index`th input's value, dereferencing REF inputs.
    pub fn input_value(&self, index: usize) -> Result<Value> {
        let view = self.input(index)?;
        if self.core.nodes[self.node].inputs[index].is_reference(&self.core.arena) {
            view.deref()?.value()
        } else {
            view.value()
        }
    }

    /// Write view over the node's main output.
    pub fn output(&mut self) -> Result<TsOutputView<'_>> {
        let output = self.core.nodes[self.node]
            .output
            .ok_or_else(|| EngineError::NotBound(self.core.node_path(self.node)))?;
        let GraphCore {
            arena,
            pending,
            now,
            ..
        } = &mut *self.core;
        Ok(TsOutputView::new(arena, pending, *now, ViewData::root(output)))
    }

    /// Write view over the node's recordable-state output.
    pub fn state_output(&mut self) -> Result<TsOutputView<'_>> {
        let output = self.core.nodes[self.node]
            .state_output
            .ok_or_else(|| EngineError::NotBound(self.core.node_path(self.node)))?;
        let GraphCore {
            arena,
            pending,
            now,
            ..
        } = &mut *self.core;
        Ok(TsOutputView::new(arena, pending, *now, ViewData::root(output)))
    }

    /// Requests a tagged wake-up at `when`.
    pub fn schedule(&mut self, when: EngineTime, tag: u64) {
        let node = self.node;
        if self.core.nodes[node].scheduler.schedule(when, tag) {
            self.core.schedule_node(node, when);
        }
    }

    /// Retracts the wake-up at `when`.
    pub fn cancel(&mut self, when: EngineTime) {
        let node = self.node;
        if self.core.nodes[node].scheduler.cancel(when) {
            self.core.retract_node(node, when);
        }
    }

    /// Toggles an input's activity.
    pub fn set_input_active(&mut self, index: usize, active: bool) {
        let GraphCore { nodes, arena, .. } = &mut *self.core;
        let meta = &mut nodes[self.node];
        let notifier = meta.notifier();
        let input = &mut meta.inputs[index];
        if active {
            input.make_active(arena, notifier);
        } else {
            input.make_passive(arena, notifier);
        }
    }

    /// A user-error value carrying this node's path and the current time.
    pub fn user_error(&self, message: impl Into<String>) -> EngineError {
        EngineError::user(self.core.node_path(self.node), self.core.now, message)
    }
}
