//! Life-cycle events and observers.
//!
//! The executor and each graph announce fourteen callback points around
//! graph start/stop, tick evaluation, push-queue draining, and per-node
//! start/eval/stop. Handlers implement [`LifecycleObserver`]; every callback
//! is also mirrored as an [`EngineEvent`] record into an optional
//! [`Logger`](chronoflow_logging::Logger) stream named `"chronoflow"`.

use std::cell::RefCell;
use std::rc::Rc;

use chronoflow_logging::Logger;

use crate::graph::GraphId;
use crate::time::EngineTime;

/// A structured life-cycle event record.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    /// Graph start is beginning / has finished.
    GraphStart {
        /// Graph being started.
        graph: GraphId,
        /// False before, true after.
        done: bool,
    },
    /// Graph stop is beginning / has finished.
    GraphStop {
        /// Graph being stopped.
        graph: GraphId,
        /// False before, true after.
        done: bool,
    },
    /// One tick of a graph is beginning / has finished.
    GraphEval {
        /// Graph being evaluated.
        graph: GraphId,
        /// Engine time of the tick.
        when: EngineTime,
        /// False before, true after.
        done: bool,
    },
    /// Push queues are about to be / have been drained for a tick.
    PushDrain {
        /// Graph whose push sources are drained.
        graph: GraphId,
        /// Engine time of the tick.
        when: EngineTime,
        /// False before, true after.
        done: bool,
    },
    /// A node is starting / has started.
    NodeStart {
        /// Owning graph.
        graph: GraphId,
        /// Node index within the graph.
        node: usize,
        /// False before, true after.
        done: bool,
    },
    /// A node is evaluating / has evaluated.
    NodeEval {
        /// Owning graph.
        graph: GraphId,
        /// Node index within the graph.
        node: usize,
        /// Engine time of the evaluation.
        when: EngineTime,
        /// False before, true after.
        done: bool,
    },
    /// A node is stopping / has stopped.
    NodeStop {
        /// Owning graph.
        graph: GraphId,
        /// Node index within the graph.
        node: usize,
        /// False before, true after.
        done: bool,
    },
}

/// The fourteen life-cycle callback points. Every method defaults to a no-op
/// so observers implement only what they care about.
#[allow(unused_variables)]
pub trait LifecycleObserver {
    /// Before a graph's nodes start.
    fn on_before_start_graph(&self, graph: &GraphId) {}
    /// After a graph's nodes started.
    fn on_after_start_graph(&self, graph: &GraphId) {}
    /// Before one tick of a graph.
    fn on_before_graph_eval(&self, graph: &GraphId, when: EngineTime) {}
    /// After one tick of a graph.
    fn on_after_graph_eval(&self, graph: &GraphId, when: EngineTime) {}
    /// Before push queues are drained into a tick.
    fn on_before_push_drain(&self, graph: &GraphId, when: EngineTime) {}
    /// After push queues were drained into a tick.
    fn on_after_push_drain(&self, graph: &GraphId, when: EngineTime) {}
    /// Before one node starts.
    fn on_before_node_start(&self, graph: &GraphId, node: usize) {}
    /// After one node started.
    fn on_after_node_start(&self, graph: &GraphId, node: usize) {}
    /// Before one node evaluates.
    fn on_before_node_eval(&self, graph: &GraphId, node: usize, when: EngineTime) {}
    /// After one node evaluated.
    fn on_after_node_eval(&self, graph: &GraphId, node: usize, when: EngineTime) {}
    /// Before one node stops.
    fn on_before_node_stop(&self, graph: &GraphId, node: usize) {}
    /// After one node stopped.
    fn on_after_node_stop(&self, graph: &GraphId, node: usize) {}
    /// Before a graph's nodes stop.
    fn on_before_stop_graph(&self, graph: &GraphId) {}
    /// After a graph's nodes stopped.
    fn on_after_stop_graph(&self, graph: &GraphId) {}
}

/// The set of registered observers plus the optional event logger, shared by
/// a root graph and every nested graph under it.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Rc<RefCell<Vec<Rc<dyn LifecycleObserver>>>>,
    logger: Rc<RefCell<Option<Logger<EngineEvent>>>>,
}

macro_rules! dispatch {
    ($self:ident, $method:ident ( $($arg:expr),* ), $event:expr) => {{
        for observer in $self.observers.borrow().iter() {
            observer.$method($($arg),*);
        }
        if let Some(logger) = $self.logger.borrow().as_ref() {
            logger.log($event);
        }
    }};
}

impl ObserverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a life-cycle observer.
    pub fn register(&self, observer: Rc<dyn LifecycleObserver>) {
        self.observers.borrow_mut().push(observer);
    }

    /// Attaches the `"chronoflow"` event stream.
    pub fn set_logger(&self, logger: Logger<EngineEvent>) {
        *self.logger.borrow_mut() = Some(logger);
    }

    /// Flushes the event stream, if attached.
    pub fn flush(&self) {
        if let Some(logger) = self.logger.borrow().as_ref() {
            logger.flush();
        }
    }

    pub(crate) fn before_start_graph(&self, graph: &GraphId) {
        dispatch!(self, on_before_start_graph(graph), EngineEvent::GraphStart { graph: graph.clone(), done: false });
    }
    pub(crate) fn after_start_graph(&self, graph: &GraphId) {
        dispatch!(self, on_after_start_graph(graph), EngineEvent::GraphStart { graph: graph.clone(), done: true });
    }
    pub(crate) fn before_graph_eval(&self, graph: &GraphId, when: EngineTime) {
        dispatch!(self, on_before_graph_eval(graph, when), EngineEvent::GraphEval { graph: graph.clone(), when, done: false });
    }
    pub(crate) fn after_graph_eval(&self, graph: &GraphId, when: EngineTime) {
        dispatch!(self, on_after_graph_eval(graph, when), EngineEvent::GraphEval { graph: graph.clone(), when, done: true });
    }
    pub(crate) fn before_push_drain(&self, graph: &GraphId, when: EngineTime) {
        dispatch!(self, on_before_push_drain(graph, when), EngineEvent::PushDrain { graph: graph.clone(), when, done: false });
    }
    pub(crate) fn after_push_drain(&self, graph: &GraphId, when: EngineTime) {
        dispatch!(self, on_after_push_drain(graph, when), EngineEvent::PushDrain { graph: graph.clone(), when, done: true });
    }
    pub(crate) fn before_node_start(&self, graph: &GraphId, node: usize) {
        dispatch!(self, on_before_node_start(graph, node), EngineEvent::NodeStart { graph: graph.clone(), node, done: false });
    }
    pub(crate) fn after_node_start(&self, graph: &GraphId, node: usize) {
        dispatch!(self, on_after_node_start(graph, node), EngineEvent::NodeStart { graph: graph.clone(), node, done: true });
    }
    pub(crate) fn before_node_eval(&self, graph: &GraphId, node: usize, when: EngineTime) {
        dispatch!(self, on_before_node_eval(graph, node, when), EngineEvent::NodeEval { graph: graph.clone(), node, when, done: false });
    }
    pub(crate) fn after_node_eval(&self, graph: &GraphId, node: usize, when: EngineTime) {
        dispatch!(self, on_after_node_eval(graph, node, when), EngineEvent::NodeEval { graph: graph.clone(), node, when, done: true });
    }
    pub(crate) fn before_node_stop(&self, graph: &GraphId, node: usize) {
        dispatch!(self, on_before_node_stop(graph, node), EngineEvent::NodeStop { graph: graph.clone(), node, done: false });
    }
    pub(crate) fn after_node_stop(&self, graph: &GraphId, node: usize) {
        dispatch!(self, on_after_node_stop(graph, node), EngineEvent::NodeStop { graph: graph.clone(), node, done: true });
    }
    pub(crate) fn before_stop_graph(&self, graph: &GraphId) {
        dispatch!(self, on_before_stop_graph(graph), EngineEvent::GraphStop { graph: graph.clone(), done: false });
    }
    pub(crate) fn after_stop_graph(&self, graph: &GraphId) {
        dispatch!(self, on_after_stop_graph(graph), EngineEvent::GraphStop { graph: graph.clone(), done: true });
    }
}
