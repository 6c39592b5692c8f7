//! Node metadata, the node body trait, and per-node scheduling.

use std::collections::BTreeMap;

use crate::arena::Idx;
use crate::error::Result;
use crate::graph::{EvalContext, Graph};
use crate::push::PushQueue;
use crate::time::EngineTime;
use crate::ts::{InputSlot, Notifier, TsId};

/// Tag for node indices.
pub enum NodeTag {}

/// Index of a node within its graph.
pub type NodeId = Idx<NodeTag>;

/// Per-node wake-up requests: one tagged entry per future engine time.
///
/// Backed by an ordered map so retraction is cheap; the graph queue sees at
/// most one entry per `(node, time)` pair.
#[derive(Debug, Default)]
pub struct NodeScheduler {
    entries: BTreeMap<EngineTime, u64>,
}

impl NodeScheduler {
    /// An empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a wake-up at `when`, replacing any tag already there.
    /// Returns true when the time was not yet requested.
    pub fn schedule(&mut self, when: EngineTime, tag: u64) -> bool {
        self.entries.insert(when, tag).is_none()
    }

    /// Retracts the wake-up at `when`, if requested.
    pub fn cancel(&mut self, when: EngineTime) -> bool {
        self.entries.remove(&when).is_some()
    }

    /// The earliest requested wake-up.
    pub fn next(&self) -> Option<EngineTime> {
        self.entries.keys().next().copied()
    }

    /// Takes the entry due at exactly `now`, discarding anything stale.
    pub fn pop_due(&mut self, now: EngineTime) -> Option<u64> {
        while let Some((&when, _)) = self.entries.iter().next() {
            if when > now {
                return None;
            }
            let tag = self.entries.remove(&when);
            if when == now {
                return tag;
            }
        }
        None
    }

    /// True when nothing is requested.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the graph knows about one node besides its behavior.
#[derive(Debug)]
pub struct NodeMeta {
    /// The node's index within its graph.
    pub index: NodeId,
    /// Display name from the signature.
    pub name: String,
    /// Node kind, for events and errors.
    pub kind: &'static str,
    /// Named inputs in signature order.
    pub inputs: Vec<InputSlot>,
    /// Main output endpoint, if declared.
    pub output: Option<TsId>,
    /// Error output endpoint, if declared.
    pub error_output: Option<TsId>,
    /// Recordable-state output endpoint, if declared.
    pub state_output: Option<TsId>,
    /// Pending wake-up requests.
    pub scheduler: NodeScheduler,
    /// Set between `start` and `stop`.
    pub started: bool,
    /// True for push-queue sources.
    pub is_push_source: bool,
    /// True for pull sources (self-scheduling).
    pub is_pull_source: bool,
}

impl NodeMeta {
    /// The notifier downstream outputs register for this node.
    pub fn notifier(&self) -> Notifier {
        Notifier { node: self.index }
    }

    /// Position of a named input.
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|input| input.name == name)
    }
}

/// The behavior of one node.
///
/// Bodies are driven by the graph: `start` once after construction, `eval`
/// whenever an active input was modified at the current engine time, a
/// wake-up is due, or a source has a pending tick; `stop` once in reverse
/// index order. All default to no-ops so sinks and stubs stay trivial.
pub trait NodeBody {
    /// Called when the owning graph starts, in node index order.
    fn start(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    /// Called once per tick the node is scheduled in.
    fn eval(&mut self, cx: &mut EvalContext<'_>) -> Result<()>;

    /// Called when the owning graph stops, in reverse node index order.
    fn stop(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    /// The push queue of a push-source node.
    fn push_queue(&mut self) -> Option<&mut PushQueue> {
        None
    }

    /// Visits child graphs of nested nodes, for life-cycle enumeration.
    fn visit_children(&self, visit: &mut dyn FnMut(&Graph)) {
        let _ = visit;
    }
}

/// A body with no behavior: projection sinks and stub sources whose outputs
/// are written from outside.
pub struct StubBody;

impl NodeBody for StubBody {
    fn eval(&mut self, _cx: &mut EvalContext<'_>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_orders_and_retracts() {
        let mut scheduler = NodeScheduler::new();
        assert!(scheduler.schedule(EngineTime::from_secs(5), 1));
        assert!(scheduler.schedule(EngineTime::from_secs(3), 2));
        assert!(!scheduler.schedule(EngineTime::from_secs(3), 9));
        assert_eq!(scheduler.next(), Some(EngineTime::from_secs(3)));

        assert!(scheduler.cancel(EngineTime::from_secs(3)));
        assert!(!scheduler.cancel(EngineTime::from_secs(3)));
        assert_eq!(scheduler.next(), Some(EngineTime::from_secs(5)));

        assert_eq!(scheduler.pop_due(EngineTime::from_secs(4)), None);
        assert_eq!(scheduler.pop_due(EngineTime::from_secs(5)), Some(1));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn stale_entries_are_discarded() {
        let mut scheduler = NodeScheduler::new();
        scheduler.schedule(EngineTime::from_secs(1), 1);
        scheduler.schedule(EngineTime::from_secs(2), 2);
        // A pop at t=2 discards the missed t=1 entry and yields t=2's tag.
        assert_eq!(scheduler.pop_due(EngineTime::from_secs(2)), Some(2));
        assert!(scheduler.is_empty());
    }
}
