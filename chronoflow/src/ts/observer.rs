//! Observer lists: the subscription half of modification fan-out.
//!
//! An [`ObserverList`] is an insertion-ordered set of notifiers, one per
//! active downstream input. Notification never calls back into user code
//! directly; it appends `(node, time)` activations to the graph's pending
//! sink, which the scheduler folds into the current tick. Mutation during
//! fan-out is safe because iteration walks a snapshot of the entries.

use smallvec::SmallVec;

use crate::node::NodeId;
use crate::time::EngineTime;
use crate::types::SlotObserver;

/// Activations produced by fan-out, drained by the scheduler.
pub type ActivationSink = Vec<(NodeId, EngineTime)>;

/// The target of one subscription: the node whose input observes the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Notifier {
    /// Node to activate when the observed endpoint changes.
    pub node: NodeId,
}

/// An insertion-ordered set of notifiers.
#[derive(Clone, Debug, Default)]
pub struct ObserverList {
    entries: SmallVec<[Notifier; 2]>,
}

impl ObserverList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a notifier; re-registration keeps the original position.
    pub fn add_observer(&mut self, notifier: Notifier) {
        if !self.entries.contains(&notifier) {
            self.entries.push(notifier);
        }
    }

    /// Removes a notifier if registered.
    pub fn remove_observer(&mut self, notifier: Notifier) {
        self.entries.retain(|entry| *entry != notifier);
    }

    /// Number of registered notifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered notifiers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = Notifier> + '_ {
        self.entries.iter().copied()
    }

    /// Fans a modification at `now` out to every registered notifier.
    ///
    /// Iterates a snapshot so observers may be added or removed while the
    /// fan-out is in flight without skipping or double-notifying anyone
    /// registered at the start.
    pub fn notify_modified(&self, sink: &mut ActivationSink, now: EngineTime) {
        let snapshot: SmallVec<[Notifier; 2]> = self.entries.clone();
        for notifier in snapshot {
            sink.push((notifier.node, now));
        }
    }

    /// Fires removal exactly once per still-registered notifier, then clears
    /// the list.
    pub fn notify_removed(&mut self, sink: &mut ActivationSink, now: EngineTime) {
        let snapshot: SmallVec<[Notifier; 2]> = std::mem::take(&mut self.entries);
        for notifier in snapshot {
            sink.push((notifier.node, now));
        }
    }
}

/// Per-slot observer lists for collection kinds, attached to a
/// [`KeySet`](crate::types::KeySet) as a slot observer.
#[derive(Clone, Debug, Default)]
pub struct ObserverArray {
    slots: Vec<ObserverList>,
}

impl ObserverArray {
    /// An empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot capacity; equals the owning key set's capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The observer list of `slot`.
    pub fn slot(&self, slot: usize) -> &ObserverList {
        &self.slots[slot]
    }

    /// The observer list of `slot`, mutably.
    pub fn slot_mut(&mut self, slot: usize) -> &mut ObserverList {
        &mut self.slots[slot]
    }
}

impl SlotObserver for ObserverArray {
    fn on_capacity(&mut self, capacity: usize) {
        self.slots.resize_with(capacity, ObserverList::new);
    }
    fn on_insert(&mut self, _slot: usize) {}
    fn on_erase(&mut self, slot: usize) {
        // Removal notification happens before the erase; see DictStore.
        self.slots[slot] = ObserverList::new();
    }
    fn on_update(&mut self, _slot: usize) {}
    fn on_clear(&mut self) {
        self.slots.iter_mut().for_each(|list| *list = ObserverList::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier(raw: usize) -> Notifier {
        Notifier {
            node: NodeId::from_raw(raw),
        }
    }

    #[test]
    fn insertion_order_and_dedup() {
        let mut list = ObserverList::new();
        list.add_observer(notifier(3));
        list.add_observer(notifier(1));
        list.add_observer(notifier(3));
        assert_eq!(list.len(), 2);

        let mut sink = ActivationSink::new();
        list.notify_modified(&mut sink, EngineTime::from_nanos(5));
        let order: Vec<usize> = sink.iter().map(|(node, _)| node.raw()).collect();
        assert_eq!(order, vec![3, 1]);
    }

    #[test]
    fn removal_fires_once_and_clears() {
        let mut list = ObserverList::new();
        list.add_observer(notifier(1));
        list.add_observer(notifier(2));
        list.remove_observer(notifier(1));

        let mut sink = ActivationSink::new();
        list.notify_removed(&mut sink, EngineTime::from_nanos(1));
        assert_eq!(sink.len(), 1);
        assert!(list.is_empty());

        // Nothing fires twice.
        list.notify_removed(&mut sink, EngineTime::from_nanos(1));
        assert_eq!(sink.len(), 1);
    }
}
