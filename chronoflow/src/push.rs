//! Push-source queues: the only cross-thread interface of the engine.
//!
//! Producers enqueue messages over a lock-free MPSC channel and buzz the
//! engine's wake signal; the engine drains each queue from its own thread
//! once per outer iteration. Queue bounds are enforced at ingestion with a
//! per-node overflow policy.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::time::EngineTime;
use crate::types::Value;

/// What to do when a bounded push queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Evict the oldest queued message.
    #[default]
    DropOldest,
    /// Drop the incoming message.
    DropNewest,
    /// Surface `PushQueueOverflow` to the engine.
    Raise,
}

/// One externally produced event.
#[derive(Clone, Debug)]
pub struct PushMessage {
    /// Engine time the message asks to be delivered at. Deliveries never go
    /// backwards: a late message is applied at the current engine time.
    pub when: EngineTime,
    /// Message payload.
    pub value: Value,
}

/// Wakes a sleeping engine when producers enqueue.
#[derive(Default)]
pub struct WakeSignal {
    flag: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    /// A fresh, unsignalled wake flag.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Signals the engine; called from producer threads.
    pub fn buzz(&self) {
        let mut flag = self.flag.lock().expect("wake flag poisoned");
        *flag = true;
        self.condvar.notify_all();
    }

    /// Parks the engine thread until buzzed or `timeout` elapses. Returns
    /// true when woken by a buzz.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock().expect("wake flag poisoned");
        if !*flag {
            let (guard, _) = self
                .condvar
                .wait_timeout(flag, timeout)
                .expect("wake flag poisoned");
            flag = guard;
        }
        std::mem::take(&mut *flag)
    }

    /// Clears a pending buzz without waiting.
    pub fn take(&self) -> bool {
        std::mem::take(&mut *self.flag.lock().expect("wake flag poisoned"))
    }
}

/// The producer handle of a push queue. Cheap to clone, safe to send across
/// threads; never blocks the engine and holds no engine locks.
#[derive(Clone)]
pub struct PushSender {
    tx: Sender<PushMessage>,
    wake: Arc<WakeSignal>,
}

impl PushSender {
    /// Enqueues a message stamped with the current wall clock.
    pub fn send(&self, value: Value) {
        self.send_at(EngineTime::wall_clock(), value);
    }

    /// Enqueues a message asking for delivery at `when`.
    pub fn send_at(&self, when: EngineTime, value: Value) {
        // The engine owns the receiver for its whole life; a send can only
        // fail after teardown, when nobody is listening anyway.
        let _ = self.tx.send(PushMessage { when, value });
        self.wake.buzz();
    }
}

/// The engine half of a push queue.
pub struct PushQueue {
    rx: Receiver<PushMessage>,
    tx: Sender<PushMessage>,
    wake: Arc<WakeSignal>,
    pending: VecDeque<PushMessage>,
    capacity: Option<usize>,
    policy: OverflowPolicy,
    overflowed: bool,
}

impl PushQueue {
    /// A queue with the given bound and policy, buzzing `wake` on enqueue.
    pub fn new(capacity: Option<usize>, policy: OverflowPolicy, wake: Arc<WakeSignal>) -> Self {
        let (tx, rx) = unbounded();
        PushQueue {
            rx,
            tx,
            wake,
            pending: VecDeque::new(),
            capacity,
            policy,
            overflowed: false,
        }
    }

    /// A new producer handle.
    pub fn sender(&self) -> PushSender {
        PushSender {
            tx: self.tx.clone(),
            wake: Arc::clone(&self.wake),
        }
    }

    /// Drains the channel into the pending buffer, applying the bound.
    /// Returns false when the `Raise` policy tripped.
    pub fn pump(&mut self) -> bool {
        while let Ok(message) = self.rx.try_recv() {
            match self.capacity {
                Some(capacity) if self.pending.len() >= capacity => match self.policy {
                    OverflowPolicy::DropOldest => {
                        self.pending.pop_front();
                        self.pending.push_back(message);
                    }
                    OverflowPolicy::DropNewest => {}
                    OverflowPolicy::Raise => {
                        self.overflowed = true;
                    }
                },
                _ => self.pending.push_back(message),
            }
        }
        !self.overflowed
    }

    /// Configured capacity, if bounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// True once the `Raise` policy tripped; sticky until observed.
    pub fn take_overflow(&mut self) -> bool {
        std::mem::take(&mut self.overflowed)
    }

    /// Delivery time the head message asks for.
    pub fn peek_time(&self) -> Option<EngineTime> {
        self.pending.front().map(|message| message.when)
    }

    /// Pops the head message when it is due at or before `now`.
    pub fn pop_due(&mut self, now: EngineTime) -> Option<PushMessage> {
        if self.peek_time()? <= now {
            self.pending.pop_front()
        } else {
            None
        }
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(capacity: Option<usize>, policy: OverflowPolicy) -> PushQueue {
        PushQueue::new(capacity, policy, WakeSignal::new())
    }

    #[test]
    fn delivers_in_order_and_respects_due_times() {
        let mut q = queue(None, OverflowPolicy::DropOldest);
        let sender = q.sender();
        sender.send_at(EngineTime::from_secs(1), Value::Int(5));
        sender.send_at(EngineTime::from_secs(3), Value::Int(7));
        assert!(q.pump());

        assert_eq!(q.peek_time(), Some(EngineTime::from_secs(1)));
        assert!(q.pop_due(EngineTime::from_secs(0)).is_none());
        let first = q.pop_due(EngineTime::from_secs(1)).unwrap();
        assert_eq!(first.value, Value::Int(5));
        assert!(q.pop_due(EngineTime::from_secs(2)).is_none());
    }

    #[test]
    fn drop_oldest_keeps_latest() {
        let mut q = queue(Some(2), OverflowPolicy::DropOldest);
        let sender = q.sender();
        for i in 0..4i64 {
            sender.send_at(EngineTime::from_secs(i), Value::Int(i));
        }
        assert!(q.pump());
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_due(EngineTime::MAX).unwrap().value, Value::Int(2));
        assert_eq!(q.pop_due(EngineTime::MAX).unwrap().value, Value::Int(3));
    }

    #[test]
    fn raise_policy_trips() {
        let mut q = queue(Some(1), OverflowPolicy::Raise);
        let sender = q.sender();
        sender.send_at(EngineTime::from_secs(0), Value::Int(0));
        sender.send_at(EngineTime::from_secs(1), Value::Int(1));
        assert!(!q.pump());
        assert!(q.take_overflow());
        assert!(!q.take_overflow());
    }

    #[test]
    fn wake_signal_buzzes_across_threads() {
        let wake = WakeSignal::new();
        let remote = Arc::clone(&wake);
        let handle = std::thread::spawn(move || remote.buzz());
        handle.join().unwrap();
        assert!(wake.wait(Duration::from_millis(50)));
        assert!(!wake.take());
    }
}
