//! The per-graph evaluation engine: tick selection and the drain loop.
//!
//! A tick evaluates every node scheduled at one engine time, in graph index
//! order. Writing an output during the tick schedules its observers for the
//! *same* time, so they drain in the same tick; scheduling into the future
//! lands in the time-ordered queue. Push queues are polled once per tick
//! selection, and deliver at most one message per source per tick.

use std::collections::BTreeSet;

use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::node::NodeId;
use crate::time::EngineTime;

impl Graph {
    /// The earliest time at or after `after` at which this graph has work:
    /// the head of the scheduled queue or a due push message. Pumps push
    /// channels as a side effect and surfaces `Raise`-policy overflows.
    pub fn next_time(&mut self, after: EngineTime) -> Result<Option<EngineTime>> {
        let mut next = self.core.next_queued().map(|when| when.max(after));
        for node in self.core.push_sources.clone() {
            let mut body = self.bodies[node].borrow_mut();
            let Some(queue) = body.push_queue() else {
                continue;
            };
            if !queue.pump() {
                queue.take_overflow();
                return Err(EngineError::PushQueueOverflow {
                    node: node.raw(),
                    capacity: queue.capacity().unwrap_or(0),
                });
            }
            if let Some(when) = queue.peek_time() {
                let when = when.max(after);
                next = Some(next.map_or(when, |current| current.min(when)));
            }
        }
        Ok(next)
    }

    /// Evaluates one tick at `now`: drains every scheduled node with
    /// `time == now` plus push sources with due messages, in graph index
    /// order, until the graph is quiescent for `now`.
    pub fn evaluate_tick(&mut self, now: EngineTime) -> Result<()> {
        self.core.now = now;
        let observers = self.core.observers.clone();
        observers.before_graph_eval(&self.core.id, now);

        let mut worklist: BTreeSet<NodeId> = BTreeSet::new();

        observers.before_push_drain(&self.core.id, now);
        for node in self.core.push_sources.clone() {
            let mut body = self.bodies[node].borrow_mut();
            let Some(queue) = body.push_queue() else {
                continue;
            };
            if !queue.pump() {
                queue.take_overflow();
                return Err(EngineError::PushQueueOverflow {
                    node: node.raw(),
                    capacity: queue.capacity().unwrap_or(0),
                });
            }
            if queue.peek_time().is_some_and(|when| when <= now) {
                worklist.insert(node);
            }
        }
        observers.after_push_drain(&self.core.id, now);

        loop {
            // Fold queue entries that became due (including self-schedules
            // placed at `now` during this very tick).
            while let Some((&when, _)) = self.core.queue.iter().next() {
                if when > now {
                    break;
                }
                let entries = self.core.queue.remove(&when).expect("key just observed");
                worklist.extend(entries);
            }

            let Some(node) = worklist.pop_first() else {
                break;
            };
            if self.core.stop_requested() {
                break;
            }

            self.eval_node(node)?;

            let pending = std::mem::take(&mut self.core.pending);
            for (target, when) in pending {
                if when <= now {
                    worklist.insert(target);
                } else {
                    self.core.schedule_node(target, when);
                }
            }
        }

        observers.after_graph_eval(&self.core.id, now);
        Ok(())
    }

    /// Drives this graph through every tick at or before `now`.
    ///
    /// Engine time is strictly monotonic across ticks: after a tick at `t`
    /// the next admissible time is `t + 1ns`, which is how a backlog of
    /// same-time push messages spreads over successive ticks.
    pub fn drive_to(&mut self, now: EngineTime) -> Result<()> {
        let mut after = if self.core.now.is_set() {
            self.core.now
        } else {
            EngineTime::MIN
        };
        while let Some(when) = self.next_time(after)? {
            if when > now || self.core.stop_requested() {
                break;
            }
            self.evaluate_tick(when)?;
            if when == now {
                break;
            }
            after = when.next();
        }
        Ok(())
    }
}
