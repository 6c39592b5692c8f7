//! Source and compute node bodies behind the descriptor kinds.

use std::collections::VecDeque;

use crate::builder::{ComputeFn, GeneratorFn};
use crate::error::Result;
use crate::graph::EvalContext;
use crate::node::NodeBody;
use crate::push::PushQueue;
use crate::time::EngineTime;
use crate::types::Value;

/// A user compute body over typed inputs and outputs.
pub struct ComputeNode {
    body: ComputeFn,
}

impl ComputeNode {
    /// Wraps a compute closure.
    pub fn new(body: ComputeFn) -> Self {
        ComputeNode { body }
    }
}

impl NodeBody for ComputeNode {
    fn eval(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        (self.body)(cx)
    }
}

/// A pull source that asks its closure for the next `(time, value)` emission
/// and self-schedules towards it.
pub struct GeneratorNode {
    body: GeneratorFn,
    staged: Option<(EngineTime, Value)>,
}

impl GeneratorNode {
    /// Wraps a generator closure.
    pub fn new(body: GeneratorFn) -> Self {
        GeneratorNode { body, staged: None }
    }

    fn stage_next(&mut self, cx: &mut EvalContext<'_>, from: EngineTime) {
        let next = {
            let mut body = self.body.borrow_mut();
            (&mut *body)(from)
        };
        if let Some((when, value)) = next {
            let when = when.max(from);
            self.staged = Some((when, value));
            cx.schedule(when, 0);
        }
    }
}

impl NodeBody for GeneratorNode {
    fn start(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let now = cx.now();
        self.stage_next(cx, now);
        Ok(())
    }

    fn eval(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let now = cx.now();
        if let Some((when, value)) = self.staged.take() {
            if when <= now {
                cx.output()?.set_value(value)?;
                self.stage_next(cx, now.next());
            } else {
                self.staged = Some((when, value));
            }
        }
        Ok(())
    }
}

/// A pull source primed with a fixed schedule; only the last value per
/// engine time is delivered.
pub struct LastValuePullNode {
    schedule: VecDeque<(EngineTime, Value)>,
}

impl LastValuePullNode {
    /// Sorts the schedule and collapses duplicate times to the last value.
    pub fn new(mut schedule: Vec<(EngineTime, Value)>) -> Self {
        schedule.sort_by_key(|(when, _)| *when);
        let mut collapsed: VecDeque<(EngineTime, Value)> = VecDeque::new();
        for (when, value) in schedule {
            if collapsed.back().is_some_and(|(last, _)| *last == when) {
                collapsed.back_mut().expect("nonempty").1 = value;
            } else {
                collapsed.push_back((when, value));
            }
        }
        LastValuePullNode { schedule: collapsed }
    }
}

impl NodeBody for LastValuePullNode {
    fn start(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        if let Some((when, _)) = self.schedule.front() {
            cx.schedule((*when).max(cx.now()), 0);
        }
        Ok(())
    }

    fn eval(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let now = cx.now();
        let mut due = None;
        while self.schedule.front().is_some_and(|(when, _)| *when <= now) {
            due = self.schedule.pop_front();
        }
        if let Some((_, value)) = due {
            cx.output()?.set_value(value)?;
        }
        if let Some((when, _)) = self.schedule.front() {
            cx.schedule((*when).max(now.next()), 0);
        }
        Ok(())
    }
}

/// The push source: drains its MPSC queue, applying up to `batch` messages
/// per tick.
pub struct PushQueueNode {
    queue: PushQueue,
    batch: usize,
}

impl PushQueueNode {
    /// Wraps an engine-side queue.
    pub fn new(queue: PushQueue, batch: usize) -> Self {
        PushQueueNode { queue, batch }
    }
}

impl NodeBody for PushQueueNode {
    fn eval(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let now = cx.now();
        for _ in 0..self.batch {
            let Some(message) = self.queue.pop_due(now) else {
                break;
            };
            cx.output()?.apply_result(Some(message.value))?;
        }
        Ok(())
    }

    fn push_queue(&mut self) -> Option<&mut PushQueue> {
        Some(&mut self.queue)
    }
}

/// Publishes a value resolved from the graph's traits at start.
pub struct ContextNode {
    key: String,
}

impl ContextNode {
    /// Resolves `key` against the graph's trait chain.
    pub fn new(key: String) -> Self {
        ContextNode { key }
    }
}

impl NodeBody for ContextNode {
    fn start(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let value: Value = cx
            .traits()
            .get_as::<Value>(&self.key)
            .ok_or_else(|| cx.user_error(format!("context trait {:?} is unset", self.key)))?;
        cx.output()?.set_value(value)
    }

    fn eval(&mut self, _cx: &mut EvalContext<'_>) -> Result<()> {
        Ok(())
    }
}
