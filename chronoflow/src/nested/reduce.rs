//! The reduce node: a balanced binary tree of combiner child graphs.

use std::collections::BTreeSet;

use crate::builder::ReduceSpec;
use crate::error::Result;
use crate::graph::{EvalContext, Graph};
use crate::node::NodeBody;
use crate::types::Value;

use super::{ChildGraph, CHILD_TICK_TAG};

/// Reduces a TSD's values through a balanced binary tree.
///
/// Leaves hold the dict values (free slots hold the zero element, assumed to
/// be the combiner's identity); every internal tree position owns a fresh
/// combiner child graph fed by its two children. The tree doubles its leaf
/// count as keys grow and keeps slots assigned as they shrink, so updates
/// recompute only a root path.
pub struct ReduceNode {
    spec: ReduceSpec,
    /// Power-of-two leaf count; zero before the first key.
    capacity: usize,
    /// Leaf values, `capacity` long.
    leaves: Vec<Value>,
    /// Key assigned to each leaf slot.
    assignment: Vec<Option<Value>>,
    /// Recycled leaf slots, lowest last.
    free: Vec<usize>,
    /// Combiner graphs, heap-indexed: position `i` combines `2i` and
    /// `2i + 1`, leaves living at `capacity ..`. Position 0 is unused.
    internals: Vec<Option<ChildGraph>>,
    next_ordinal: usize,
}

impl ReduceNode {
    /// A reduce node over the given combiner wiring.
    pub fn new(spec: ReduceSpec) -> Self {
        ReduceNode {
            spec,
            capacity: 0,
            leaves: Vec::new(),
            assignment: Vec::new(),
            free: Vec::new(),
            internals: Vec::new(),
            next_ordinal: 0,
        }
    }

    fn slot_of(&self, key: &Value) -> Option<usize> {
        self.assignment
            .iter()
            .position(|assigned| assigned.as_ref() == Some(key))
    }

    /// The value standing at a heap position: a leaf, a computed combiner
    /// output, or the identity for an untouched subtree.
    fn value_of(&self, position: usize) -> Result<Value> {
        if position >= self.capacity {
            return Ok(self.leaves[position - self.capacity].clone());
        }
        match &self.internals[position] {
            Some(child) => child.output_value(self.spec.output_node_id),
            None => Ok(self.spec.zero.clone()),
        }
    }

    /// Doubles (or first-fills) the tree to hold at least `needed` leaves,
    /// re-seating every current assignment.
    fn grow(&mut self, needed: usize) -> Result<()> {
        let mut capacity = self.capacity.max(1);
        while capacity < needed {
            capacity *= 2;
        }
        if capacity == self.capacity {
            return Ok(());
        }
        let kept: Vec<(Value, Value)> = self
            .assignment
            .iter()
            .enumerate()
            .filter_map(|(slot, key)| {
                key.clone().map(|key| (key, self.leaves[slot].clone()))
            })
            .collect();
        // Old combiners die with the old shape.
        let mut old = std::mem::take(&mut self.internals);
        for child in old.iter_mut().rev() {
            if let Some(child) = child {
                child.shutdown()?;
            }
        }

        self.capacity = capacity;
        self.leaves = vec![self.spec.zero.clone(); capacity];
        self.assignment = vec![None; capacity];
        self.free = (0..capacity).rev().collect();
        self.internals = Vec::new();
        self.internals.resize_with(capacity, || None);
        for (key, value) in kept {
            let slot = self.free.pop().expect("grown capacity fits prior keys");
            self.assignment[slot] = Some(key);
            self.leaves[slot] = value;
        }
        Ok(())
    }

    /// Re-arms the wake-up at the earliest future time any combiner child
    /// has queued work.
    fn reschedule_children(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let after = cx.now().next();
        let mut earliest = None;
        for child in self.internals.iter_mut().flatten() {
            if let Some(when) = child.next_after(after)? {
                earliest = Some(std::cmp::min(earliest.unwrap_or(when), when));
            }
        }
        if let Some(when) = earliest {
            cx.schedule(when, CHILD_TICK_TAG);
        }
        Ok(())
    }

    /// Recomputes the combiner at `position` from its two children.
    fn recompute(&mut self, cx: &mut EvalContext<'_>, position: usize) -> Result<()> {
        let now = cx.now();
        let lhs = self.value_of(2 * position)?;
        let rhs = self.value_of(2 * position + 1)?;
        if self.internals[position].is_none() {
            let ordinal = self.next_ordinal;
            self.next_ordinal += 1;
            self.internals[position] = Some(ChildGraph::build(
                cx.core,
                cx.node,
                ordinal,
                &self.spec.builder,
                now,
            )?);
        }
        let child = self.internals[position].as_mut().expect("just built");
        child.inject(self.spec.lhs_node_id, now, lhs)?;
        child.inject(self.spec.rhs_node_id, now, rhs)?;
        child.drive(now)
    }
}

impl NodeBody for ReduceNode {
    fn eval(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        let now = cx.now();
        let key_input = cx.core.nodes[cx.node]
            .input_index(&self.spec.key_arg)
            .ok_or_else(|| crate::error::EngineError::NotBound(self.spec.key_arg.clone()))?;
        let items = cx.input(key_input)?.items()?;

        let mut dirty_slots: BTreeSet<usize> = BTreeSet::new();

        // Shrink: free slots of keys gone from the dict.
        for slot in 0..self.assignment.len() {
            let stale = self.assignment[slot]
                .as_ref()
                .is_some_and(|key| !items.iter().any(|(candidate, _)| candidate == key));
            if stale {
                self.assignment[slot] = None;
                self.leaves[slot] = self.spec.zero.clone();
                self.free.push(slot);
                dirty_slots.insert(slot);
            }
        }

        // Grow for fresh keys before assigning them slots.
        let fresh: Vec<(Value, Value)> = items
            .iter()
            .filter(|(key, _)| self.slot_of(key).is_none())
            .cloned()
            .collect();
        let needed = items.len();
        if needed > self.capacity {
            self.grow(needed)?;
            // Everything moved; recompute the whole tree.
            dirty_slots.extend(0..self.capacity);
        }
        for (key, value) in fresh {
            let slot = self.free.pop().expect("capacity grown to fit");
            self.assignment[slot] = Some(key);
            self.leaves[slot] = value;
            dirty_slots.insert(slot);
        }

        // Update values of keys modified in place.
        for (key, value) in &items {
            if let Some(slot) = self.slot_of(key) {
                if self.leaves[slot] != *value {
                    self.leaves[slot] = value.clone();
                    dirty_slots.insert(slot);
                }
            }
        }

        if dirty_slots.is_empty() {
            // Woken for child work rather than input changes: drain every
            // combiner and re-project the root if anything moved.
            let mut moved = false;
            for child in self.internals.iter_mut().flatten() {
                child.drive(now)?;
                moved |= child
                    .output_if_modified(self.spec.output_node_id, now)?
                    .is_some();
            }
            if moved && self.capacity >= 2 {
                let root = self.value_of(1)?;
                cx.output()?.set_value(root)?;
            }
            return self.reschedule_children(cx);
        }

        // Bubble dirty leaves to the root, children before parents.
        let mut dirty: BTreeSet<usize> = dirty_slots
            .into_iter()
            .map(|slot| (self.capacity + slot) / 2)
            .filter(|&position| position >= 1)
            .collect();
        while let Some(position) = dirty.pop_last() {
            if position < 1 || position >= self.capacity {
                continue;
            }
            self.recompute(cx, position)?;
            if position > 1 {
                dirty.insert(position / 2);
            }
        }

        let root = if self.capacity == 0 {
            self.spec.zero.clone()
        } else if self.capacity == 1 {
            self.leaves[0].clone()
        } else {
            self.value_of(1)?
        };
        cx.output()?.set_value(root)?;

        self.reschedule_children(cx)
    }

    fn stop(&mut self, _cx: &mut EvalContext<'_>) -> Result<()> {
        let mut internals = std::mem::take(&mut self.internals);
        for child in internals.iter_mut().rev() {
            if let Some(child) = child {
                child.shutdown()?;
            }
        }
        Ok(())
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Graph)) {
        for child in self.internals.iter().flatten() {
            visit(&child.graph);
        }
    }
}
