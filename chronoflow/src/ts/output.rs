//! Write-side views: output mutators, modification fan-out, parent marking.

use crate::error::{EngineError, Result};
use crate::time::EngineTime;
use crate::types::{copy_assign, TsKind, TsRef, Value};

use super::observer::ActivationSink;
use super::value::{
    resolve, Delta, DictSlots, DictStore, SetSlots, SetStore, TsStore, ViewData,
};
use super::{TsArena, TsId};

/// Marks `ts` modified at `now`: updates its time, fans out to its observer
/// list, and walks the owner chain recording the child in each parent's
/// delta. Fan-out happens once per endpoint per tick, however many child
/// slots change.
pub(crate) fn touch(arena: &mut TsArena, sink: &mut ActivationSink, ts: TsId, now: EngineTime) {
    let endpoint = &mut arena[ts];
    let first = endpoint.time < now;
    endpoint.time = now;
    if !first {
        return;
    }
    endpoint.observers.notify_modified(sink, now);
    if let Some((parent, index)) = endpoint.owner {
        let parent_value = &mut arena[parent];
        let kind = parent_value.meta().kind();
        parent_value.delta.roll(kind, now);
        if let Delta::Fields { modified, .. } = &mut parent_value.delta {
            if !modified.contains(&index) {
                modified.push(index);
            }
        }
        touch(arena, sink, parent, now);
    }
}

/// A typed write handle over one output endpoint.
///
/// Every mutator stamps the engine time it was handed at construction,
/// records deltas, and drives observer fan-out; nothing else in the engine
/// writes time-series state.
pub struct TsOutputView<'a> {
    arena: &'a mut TsArena,
    sink: &'a mut ActivationSink,
    now: EngineTime,
    data: ViewData,
}

impl<'a> TsOutputView<'a> {
    /// A write view over `data` at engine time `now`.
    pub fn new(
        arena: &'a mut TsArena,
        sink: &'a mut ActivationSink,
        now: EngineTime,
        data: ViewData,
    ) -> Self {
        TsOutputView {
            arena,
            sink,
            now,
            data,
        }
    }

    /// The engine time writes through this view carry.
    pub fn now(&self) -> EngineTime {
        self.now
    }

    /// The underlying view descriptor.
    pub fn data(&self) -> &ViewData {
        &self.data
    }

    fn target(&self) -> Result<TsId> {
        let resolved = resolve(self.arena, &self.data)?;
        if resolved.slot.is_some() {
            return Err(EngineError::UnknownPath {
                path: self.data.path.iter().map(|c| *c as usize).collect(),
                meta: self.arena[resolved.ts].meta().name().to_owned(),
            });
        }
        Ok(resolved.ts)
    }

    /// A write view of the `index`th static child.
    pub fn child(&mut self, index: usize) -> TsOutputView<'_> {
        TsOutputView {
            arena: &mut *self.arena,
            sink: &mut *self.sink,
            now: self.now,
            data: self.data.child(index),
        }
    }

    /// A write view of the named bundle field.
    pub fn field(&mut self, name: &str) -> Result<TsOutputView<'_>> {
        let ts = self.target()?;
        let meta = self.arena[ts].meta();
        let index = meta.field_index(name).ok_or_else(|| EngineError::UnknownPath {
            path: Vec::new(),
            meta: format!("{}.{}", meta.name(), name),
        })?;
        Ok(self.child(index))
    }

    /// Full-value assignment, dispatched on the endpoint's kind.
    ///
    /// Scalars schema-check and replace; bundles and lists assign the
    /// provided children (unset children are left untouched); dicts and sets
    /// reconcile towards the provided collection, removing absent keys;
    /// windows append each provided element; signals just tick.
    pub fn set_value(&mut self, value: Value) -> Result<()> {
        let ts = self.target()?;
        let kind = self.arena[ts].meta().kind();
        match kind {
            TsKind::Ts => self.write_scalar(ts, value),
            TsKind::Signal => {
                self.mark_modified()?;
                Ok(())
            }
            TsKind::Ref => match value {
                Value::Ref(target) => self.set_ref(target),
                other => Err(self.schema_error(ts, &other)),
            },
            TsKind::Tsb | TsKind::Tsl => self.write_fixed(ts, value),
            TsKind::Tsd => self.write_dict(ts, value, true),
            TsKind::Tss => self.write_set(ts, value),
            TsKind::Tsw => self.write_window(ts, value),
        }
    }

    /// Applies a node result: `None` leaves the output untouched.
    pub fn apply_result(&mut self, result: Option<Value>) -> Result<()> {
        match result {
            Some(value) => self.set_value(value),
            None => Ok(()),
        }
    }

    /// Delta assignment: only the named slots are written, nothing is
    /// removed except removals named by a set delta.
    pub fn apply_delta(&mut self, delta: Value) -> Result<()> {
        let ts = self.target()?;
        let kind = self.arena[ts].meta().kind();
        match kind {
            TsKind::Tsd => self.write_dict(ts, delta, false),
            TsKind::Tss => match delta {
                Value::Tuple(mut parts) if parts.len() == 2 => {
                    let removed = parts.pop().expect("arity checked");
                    let added = parts.pop().expect("arity checked");
                    for element in into_items(added) {
                        self.add(element)?;
                    }
                    for element in into_items(removed) {
                        self.discard(&element)?;
                    }
                    Ok(())
                }
                other => Err(self.schema_error(ts, &other)),
            },
            _ => self.set_value(delta),
        }
    }

    /// Touches the endpoint without changing its value.
    pub fn mark_modified(&mut self) -> Result<()> {
        let ts = self.target()?;
        touch(self.arena, self.sink, ts, self.now);
        Ok(())
    }

    /// Marks the named child slots modified with the current timestamp.
    pub fn mark_modified_children(&mut self, indices: &[usize]) -> Result<()> {
        let ts = self.target()?;
        match &self.arena[ts].store {
            TsStore::Fixed(children) => {
                let picked: Vec<TsId> = indices
                    .iter()
                    .filter_map(|&index| children.get(index).copied())
                    .collect();
                for child in picked {
                    touch(self.arena, self.sink, child, self.now);
                }
                Ok(())
            }
            TsStore::Dict(_) => {
                for &slot in indices {
                    self.touch_dict_slot(ts, slot)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Resets the endpoint's own time to "never set" and notifies observers.
    pub fn mark_invalid(&mut self) -> Result<()> {
        let ts = self.target()?;
        let endpoint = &mut self.arena[ts];
        endpoint.time = EngineTime::MIN_DT;
        endpoint.delta = Delta::None;
        let list = endpoint.observers.clone();
        list.notify_modified(self.sink, self.now);
        Ok(())
    }

    /// `mark_invalid`, recursing into static children.
    pub fn invalidate(&mut self) -> Result<()> {
        let ts = self.target()?;
        if let TsStore::Fixed(children) = &self.arena[ts].store {
            let children = children.clone();
            for (index, _) in children.iter().enumerate() {
                self.child(index).invalidate()?;
            }
        }
        self.mark_invalid()
    }

    /// Empties the endpoint and counts the reset as a modification: dicts and
    /// sets record every key as removed, windows drop their buffer, scalars
    /// become unset-but-ticked.
    pub fn clear(&mut self) -> Result<()> {
        let ts = self.target()?;
        match self.arena[ts].meta().kind() {
            TsKind::Tsd => {
                let keys: Vec<Value> = match &self.arena[ts].store {
                    TsStore::Dict(dict) => dict.keys.iter().map(|(_, k)| k.clone()).collect(),
                    _ => Vec::new(),
                };
                for key in keys {
                    self.remove(&key)?;
                }
            }
            TsKind::Tss => {
                let keys: Vec<Value> = match &self.arena[ts].store {
                    TsStore::Set(set) => set.keys.iter().map(|(_, k)| k.clone()).collect(),
                    _ => Vec::new(),
                };
                for key in keys {
                    self.discard(&key)?;
                }
            }
            TsKind::Tsw => {
                if let TsStore::Window(window) = &mut self.arena[ts].store {
                    window.values.clear();
                    window.times.clear();
                }
            }
            _ => {
                if let TsStore::Scalar(value) = &mut self.arena[ts].store {
                    *value = Value::Nothing;
                }
            }
        }
        let endpoint = &mut self.arena[ts];
        let kind = endpoint.meta().kind();
        endpoint.delta.roll(kind, self.now);
        touch(self.arena, self.sink, ts, self.now);
        Ok(())
    }

    /// Inserts or overwrites one dict entry.
    pub fn insert(&mut self, key: Value, value: Value) -> Result<()> {
        let ts = self.target()?;
        let meta = self.arena[ts].meta();
        let (Some(key_meta), Some(value_meta)) = (meta.key(), meta.element()) else {
            return Err(self.schema_error(ts, &key));
        };
        if !key.conforms(key_meta) {
            return Err(self.schema_error(ts, &key));
        }
        if !value.conforms(value_meta) {
            return Err(self.schema_error(ts, &value));
        }
        crate::types::hash_value(key_meta, &key)?;

        let now = self.now;
        let endpoint = &mut self.arena[ts];
        let endpoint_meta = endpoint.meta();
        endpoint.delta.roll(endpoint_meta.kind(), now);
        let TsStore::Dict(DictStore {
            keys,
            values,
            times,
            observers,
        }) = &mut endpoint.store
        else {
            return Err(EngineError::SchemaMismatch {
                expected: "TSD".to_owned(),
                found: endpoint_meta.name().to_owned(),
            });
        };
        let outcome = keys.insert(
            key.clone(),
            &mut DictSlots {
                values,
                times,
                observers,
            },
        );
        values[outcome.slot] = value;
        times[outcome.slot] = now;
        observers.slot(outcome.slot).notify_modified(self.sink, now);
        if let Delta::Dict {
            added, modified, ..
        } = &mut endpoint.delta
        {
            if outcome.inserted {
                added.push(key);
            }
            if !modified.contains(&outcome.slot) {
                modified.push(outcome.slot);
            }
        }
        touch(self.arena, self.sink, ts, now);
        Ok(())
    }

    /// Removes one dict entry; slot observers see removal exactly once.
    pub fn remove(&mut self, key: &Value) -> Result<bool> {
        let ts = self.target()?;
        let now = self.now;
        let endpoint = &mut self.arena[ts];
        let kind = endpoint.meta().kind();
        endpoint.delta.roll(kind, now);
        let TsStore::Dict(DictStore {
            keys,
            values,
            times,
            observers,
        }) = &mut endpoint.store
        else {
            return Ok(false);
        };
        let Some(slot) = keys.lookup(key) else {
            return Ok(false);
        };
        observers.slot_mut(slot).notify_removed(self.sink, now);
        keys.erase(
            key,
            &mut DictSlots {
                values,
                times,
                observers,
            },
        );
        if let Delta::Dict { removed, .. } = &mut endpoint.delta {
            removed.push(key.clone());
        }
        touch(self.arena, self.sink, ts, now);
        Ok(true)
    }

    /// Adds one set element; true when it was new.
    pub fn add(&mut self, element: Value) -> Result<bool> {
        let ts = self.target()?;
        let meta = self.arena[ts].meta();
        let Some(element_meta) = meta.element() else {
            return Err(self.schema_error(ts, &element));
        };
        if !element.conforms(element_meta) {
            return Err(self.schema_error(ts, &element));
        }
        crate::types::hash_value(element_meta, &element)?;

        let now = self.now;
        let endpoint = &mut self.arena[ts];
        let kind = endpoint.meta().kind();
        endpoint.delta.roll(kind, now);
        let TsStore::Set(SetStore {
            keys,
            times,
            observers,
        }) = &mut endpoint.store
        else {
            return Ok(false);
        };
        let outcome = keys.insert(element.clone(), &mut SetSlots { times, observers });
        if !outcome.inserted {
            return Ok(false);
        }
        times[outcome.slot] = now;
        observers.slot(outcome.slot).notify_modified(self.sink, now);
        if let Delta::Set { added, .. } = &mut endpoint.delta {
            added.push(element);
        }
        touch(self.arena, self.sink, ts, now);
        Ok(true)
    }

    /// Removes one set element; true when it was present.
    pub fn discard(&mut self, element: &Value) -> Result<bool> {
        let ts = self.target()?;
        let now = self.now;
        let endpoint = &mut self.arena[ts];
        let kind = endpoint.meta().kind();
        endpoint.delta.roll(kind, now);
        let TsStore::Set(SetStore {
            keys,
            times,
            observers,
        }) = &mut endpoint.store
        else {
            return Ok(false);
        };
        let Some(slot) = keys.lookup(element) else {
            return Ok(false);
        };
        observers.slot_mut(slot).notify_removed(self.sink, now);
        keys.erase(element, &mut SetSlots { times, observers });
        if let Delta::Set { removed, .. } = &mut endpoint.delta {
            removed.push(element.clone());
        }
        touch(self.arena, self.sink, ts, now);
        Ok(true)
    }

    /// Appends one value to a window, evicting the oldest on overflow.
    pub fn push(&mut self, value: Value) -> Result<()> {
        let ts = self.target()?;
        let meta = self.arena[ts].meta();
        let Some(element_meta) = meta.element() else {
            return Err(self.schema_error(ts, &value));
        };
        if !value.conforms(element_meta) {
            return Err(self.schema_error(ts, &value));
        }
        let now = self.now;
        let endpoint = &mut self.arena[ts];
        let endpoint_meta = endpoint.meta();
        endpoint.delta.roll(endpoint_meta.kind(), now);
        let TsStore::Window(window) = &mut endpoint.store else {
            return Err(EngineError::SchemaMismatch {
                expected: "TSW".to_owned(),
                found: endpoint_meta.name().to_owned(),
            });
        };
        if window.capacity > 0 && window.values.len() == window.capacity {
            window.values.pop_front();
            window.times.pop_front();
        }
        window.values.push_back(value);
        window.times.push_back(now);
        if let Delta::Window { pushed, .. } = &mut endpoint.delta {
            *pushed += 1;
        }
        touch(self.arena, self.sink, ts, now);
        Ok(())
    }

    /// Retargets a REF output. Consumers observe the retarget as a
    /// modification even when the ultimate value is unchanged.
    pub fn set_ref(&mut self, target: TsRef) -> Result<()> {
        let ts = self.target()?;
        let endpoint = &mut self.arena[ts];
        let endpoint_meta = endpoint.meta();
        match &mut endpoint.store {
            TsStore::Scalar(value) => *value = Value::Ref(target),
            _ => {
                return Err(EngineError::SchemaMismatch {
                    expected: "REF".to_owned(),
                    found: endpoint_meta.name().to_owned(),
                })
            }
        }
        touch(self.arena, self.sink, ts, self.now);
        Ok(())
    }

    fn write_scalar(&mut self, ts: TsId, value: Value) -> Result<()> {
        let meta = self.arena[ts].meta();
        let element = meta.element().expect("scalar TS carries a value meta");
        let endpoint = &mut self.arena[ts];
        let TsStore::Scalar(stored) = &mut endpoint.store else {
            unreachable!("scalar store behind TS meta");
        };
        copy_assign(stored, &value, element)?;
        touch(self.arena, self.sink, ts, self.now);
        Ok(())
    }

    fn write_fixed(&mut self, ts: TsId, value: Value) -> Result<()> {
        let arity = match &self.arena[ts].store {
            TsStore::Fixed(children) => children.len(),
            _ => 0,
        };
        let items = match value {
            Value::Bundle(items) | Value::Tuple(items) | Value::List(items)
                if items.len() == arity =>
            {
                items
            }
            other => return Err(self.schema_error(ts, &other)),
        };
        for (index, item) in items.into_iter().enumerate() {
            if !matches!(item, Value::Nothing) {
                self.child(index).set_value(item)?;
            }
        }
        Ok(())
    }

    fn write_dict(&mut self, ts: TsId, value: Value, remove_absent: bool) -> Result<()> {
        let Value::Map(map) = value else {
            return Err(self.schema_error(ts, &value));
        };
        if remove_absent {
            let stale: Vec<Value> = match &self.arena[ts].store {
                TsStore::Dict(dict) => dict
                    .keys
                    .iter()
                    .map(|(_, k)| k.clone())
                    .filter(|k| map.get(k).is_none())
                    .collect(),
                _ => Vec::new(),
            };
            for key in stale {
                self.remove(&key)?;
            }
        }
        for (key, item) in map.iter() {
            self.insert(key.clone(), item.clone())?;
        }
        Ok(())
    }

    fn write_set(&mut self, ts: TsId, value: Value) -> Result<()> {
        let Value::Set(new) = value else {
            return Err(self.schema_error(ts, &value));
        };
        let stale: Vec<Value> = match &self.arena[ts].store {
            TsStore::Set(set) => set
                .keys
                .iter()
                .map(|(_, k)| k.clone())
                .filter(|k| !new.contains(k))
                .collect(),
            _ => Vec::new(),
        };
        for element in stale {
            self.discard(&element)?;
        }
        for element in new.iter() {
            self.add(element.clone())?;
        }
        Ok(())
    }

    fn write_window(&mut self, _ts: TsId, value: Value) -> Result<()> {
        match value {
            Value::List(items) => {
                for item in items {
                    self.push(item)?;
                }
                Ok(())
            }
            single => self.push(single),
        }
    }

    fn touch_dict_slot(&mut self, ts: TsId, slot: usize) -> Result<()> {
        let now = self.now;
        let endpoint = &mut self.arena[ts];
        let kind = endpoint.meta().kind();
        endpoint.delta.roll(kind, now);
        let TsStore::Dict(dict) = &mut endpoint.store else {
            return Ok(());
        };
        if dict.keys.slot_key(slot).is_none() {
            return Ok(());
        }
        dict.times[slot] = now;
        dict.observers.slot(slot).notify_modified(self.sink, now);
        if let Delta::Dict { modified, .. } = &mut endpoint.delta {
            if !modified.contains(&slot) {
                modified.push(slot);
            }
        }
        touch(self.arena, self.sink, ts, now);
        Ok(())
    }

    fn schema_error(&self, ts: TsId, value: &Value) -> EngineError {
        EngineError::SchemaMismatch {
            expected: self.arena[ts].meta().name().to_owned(),
            found: value.describe(),
        }
    }
}

fn into_items(value: Value) -> Vec<Value> {
    match value {
        Value::List(items) | Value::Tuple(items) => items,
        Value::Set(set) => set.iter().cloned().collect(),
        Value::Nothing => Vec::new(),
        single => vec![single],
    }
}
