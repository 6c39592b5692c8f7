//! Read-side views over time-series endpoints.

use crate::error::{EngineError, Result};
use crate::time::EngineTime;
use crate::types::{TsKind, TsMeta, TsRef, Value, ValueMap, ValueSet};

use super::value::{resolve, ResolvedSlot, TsStore, ViewData};
use super::TsArena;

/// A lightweight read view over one endpoint (or one slot of a dynamic one).
///
/// All queries dispatch on the endpoint's interned meta. A view carries a
/// *sampled floor*: traversing a REF injects the reference's own write time
/// into `last_modified_time`, so consumers observe a retarget as a
/// modification even when the ultimate value is unchanged.
#[derive(Clone)]
pub struct TsView<'a> {
    arena: &'a TsArena,
    data: ViewData,
    floor: EngineTime,
}

impl<'a> TsView<'a> {
    /// A view of `data` within `arena`.
    pub fn new(arena: &'a TsArena, data: ViewData) -> Self {
        TsView {
            arena,
            data,
            floor: EngineTime::MIN_DT,
        }
    }

    pub(crate) fn with_floor(arena: &'a TsArena, data: ViewData, floor: EngineTime) -> Self {
        TsView { arena, data, floor }
    }

    /// The underlying view descriptor.
    pub fn data(&self) -> &ViewData {
        &self.data
    }

    fn resolved(&self) -> Result<ResolvedSlot> {
        resolve(self.arena, &self.data)
    }

    /// The meta of the endpoint the view lands on.
    pub fn meta(&self) -> Result<&'static TsMeta> {
        Ok(self.arena[self.resolved()?.ts].meta())
    }

    /// Last modification time, floored by any REF traversal on the way here.
    pub fn last_modified_time(&self) -> Result<EngineTime> {
        let resolved = self.resolved()?;
        let endpoint = &self.arena[resolved.ts];
        let time = match (resolved.slot, &endpoint.store) {
            (Some(slot), TsStore::Dict(dict)) => dict.times[slot],
            (Some(slot), TsStore::Set(set)) => set.times[slot],
            _ => endpoint.time,
        };
        Ok(time.max(self.floor))
    }

    /// True when the endpoint was modified at or after `now`.
    pub fn modified(&self, now: EngineTime) -> Result<bool> {
        Ok(self.last_modified_time()? >= now)
    }

    /// True once the endpoint has ever been set.
    pub fn valid(&self) -> Result<bool> {
        Ok(self.last_modified_time()?.is_set())
    }

    /// `valid`, recursing into children: every bundle/list child valid, every
    /// dict/set slot carrying a set time, the window non-empty.
    pub fn all_valid(&self) -> Result<bool> {
        let resolved = self.resolved()?;
        if resolved.slot.is_some() {
            return self.valid();
        }
        let endpoint = &self.arena[resolved.ts];
        let ok = match &endpoint.store {
            TsStore::Scalar(_) => endpoint.time.is_set(),
            TsStore::Fixed(children) => {
                let mut all = true;
                for (index, _) in children.iter().enumerate() {
                    all &= TsView::with_floor(self.arena, self.data.child(index), self.floor)
                        .all_valid()?;
                }
                all
            }
            TsStore::Dict(dict) => {
                endpoint.time.is_set() && dict.keys.iter().all(|(slot, _)| dict.times[slot].is_set())
            }
            TsStore::Set(set) => {
                endpoint.time.is_set() && set.keys.iter().all(|(slot, _)| set.times[slot].is_set())
            }
            TsStore::Window(window) => !window.values.is_empty(),
        };
        Ok(ok)
    }

    /// The current value, composed recursively for structured kinds.
    pub fn value(&self) -> Result<Value> {
        let resolved = self.resolved()?;
        let endpoint = &self.arena[resolved.ts];
        let value = match (resolved.slot, &endpoint.store) {
            (Some(slot), TsStore::Dict(dict)) => dict.values[slot].clone(),
            (Some(slot), TsStore::Set(set)) => {
                set.keys.slot_key(slot).cloned().unwrap_or(Value::Nothing)
            }
            (_, TsStore::Scalar(value)) => value.clone(),
            (_, TsStore::Fixed(children)) => {
                let mut items = Vec::with_capacity(children.len());
                for (index, _) in children.iter().enumerate() {
                    items.push(
                        TsView::with_floor(self.arena, self.data.child(index), self.floor)
                            .value()?,
                    );
                }
                match endpoint.meta().kind() {
                    TsKind::Tsl => Value::List(items),
                    _ => Value::Bundle(items),
                }
            }
            (_, TsStore::Dict(dict)) => Value::Map(Box::new(
                dict.keys
                    .iter()
                    .map(|(slot, key)| (key.clone(), dict.values[slot].clone()))
                    .collect::<ValueMap>(),
            )),
            (_, TsStore::Set(set)) => Value::Set(Box::new(
                set.keys.iter().map(|(_, key)| key.clone()).collect::<ValueSet>(),
            )),
            (_, TsStore::Window(window)) => Value::List(window.values.iter().cloned().collect()),
        };
        Ok(value)
    }

    /// The tick-scoped delta as a value:
    /// scalars yield their value when modified at `now`; bundles/lists yield
    /// per-child deltas with unset children as `Nothing`; dicts yield the map
    /// of entries written this tick; sets a `(added, removed)` tuple; windows
    /// the values pushed this tick.
    pub fn delta_value(&self, now: EngineTime) -> Result<Value> {
        let resolved = self.resolved()?;
        let endpoint = &self.arena[resolved.ts];
        if resolved.slot.is_some() {
            return if self.modified(now)? {
                self.value()
            } else {
                Ok(Value::Nothing)
            };
        }
        use super::value::Delta;
        let value = match &endpoint.store {
            TsStore::Scalar(value) => {
                if endpoint.time >= now {
                    value.clone()
                } else {
                    Value::Nothing
                }
            }
            TsStore::Fixed(children) => {
                let mut items = Vec::with_capacity(children.len());
                for (index, _) in children.iter().enumerate() {
                    items.push(
                        TsView::with_floor(self.arena, self.data.child(index), self.floor)
                            .delta_value(now)?,
                    );
                }
                match endpoint.meta().kind() {
                    TsKind::Tsl => Value::List(items),
                    _ => Value::Bundle(items),
                }
            }
            TsStore::Dict(dict) => {
                let mut map = ValueMap::new();
                if let Delta::Dict { modified, tick, .. } = &endpoint.delta {
                    if *tick == now {
                        for &slot in modified {
                            if let Some(key) = dict.keys.slot_key(slot) {
                                map.insert(key.clone(), dict.values[slot].clone());
                            }
                        }
                    }
                }
                Value::Map(Box::new(map))
            }
            TsStore::Set(_) => {
                let (added, removed) = match &endpoint.delta {
                    Delta::Set { added, removed, tick } if *tick == now => {
                        (added.clone(), removed.clone())
                    }
                    _ => (Vec::new(), Vec::new()),
                };
                Value::Tuple(vec![Value::List(added), Value::List(removed)])
            }
            TsStore::Window(window) => {
                let pushed = match &endpoint.delta {
                    Delta::Window { pushed, tick } if *tick == now => *pushed,
                    _ => 0,
                };
                Value::List(
                    window
                        .values
                        .iter()
                        .skip(window.values.len() - pushed.min(window.values.len()))
                        .cloned()
                        .collect(),
                )
            }
        };
        Ok(value)
    }

    /// Number of addressable children: bundle/list arity, dict/set size.
    pub fn child_count(&self) -> Result<usize> {
        let resolved = self.resolved()?;
        let endpoint = &self.arena[resolved.ts];
        Ok(match &endpoint.store {
            TsStore::Fixed(children) => children.len(),
            TsStore::Dict(dict) => dict.keys.len(),
            TsStore::Set(set) => set.keys.len(),
            _ => 0,
        })
    }

    /// The `index`th child (bundle field, list item, or dynamic slot).
    pub fn child_at(&self, index: usize) -> TsView<'a> {
        TsView::with_floor(self.arena, self.data.child(index), self.floor)
    }

    /// The named bundle field.
    pub fn child_by_name(&self, name: &str) -> Result<TsView<'a>> {
        let meta = self.meta()?;
        let index = meta.field_index(name).ok_or_else(|| EngineError::UnknownPath {
            path: Vec::new(),
            meta: format!("{}.{}", meta.name(), name),
        })?;
        Ok(self.child_at(index))
    }

    /// Dict lookup by key.
    pub fn get_item(&self, key: &Value) -> Result<Option<Value>> {
        let resolved = self.resolved()?;
        match &self.arena[resolved.ts].store {
            TsStore::Dict(dict) => Ok(dict
                .keys
                .lookup(key)
                .map(|slot| dict.values[slot].clone())),
            _ => Ok(None),
        }
    }

    /// Dict/set membership.
    pub fn contains(&self, key: &Value) -> Result<bool> {
        let resolved = self.resolved()?;
        Ok(match &self.arena[resolved.ts].store {
            TsStore::Dict(dict) => dict.keys.lookup(key).is_some(),
            TsStore::Set(set) => set.keys.lookup(key).is_some(),
            _ => false,
        })
    }

    /// A dict key's stable slot, for slot-level subscription.
    pub fn key_slot(&self, key: &Value) -> Result<Option<usize>> {
        let resolved = self.resolved()?;
        Ok(match &self.arena[resolved.ts].store {
            TsStore::Dict(dict) => dict.keys.lookup(key),
            TsStore::Set(set) => set.keys.lookup(key),
            _ => None,
        })
    }

    /// Dict/set size; window fill; bundle/list arity.
    pub fn len(&self) -> Result<usize> {
        let resolved = self.resolved()?;
        let endpoint = &self.arena[resolved.ts];
        Ok(match &endpoint.store {
            TsStore::Dict(dict) => dict.keys.len(),
            TsStore::Set(set) => set.keys.len(),
            TsStore::Window(window) => window.values.len(),
            TsStore::Fixed(children) => children.len(),
            TsStore::Scalar(_) => 0,
        })
    }

    /// True when `len` is zero.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Keys added this tick (dict) or elements added this tick (set).
    pub fn added(&self, now: EngineTime) -> Result<Vec<Value>> {
        use super::value::Delta;
        let resolved = self.resolved()?;
        Ok(match &self.arena[resolved.ts].delta {
            Delta::Dict { added, tick, .. } | Delta::Set { added, tick, .. } if *tick == now => {
                added.clone()
            }
            _ => Vec::new(),
        })
    }

    /// Keys/elements removed this tick.
    pub fn removed(&self, now: EngineTime) -> Result<Vec<Value>> {
        use super::value::Delta;
        let resolved = self.resolved()?;
        Ok(match &self.arena[resolved.ts].delta {
            Delta::Dict { removed, tick, .. } | Delta::Set { removed, tick, .. }
                if *tick == now =>
            {
                removed.clone()
            }
            _ => Vec::new(),
        })
    }

    /// Dict keys whose slots were written this tick (insertions included).
    pub fn modified_keys(&self, now: EngineTime) -> Result<Vec<Value>> {
        use super::value::Delta;
        let resolved = self.resolved()?;
        let endpoint = &self.arena[resolved.ts];
        let TsStore::Dict(dict) = &endpoint.store else {
            return Ok(Vec::new());
        };
        Ok(match &endpoint.delta {
            Delta::Dict { modified, tick, .. } if *tick == now => modified
                .iter()
                .filter_map(|&slot| dict.keys.slot_key(slot).cloned())
                .collect(),
            _ => Vec::new(),
        })
    }

    /// Entries of a dict in slot order.
    pub fn items(&self) -> Result<Vec<(Value, Value)>> {
        let resolved = self.resolved()?;
        Ok(match &self.arena[resolved.ts].store {
            TsStore::Dict(dict) => dict
                .keys
                .iter()
                .map(|(slot, key)| (key.clone(), dict.values[slot].clone()))
                .collect(),
            _ => Vec::new(),
        })
    }

    /// Buffered `(time, value)` pairs of a window, oldest first.
    pub fn window(&self) -> Result<Vec<(EngineTime, Value)>> {
        let resolved = self.resolved()?;
        Ok(match &self.arena[resolved.ts].store {
            TsStore::Window(window) => window
                .times
                .iter()
                .copied()
                .zip(window.values.iter().cloned())
                .collect(),
            _ => Vec::new(),
        })
    }

    /// Follows a REF to its target, sampling the reference's own write time
    /// into the floor of the returned view.
    pub fn deref(&self) -> Result<TsView<'a>> {
        let resolved = self.resolved()?;
        let endpoint = &self.arena[resolved.ts];
        let TsStore::Scalar(Value::Ref(TsRef(target))) = &endpoint.store else {
            return Err(EngineError::NotBound(endpoint.meta().name().to_owned()));
        };
        Ok(TsView::with_floor(
            self.arena,
            ViewData::root(*target),
            self.floor.max(endpoint.time),
        ))
    }
}
