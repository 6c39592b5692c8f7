//! `TsValue`: the storage unit of one time-series endpoint.

use std::collections::VecDeque;

use crate::error::{EngineError, Result};
use crate::time::EngineTime;
use crate::types::{KeySet, SlotObserver, TsKind, TsMeta, Value};

use super::observer::{ObserverArray, ObserverList};
use super::{ShortPath, TsArena, TsId};

/// Kind-specific storage behind an endpoint.
#[derive(Debug)]
pub enum TsStore {
    /// Scalar, REF, and SIGNAL payloads.
    Scalar(Value),
    /// Static children of a bundle or fixed-size list.
    Fixed(Vec<TsId>),
    /// Keyed slots of a dict time-series.
    Dict(DictStore),
    /// Element slots of a set time-series.
    Set(SetStore),
    /// Ring buffer of a windowed time-series.
    Window(WindowStore),
}

/// Slot-parallel storage of a dict time-series: keys, values, per-slot
/// modification times, and per-slot observer lists, kept synchronized
/// through the key set's slot-observer protocol.
#[derive(Debug, Default)]
pub struct DictStore {
    /// Key storage with stable slots.
    pub keys: KeySet,
    /// Value per slot.
    pub values: Vec<Value>,
    /// Last modification time per slot.
    pub times: Vec<EngineTime>,
    /// Observer list per slot.
    pub observers: ObserverArray,
}

/// Parallel arrays of a set time-series.
#[derive(Debug, Default)]
pub struct SetStore {
    /// Element storage with stable slots.
    pub keys: KeySet,
    /// Insertion time per slot.
    pub times: Vec<EngineTime>,
    /// Observer list per slot.
    pub observers: ObserverArray,
}

/// Ring buffer of a windowed time-series.
#[derive(Debug, Default)]
pub struct WindowStore {
    /// Buffered values, oldest first.
    pub values: VecDeque<Value>,
    /// Modification time of each buffered value.
    pub times: VecDeque<EngineTime>,
    /// Fixed capacity; oldest entries are evicted on overflow.
    pub capacity: usize,
}

/// Synchronizes a dict's three parallel arrays with its key set.
pub(super) struct DictSlots<'a> {
    pub values: &'a mut Vec<Value>,
    pub times: &'a mut Vec<EngineTime>,
    pub observers: &'a mut ObserverArray,
}

impl SlotObserver for DictSlots<'_> {
    fn on_capacity(&mut self, capacity: usize) {
        self.values.resize(capacity, Value::Nothing);
        self.times.resize(capacity, EngineTime::MIN_DT);
        self.observers.on_capacity(capacity);
    }
    fn on_insert(&mut self, _slot: usize) {}
    fn on_erase(&mut self, slot: usize) {
        self.values[slot] = Value::Nothing;
        self.times[slot] = EngineTime::MIN_DT;
        self.observers.on_erase(slot);
    }
    fn on_update(&mut self, _slot: usize) {}
    fn on_clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = Value::Nothing);
        self.times.iter_mut().for_each(|t| *t = EngineTime::MIN_DT);
        self.observers.on_clear();
    }
}

/// Synchronizes a set's parallel arrays with its key set.
pub(super) struct SetSlots<'a> {
    pub times: &'a mut Vec<EngineTime>,
    pub observers: &'a mut ObserverArray,
}

impl SlotObserver for SetSlots<'_> {
    fn on_capacity(&mut self, capacity: usize) {
        self.times.resize(capacity, EngineTime::MIN_DT);
        self.observers.on_capacity(capacity);
    }
    fn on_insert(&mut self, _slot: usize) {}
    fn on_erase(&mut self, slot: usize) {
        self.times[slot] = EngineTime::MIN_DT;
        self.observers.on_erase(slot);
    }
    fn on_update(&mut self, _slot: usize) {}
    fn on_clear(&mut self) {
        self.times.iter_mut().for_each(|t| *t = EngineTime::MIN_DT);
        self.observers.on_clear();
    }
}

/// Tick-scoped record of which parts of an endpoint changed.
#[derive(Clone, Debug, Default)]
pub enum Delta {
    /// No delta tracking (scalars replace wholesale).
    #[default]
    None,
    /// Modified static-child indices of a bundle or list.
    Fields {
        /// Child indices touched this tick.
        modified: Vec<usize>,
        /// Tick the record belongs to.
        tick: EngineTime,
    },
    /// Key-level changes of a dict.
    Dict {
        /// Keys inserted this tick.
        added: Vec<Value>,
        /// Keys removed this tick.
        removed: Vec<Value>,
        /// Slots written this tick (insertions included).
        modified: Vec<usize>,
        /// Tick the record belongs to.
        tick: EngineTime,
    },
    /// Element-level changes of a set.
    Set {
        /// Elements added this tick.
        added: Vec<Value>,
        /// Elements removed this tick.
        removed: Vec<Value>,
        /// Tick the record belongs to.
        tick: EngineTime,
    },
    /// Number of values pushed into a window this tick.
    Window {
        /// Values appended this tick.
        pushed: usize,
        /// Tick the record belongs to.
        tick: EngineTime,
    },
}

impl Delta {
    /// The tick this delta belongs to, if any.
    pub fn tick(&self) -> Option<EngineTime> {
        match self {
            Delta::None => None,
            Delta::Fields { tick, .. }
            | Delta::Dict { tick, .. }
            | Delta::Set { tick, .. }
            | Delta::Window { tick, .. } => Some(*tick),
        }
    }

    /// Resets a stale record so it can accumulate changes for `now`.
    pub fn roll(&mut self, kind: TsKind, now: EngineTime) {
        if self.tick() == Some(now) {
            return;
        }
        *self = match kind {
            TsKind::Tsb | TsKind::Tsl => Delta::Fields {
                modified: Vec::new(),
                tick: now,
            },
            TsKind::Tsd => Delta::Dict {
                added: Vec::new(),
                removed: Vec::new(),
                modified: Vec::new(),
                tick: now,
            },
            TsKind::Tss => Delta::Set {
                added: Vec::new(),
                removed: Vec::new(),
                tick: now,
            },
            TsKind::Tsw => Delta::Window { pushed: 0, tick: now },
            _ => Delta::None,
        };
    }
}

/// The storage unit of one time-series endpoint: value, time, observers,
/// delta, and structural position, laid out per its interned meta.
#[derive(Debug)]
pub struct TsValue {
    pub(crate) meta: &'static TsMeta,
    pub(crate) store: TsStore,
    pub(crate) time: EngineTime,
    pub(crate) observers: ObserverList,
    pub(crate) delta: Delta,
    /// Parent endpoint and this endpoint's child index within it.
    pub(crate) owner: Option<(TsId, usize)>,
}

impl TsValue {
    /// The endpoint's interned meta.
    pub fn meta(&self) -> &'static TsMeta {
        self.meta
    }

    /// Last modification time; `MIN_DT` until first set.
    pub fn time(&self) -> EngineTime {
        self.time
    }

    /// The endpoint-level observer list.
    pub fn observers(&self) -> &ObserverList {
        &self.observers
    }

    /// The endpoint-level observer list, mutably.
    pub fn observers_mut(&mut self) -> &mut ObserverList {
        &mut self.observers
    }

    /// Kind-specific storage.
    pub fn store(&self) -> &TsStore {
        &self.store
    }

    /// Builds the non-owning view descriptor for this endpoint.
    pub fn make_view_data(self_id: TsId, path: ShortPath) -> ViewData {
        ViewData { ts: self_id, path }
    }
}

/// Allocates the endpoint tree for `meta` into `arena`, returning the root.
///
/// Bundle and fixed-list children are allocated eagerly so that structural
/// paths resolve before the first tick; dynamic kinds grow their own slots.
pub fn alloc_endpoint(arena: &mut TsArena, meta: &'static TsMeta, owner: Option<(TsId, usize)>) -> TsId {
    let store = match meta.kind() {
        TsKind::Ts | TsKind::Ref | TsKind::Signal => TsStore::Scalar(Value::Nothing),
        TsKind::Tsb | TsKind::Tsl => TsStore::Fixed(Vec::new()),
        TsKind::Tsd => TsStore::Dict(DictStore::default()),
        TsKind::Tss => TsStore::Set(SetStore::default()),
        TsKind::Tsw => TsStore::Window(WindowStore {
            capacity: meta.window(),
            ..WindowStore::default()
        }),
    };
    let root = arena.insert(TsValue {
        meta,
        store,
        time: EngineTime::MIN_DT,
        observers: ObserverList::new(),
        delta: Delta::None,
        owner,
    });
    let child_count = meta.static_child_count();
    if child_count > 0 {
        let mut children = Vec::with_capacity(child_count);
        for index in 0..child_count {
            let child_meta = meta
                .static_child_meta(index)
                .expect("static child meta within arity");
            children.push(alloc_endpoint(arena, child_meta, Some((root, index))));
        }
        arena[root].store = TsStore::Fixed(children);
    }
    root
}

/// Registers a notifier on one slot of a dict or set endpoint. Slot
/// observers hear about writes to that slot and exactly one removal.
pub fn subscribe_slot(arena: &mut TsArena, ts: TsId, slot: usize, notifier: super::Notifier) {
    match &mut arena[ts].store {
        TsStore::Dict(dict) => dict.observers.slot_mut(slot).add_observer(notifier),
        TsStore::Set(set) => set.observers.slot_mut(slot).add_observer(notifier),
        _ => {}
    }
}

/// Removes a slot registration installed by [`subscribe_slot`].
pub fn unsubscribe_slot(arena: &mut TsArena, ts: TsId, slot: usize, notifier: super::Notifier) {
    match &mut arena[ts].store {
        TsStore::Dict(dict) => dict.observers.slot_mut(slot).remove_observer(notifier),
        TsStore::Set(set) => set.observers.slot_mut(slot).remove_observer(notifier),
        _ => {}
    }
}

/// A non-owning descriptor naming an endpoint and a node-relative path.
#[derive(Clone, Debug, Default)]
pub struct ViewData {
    /// Root endpoint the path starts from.
    pub ts: TsId,
    /// Child indices to walk from the root.
    pub path: ShortPath,
}

impl ViewData {
    /// A view of the endpoint itself.
    pub fn root(ts: TsId) -> Self {
        ViewData {
            ts,
            path: ShortPath::new(),
        }
    }

    /// The view extended by one child index.
    pub fn child(&self, index: usize) -> Self {
        let mut path = self.path.clone();
        path.push(index as u16);
        ViewData { ts: self.ts, path }
    }
}

/// Where a view path lands: a whole endpoint, or one slot of a dynamic one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedSlot {
    /// The endpoint reached.
    pub ts: TsId,
    /// Slot within a dict/set endpoint, when the path indexes into one.
    pub slot: Option<usize>,
}

/// Walks `data.path` from `data.ts` through static children, terminating in
/// a dynamic slot index at a dict or set.
pub fn resolve(arena: &TsArena, data: &ViewData) -> Result<ResolvedSlot> {
    let mut ts = data.ts;
    let mut components = data.path.iter().copied().peekable();
    while let Some(component) = components.next() {
        let index = component as usize;
        match &arena[ts].store {
            TsStore::Fixed(children) => {
                ts = *children.get(index).ok_or_else(|| bad_path(arena, data))?;
            }
            TsStore::Dict(dict) => {
                if components.peek().is_some() || dict.keys.slot_key(index).is_none() {
                    return Err(bad_path(arena, data));
                }
                return Ok(ResolvedSlot { ts, slot: Some(index) });
            }
            TsStore::Set(set) => {
                if components.peek().is_some() || set.keys.slot_key(index).is_none() {
                    return Err(bad_path(arena, data));
                }
                return Ok(ResolvedSlot { ts, slot: Some(index) });
            }
            TsStore::Scalar(_) | TsStore::Window(_) => return Err(bad_path(arena, data)),
        }
    }
    Ok(ResolvedSlot { ts, slot: None })
}

fn bad_path(arena: &TsArena, data: &ViewData) -> EngineError {
    EngineError::UnknownPath {
        path: data.path.iter().map(|c| *c as usize).collect(),
        meta: arena[data.ts].meta.name().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeMeta;

    #[test]
    fn bundle_tree_allocation_and_paths() {
        let inner = TsMeta::tsb(&[("x", TsMeta::ts(TypeMeta::int()))]);
        let meta = TsMeta::tsb(&[
            ("a", TsMeta::ts(TypeMeta::int())),
            ("b", inner),
        ]);
        let mut arena = TsArena::new();
        let root = alloc_endpoint(&mut arena, meta, None);
        // Root + a + b + b.x
        assert_eq!(arena.len(), 4);

        let view = ViewData::root(root).child(1).child(0);
        let resolved = resolve(&arena, &view).expect("path resolves");
        assert_eq!(arena[resolved.ts].meta().name(), "TS[int]");
        assert_eq!(resolved.slot, None);

        let bad = ViewData::root(root).child(7);
        assert!(resolve(&arena, &bad).is_err());
    }
}
