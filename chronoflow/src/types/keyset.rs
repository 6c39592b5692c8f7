//! Open-addressed key storage with slot-synchronized parallel arrays.
//!
//! A [`KeySet`] separates *slot storage* (stable indices, recycled through a
//! free list) from the *hash index* (open-addressed table of slot numbers).
//! Rehashing rebuilds only the index, so slot numbers handed to parallel
//! arrays stay valid for the life of the key. Every mutation reports to a
//! [`SlotObserver`] so those arrays never drift out of sync.

use rustc_hash::FxHasher;
use std::hash::Hasher;

use super::value::{raw_equal, raw_hash, Value};

/// Callbacks keeping slot-parallel storage synchronized with a [`KeySet`].
///
/// After any operation, an attached observer's capacity equals
/// [`KeySet::capacity`] and exactly the occupied slots are active.
pub trait SlotObserver {
    /// Slot storage grew to `capacity` slots.
    fn on_capacity(&mut self, capacity: usize);
    /// A key was inserted at `slot`.
    fn on_insert(&mut self, slot: usize);
    /// The key at `slot` was erased.
    fn on_erase(&mut self, slot: usize);
    /// An existing key at `slot` was written again.
    fn on_update(&mut self, slot: usize);
    /// All keys were discarded.
    fn on_clear(&mut self);
}

/// An observer for key sets with no parallel storage attached.
pub struct NullSlotObserver;

impl SlotObserver for NullSlotObserver {
    fn on_capacity(&mut self, _capacity: usize) {}
    fn on_insert(&mut self, _slot: usize) {}
    fn on_erase(&mut self, _slot: usize) {}
    fn on_update(&mut self, _slot: usize) {}
    fn on_clear(&mut self) {}
}

const EMPTY: u32 = u32::MAX;
const TOMBSTONE: u32 = u32::MAX - 1;
const INITIAL_INDEX: usize = 8;

/// Insertion outcome: the slot, and whether the key was new.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotInsert {
    /// Stable slot number for the key.
    pub slot: usize,
    /// False when the key was already present.
    pub inserted: bool,
}

/// An open-addressed hash set of [`Value`] keys with stable slot numbers.
#[derive(Debug, Default, Clone)]
pub struct KeySet {
    /// Open-addressed table of slot numbers (`EMPTY`/`TOMBSTONE` sentinels).
    index: Vec<u32>,
    /// Slot-stable key storage.
    keys: Vec<Option<Value>>,
    /// Recycled slots.
    free: Vec<u32>,
    len: usize,
    tombstones: usize,
}

fn mix(value: &Value) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(raw_hash(value));
    hasher.finish()
}

impl KeySet {
    /// An empty key set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no key is present.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slot capacity; parallel arrays must match it exactly.
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// The key stored at `slot`, if occupied.
    pub fn slot_key(&self, slot: usize) -> Option<&Value> {
        self.keys.get(slot).and_then(Option::as_ref)
    }

    /// Looks up a key's slot.
    pub fn lookup(&self, key: &Value) -> Option<usize> {
        if self.index.is_empty() {
            return None;
        }
        let mask = self.index.len() - 1;
        let mut probe = mix(key) as usize & mask;
        loop {
            match self.index[probe] {
                EMPTY => return None,
                TOMBSTONE => {}
                slot => {
                    if self.keys[slot as usize]
                        .as_ref()
                        .is_some_and(|k| raw_equal(k, key))
                    {
                        return Some(slot as usize);
                    }
                }
            }
            probe = (probe + 1) & mask;
        }
    }

    /// Inserts `key`, reporting growth and the insert/update to `obs`.
    pub fn insert(&mut self, key: Value, obs: &mut dyn SlotObserver) -> SlotInsert {
        self.reserve_index();
        let mask = self.index.len() - 1;
        let mut probe = mix(&key) as usize & mask;
        let mut reuse = None;
        loop {
            match self.index[probe] {
                EMPTY => break,
                TOMBSTONE => {
                    if reuse.is_none() {
                        reuse = Some(probe);
                    }
                }
                slot => {
                    if self.keys[slot as usize]
                        .as_ref()
                        .is_some_and(|k| raw_equal(k, &key))
                    {
                        obs.on_update(slot as usize);
                        return SlotInsert {
                            slot: slot as usize,
                            inserted: false,
                        };
                    }
                }
            }
            probe = (probe + 1) & mask;
        }
        let entry = match reuse {
            Some(tomb) => {
                self.tombstones -= 1;
                tomb
            }
            None => probe,
        };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.keys[slot as usize] = Some(key);
                slot
            }
            None => {
                let slot = self.keys.len() as u32;
                self.keys.push(Some(key));
                obs.on_capacity(self.keys.len());
                slot
            }
        };
        self.index[entry] = slot;
        self.len += 1;
        obs.on_insert(slot as usize);
        SlotInsert {
            slot: slot as usize,
            inserted: true,
        }
    }

    /// Erases `key`, returning its former slot. The slot is recycled for
    /// later inserts; `obs` sees the erase before any such reuse.
    pub fn erase(&mut self, key: &Value, obs: &mut dyn SlotObserver) -> Option<usize> {
        if self.index.is_empty() {
            return None;
        }
        let mask = self.index.len() - 1;
        let mut probe = mix(key) as usize & mask;
        loop {
            match self.index[probe] {
                EMPTY => return None,
                TOMBSTONE => {}
                slot => {
                    if self.keys[slot as usize]
                        .as_ref()
                        .is_some_and(|k| raw_equal(k, key))
                    {
                        self.index[probe] = TOMBSTONE;
                        self.tombstones += 1;
                        self.keys[slot as usize] = None;
                        self.free.push(slot);
                        self.len -= 1;
                        obs.on_erase(slot as usize);
                        return Some(slot as usize);
                    }
                }
            }
            probe = (probe + 1) & mask;
        }
    }

    /// Discards every key. Slot capacity is retained.
    pub fn clear(&mut self, obs: &mut dyn SlotObserver) {
        self.index.iter_mut().for_each(|entry| *entry = EMPTY);
        self.free.clear();
        for (slot, key) in self.keys.iter_mut().enumerate().rev() {
            *key = None;
            self.free.push(slot as u32);
        }
        self.len = 0;
        self.tombstones = 0;
        obs.on_clear();
    }

    /// Occupied `(slot, key)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.keys
            .iter()
            .enumerate()
            .filter_map(|(slot, key)| key.as_ref().map(|k| (slot, k)))
    }

    /// Ensures the index can absorb one more insert at < 3/4 load.
    fn reserve_index(&mut self) {
        if self.index.is_empty() {
            self.index = vec![EMPTY; INITIAL_INDEX];
            return;
        }
        if (self.len + self.tombstones + 1) * 4 > self.index.len() * 3 {
            let new_len = (self.index.len() * 2).max(INITIAL_INDEX);
            self.rebuild_index(new_len);
        }
    }

    /// Rebuilds the hash index; slot numbers are untouched.
    fn rebuild_index(&mut self, new_len: usize) {
        let mut index = vec![EMPTY; new_len];
        let mask = new_len - 1;
        for (slot, key) in self.keys.iter().enumerate() {
            let Some(key) = key else { continue };
            let mut probe = mix(key) as usize & mask;
            while index[probe] != EMPTY {
                probe = (probe + 1) & mask;
            }
            index[probe] = slot as u32;
        }
        self.index = index;
        self.tombstones = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts active slots, mirroring a parallel array.
    #[derive(Default)]
    struct Mirror {
        capacity: usize,
        active: Vec<bool>,
        erases: usize,
    }

    impl SlotObserver for Mirror {
        fn on_capacity(&mut self, capacity: usize) {
            self.capacity = capacity;
            self.active.resize(capacity, false);
        }
        fn on_insert(&mut self, slot: usize) {
            assert!(!self.active[slot]);
            self.active[slot] = true;
        }
        fn on_erase(&mut self, slot: usize) {
            assert!(self.active[slot]);
            self.active[slot] = false;
            self.erases += 1;
        }
        fn on_update(&mut self, slot: usize) {
            assert!(self.active[slot]);
        }
        fn on_clear(&mut self) {
            self.active.iter_mut().for_each(|a| *a = false);
        }
    }

    fn active_count(mirror: &Mirror) -> usize {
        mirror.active.iter().filter(|a| **a).count()
    }

    #[test]
    fn slots_stay_synchronized() {
        let mut keys = KeySet::new();
        let mut mirror = Mirror::default();

        for i in 0..100i64 {
            keys.insert(Value::Int(i), &mut mirror);
            assert_eq!(mirror.capacity, keys.capacity());
            assert_eq!(active_count(&mirror), keys.len());
        }
        assert_eq!(keys.len(), 100);

        for i in (0..100i64).step_by(2) {
            assert!(keys.erase(&Value::Int(i), &mut mirror).is_some());
            assert_eq!(mirror.capacity, keys.capacity());
            assert_eq!(active_count(&mirror), keys.len());
        }
        assert_eq!(keys.len(), 50);
        assert_eq!(mirror.erases, 50);

        // Slots are recycled, capacity does not grow back.
        let capacity = keys.capacity();
        for i in 100..150i64 {
            keys.insert(Value::Int(i), &mut mirror);
        }
        assert_eq!(keys.capacity(), capacity);
        assert_eq!(active_count(&mirror), keys.len());
    }

    #[test]
    fn insert_update_erase() {
        let mut keys = KeySet::new();
        let first = keys.insert(Value::Str("x".into()), &mut NullSlotObserver);
        assert!(first.inserted);
        let again = keys.insert(Value::Str("x".into()), &mut NullSlotObserver);
        assert!(!again.inserted);
        assert_eq!(first.slot, again.slot);
        assert_eq!(keys.lookup(&Value::Str("x".into())), Some(first.slot));
        assert_eq!(keys.erase(&Value::Str("x".into()), &mut NullSlotObserver), Some(first.slot));
        assert_eq!(keys.lookup(&Value::Str("x".into())), None);
        assert!(keys.is_empty());
    }

    #[test]
    fn clear_recycles_all_slots() {
        let mut keys = KeySet::new();
        let mut mirror = Mirror::default();
        for i in 0..10i64 {
            keys.insert(Value::Int(i), &mut mirror);
        }
        keys.clear(&mut mirror);
        assert!(keys.is_empty());
        assert_eq!(active_count(&mirror), 0);
        assert_eq!(keys.capacity(), 10);
        // Lowest slots come back first after a clear.
        let re = keys.insert(Value::Int(7), &mut mirror);
        assert_eq!(re.slot, 0);
    }
}
