//! Typed-index slot storage backing each graph's arena.
//!
//! Every node and every time-series endpoint of a graph lives in one of these
//! pre-sized vectors and is addressed by a tagged index, so the hot path never
//! chases heap pointers and the whole graph is freed as a unit.

use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A typed index into a [`SlotVec`].
#[repr(transparent)]
pub struct Idx<Tag: ?Sized> {
    index: u32,
    _tag: PhantomData<Tag>,
}

impl<Tag: ?Sized> Idx<Tag> {
    /// Builds an index from a raw offset. Prefer the keys handed out by
    /// [`SlotVec::insert`].
    pub fn from_raw(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        Idx {
            index: index as u32,
            _tag: PhantomData,
        }
    }

    /// The raw offset.
    pub fn raw(self) -> usize {
        self.index as usize
    }
}

impl<Tag: ?Sized> Clone for Idx<Tag> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<Tag: ?Sized> Copy for Idx<Tag> {}
impl<Tag: ?Sized> Default for Idx<Tag> {
    fn default() -> Self {
        Idx {
            index: 0,
            _tag: PhantomData,
        }
    }
}
impl<Tag: ?Sized> PartialEq for Idx<Tag> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}
impl<Tag: ?Sized> Eq for Idx<Tag> {}
impl<Tag: ?Sized> PartialOrd for Idx<Tag> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<Tag: ?Sized> Ord for Idx<Tag> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}
impl<Tag: ?Sized> Hash for Idx<Tag> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}
impl<Tag: ?Sized> Debug for Idx<Tag> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Idx({})", self.index)
    }
}
impl<Tag: ?Sized> Display for Idx<Tag> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}

/// A Vec-backed slot store without removal; slots are stable for the life of
/// the owning graph and freed with it, in reverse construction order.
pub struct SlotVec<Tag: ?Sized, Val> {
    slots: Vec<Val>,
    _tag: PhantomData<Tag>,
}

impl<Tag: ?Sized, Val> SlotVec<Tag, Val> {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            _tag: PhantomData,
        }
    }

    /// An empty store with room for `capacity` slots, as computed by the
    /// builder's sizing pass.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            _tag: PhantomData,
        }
    }

    /// Appends a value, returning its index.
    pub fn insert(&mut self, value: Val) -> Idx<Tag> {
        let key = Idx::from_raw(self.slots.len());
        self.slots.push(value);
        key
    }

    /// Appends the value produced by `func`, which receives the new index.
    pub fn insert_with_key<F>(&mut self, func: F) -> Idx<Tag>
    where
        F: FnOnce(Idx<Tag>) -> Val,
    {
        let key = Idx::from_raw(self.slots.len());
        self.slots.push(func(key));
        key
    }

    /// Shared access, `None` when out of bounds.
    pub fn get(&self, key: Idx<Tag>) -> Option<&Val> {
        self.slots.get(key.raw())
    }

    /// Mutable access, `None` when out of bounds.
    pub fn get_mut(&mut self, key: Idx<Tag>) -> Option<&mut Val> {
        self.slots.get_mut(key.raw())
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Key-value iteration in index order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Idx<Tag>, &'_ Val)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, value)| (Idx::from_raw(index), value))
    }

    /// Key-value iteration with mutable values, in index order.
    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = (Idx<Tag>, &'_ mut Val)> {
        self.slots
            .iter_mut()
            .enumerate()
            .map(|(index, value)| (Idx::from_raw(index), value))
    }

    /// All keys, in index order.
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = Idx<Tag>> + Clone {
        (0..self.slots.len()).map(Idx::from_raw)
    }

    /// Drops all slots in reverse construction order.
    pub fn clear_reverse(&mut self) {
        while self.slots.pop().is_some() {}
    }
}

impl<Tag: ?Sized, Val> Default for SlotVec<Tag, Val> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tag: ?Sized, Val> Index<Idx<Tag>> for SlotVec<Tag, Val> {
    type Output = Val;
    fn index(&self, key: Idx<Tag>) -> &Val {
        &self.slots[key.raw()]
    }
}

impl<Tag: ?Sized, Val> IndexMut<Idx<Tag>> for SlotVec<Tag, Val> {
    fn index_mut(&mut self, key: Idx<Tag>) -> &mut Val {
        &mut self.slots[key.raw()]
    }
}
