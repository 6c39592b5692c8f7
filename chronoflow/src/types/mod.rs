//! The value and schema layer: interned type metadata, typed value storage,
//! and the slot-synchronized key set underpinning dict and set kinds.

pub mod keyset;
pub mod meta;
pub mod registry;
pub mod value;

pub use keyset::{KeySet, NullSlotObserver, SlotInsert, SlotObserver};
pub use meta::{TsKind, TsMeta, TypeMeta, ValueKind};
pub use value::{copy_assign, equal, hash_value, make_value, TsRef, Value, ValueMap, ValueSet};
