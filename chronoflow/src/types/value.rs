//! Typed value storage and the polymorphic operations over it.
//!
//! A [`Value`] is the payload of one time-series slot or one container child.
//! All operations dispatch on the value's [`TypeMeta`] and the finite
//! [`ValueKind`] tag; there is no other control flow by type.

use std::fmt;

use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

use super::keyset::{KeySet, NullSlotObserver, SlotObserver};
use super::meta::{TypeMeta, ValueKind};
use crate::arena::Idx;
use crate::error::{EngineError, Result};
use crate::time::EngineTime;
use crate::ts::TsTag;

/// A reference to a time-series endpoint, the payload of REF values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TsRef(pub Idx<TsTag>);

/// One typed value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Unset.
    #[default]
    Nothing,
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Unicode string.
    Str(String),
    /// Engine time.
    Time(EngineTime),
    /// Fixed-arity heterogeneous tuple.
    Tuple(Vec<Value>),
    /// Homogeneous list.
    List(Vec<Value>),
    /// Hashed element set.
    Set(Box<ValueSet>),
    /// Hashed key → value map.
    Map(Box<ValueMap>),
    /// Named record; field order follows the meta's schema.
    Bundle(Vec<Value>),
    /// Reference to a time-series endpoint.
    Ref(TsRef),
}

/// A set of hashed values.
#[derive(Clone, Debug, Default)]
pub struct ValueSet {
    keys: KeySet,
}

impl ValueSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Membership test.
    pub fn contains(&self, element: &Value) -> bool {
        self.keys.lookup(element).is_some()
    }

    /// Adds an element; true when it was new.
    pub fn add(&mut self, element: Value) -> bool {
        self.keys.insert(element, &mut NullSlotObserver).inserted
    }

    /// Removes an element; true when it was present.
    pub fn discard(&mut self, element: &Value) -> bool {
        self.keys.erase(element, &mut NullSlotObserver).is_some()
    }

    /// Elements in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.keys.iter().map(|(_, k)| k)
    }
}

impl FromIterator<Value> for ValueSet {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut set = ValueSet::new();
        for element in iter {
            set.add(element);
        }
        set
    }
}

/// A map of hashed keys to values, slot-parallel over a [`KeySet`].
#[derive(Clone, Debug, Default)]
pub struct ValueMap {
    keys: KeySet,
    values: Vec<Value>,
}

/// Keeps the value column sized with the key slots.
struct ColumnObserver<'a>(&'a mut Vec<Value>);

impl SlotObserver for ColumnObserver<'_> {
    fn on_capacity(&mut self, capacity: usize) {
        self.0.resize(capacity, Value::Nothing);
    }
    fn on_insert(&mut self, _slot: usize) {}
    fn on_erase(&mut self, slot: usize) {
        self.0[slot] = Value::Nothing;
    }
    fn on_update(&mut self, _slot: usize) {}
    fn on_clear(&mut self) {
        self.0.iter_mut().for_each(|v| *v = Value::Nothing);
    }
}

impl ValueMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The value under `key`, if present.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.keys.lookup(key).map(|slot| &self.values[slot])
    }

    /// Inserts or overwrites; returns the slot used.
    pub fn insert(&mut self, key: Value, value: Value) -> usize {
        let outcome = self.keys.insert(key, &mut ColumnObserver(&mut self.values));
        self.values[outcome.slot] = value;
        outcome.slot
    }

    /// Removes `key`, returning its former value.
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let slot = self.keys.lookup(key)?;
        let value = std::mem::take(&mut self.values[slot]);
        self.keys.erase(key, &mut ColumnObserver(&mut self.values));
        Some(value)
    }

    /// Entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.keys.iter().map(|(slot, k)| (k, &self.values[slot]))
    }
}

impl FromIterator<(Value, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = ValueMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl Value {
    /// The kind tag this value would satisfy, `None` for `Nothing`.
    pub fn kind(&self) -> Option<ValueKind> {
        Some(match self {
            Value::Nothing => return None,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Str(_) => ValueKind::Str,
            Value::Time(_) => ValueKind::Time,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
            Value::Map(_) => ValueKind::Map,
            Value::Bundle(_) => ValueKind::Bundle,
            Value::Ref(_) => ValueKind::Ts,
        })
    }

    /// True when this value is structurally admissible under `meta`.
    /// `Nothing` conforms everywhere: it is the unset payload.
    pub fn conforms(&self, meta: &'static TypeMeta) -> bool {
        match (self, meta.kind()) {
            (Value::Nothing, _) => true,
            (Value::Int(_), ValueKind::Int)
            | (Value::Float(_), ValueKind::Float)
            | (Value::Bool(_), ValueKind::Bool)
            | (Value::Bytes(_), ValueKind::Bytes)
            | (Value::Str(_), ValueKind::Str)
            | (Value::Time(_), ValueKind::Time)
            | (Value::Ref(_), ValueKind::Ts) => true,
            (Value::Tuple(items), ValueKind::Tuple) | (Value::Bundle(items), ValueKind::Bundle) => {
                items.len() == meta.fields().len()
                    && items
                        .iter()
                        .zip(meta.fields())
                        .all(|(v, (_, m))| v.conforms(m))
            }
            (Value::List(items), ValueKind::List) => meta
                .element()
                .is_some_and(|m| items.iter().all(|v| v.conforms(m))),
            (Value::Set(set), ValueKind::Set) => meta
                .element()
                .is_some_and(|m| set.iter().all(|v| v.conforms(m))),
            (Value::Map(map), ValueKind::Map) => {
                let (Some(km), Some(vm)) = (meta.key(), meta.element()) else {
                    return false;
                };
                map.iter().all(|(k, v)| k.conforms(km) && v.conforms(vm))
            }
            _ => false,
        }
    }

    /// Number of children of a container value.
    pub fn child_count(&self) -> usize {
        match self {
            Value::Tuple(items) | Value::List(items) | Value::Bundle(items) => items.len(),
            Value::Set(set) => set.len(),
            Value::Map(map) => map.len(),
            _ => 0,
        }
    }

    /// The `index`th child of a tuple, list, or bundle.
    pub fn child_at(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Tuple(items) | Value::List(items) | Value::Bundle(items) => items.get(index),
            _ => None,
        }
    }

    /// Renders the value for error messages; containers render their arity.
    pub fn describe(&self) -> String {
        match self.kind() {
            None => "nothing".to_owned(),
            Some(kind) => match self {
                Value::Tuple(items) => format!("tuple of {}", items.len()),
                Value::Bundle(items) => format!("bundle of {}", items.len()),
                _ => format!("{kind:?}").to_lowercase(),
            },
        }
    }
}

/// Schema-checks `src` against `meta` and copy-assigns it into `dst`.
pub fn copy_assign(dst: &mut Value, src: &Value, meta: &'static TypeMeta) -> Result<()> {
    if !src.conforms(meta) {
        return Err(EngineError::SchemaMismatch {
            expected: meta.name().to_owned(),
            found: src.describe(),
        });
    }
    dst.clone_from(src);
    Ok(())
}

/// Hashes a value under `meta`, failing for non-hashable metas.
pub fn hash_value(meta: &'static TypeMeta, value: &Value) -> Result<u64> {
    if !meta.hashable() {
        return Err(EngineError::NotHashable(meta.name().to_owned()));
    }
    Ok(raw_hash(value))
}

/// Structural hash. Floats hash by bit pattern; callers gate hashability
/// through [`hash_value`].
pub(crate) fn raw_hash(value: &Value) -> u64 {
    let mut hasher = FxHasher::default();
    hash_into(value, &mut hasher);
    hasher.finish()
}

fn hash_into(value: &Value, hasher: &mut FxHasher) {
    std::mem::discriminant(value).hash(hasher);
    match value {
        Value::Nothing => {}
        Value::Int(v) => v.hash(hasher),
        Value::Float(v) => v.to_bits().hash(hasher),
        Value::Bool(v) => v.hash(hasher),
        Value::Bytes(v) => v.hash(hasher),
        Value::Str(v) => v.hash(hasher),
        Value::Time(v) => v.hash(hasher),
        Value::Tuple(items) | Value::List(items) | Value::Bundle(items) => {
            items.len().hash(hasher);
            items.iter().for_each(|v| hash_into(v, hasher));
        }
        Value::Set(set) => {
            // Order-independent combine.
            let mut acc = 0u64;
            for element in set.iter() {
                acc = acc.wrapping_add(raw_hash(element));
            }
            acc.hash(hasher);
        }
        Value::Map(map) => {
            let mut acc = 0u64;
            for (k, v) in map.iter() {
                acc = acc.wrapping_add(raw_hash(k) ^ raw_hash(v).rotate_left(17));
            }
            acc.hash(hasher);
        }
        Value::Ref(TsRef(slot)) => slot.raw().hash(hasher),
    }
}

/// Structural equality; floats compare by bit pattern so that equality and
/// hashing agree inside key sets.
pub(crate) fn raw_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nothing, Value::Nothing) => true,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Time(x), Value::Time(y)) => x == y,
        (Value::Tuple(x), Value::Tuple(y))
        | (Value::List(x), Value::List(y))
        | (Value::Bundle(x), Value::Bundle(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| raw_equal(a, b))
        }
        (Value::Set(x), Value::Set(y)) => {
            x.len() == y.len() && x.iter().all(|element| y.contains(element))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| raw_equal(v, other)))
        }
        (Value::Ref(x), Value::Ref(y)) => x == y,
        _ => false,
    }
}

/// Polymorphic equality under a meta: both values must conform, then
/// structural equality decides.
pub fn equal(meta: &'static TypeMeta, a: &Value, b: &Value) -> bool {
    a.conforms(meta) && b.conforms(meta) && raw_equal(a, b)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        raw_equal(self, other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nothing => write!(f, "∅"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "b[{}]", v.len()),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Time(v) => write!(f, "{v}"),
            Value::Tuple(items) | Value::List(items) | Value::Bundle(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Value::Set(set) => write!(f, "set of {}", set.len()),
            Value::Map(map) => write!(f, "map of {}", map.len()),
            Value::Ref(TsRef(slot)) => write!(f, "ref -> {slot}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<EngineTime> for Value {
    fn from(v: EngineTime) -> Self {
        Value::Time(v)
    }
}

impl TryFrom<&Value> for i64 {
    type Error = EngineError;
    fn try_from(value: &Value) -> Result<i64> {
        match value {
            Value::Int(v) => Ok(*v),
            other => Err(EngineError::SchemaMismatch {
                expected: "int".to_owned(),
                found: other.describe(),
            }),
        }
    }
}

impl TryFrom<&Value> for f64 {
    type Error = EngineError;
    fn try_from(value: &Value) -> Result<f64> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(EngineError::SchemaMismatch {
                expected: "float".to_owned(),
                found: other.describe(),
            }),
        }
    }
}

impl TryFrom<&Value> for bool {
    type Error = EngineError;
    fn try_from(value: &Value) -> Result<bool> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => Err(EngineError::SchemaMismatch {
                expected: "bool".to_owned(),
                found: other.describe(),
            }),
        }
    }
}

/// Allocates the unset payload for a fresh slot of `meta`.
///
/// Containers start structurally present but empty, so child access works
/// before the first tick; scalars start as `Nothing`.
pub fn make_value(meta: &'static TypeMeta) -> Value {
    match meta.kind() {
        ValueKind::Tuple => Value::Tuple(vec![Value::Nothing; meta.fields().len()]),
        ValueKind::Bundle => Value::Bundle(vec![Value::Nothing; meta.fields().len()]),
        ValueKind::List => Value::List(Vec::new()),
        ValueKind::Set => Value::Set(Box::default()),
        ValueKind::Map => Value::Map(Box::default()),
        _ => Value::Nothing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conformance_and_copy_assign() {
        let meta = TypeMeta::map(TypeMeta::str_(), TypeMeta::int());
        let mut map = ValueMap::new();
        map.insert("x".into(), Value::Int(1));
        let src = Value::Map(Box::new(map));
        let mut dst = make_value(meta);
        copy_assign(&mut dst, &src, meta).expect("conforming assign");
        assert_eq!(dst, src);

        let bad = Value::Int(3);
        let err = copy_assign(&mut dst, &bad, meta).unwrap_err();
        assert!(matches!(err, EngineError::SchemaMismatch { .. }));
    }

    #[test]
    fn hash_agrees_with_equality() {
        let a = Value::Tuple(vec![Value::Int(1), Value::Float(2.5)]);
        let b = Value::Tuple(vec![Value::Int(1), Value::Float(2.5)]);
        assert_eq!(a, b);
        assert_eq!(raw_hash(&a), raw_hash(&b));

        let meta = TypeMeta::map(TypeMeta::str_(), TypeMeta::int());
        assert!(matches!(
            hash_value(meta, &a),
            Err(EngineError::NotHashable(_))
        ));
        assert!(hash_value(TypeMeta::int(), &Value::Int(7)).is_ok());
    }

    #[test]
    fn set_semantics() {
        let mut set = ValueSet::new();
        assert!(set.add(Value::Int(1)));
        assert!(!set.add(Value::Int(1)));
        assert!(set.contains(&Value::Int(1)));
        assert!(set.discard(&Value::Int(1)));
        assert!(!set.discard(&Value::Int(1)));
    }
}
