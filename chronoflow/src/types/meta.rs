//! Interned type metadata for values and time-series.
//!
//! Every value carries a `&'static TypeMeta` and every time-series endpoint a
//! `&'static TsMeta`. Descriptors are interned in a process-wide registry
//! (see [`super::registry`]); identity is pointer identity, and all dispatch
//! is by the finite kind tag plus element descriptors, never by downcasting.

use std::fmt;

/// The finite set of value kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// Boolean.
    Bool,
    /// Byte string.
    Bytes,
    /// Unicode string.
    Str,
    /// Engine time.
    Time,
    /// Fixed-arity heterogeneous tuple.
    Tuple,
    /// Hashed set of elements.
    Set,
    /// Hashed key → value map.
    Map,
    /// Named record with per-field types.
    Bundle,
    /// Variable-length homogeneous list.
    List,
    /// A reference to a time-series endpoint.
    Ts,
}

/// A process-lifetime type descriptor.
///
/// Obtained from the interning constructors in [`super::registry`]; two metas
/// describe the same type exactly when they are the same pointer.
pub struct TypeMeta {
    pub(crate) kind: ValueKind,
    pub(crate) name: String,
    /// Element type for `List`/`Set`, value type for `Map`.
    pub(crate) element: Option<&'static TypeMeta>,
    /// Key type for `Map`.
    pub(crate) key: Option<&'static TypeMeta>,
    /// Field names and types for `Bundle`; unnamed for `Tuple`.
    pub(crate) fields: Vec<(String, &'static TypeMeta)>,
    /// Target meta when `kind == Ts`.
    pub(crate) ts: Option<&'static TsMeta>,
}

impl TypeMeta {
    /// The value kind tag.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// The interned rendering of this type, e.g. `map[str, int]`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element type of a list or set, value type of a map.
    pub fn element(&self) -> Option<&'static TypeMeta> {
        self.element
    }

    /// Key type of a map.
    pub fn key(&self) -> Option<&'static TypeMeta> {
        self.key
    }

    /// Bundle/tuple field schema.
    pub fn fields(&self) -> &[(String, &'static TypeMeta)] {
        &self.fields
    }

    /// Target time-series meta of a `ts`-kind value.
    pub fn ts(&self) -> Option<&'static TsMeta> {
        self.ts
    }

    /// Number of child types: tuple/bundle arity, 1 for list/set, 2 for map.
    pub fn child_count(&self) -> usize {
        match self.kind {
            ValueKind::Tuple | ValueKind::Bundle => self.fields.len(),
            ValueKind::List | ValueKind::Set => 1,
            ValueKind::Map => 2,
            _ => 0,
        }
    }

    /// The `index`th child type, if any.
    pub fn child_at(&self, index: usize) -> Option<&'static TypeMeta> {
        match self.kind {
            ValueKind::Tuple | ValueKind::Bundle => self.fields.get(index).map(|(_, m)| *m),
            ValueKind::List | ValueKind::Set => (index == 0).then(|| self.element).flatten(),
            ValueKind::Map => match index {
                0 => self.key,
                1 => self.element,
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether values of this type may be hashed (set elements, map keys).
    /// Floats hash by bit pattern; reference values do not hash.
    pub fn hashable(&self) -> bool {
        match self.kind {
            ValueKind::Ts => false,
            ValueKind::Tuple | ValueKind::Bundle => {
                self.fields.iter().all(|(_, m)| m.hashable())
            }
            ValueKind::List | ValueKind::Set => self.element.is_some_and(|m| m.hashable()),
            ValueKind::Map => false,
            _ => true,
        }
    }

    /// Size and alignment of the in-slot payload for this kind.
    pub fn layout(&self) -> (usize, usize) {
        use std::mem::{align_of, size_of};
        match self.kind {
            ValueKind::Int => (size_of::<i64>(), align_of::<i64>()),
            ValueKind::Float => (size_of::<f64>(), align_of::<f64>()),
            ValueKind::Bool => (size_of::<bool>(), align_of::<bool>()),
            ValueKind::Time => (size_of::<i64>(), align_of::<i64>()),
            _ => (size_of::<crate::types::Value>(), align_of::<crate::types::Value>()),
        }
    }
}

impl fmt::Debug for TypeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeMeta({})", self.name)
    }
}

impl PartialEq for TypeMeta {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}
impl Eq for TypeMeta {}

/// The finite set of time-series kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TsKind {
    /// Scalar time-series.
    Ts,
    /// Set time-series.
    Tss,
    /// Dict time-series.
    Tsd,
    /// Fixed-size list of child time-series.
    Tsl,
    /// Named bundle of child time-series.
    Tsb,
    /// Windowed time-series over a ring buffer.
    Tsw,
    /// Reference to another time-series endpoint.
    Ref,
    /// Value-less signal.
    Signal,
}

/// A process-lifetime time-series descriptor, interned like [`TypeMeta`].
pub struct TsMeta {
    pub(crate) kind: TsKind,
    pub(crate) name: String,
    /// Value type for `Ts`; element value type for `Tss`/`Tsd`/`Tsw`.
    pub(crate) element: Option<&'static TypeMeta>,
    /// Key type for `Tsd`.
    pub(crate) key: Option<&'static TypeMeta>,
    /// Field schema for `Tsb`.
    pub(crate) fields: Vec<(String, &'static TsMeta)>,
    /// Child meta and fixed arity for `Tsl`.
    pub(crate) item: Option<&'static TsMeta>,
    pub(crate) len: usize,
    /// Ring capacity for `Tsw`.
    pub(crate) window: usize,
    /// Target meta for `Ref`.
    pub(crate) target: Option<&'static TsMeta>,
}

impl TsMeta {
    /// The time-series kind tag.
    pub fn kind(&self) -> TsKind {
        self.kind
    }

    /// The interned rendering, e.g. `TSD[str, int]`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scalar/element value type.
    pub fn element(&self) -> Option<&'static TypeMeta> {
        self.element
    }

    /// Dict key type.
    pub fn key(&self) -> Option<&'static TypeMeta> {
        self.key
    }

    /// Bundle field schema.
    pub fn fields(&self) -> &[(String, &'static TsMeta)] {
        &self.fields
    }

    /// List child meta.
    pub fn item(&self) -> Option<&'static TsMeta> {
        self.item
    }

    /// Fixed arity of a `Tsl`.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Ring capacity of a `Tsw`.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Target meta of a `Ref`.
    pub fn target(&self) -> Option<&'static TsMeta> {
        self.target
    }

    /// Number of structural children built into the arena for this meta:
    /// bundle fields and list items; dynamic kinds manage slots internally.
    pub fn static_child_count(&self) -> usize {
        match self.kind {
            TsKind::Tsb => self.fields.len(),
            TsKind::Tsl => self.len,
            _ => 0,
        }
    }

    /// The meta of structural child `index`.
    pub fn static_child_meta(&self, index: usize) -> Option<&'static TsMeta> {
        match self.kind {
            TsKind::Tsb => self.fields.get(index).map(|(_, m)| *m),
            TsKind::Tsl => (index < self.len).then(|| self.item).flatten(),
            _ => None,
        }
    }

    /// Position of a named bundle field.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    /// Arena slots needed for one endpoint of this meta, children included.
    pub fn slot_budget(&self) -> usize {
        1 + (0..self.static_child_count())
            .filter_map(|i| self.static_child_meta(i))
            .map(TsMeta::slot_budget)
            .sum::<usize>()
    }
}

impl fmt::Debug for TsMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TsMeta({})", self.name)
    }
}

impl PartialEq for TsMeta {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}
impl Eq for TsMeta {}
