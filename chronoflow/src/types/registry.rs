//! The process-wide, append-only registry of interned type descriptors.
//!
//! Constructors render a canonical name for the requested type, look it up,
//! and either return the already-interned descriptor or leak a fresh one.
//! Readers hold `&'static` descriptors and never take the lock again, so the
//! registry is lock-free for everyone but the interning writer.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::sync::Mutex;

use super::meta::{TsKind, TsMeta, TypeMeta, ValueKind};

static TYPES: Lazy<Mutex<FxHashMap<String, &'static TypeMeta>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

static TS_TYPES: Lazy<Mutex<FxHashMap<String, &'static TsMeta>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

fn intern_type(meta: TypeMeta) -> &'static TypeMeta {
    let mut map = TYPES.lock().expect("type registry poisoned");
    if let Some(existing) = map.get(&meta.name) {
        return existing;
    }
    let leaked: &'static TypeMeta = Box::leak(Box::new(meta));
    map.insert(leaked.name.clone(), leaked);
    leaked
}

fn intern_ts(meta: TsMeta) -> &'static TsMeta {
    let mut map = TS_TYPES.lock().expect("ts registry poisoned");
    if let Some(existing) = map.get(&meta.name) {
        return existing;
    }
    let leaked: &'static TsMeta = Box::leak(Box::new(meta));
    map.insert(leaked.name.clone(), leaked);
    leaked
}

fn scalar(kind: ValueKind, name: &str) -> &'static TypeMeta {
    intern_type(TypeMeta {
        kind,
        name: name.to_owned(),
        element: None,
        key: None,
        fields: Vec::new(),
        ts: None,
    })
}

impl TypeMeta {
    /// The interned `int` type.
    pub fn int() -> &'static TypeMeta {
        scalar(ValueKind::Int, "int")
    }

    /// The interned `float` type.
    pub fn float() -> &'static TypeMeta {
        scalar(ValueKind::Float, "float")
    }

    /// The interned `bool` type.
    pub fn bool_() -> &'static TypeMeta {
        scalar(ValueKind::Bool, "bool")
    }

    /// The interned `bytes` type.
    pub fn bytes() -> &'static TypeMeta {
        scalar(ValueKind::Bytes, "bytes")
    }

    /// The interned `str` type.
    pub fn str_() -> &'static TypeMeta {
        scalar(ValueKind::Str, "str")
    }

    /// The interned engine-time type.
    pub fn time() -> &'static TypeMeta {
        scalar(ValueKind::Time, "time")
    }

    /// The interned tuple of the given child types.
    pub fn tuple(items: &[&'static TypeMeta]) -> &'static TypeMeta {
        let name = format!(
            "tuple[{}]",
            items.iter().map(|m| m.name()).collect::<Vec<_>>().join(", ")
        );
        intern_type(TypeMeta {
            kind: ValueKind::Tuple,
            name,
            element: None,
            key: None,
            fields: items.iter().map(|m| (String::new(), *m)).collect(),
            ts: None,
        })
    }

    /// The interned list of `element`.
    pub fn list(element: &'static TypeMeta) -> &'static TypeMeta {
        intern_type(TypeMeta {
            kind: ValueKind::List,
            name: format!("list[{}]", element.name()),
            element: Some(element),
            key: None,
            fields: Vec::new(),
            ts: None,
        })
    }

    /// The interned set of `element`.
    pub fn set(element: &'static TypeMeta) -> &'static TypeMeta {
        intern_type(TypeMeta {
            kind: ValueKind::Set,
            name: format!("set[{}]", element.name()),
            element: Some(element),
            key: None,
            fields: Vec::new(),
            ts: None,
        })
    }

    /// The interned map from `key` to `value`.
    pub fn map(key: &'static TypeMeta, value: &'static TypeMeta) -> &'static TypeMeta {
        intern_type(TypeMeta {
            kind: ValueKind::Map,
            name: format!("map[{}, {}]", key.name(), value.name()),
            element: Some(value),
            key: Some(key),
            fields: Vec::new(),
            ts: None,
        })
    }

    /// The interned bundle with the given field schema.
    pub fn bundle(fields: &[(&str, &'static TypeMeta)]) -> &'static TypeMeta {
        let name = format!(
            "bundle[{}]",
            fields
                .iter()
                .map(|(n, m)| format!("{}: {}", n, m.name()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        intern_type(TypeMeta {
            kind: ValueKind::Bundle,
            name,
            element: None,
            key: None,
            fields: fields.iter().map(|(n, m)| ((*n).to_owned(), *m)).collect(),
            ts: None,
        })
    }

    /// The interned value type holding a reference to a `target` endpoint.
    pub fn of_ts(target: &'static TsMeta) -> &'static TypeMeta {
        intern_type(TypeMeta {
            kind: ValueKind::Ts,
            name: format!("ts[{}]", target.name()),
            element: None,
            key: None,
            fields: Vec::new(),
            ts: Some(target),
        })
    }
}

fn bare_ts(kind: TsKind, name: String) -> TsMeta {
    TsMeta {
        kind,
        name,
        element: None,
        key: None,
        fields: Vec::new(),
        item: None,
        len: 0,
        window: 0,
        target: None,
    }
}

impl TsMeta {
    /// The interned scalar time-series of `value`.
    pub fn ts(value: &'static TypeMeta) -> &'static TsMeta {
        let mut meta = bare_ts(TsKind::Ts, format!("TS[{}]", value.name()));
        meta.element = Some(value);
        intern_ts(meta)
    }

    /// The interned value-less signal.
    pub fn signal() -> &'static TsMeta {
        intern_ts(bare_ts(TsKind::Signal, "SIGNAL".to_owned()))
    }

    /// The interned set time-series of `element`.
    pub fn tss(element: &'static TypeMeta) -> &'static TsMeta {
        let mut meta = bare_ts(TsKind::Tss, format!("TSS[{}]", element.name()));
        meta.element = Some(element);
        intern_ts(meta)
    }

    /// The interned dict time-series from `key` to `value`.
    pub fn tsd(key: &'static TypeMeta, value: &'static TypeMeta) -> &'static TsMeta {
        let mut meta = bare_ts(TsKind::Tsd, format!("TSD[{}, {}]", key.name(), value.name()));
        meta.key = Some(key);
        meta.element = Some(value);
        intern_ts(meta)
    }

    /// The interned fixed-size list of `len` children of `item`.
    pub fn tsl(item: &'static TsMeta, len: usize) -> &'static TsMeta {
        let mut meta = bare_ts(TsKind::Tsl, format!("TSL[{}; {}]", item.name(), len));
        meta.item = Some(item);
        meta.len = len;
        intern_ts(meta)
    }

    /// The interned bundle time-series with the given field schema.
    pub fn tsb(fields: &[(&str, &'static TsMeta)]) -> &'static TsMeta {
        let name = format!(
            "TSB[{}]",
            fields
                .iter()
                .map(|(n, m)| format!("{}: {}", n, m.name()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut meta = bare_ts(TsKind::Tsb, name);
        meta.fields = fields.iter().map(|(n, m)| ((*n).to_owned(), *m)).collect();
        intern_ts(meta)
    }

    /// The interned window of `capacity` elements of `element`.
    pub fn tsw(element: &'static TypeMeta, capacity: usize) -> &'static TsMeta {
        let mut meta = bare_ts(TsKind::Tsw, format!("TSW[{}; {}]", element.name(), capacity));
        meta.element = Some(element);
        meta.window = capacity;
        intern_ts(meta)
    }

    /// The interned reference to a `target` endpoint.
    pub fn reference(target: &'static TsMeta) -> &'static TsMeta {
        let mut meta = bare_ts(TsKind::Ref, format!("REF[{}]", target.name()));
        meta.target = Some(target);
        intern_ts(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_pointer_identity() {
        let a = TypeMeta::map(TypeMeta::str_(), TypeMeta::int());
        let b = TypeMeta::map(TypeMeta::str_(), TypeMeta::int());
        assert!(std::ptr::eq(a, b));
        assert_eq!(a, b);

        let c = TypeMeta::map(TypeMeta::str_(), TypeMeta::float());
        assert!(!std::ptr::eq(a, c));
        assert_ne!(a, c);
    }

    #[test]
    fn ts_interning_and_names() {
        let d1 = TsMeta::tsd(TypeMeta::str_(), TypeMeta::int());
        let d2 = TsMeta::tsd(TypeMeta::str_(), TypeMeta::int());
        assert!(std::ptr::eq(d1, d2));
        assert_eq!(d1.name(), "TSD[str, int]");

        let b = TsMeta::tsb(&[("a", TsMeta::ts(TypeMeta::int())), ("b", TsMeta::ts(TypeMeta::int()))]);
        assert_eq!(b.static_child_count(), 2);
        assert_eq!(b.field_index("b"), Some(1));
        assert_eq!(b.slot_budget(), 3);
    }
}
