//! Typed construction of runtime values from native types
//!
//! Every allocation is registered with the caller's [`Protect`] ledger
//! before any subsequent allocation, because any allocating call may
//! trigger a collection. Composite constructors register each element's
//! allocation separately.
//!
//! Construction is infallible at this layer; the one foreign-call
//! dependent constructor (timestamps) logs and degrades to the null value
//! on failure rather than propagating, since callers treat a missing
//! timestamp vector as acceptable degraded output.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use ember_engine::{Arg, Handle, Runtime};
use tracing::error;

use crate::protect::Protect;

/// Length-one string vector
pub fn create_string(rt: &Runtime, value: &str, protect: &mut Protect<'_>) -> Handle {
    let h = rt.alloc_string(1);
    protect.add(h);
    rt.string_set(h, 0, value);
    h
}

/// Length-one integer vector
pub fn create_int(rt: &Runtime, value: i32, protect: &mut Protect<'_>) -> Handle {
    let h = rt.alloc_integer(1);
    protect.add(h);
    rt.integer_set(h, 0, value);
    h
}

/// Length-one real vector
pub fn create_double(rt: &Runtime, value: f64, protect: &mut Protect<'_>) -> Handle {
    let h = rt.alloc_real(1);
    protect.add(h);
    rt.real_set(h, 0, value);
    h
}

/// Length-one logical vector
pub fn create_bool(rt: &Runtime, value: bool, protect: &mut Protect<'_>) -> Handle {
    let h = rt.alloc_logical(1);
    protect.add(h);
    rt.logical_set(h, 0, value);
    h
}

/// String vector from a slice
pub fn create_string_vec(rt: &Runtime, values: &[String], protect: &mut Protect<'_>) -> Handle {
    let h = rt.alloc_string(values.len());
    protect.add(h);
    for (i, v) in values.iter().enumerate() {
        rt.string_set(h, i, v);
    }
    h
}

/// Integer vector from a slice
pub fn create_int_vec(rt: &Runtime, values: &[i32], protect: &mut Protect<'_>) -> Handle {
    let h = rt.alloc_integer(values.len());
    protect.add(h);
    for (i, v) in values.iter().enumerate() {
        rt.integer_set(h, i, *v);
    }
    h
}

/// Real vector from a slice
pub fn create_double_vec(rt: &Runtime, values: &[f64], protect: &mut Protect<'_>) -> Handle {
    let h = rt.alloc_real(values.len());
    protect.add(h);
    for (i, v) in values.iter().enumerate() {
        rt.real_set(h, i, *v);
    }
    h
}

/// Logical vector from a slice
pub fn create_bool_vec(rt: &Runtime, values: &[bool], protect: &mut Protect<'_>) -> Handle {
    let h = rt.alloc_logical(values.len());
    protect.add(h);
    for (i, v) in values.iter().enumerate() {
        rt.logical_set(h, i, *v);
    }
    h
}

/// String vector from an ordered set
pub fn create_string_set(
    rt: &Runtime,
    values: &BTreeSet<String>,
    protect: &mut Protect<'_>,
) -> Handle {
    let h = rt.alloc_string(values.len());
    protect.add(h);
    for (i, v) in values.iter().enumerate() {
        rt.string_set(h, i, v);
    }
    h
}

/// Named string vector from (name, value) pairs
pub fn create_named_string_vec(
    rt: &Runtime,
    values: &[(String, String)],
    protect: &mut Protect<'_>,
) -> Handle {
    let chars = rt.alloc_string(values.len());
    protect.add(chars);
    let names = rt.alloc_string(values.len());
    protect.add(names);
    for (i, (name, value)) in values.iter().enumerate() {
        rt.string_set(names, i, name);
        rt.string_set(chars, i, value);
    }
    rt.set_attrib(chars, "names", names);
    chars
}

/// Named list of string vectors from a map
pub fn create_string_list_map(
    rt: &Runtime,
    values: &BTreeMap<String, Vec<String>>,
    protect: &mut Protect<'_>,
) -> Handle {
    let list = rt.alloc_list(values.len());
    protect.add(list);
    let names = rt.alloc_string(values.len());
    protect.add(names);
    for (i, (name, contents)) in values.iter().enumerate() {
        rt.string_set(names, i, name);
        let elem = create_string_vec(rt, contents, protect);
        rt.list_set(list, i, elem);
    }
    rt.set_attrib(list, "names", names);
    list
}

/// Timestamp vector via the foreign date-construction entry point.
///
/// Two phases: project the timestamps to epoch seconds and build an
/// integer vector, then hand it to `as.POSIXct` with a fixed origin and
/// UTC designation. The foreign call is best effort: on failure the
/// error is logged and the null value returned.
pub fn create_timestamp_vec(
    rt: &Runtime,
    values: &[DateTime<Utc>],
    protect: &mut Protect<'_>,
) -> Handle {
    let mut seconds = Vec::with_capacity(values.len());
    for t in values {
        match i32::try_from(t.timestamp()) {
            Ok(s) => seconds.push(s),
            Err(_) => {
                error!("timestamp {} out of epoch-seconds range", t);
                return rt.null_value();
            }
        }
    }

    let seconds_h = create_int_vec(rt, &seconds, protect);
    let tz = create_string(rt, "GMT", protect);
    let origin = create_string(rt, "1970-01-01", protect);

    match rt.call_by_name(
        "as.POSIXct",
        &[
            Arg::positional(seconds_h),
            Arg::named("tz", tz),
            Arg::named("origin", origin),
        ],
    ) {
        Ok(h) => {
            protect.add(h);
            h
        }
        Err(e) => {
            error!("timestamp vector construction failed: {e}");
            rt.null_value()
        }
    }
}

/// Runtime value from a JSON tree.
///
/// Dispatches on the node's tag; arrays become lists, objects become
/// named lists. Null and anything unrecognized degenerate to the null
/// value, never an error. Numbers become integer vectors only when
/// losslessly representable as `i32`.
pub fn create_json(rt: &Runtime, value: &serde_json::Value, protect: &mut Protect<'_>) -> Handle {
    use serde_json::Value;
    match value {
        Value::String(s) => create_string(rt, s, protect),
        Value::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
            Some(i) => create_int(rt, i, protect),
            None => create_double(rt, n.as_f64().unwrap_or(f64::NAN), protect),
        },
        Value::Bool(b) => create_bool(rt, *b, protect),
        Value::Array(items) => {
            let list = rt.alloc_list(items.len());
            protect.add(list);
            for (i, item) in items.iter().enumerate() {
                let elem = create_json(rt, item, protect);
                rt.list_set(list, i, elem);
            }
            list
        }
        Value::Object(fields) => {
            let list = rt.alloc_list(fields.len());
            protect.add(list);
            let names = rt.alloc_string(fields.len());
            protect.add(names);
            for (i, (name, field)) in fields.iter().enumerate() {
                rt.string_set(names, i, name);
                let elem = create_json(rt, field, protect);
                rt.list_set(list, i, elem);
            }
            rt.set_attrib(list, "names", names);
            list
        }
        Value::Null => rt.null_value(),
    }
}

/// Pre-named list of nulls
pub fn create_list(rt: &Runtime, names: &[String], protect: &mut Protect<'_>) -> Handle {
    let list = rt.alloc_list(names.len());
    protect.add(list);
    let names_h = rt.alloc_string(names.len());
    protect.add(names_h);
    for (i, name) in names.iter().enumerate() {
        rt.string_set(names_h, i, name);
    }
    rt.set_attrib(list, "names", names_h);
    list
}

/// Incrementally assembled named list.
///
/// Accumulates (name, value) pairs; names and values are always emitted
/// as parallel sequences of matching length. Values added here must
/// already be protected (or otherwise rooted) by the caller.
#[derive(Default)]
pub struct ListBuilder {
    names: Vec<String>,
    objects: Vec<Handle>,
}

impl ListBuilder {
    /// Empty builder
    pub fn new() -> Self {
        ListBuilder::default()
    }

    /// Append one (name, value) pair
    pub fn add(&mut self, name: &str, value: Handle) {
        self.names.push(name.to_string());
        self.objects.push(value);
    }

    /// Accumulated names, in insertion order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Accumulated values, in insertion order
    pub fn objects(&self) -> &[Handle] {
        &self.objects
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when no pairs were added
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Materialize a builder into a named list.
///
/// An empty builder produces an *unnamed* empty list: a zero-length name
/// vector carries no information, so none is attached.
pub fn create_list_from_builder(
    rt: &Runtime,
    builder: &ListBuilder,
    protect: &mut Protect<'_>,
) -> Handle {
    let n = builder.len();
    let list = rt.alloc_list(n);
    protect.add(list);
    let names = rt.alloc_string(n);
    protect.add(names);

    for i in 0..n {
        rt.list_set(list, i, builder.objects()[i]);
        rt.string_set(names, i, &builder.names()[i]);
    }

    if n > 0 {
        rt.set_attrib(list, "names", names);
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{
        extract_bool, extract_double, extract_int, extract_string, extract_string_vec, names_of,
    };
    use ember_engine::Tag;

    #[test]
    fn test_scalar_roundtrips() {
        let rt = Runtime::with_gc_stress();
        let mut protect = Protect::new(&rt);

        let s = create_string(&rt, "hello", &mut protect);
        let i = create_int(&rt, -7, &mut protect);
        let d = create_double(&rt, 2.5, &mut protect);
        let b = create_bool(&rt, true, &mut protect);

        assert_eq!(extract_string(&rt, s).unwrap(), "hello");
        assert_eq!(extract_int(&rt, i).unwrap(), -7);
        assert_eq!(extract_double(&rt, d).unwrap(), 2.5);
        assert!(extract_bool(&rt, b).unwrap());
    }

    #[test]
    fn test_named_string_vec_parallel_names() {
        let rt = Runtime::new();
        let mut protect = Protect::new(&rt);
        let pairs = vec![
            ("k1".to_string(), "v1".to_string()),
            ("k2".to_string(), "v2".to_string()),
        ];
        let v = create_named_string_vec(&rt, &pairs, &mut protect);

        assert_eq!(rt.length_of(v), 2);
        let names = names_of(&rt, v);
        assert_eq!(rt.length_of(names), rt.length_of(v));
        assert_eq!(rt.string_elem(names, 1).translate(), "k2");
        assert_eq!(rt.string_elem(v, 1).translate(), "v2");
    }

    #[test]
    fn test_empty_builder_is_unnamed() {
        let rt = Runtime::new();
        let mut protect = Protect::new(&rt);
        let builder = ListBuilder::new();
        let list = create_list_from_builder(&rt, &builder, &mut protect);
        assert_eq!(rt.length_of(list), 0);
        assert_eq!(names_of(&rt, list), rt.null_value());
    }

    #[test]
    fn test_builder_names_match_values() {
        let rt = Runtime::with_gc_stress();
        let mut protect = Protect::new(&rt);
        let mut builder = ListBuilder::new();
        builder.add("a", create_int(&rt, 1, &mut protect));
        builder.add("b", create_string(&rt, "two", &mut protect));
        let list = create_list_from_builder(&rt, &builder, &mut protect);

        let names = names_of(&rt, list);
        assert_eq!(rt.length_of(names), rt.length_of(list));
        assert_eq!(rt.string_elem(names, 0).translate(), "a");
        assert_eq!(extract_int(&rt, rt.list_elem(list, 0)).unwrap(), 1);
        assert_eq!(extract_string(&rt, rt.list_elem(list, 1)).unwrap(), "two");
    }

    #[test]
    fn test_json_dispatch() {
        let rt = Runtime::with_gc_stress();
        let mut protect = Protect::new(&rt);
        let tree: serde_json::Value = serde_json::json!({
            "name": "ember",
            "count": 3,
            "ratio": 0.5,
            "ok": true,
            "tags": ["a", "b"],
            "nothing": null
        });
        let v = create_json(&rt, &tree, &mut protect);
        assert_eq!(rt.tag_of(v), Tag::List);

        let names = names_of(&rt, v);
        assert_eq!(rt.length_of(names), 6);

        use crate::extract::get_named_list_elem;
        let count = get_named_list_elem(&rt, v, "count").unwrap();
        assert_eq!(extract_int(&rt, count).unwrap(), 3);
        let ratio = get_named_list_elem(&rt, v, "ratio").unwrap();
        assert_eq!(extract_double(&rt, ratio).unwrap(), 0.5);
        let nothing = get_named_list_elem(&rt, v, "nothing").unwrap();
        assert_eq!(nothing, rt.null_value());

        let tags = get_named_list_elem(&rt, v, "tags").unwrap();
        let mut out = Vec::new();
        // array elements are length-one vectors inside a list
        assert_eq!(rt.tag_of(tags), Tag::List);
        extract_string_vec(&rt, rt.list_elem(tags, 0), &mut out).unwrap();
        assert_eq!(out, vec!["a"]);
    }

    #[test]
    fn test_json_large_number_is_real() {
        let rt = Runtime::new();
        let mut protect = Protect::new(&rt);
        let v = create_json(&rt, &serde_json::json!(9_000_000_000i64), &mut protect);
        assert_eq!(rt.tag_of(v), Tag::Real);
        assert_eq!(extract_double(&rt, v).unwrap(), 9e9);
    }

    #[test]
    fn test_timestamp_vector_construction() {
        let rt = Runtime::with_gc_stress();
        let mut protect = Protect::new(&rt);
        let times = vec![
            DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            DateTime::<Utc>::from_timestamp(86_400, 0).unwrap(),
        ];
        let v = create_timestamp_vec(&rt, &times, &mut protect);
        assert_eq!(rt.tag_of(v), Tag::Real);
        assert_eq!(rt.real_elem(v, 1), 86_400.0);
        let class = rt.attrib(v, "class");
        assert_eq!(rt.string_elem(class, 0).translate(), "POSIXct");
    }

    #[test]
    fn test_timestamp_degrades_to_null_without_foreign_entry_point() {
        let rt = Runtime::new();
        rt.env_remove(rt.base_env(), "as.POSIXct");
        let mut protect = Protect::new(&rt);
        let times = vec![DateTime::<Utc>::from_timestamp(10, 0).unwrap()];
        let v = create_timestamp_vec(&rt, &times, &mut protect);
        assert_eq!(v, rt.null_value());
    }

    #[test]
    fn test_create_list_prenamed_nulls() {
        let rt = Runtime::new();
        let mut protect = Protect::new(&rt);
        let list = create_list(
            &rt,
            &["x".to_string(), "y".to_string()],
            &mut protect,
        );
        assert_eq!(rt.length_of(list), 2);
        assert_eq!(rt.list_elem(list, 0), rt.null_value());
        let names = names_of(&rt, list);
        assert_eq!(rt.string_elem(names, 1).translate(), "y");
    }
}
