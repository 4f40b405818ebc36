//! End-to-end conversion scenarios under collection pressure
//!
//! Every test here runs the runtime in stress mode, where a full
//! collection happens before every allocation. Anything not rooted the
//! instant before an allocating call is reclaimed, so these tests catch
//! missing protections that an ordinary interval would mask.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use ember_bridge::create::{
    create_json, create_list_from_builder, create_string_list_map, create_string_set,
    create_timestamp_vec, ListBuilder,
};
use ember_bridge::extract::{
    extract_double_vec, extract_string_map, extract_string_set, get_named_list_elem, get_names,
};
use ember_bridge::{Protect, Runtime, Tag};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn string_map_survives_stress_roundtrip() {
    init_tracing();
    let rt = Runtime::with_gc_stress();
    let mut protect = Protect::new(&rt);

    let mut source = BTreeMap::new();
    source.insert(
        "alpha".to_string(),
        vec!["a1".to_string(), "a2".to_string()],
    );
    source.insert("beta".to_string(), vec!["b1".to_string()]);
    source.insert("empty".to_string(), Vec::new());

    let list = create_string_list_map(&rt, &source, &mut protect);
    assert_eq!(rt.tag_of(list), Tag::List);
    assert_eq!(rt.length_of(list), 3);

    // churn the heap; everything reachable must stay intact
    for _ in 0..8 {
        let _ = rt.alloc_real(16);
    }

    let mut out = BTreeMap::new();
    extract_string_map(&rt, list, &mut out).unwrap();
    assert_eq!(out.len(), 3);
    assert!(out["alpha"].contains("a2"));
    assert!(out["beta"].contains("b1"));
    assert!(out["empty"].is_empty());
}

#[test]
fn string_set_roundtrip_deduplicates() {
    let rt = Runtime::with_gc_stress();
    let mut protect = Protect::new(&rt);

    let mut source = BTreeSet::new();
    source.insert("one".to_string());
    source.insert("two".to_string());
    let v = create_string_set(&rt, &source, &mut protect);

    let mut out = BTreeSet::new();
    extract_string_set(&rt, v, &mut out).unwrap();
    assert_eq!(out, source);
}

#[test]
fn builder_list_stays_parallel_under_pressure() {
    let rt = Runtime::with_gc_stress();
    let mut protect = Protect::new(&rt);

    let mut builder = ListBuilder::new();
    for i in 0..10 {
        let elem = rt.alloc_integer(1);
        protect.add(elem);
        rt.integer_set(elem, 0, i);
        builder.add(&format!("field{i}"), elem);
    }
    let list = create_list_from_builder(&rt, &builder, &mut protect);

    let mut names = Vec::new();
    get_names(&rt, list, &mut names).unwrap();
    assert_eq!(names.len(), 10);
    for (i, name) in names.iter().enumerate() {
        assert_eq!(name, &format!("field{i}"));
        let elem = get_named_list_elem(&rt, list, name).unwrap();
        assert_eq!(rt.integer_elem(elem, 0), i as i32);
    }
}

#[test]
fn nested_json_document_under_pressure() {
    let rt = Runtime::with_gc_stress();
    let mut protect = Protect::new(&rt);

    let doc: serde_json::Value = serde_json::json!({
        "session": {
            "id": 17,
            "user": "ada",
            "flags": [true, false],
        },
        "history": [
            {"cmd": "ls", "elapsed": 0.25},
            {"cmd": "cat", "elapsed": 1.5},
        ],
    });

    let v = create_json(&rt, &doc, &mut protect);
    assert_eq!(rt.tag_of(v), Tag::List);

    let session = get_named_list_elem(&rt, v, "session").unwrap();
    let user = get_named_list_elem(&rt, session, "user").unwrap();
    assert_eq!(rt.string_elem(user, 0).translate(), "ada");
    let id = get_named_list_elem(&rt, session, "id").unwrap();
    assert_eq!(rt.tag_of(id), Tag::Integer);

    let history = get_named_list_elem(&rt, v, "history").unwrap();
    assert_eq!(rt.length_of(history), 2);
    let second = rt.list_elem(history, 1);
    let elapsed = get_named_list_elem(&rt, second, "elapsed").unwrap();
    let mut out = Vec::new();
    extract_double_vec(&rt, elapsed, &mut out).unwrap();
    assert_eq!(out, vec![1.5]);
}

#[test]
fn timestamps_carry_class_and_zone() {
    let rt = Runtime::with_gc_stress();
    let mut protect = Protect::new(&rt);

    let times: Vec<DateTime<Utc>> = (0..4)
        .map(|i| DateTime::<Utc>::from_timestamp(i * 3600, 0).unwrap())
        .collect();
    let v = create_timestamp_vec(&rt, &times, &mut protect);

    assert_eq!(rt.tag_of(v), Tag::Real);
    assert_eq!(rt.length_of(v), 4);
    assert_eq!(rt.real_elem(v, 3), 3.0 * 3600.0);

    let class = rt.attrib(v, "class");
    assert_eq!(rt.string_elem(class, 0).translate(), "POSIXct");
    assert_eq!(rt.string_elem(class, 1).translate(), "POSIXt");
    let tzone = rt.attrib(v, "tzone");
    assert_eq!(rt.string_elem(tzone, 0).translate(), "GMT");
}

#[test]
fn unprotected_intermediate_is_reclaimed() {
    let rt = Runtime::with_gc_stress();

    // deliberately skip the ledger: the very next allocation collects it
    let orphan = rt.alloc_integer(1);
    let _ = rt.alloc_integer(1);
    assert!(!rt.is_valid(orphan));

    // the same sequence with a ledger keeps the handle alive
    let mut protect = Protect::new(&rt);
    let kept = rt.alloc_integer(1);
    protect.add(kept);
    let _ = rt.alloc_integer(1);
    assert!(rt.is_valid(kept));
}
