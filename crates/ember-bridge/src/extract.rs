//! Typed extraction of runtime values into native types
//!
//! Uniform contract across every extractor: the value's dynamic tag is
//! checked first (mismatch is `UnexpectedDataType`), scalar targets
//! require at least one element (`NoDataAvailable`), and collection
//! destinations are cleared before filling, since callers may reuse
//! destination storage across calls and rely on full repopulation. A
//! destination is never partially filled: on a tag failure it is left
//! exactly as it was.
//!
//! String extraction has two explicit modes: native-encoding translation
//! and forced UTF-8 translation.

use std::collections::{BTreeMap, BTreeSet};

use ember_engine::{Handle, Runtime, Tag};

use crate::error::{BridgeError, BridgeResult};

fn check_tag(rt: &Runtime, value: Handle, expected: Tag) -> BridgeResult<()> {
    let actual = rt.tag_of(value);
    if actual != expected {
        return Err(BridgeError::unexpected(expected, actual));
    }
    Ok(())
}

fn check_scalar(rt: &Runtime, value: Handle, expected: Tag) -> BridgeResult<()> {
    check_tag(rt, value, expected)?;
    if rt.length_of(value) < 1 {
        return Err(BridgeError::NoDataAvailable);
    }
    Ok(())
}

/// First element of an integer vector
pub fn extract_int(rt: &Runtime, value: Handle) -> BridgeResult<i32> {
    check_scalar(rt, value, Tag::Integer)?;
    Ok(rt.integer_elem(value, 0))
}

/// First element of a logical vector
pub fn extract_bool(rt: &Runtime, value: Handle) -> BridgeResult<bool> {
    check_scalar(rt, value, Tag::Logical)?;
    Ok(rt.logical_elem(value, 0))
}

/// First element of a real vector
pub fn extract_double(rt: &Runtime, value: Handle) -> BridgeResult<f64> {
    check_scalar(rt, value, Tag::Real)?;
    Ok(rt.real_elem(value, 0))
}

/// First element of a string vector, translated to the native encoding
pub fn extract_string(rt: &Runtime, value: Handle) -> BridgeResult<String> {
    check_scalar(rt, value, Tag::String)?;
    Ok(rt.string_elem(value, 0).translate())
}

/// First element of a string vector, translated to UTF-8
pub fn extract_string_utf8(rt: &Runtime, value: Handle) -> BridgeResult<String> {
    check_scalar(rt, value, Tag::String)?;
    Ok(rt.string_elem(value, 0).translate_utf8())
}

/// All elements of an integer vector
pub fn extract_int_vec(rt: &Runtime, value: Handle, out: &mut Vec<i32>) -> BridgeResult<()> {
    check_tag(rt, value, Tag::Integer)?;
    out.clear();
    for i in 0..rt.length_of(value) {
        out.push(rt.integer_elem(value, i));
    }
    Ok(())
}

/// All elements of a real vector
pub fn extract_double_vec(rt: &Runtime, value: Handle, out: &mut Vec<f64>) -> BridgeResult<()> {
    check_tag(rt, value, Tag::Real)?;
    out.clear();
    for i in 0..rt.length_of(value) {
        out.push(rt.real_elem(value, i));
    }
    Ok(())
}

/// All elements of a string vector, native translation
pub fn extract_string_vec(rt: &Runtime, value: Handle, out: &mut Vec<String>) -> BridgeResult<()> {
    check_tag(rt, value, Tag::String)?;
    out.clear();
    for i in 0..rt.length_of(value) {
        out.push(rt.string_elem(value, i).translate());
    }
    Ok(())
}

/// Elements of a string vector as a set, native translation
pub fn extract_string_set(
    rt: &Runtime,
    value: Handle,
    out: &mut BTreeSet<String>,
) -> BridgeResult<()> {
    check_tag(rt, value, Tag::String)?;
    out.clear();
    for i in 0..rt.length_of(value) {
        out.insert(rt.string_elem(value, i).translate());
    }
    Ok(())
}

/// Named list of string vectors into a map of string sets.
///
/// A non-empty source must carry a names attribute; its absence is a
/// type error, not an empty result. An empty source succeeds empty.
pub fn extract_string_map(
    rt: &Runtime,
    value: Handle,
    out: &mut BTreeMap<String, BTreeSet<String>>,
) -> BridgeResult<()> {
    check_tag(rt, value, Tag::List)?;

    let n = rt.length_of(value);
    if n == 0 {
        out.clear();
        return Ok(());
    }

    let names = names_of(rt, value);
    if rt.tag_of(names) != Tag::String || rt.length_of(names) != n {
        return Err(BridgeError::unexpected(Tag::String, rt.tag_of(names)));
    }

    out.clear();
    for i in 0..n {
        let elem = rt.list_elem(value, i);
        if rt.tag_of(elem) != Tag::String {
            return Err(BridgeError::unexpected(Tag::String, rt.tag_of(elem)));
        }
        let mut contents = BTreeSet::new();
        for j in 0..rt.length_of(elem) {
            contents.insert(rt.string_elem(elem, j).translate());
        }
        let name = rt.string_elem(names, i).translate();
        out.insert(name, contents);
    }
    Ok(())
}

/// The names attribute as a raw handle; null when absent
pub fn names_of(rt: &Runtime, value: Handle) -> Handle {
    rt.attrib(value, "names")
}

/// The names attribute as native strings.
///
/// Missing names, a non-string names attribute, or a length mismatch
/// against the value are all type errors.
pub fn get_names(rt: &Runtime, value: Handle, out: &mut Vec<String>) -> BridgeResult<()> {
    let names = names_of(rt, value);
    if rt.tag_of(names) != Tag::String {
        return Err(BridgeError::unexpected(Tag::String, rt.tag_of(names)));
    }
    if rt.length_of(names) != rt.length_of(value) {
        return Err(BridgeError::unexpected(Tag::String, rt.tag_of(names)));
    }
    out.clear();
    for i in 0..rt.length_of(names) {
        out.push(rt.string_elem(names, i).translate());
    }
    Ok(())
}

/// Attach a names attribute; false when the lengths do not line up.
///
/// `value` must be protected by the caller: this allocates.
pub fn set_names(rt: &Runtime, value: Handle, names: &[String]) -> bool {
    if rt.length_of(value) != names.len() {
        return false;
    }
    let names_h = rt.alloc_string(names.len());
    for (i, name) in names.iter().enumerate() {
        rt.string_set(names_h, i, name);
    }
    rt.set_attrib(value, "names", names_h);
    true
}

/// Position of a named element in a generic vector.
///
/// A names attribute longer than the vector cannot yield positions past
/// the vector's end; the scan is bounded by the shorter of the two.
pub fn index_of_named_elem(rt: &Runtime, list: Handle, name: &str) -> Option<usize> {
    let names = names_of(rt, list);
    if rt.tag_of(names) != Tag::String {
        return None;
    }
    let limit = rt.length_of(names).min(rt.length_of(list));
    (0..limit).find(|&i| rt.string_elem(names, i).translate() == name)
}

/// Named element of a generic vector; the error carries the missing name
pub fn get_named_list_elem(rt: &Runtime, list: Handle, name: &str) -> BridgeResult<Handle> {
    match index_of_named_elem(rt, list, name) {
        Some(i) => Ok(rt.list_elem(list, i)),
        None => Err(BridgeError::ListElementNotFound {
            name: name.to_string(),
        }),
    }
}
