//! Detection of non-standard evaluation
//!
//! Some runtime primitives capture their arguments as unevaluated
//! expressions instead of values. A tool that rewrites or pre-evaluates
//! arguments must not touch calls that may reach one of those primitives,
//! so this module answers a conservative question: could invoking this
//! function perform non-standard evaluation anywhere in its body?
//!
//! The check is syntactic and over-approximates. It never misses a direct
//! call to a known capturing primitive, but it also cannot see through
//! indirection (a primitive reached via a variable holding the function),
//! so false negatives are possible there and false positives come from
//! shadowed names.

use ember_engine::{Handle, Runtime, Tag};
use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

/// Primitives that capture arguments unevaluated
static NSE_PRIMITIVES: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "quote",
        "substitute",
        "match.call",
        "library",
        "require",
        "enquote",
        "bquote",
        "expression",
        "evalq",
        "subset",
    ]
    .into_iter()
    .collect()
});

/// Names of the known capturing primitives
pub fn nse_primitives() -> &'static FxHashSet<&'static str> {
    &NSE_PRIMITIVES
}

/// True if the expression is a call whose head names a capturing
/// primitive. Nested call heads like `pkg::quote(x)` are unwrapped until
/// a symbol is reached.
pub fn is_call_to_nse_function(rt: &Runtime, expr: Handle) -> bool {
    if rt.tag_of(expr) != Tag::Lang {
        return false;
    }

    let mut head = rt.car(expr);
    while rt.tag_of(head) == Tag::Lang {
        head = rt.car(head);
    }

    rt.tag_of(head) == Tag::Symbol && NSE_PRIMITIVES.contains(rt.symbol_name(head).as_str())
}

fn body_performs_nse(rt: &Runtime, expr: Handle) -> bool {
    if rt.tag_of(expr) != Tag::Lang {
        return false;
    }
    if is_call_to_nse_function(rt, expr) {
        return true;
    }

    // Recurse only into argument positions that are themselves calls;
    // a bare symbol naming a primitive is data, not a call.
    let mut node = rt.cdr(expr);
    while rt.tag_of(node) == Tag::Pair {
        let arg = rt.car(node);
        if rt.tag_of(arg) == Tag::Lang && body_performs_nse(rt, arg) {
            return true;
        }
        node = rt.cdr(node);
    }
    false
}

/// Conservatively decide whether calling this function might capture
/// arguments unevaluated. Builtins answer false; their capturing
/// behavior is covered by the name set, not by body inspection.
pub fn maybe_performs_nse(rt: &Runtime, function: Handle) -> bool {
    if !rt.is_function(function) || rt.is_primitive(function) {
        return false;
    }
    body_performs_nse(rt, rt.closure_body(function))
}
