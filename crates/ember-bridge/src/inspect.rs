//! Read-only environment and symbol introspection
//!
//! Everything here is careful never to trip a fatal foreign fault: the
//! listing primitive is only invoked on actual environments, namespace
//! and function lookup walk frames manually instead of going through the
//! fatal-on-miss entry points, and active bindings are never resolved as
//! a side effect of listing.

use ember_engine::{Arg, Handle, Runtime, Tag};
use tracing::{error, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::extract::extract_string_vec;
use crate::protect::Protect;

/// One (name, value) pair produced by environment listing
#[derive(Debug, Clone)]
pub struct Variable {
    /// Bound name
    pub name: String,
    /// Resolved value; null when the binding is active and resolution
    /// was deliberately skipped
    pub value: Handle,
}

/// Bound names of an environment as a protected string vector.
///
/// The listing primitive itself raises a fatal foreign fault on
/// non-environments, so the tag is validated here first; a
/// non-environment logs and yields null.
pub fn objects(rt: &Runtime, env: Handle, all_names: bool, protect: &mut Protect<'_>) -> Handle {
    if rt.tag_of(env) != Tag::Env {
        error!("objects called on non-environment");
        return rt.null_value();
    }
    let names = rt.env_list(env, all_names);
    let out = rt.alloc_string(names.len());
    protect.add(out);
    for (i, name) in names.iter().enumerate() {
        rt.string_set(out, i, name);
    }
    out
}

/// Bound names of an environment as native strings
pub fn object_names(rt: &Runtime, env: Handle, all_names: bool) -> BridgeResult<Vec<String>> {
    let mut protect = Protect::new(rt);
    let names = objects(rt, env, all_names, &mut protect);
    if rt.tag_of(names) == Tag::Null {
        return Err(BridgeError::CodeExecution(
            "environment listing failed".to_string(),
        ));
    }
    let mut out = Vec::new();
    extract_string_vec(rt, names, &mut out)
        .map_err(|e| BridgeError::CodeExecution(e.to_string()))?;
    Ok(out)
}

/// List an environment's bindings as (name, value) pairs.
///
/// Values are added to the caller's ledger so they outlive the listing
/// call. Resolving an *active* binding would execute foreign code as a
/// side effect of listing, so active bindings keep a null value. An
/// unbound result from a name the listing itself produced cannot happen
/// per the runtime's contract; if observed it is logged and dropped.
pub fn list_environment(
    rt: &Runtime,
    env: Handle,
    include_all: bool,
    protect: &mut Protect<'_>,
) -> Vec<Variable> {
    let mut variables = Vec::new();

    let mut local = Protect::new(rt);
    let names_h = objects(rt, env, include_all, &mut local);
    if rt.tag_of(names_h) == Tag::Null {
        return variables;
    }

    let mut names = Vec::new();
    if let Err(e) = extract_string_vec(rt, names_h, &mut names) {
        error!("environment listing produced no name vector: {e}");
        return variables;
    }

    for name in names {
        let mut value = rt.null_value();
        if !is_active_binding(rt, &name, env) {
            value = rt.find_var(env, &name);
        }

        if value != rt.unbound_value() {
            protect.add(value);
            variables.push(Variable { name, value });
        } else {
            warn!("unexpected unbound value returned from environment listing");
        }
    }

    variables
}

/// True if the name is bound actively (read access runs foreign code)
pub fn is_active_binding(rt: &Runtime, name: &str, env: Handle) -> bool {
    rt.binding_is_active(env, name)
}

/// Chained lookup from an environment; unbound sentinel on a miss
pub fn find_var(rt: &Runtime, name: &str, env: Handle) -> Handle {
    rt.find_var(env, name)
}

/// Chained lookup inside a named namespace (global when the namespace
/// name is empty); empty name or unresolvable namespace yields the
/// unbound sentinel, never an error
pub fn find_var_ns(rt: &Runtime, name: &str, namespace: &str) -> Handle {
    if name.is_empty() {
        return rt.unbound_value();
    }
    let env = if namespace.is_empty() {
        rt.global_env()
    } else {
        find_namespace(rt, namespace)
    };
    if env == rt.unbound_value() {
        return rt.unbound_value();
    }
    rt.find_var(env, name)
}

/// Suspends the debugger single-step hook for the guard's lifetime.
///
/// Namespace lookup can itself trigger evaluation that would trip an
/// attached debugger.
pub struct DisableDebugScope<'rt> {
    rt: &'rt Runtime,
}

impl<'rt> DisableDebugScope<'rt> {
    /// Suspend the hook until the guard drops
    pub fn new(rt: &'rt Runtime) -> Self {
        rt.suspend_debug_hook();
        DisableDebugScope { rt }
    }
}

impl Drop for DisableDebugScope<'_> {
    fn drop(&mut self) {
        self.rt.resume_debug_hook();
    }
}

/// Look up a loaded namespace by name.
///
/// The runtime's own namespace lookup entry point raises a fatal foreign
/// fault on a miss; the registry frame is searched directly instead.
/// Returns the unbound sentinel when the namespace is not loaded.
pub fn find_namespace(rt: &Runtime, name: &str) -> Handle {
    if name.is_empty() {
        return rt.unbound_value();
    }

    // Namespace lookup executes foreign code that can trip the debugger.
    let _guard = DisableDebugScope::new(rt);

    rt.find_var_in_frame(rt.namespace_registry(), name)
}

/// Resolve a callable binding by name.
///
/// The fatal-on-miss function lookup entry point is avoided: the
/// enclosing-environment chain is walked manually. At the global
/// environment the chained lookup (which consults the runtime's global
/// symbol cache) is tried first, then the frame-local search. A binding
/// that resolves to a promise is forced (protected via the caller's
/// ledger) before the callable check; forcing is idempotent because the
/// runtime memoizes forced promises. Returns the unbound sentinel on
/// total failure.
pub fn find_function(
    rt: &Runtime,
    name: &str,
    namespace: &str,
    protect: &mut Protect<'_>,
) -> Handle {
    if name.is_empty() {
        return rt.unbound_value();
    }

    let mut env = if namespace.is_empty() {
        rt.global_env()
    } else {
        find_namespace(rt, namespace)
    };
    if env == rt.unbound_value() {
        return rt.unbound_value();
    }

    while env != rt.empty_env() && rt.tag_of(env) == Tag::Env {
        if env == rt.global_env() {
            let result = rt.find_var(rt.global_env(), name);
            if let Some(func) = as_callable(rt, result, protect) {
                return func;
            }
        }

        let result = rt.find_var_in_frame(env, name);
        if result != rt.unbound_value() {
            if let Some(func) = as_callable(rt, result, protect) {
                return func;
            }
        }

        env = rt.enclosing_env(env);
    }

    rt.unbound_value()
}

fn as_callable(rt: &Runtime, result: Handle, protect: &mut Protect<'_>) -> Option<Handle> {
    if rt.is_function(result) {
        return Some(result);
    }
    if rt.tag_of(result) == Tag::Promise {
        match rt.force_promise(result) {
            Ok(forced) => {
                protect.add(forced);
                if rt.is_function(forced) {
                    return Some(forced);
                }
            }
            Err(e) => warn!("forcing promise during function lookup failed: {e}"),
        }
    }
    None
}

/// Parameter names of a function.
///
/// Walks the formals pairlist and collects tag names. Builtins carry no
/// formals structure and yield an empty result; non-functions are a type
/// error.
pub fn extract_formal_names(rt: &Runtime, function: Handle) -> BridgeResult<Vec<String>> {
    if !rt.is_function(function) {
        return Err(BridgeError::unexpected(Tag::Closure, rt.tag_of(function)));
    }
    if rt.is_primitive(function) {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    let mut formals = rt.closure_formals(function);
    while rt.tag_of(formals) == Tag::Pair {
        let tag = rt.pair_tag(formals);
        if tag != rt.null_value() {
            names.push(rt.symbol_name(tag));
        }
        formals = rt.cdr(formals);
    }
    Ok(names)
}

/// Exported names of a namespace, via the foreign export-listing entry
/// point. Best effort: failures are logged and surfaced as
/// `CodeExecution`.
pub fn get_namespace_exports(rt: &Runtime, ns: Handle) -> BridgeResult<Vec<String>> {
    let mut protect = Protect::new(rt);
    let result = match rt.call_by_name("getNamespaceExports", &[Arg::positional(ns)]) {
        Ok(h) => h,
        Err(e) => {
            error!("namespace export listing failed: {e}");
            return Err(BridgeError::CodeExecution(e.to_string()));
        }
    };
    protect.add(result);
    let mut names = Vec::new();
    extract_string_vec(rt, result, &mut names)
        .map_err(|e| BridgeError::CodeExecution(e.to_string()))?;
    Ok(names)
}

/// Names of all loaded namespaces; empty (and logged) on failure
pub fn loaded_namespaces(rt: &Runtime) -> Vec<String> {
    let mut protect = Protect::new(rt);
    let result = match rt.call_by_name("loadedNamespaces", &[]) {
        Ok(h) => h,
        Err(e) => {
            error!("loaded namespace listing failed: {e}");
            return Vec::new();
        }
    };
    protect.add(result);
    let mut names = Vec::new();
    if let Err(e) = extract_string_vec(rt, result, &mut names) {
        error!("loaded namespace listing failed: {e}");
        return Vec::new();
    }
    names
}

// ============================================================================
// Small read-only helpers
// ============================================================================

/// Best-effort string coercion: string vectors, symbols, and scalar
/// numerics; `"NA"` for anything else
pub fn as_string(rt: &Runtime, value: Handle) -> String {
    match rt.tag_of(value) {
        Tag::String if rt.length_of(value) > 0 => rt.string_elem(value, 0).translate(),
        Tag::Symbol => rt.symbol_name(value),
        Tag::Integer if rt.length_of(value) > 0 => rt.integer_elem(value, 0).to_string(),
        Tag::Real if rt.length_of(value) > 0 => rt.real_elem(value, 0).to_string(),
        Tag::Logical if rt.length_of(value) > 0 => {
            if rt.logical_elem(value, 0) {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        _ => "NA".to_string(),
    }
}

/// Like [`as_string`] but null yields the supplied default
pub fn safe_as_string(rt: &Runtime, value: Handle, default: &str) -> String {
    if rt.tag_of(value) == Tag::Null {
        default.to_string()
    } else {
        as_string(rt, value)
    }
}

/// Tag name of a value, for diagnostics
pub fn type_name_of(rt: &Runtime, value: Handle) -> &'static str {
    rt.tag_of(value).name()
}

/// First class-attribute entry; `"NA"` when unclassed
pub fn class_of(rt: &Runtime, value: Handle) -> String {
    as_string(rt, rt.attrib(value, "class"))
}

/// True for call expressions
pub fn is_language(rt: &Runtime, value: Handle) -> bool {
    rt.tag_of(value) == Tag::Lang
}

/// True for string vectors
pub fn is_string(rt: &Runtime, value: Handle) -> bool {
    rt.tag_of(value) == Tag::String
}

/// True for the null value
pub fn is_null(rt: &Runtime, value: Handle) -> bool {
    rt.tag_of(value) == Tag::Null
}

/// True for closures and builtins
pub fn is_function(rt: &Runtime, value: Handle) -> bool {
    rt.is_function(value)
}

/// True if the value's class attribute contains the given class
pub fn inherits(rt: &Runtime, value: Handle, class: &str) -> bool {
    let attr = rt.attrib(value, "class");
    if rt.tag_of(attr) != Tag::String {
        return false;
    }
    (0..rt.length_of(attr)).any(|i| rt.string_elem(attr, i).translate() == class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create::{create_int, create_string};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_objects_guards_non_environment() {
        let rt = Runtime::new();
        let mut protect = Protect::new(&rt);
        let not_env = create_int(&rt, 1, &mut protect);
        let out = objects(&rt, not_env, true, &mut protect);
        assert!(is_null(&rt, out));
        assert!(object_names(&rt, not_env, true).is_err());
    }

    #[test]
    fn test_list_environment_skips_active_bindings() {
        let rt = Runtime::with_gc_stress();
        let mut protect = Protect::new(&rt);
        let env = rt.new_env(rt.empty_env());
        protect.add(env);

        let plain = create_int(&rt, 5, &mut protect);
        rt.define(env, "plain", plain);

        let fired = Rc::new(Cell::new(0u32));
        let f = fired.clone();
        rt.define_active(
            env,
            "active",
            Rc::new(move |rt| {
                f.set(f.get() + 1);
                rt.null_value()
            }),
        );

        let vars = list_environment(&rt, env, false, &mut protect);
        assert_eq!(vars.len(), 2);
        // listing never fires the active binding
        assert_eq!(fired.get(), 0);

        let active = vars.iter().find(|v| v.name == "active").unwrap();
        assert!(is_null(&rt, active.value));
        let plain_var = vars.iter().find(|v| v.name == "plain").unwrap();
        assert_eq!(plain_var.value, plain);
    }

    #[test]
    fn test_find_var_ns_sentinels() {
        let rt = Runtime::new();
        assert_eq!(find_var_ns(&rt, "", ""), rt.unbound_value());
        assert_eq!(find_var_ns(&rt, "x", "no.such.ns"), rt.unbound_value());

        let mut protect = Protect::new(&rt);
        let v = create_string(&rt, "here", &mut protect);
        rt.define(rt.global_env(), "x", v);
        assert_eq!(find_var_ns(&rt, "x", ""), v);
    }

    #[test]
    fn test_find_namespace_registry_walk() {
        let rt = Runtime::new();
        let mut protect = Protect::new(&rt);
        let ns = rt.new_env(rt.base_env());
        protect.add(ns);
        rt.register_namespace("tools", ns);

        assert_eq!(find_namespace(&rt, "tools"), ns);
        assert_eq!(find_namespace(&rt, ""), rt.unbound_value());
        assert_eq!(find_namespace(&rt, "missing"), rt.unbound_value());
        // the guard restored the debugger hook
        assert!(!rt.debug_hook_suspended());
    }

    #[test]
    fn test_find_function_forces_promise_once() {
        let rt = Runtime::with_gc_stress();
        let mut protect = Protect::new(&rt);

        let fired = Rc::new(Cell::new(0u32));
        let f = fired.clone();
        let promise = rt.new_promise(Rc::new(move |rt: &Runtime| {
            f.set(f.get() + 1);
            Ok(rt.new_builtin("lazy", Rc::new(|rt, _| Ok(rt.null_value()))))
        }));
        rt.protect(promise);
        rt.define(rt.global_env(), "lazy", promise);
        rt.unprotect(1);

        let first = find_function(&rt, "lazy", "", &mut protect);
        assert!(rt.is_function(first));
        assert_eq!(fired.get(), 1);

        // repeated lookups reuse the memoized result
        let second = find_function(&rt, "lazy", "", &mut protect);
        assert_eq!(first, second);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_find_function_in_namespace_chain() {
        let rt = Runtime::new();
        let mut protect = Protect::new(&rt);
        let ns = rt.new_env(rt.base_env());
        protect.add(ns);
        rt.register_namespace("pkg", ns);
        let func = rt.new_builtin("helper", Rc::new(|rt, _| Ok(rt.null_value())));
        protect.add(func);
        rt.define(ns, "helper", func);

        assert_eq!(find_function(&rt, "helper", "pkg", &mut protect), func);
        // non-function bindings are skipped, not returned
        let data = create_int(&rt, 1, &mut protect);
        rt.define(rt.global_env(), "data", data);
        assert_eq!(
            find_function(&rt, "data", "", &mut protect),
            rt.unbound_value()
        );
        assert_eq!(
            find_function(&rt, "", "", &mut protect),
            rt.unbound_value()
        );
    }

    #[test]
    fn test_extract_formal_names() {
        let rt = Runtime::new();
        let mut protect = Protect::new(&rt);
        let formals = rt.formals_from_names(&["x", "y", "..."]);
        protect.add(formals);
        let body = rt.null_value();
        let closure = rt.new_closure(formals, body, rt.global_env());
        protect.add(closure);

        assert_eq!(
            extract_formal_names(&rt, closure).unwrap(),
            vec!["x", "y", "..."]
        );

        // builtins have no formals structure
        let builtin = rt.new_builtin("prim", Rc::new(|rt, _| Ok(rt.null_value())));
        protect.add(builtin);
        assert!(extract_formal_names(&rt, builtin).unwrap().is_empty());

        // non-functions are a type error
        let data = create_int(&rt, 1, &mut protect);
        assert!(extract_formal_names(&rt, data).is_err());
    }

    #[test]
    fn test_namespace_exports_and_loaded() {
        let rt = Runtime::new();
        let mut protect = Protect::new(&rt);
        let ns = rt.new_env(rt.base_env());
        protect.add(ns);
        rt.define(ns, "exported", rt.null_value());
        rt.register_namespace("pkg", ns);

        assert_eq!(get_namespace_exports(&rt, ns).unwrap(), vec!["exported"]);
        assert_eq!(loaded_namespaces(&rt), vec!["pkg"]);
    }

    #[test]
    fn test_string_helpers() {
        let rt = Runtime::new();
        let mut protect = Protect::new(&rt);
        let s = create_string(&rt, "txt", &mut protect);
        assert_eq!(as_string(&rt, s), "txt");
        assert_eq!(as_string(&rt, rt.intern("sym")), "sym");
        assert_eq!(safe_as_string(&rt, rt.null_value(), "dflt"), "dflt");
        assert_eq!(type_name_of(&rt, s), "string");

        let classed = create_int(&rt, 1, &mut protect);
        let class = create_string(&rt, "myclass", &mut protect);
        rt.set_attrib(classed, "class", class);
        assert!(inherits(&rt, classed, "myclass"));
        assert!(!inherits(&rt, classed, "other"));
        assert_eq!(class_of(&rt, classed), "myclass");
    }
}
