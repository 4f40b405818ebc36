//! Runtime facade
//!
//! `Runtime` owns the heap and exposes the entry points native code
//! programs against: allocation by tag and length, element and attribute
//! access, symbol interning, environment lookup, builtin invocation,
//! promise forcing, debugger-hook suspension, and the protect/preserve
//! machinery. Everything is single-threaded; interior mutability is
//! `RefCell`, and holding a heap borrow across a native callback is never
//! done (callbacks may re-enter the runtime and allocate).
//!
//! Collections run *before* an allocation, never after: a freshly
//! allocated handle is always safe to use up to the next allocating call,
//! at which point it must be protected or reachable from a root.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::{EngineError, EngineResult};
use crate::heap::{Binding, EnvData, GcStats, Heap, ObjData, PromiseState};
use crate::value::{ActiveFn, Arg, BuiltinFn, CharData, Finalizer, Handle, PromiseFn, Tag};

/// Default number of allocations between collections
const DEFAULT_GC_INTERVAL: usize = 256;

/// The embedded interpreter runtime.
///
/// Not `Send`/`Sync`: all access must happen on the one thread that owns
/// the runtime.
pub struct Runtime {
    heap: RefCell<Heap>,
    symbols: RefCell<FxHashMap<String, Handle>>,
    null: Handle,
    unbound: Handle,
    empty_env: Handle,
    base_env: Handle,
    global_env: Handle,
    namespace_registry: Handle,
    debug_suspended: Cell<u32>,
}

impl Runtime {
    /// Runtime with the default collection interval
    pub fn new() -> Self {
        Self::with_gc_interval(DEFAULT_GC_INTERVAL)
    }

    /// Runtime that collects before *every* allocation.
    ///
    /// Protection mistakes that would be masked by lazy collection fail
    /// deterministically under this mode; tests use it throughout.
    pub fn with_gc_stress() -> Self {
        Self::with_gc_interval(1)
    }

    fn with_gc_interval(interval: usize) -> Self {
        // Boot with collection disabled; the root fields are not wired up
        // until the singletons exist.
        let mut heap = Heap::new(usize::MAX);

        let null = heap.alloc(ObjData::Null);
        heap.set_null(null);
        let unbound = heap.alloc(ObjData::Symbol("*unbound*".to_string()));
        heap.permanent.push(null);
        heap.permanent.push(unbound);

        let empty_env = heap.alloc(ObjData::Env(EnvData {
            frame: FxHashMap::default(),
            enclos: null,
        }));
        let base_env = heap.alloc(ObjData::Env(EnvData {
            frame: FxHashMap::default(),
            enclos: empty_env,
        }));
        let global_env = heap.alloc(ObjData::Env(EnvData {
            frame: FxHashMap::default(),
            enclos: base_env,
        }));
        let namespace_registry = heap.alloc(ObjData::Env(EnvData {
            frame: FxHashMap::default(),
            enclos: null,
        }));

        let rt = Runtime {
            heap: RefCell::new(heap),
            symbols: RefCell::new(FxHashMap::default()),
            null,
            unbound,
            empty_env,
            base_env,
            global_env,
            namespace_registry,
            debug_suspended: Cell::new(0),
        };
        rt.register_base_builtins();
        rt.heap.borrow_mut().set_gc_interval(interval);
        rt
    }

    // ========================================================================
    // Singletons
    // ========================================================================

    /// The null value
    pub fn null_value(&self) -> Handle {
        self.null
    }

    /// The unbound sentinel returned by failed lookups
    pub fn unbound_value(&self) -> Handle {
        self.unbound
    }

    /// The global environment
    pub fn global_env(&self) -> Handle {
        self.global_env
    }

    /// The base environment (enclosure of the global environment)
    pub fn base_env(&self) -> Handle {
        self.base_env
    }

    /// The terminal environment of every enclosure chain
    pub fn empty_env(&self) -> Handle {
        self.empty_env
    }

    /// The namespace registry environment (name -> namespace env)
    pub fn namespace_registry(&self) -> Handle {
        self.namespace_registry
    }

    // ========================================================================
    // Collection and rooting
    // ========================================================================

    fn alloc(&self, data: ObjData) -> Handle {
        if self.heap.borrow().gc_due() {
            self.collect_now();
        }
        self.heap.borrow_mut().alloc(data)
    }

    /// Force a full collection immediately
    pub fn collect_now(&self) {
        let finalizers = {
            let mut heap = self.heap.borrow_mut();
            let mut roots = vec![
                self.empty_env,
                self.base_env,
                self.global_env,
                self.namespace_registry,
            ];
            roots.extend(self.symbols.borrow().values().copied());
            heap.collect(&roots)
        };
        for f in finalizers {
            f();
        }
    }

    /// Collection statistics
    pub fn gc_stats(&self) -> GcStats {
        self.heap.borrow().stats()
    }

    /// Number of live heap objects
    pub fn live_objects(&self) -> usize {
        self.heap.borrow().live_objects()
    }

    /// True if the handle still refers to a live object
    pub fn is_valid(&self, h: Handle) -> bool {
        self.heap.borrow().is_valid(h)
    }

    /// Push a handle on the protect stack
    pub fn protect(&self, h: Handle) {
        self.heap.borrow_mut().protect_stack.push(h);
    }

    /// Pop the top `n` entries of the protect stack
    pub fn unprotect(&self, n: usize) {
        let mut heap = self.heap.borrow_mut();
        let len = heap.protect_stack.len().saturating_sub(n);
        heap.protect_stack.truncate(len);
    }

    /// Anchor a handle until a matching `release`
    pub fn preserve(&self, h: Handle) {
        self.heap.borrow_mut().preserved.push(h);
    }

    /// Drop one preservation of a handle; extra releases are no-ops
    pub fn release(&self, h: Handle) {
        let mut heap = self.heap.borrow_mut();
        if let Some(i) = heap.preserved.iter().rposition(|&x| x == h) {
            heap.preserved.swap_remove(i);
        }
    }

    /// Run finalizers of live `on_exit` weak references (shutdown path)
    pub fn run_exit_finalizers(&self) {
        let finalizers = self.heap.borrow_mut().take_exit_finalizers();
        for f in finalizers {
            f();
        }
    }

    // ========================================================================
    // Tags and generic access
    // ========================================================================

    /// Dynamic tag of a value
    pub fn tag_of(&self, h: Handle) -> Tag {
        self.heap.borrow().get(h).data.tag()
    }

    /// Length in the interpreter's sense: 0 for null, element count for
    /// vectors and pairlists, 1 for everything else.
    pub fn length_of(&self, h: Handle) -> usize {
        let heap = self.heap.borrow();
        match &heap.get(h).data {
            ObjData::Null => 0,
            ObjData::Logical(v) => v.len(),
            ObjData::Integer(v) => v.len(),
            ObjData::Real(v) => v.len(),
            ObjData::String(v) => v.len(),
            ObjData::List(v) => v.len(),
            ObjData::Pair { .. } | ObjData::Lang { .. } => {
                let mut n = 0;
                let mut cur = h;
                loop {
                    match &heap.get(cur).data {
                        ObjData::Pair { cdr, .. } | ObjData::Lang { cdr, .. } => {
                            n += 1;
                            cur = *cdr;
                        }
                        _ => break,
                    }
                }
                n
            }
            _ => 1,
        }
    }

    /// True for closures and builtins
    pub fn is_function(&self, h: Handle) -> bool {
        matches!(self.tag_of(h), Tag::Closure | Tag::Builtin)
    }

    /// True for builtins (no inspectable body or formals)
    pub fn is_primitive(&self, h: Handle) -> bool {
        self.tag_of(h) == Tag::Builtin
    }

    // ========================================================================
    // Vector allocation and element access
    // ========================================================================

    /// Logical vector of `n` `false` elements
    pub fn alloc_logical(&self, n: usize) -> Handle {
        self.alloc(ObjData::Logical(vec![false; n]))
    }

    /// Integer vector of `n` zeros
    pub fn alloc_integer(&self, n: usize) -> Handle {
        self.alloc(ObjData::Integer(vec![0; n]))
    }

    /// Real vector of `n` zeros
    pub fn alloc_real(&self, n: usize) -> Handle {
        self.alloc(ObjData::Real(vec![0.0; n]))
    }

    /// String vector of `n` empty elements
    pub fn alloc_string(&self, n: usize) -> Handle {
        self.alloc(ObjData::String(vec![CharData::new(""); n]))
    }

    /// Generic vector of `n` null elements
    pub fn alloc_list(&self, n: usize) -> Handle {
        self.alloc(ObjData::List(vec![self.null; n]))
    }

    /// Read a logical element
    pub fn logical_elem(&self, h: Handle, i: usize) -> bool {
        match &self.heap.borrow().get(h).data {
            ObjData::Logical(v) => v[i],
            d => panic!("logical access on {} value", d.tag()),
        }
    }

    /// Write a logical element
    pub fn logical_set(&self, h: Handle, i: usize, value: bool) {
        match &mut self.heap.borrow_mut().get_mut(h).data {
            ObjData::Logical(v) => v[i] = value,
            d => panic!("logical access on {} value", d.tag()),
        }
    }

    /// Read an integer element
    pub fn integer_elem(&self, h: Handle, i: usize) -> i32 {
        match &self.heap.borrow().get(h).data {
            ObjData::Integer(v) => v[i],
            d => panic!("integer access on {} value", d.tag()),
        }
    }

    /// Write an integer element
    pub fn integer_set(&self, h: Handle, i: usize, value: i32) {
        match &mut self.heap.borrow_mut().get_mut(h).data {
            ObjData::Integer(v) => v[i] = value,
            d => panic!("integer access on {} value", d.tag()),
        }
    }

    /// Read a real element
    pub fn real_elem(&self, h: Handle, i: usize) -> f64 {
        match &self.heap.borrow().get(h).data {
            ObjData::Real(v) => v[i],
            d => panic!("real access on {} value", d.tag()),
        }
    }

    /// Write a real element
    pub fn real_set(&self, h: Handle, i: usize, value: f64) {
        match &mut self.heap.borrow_mut().get_mut(h).data {
            ObjData::Real(v) => v[i] = value,
            d => panic!("real access on {} value", d.tag()),
        }
    }

    /// Read a string element (bytes + encoding)
    pub fn string_elem(&self, h: Handle, i: usize) -> CharData {
        match &self.heap.borrow().get(h).data {
            ObjData::String(v) => v[i].clone(),
            d => panic!("string access on {} value", d.tag()),
        }
    }

    /// Write a string element from a Rust (UTF-8) string
    pub fn string_set(&self, h: Handle, i: usize, value: &str) {
        self.string_set_char(h, i, CharData::new(value));
    }

    /// Write a string element with explicit encoding
    pub fn string_set_char(&self, h: Handle, i: usize, value: CharData) {
        match &mut self.heap.borrow_mut().get_mut(h).data {
            ObjData::String(v) => v[i] = value,
            d => panic!("string access on {} value", d.tag()),
        }
    }

    /// Read a generic-vector element
    pub fn list_elem(&self, h: Handle, i: usize) -> Handle {
        match &self.heap.borrow().get(h).data {
            ObjData::List(v) => v[i],
            d => panic!("list access on {} value", d.tag()),
        }
    }

    /// Write a generic-vector element
    pub fn list_set(&self, h: Handle, i: usize, value: Handle) {
        match &mut self.heap.borrow_mut().get_mut(h).data {
            ObjData::List(v) => v[i] = value,
            d => panic!("list access on {} value", d.tag()),
        }
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Attribute by name; null when absent
    pub fn attrib(&self, h: Handle, name: &str) -> Handle {
        self.heap
            .borrow()
            .get(h)
            .attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .unwrap_or(self.null)
    }

    /// Set an attribute; a null value removes it
    pub fn set_attrib(&self, h: Handle, name: &str, value: Handle) {
        let mut heap = self.heap.borrow_mut();
        let null = self.null;
        let attrs = &mut heap.get_mut(h).attrs;
        if value == null {
            attrs.retain(|(n, _)| n != name);
        } else if let Some(slot) = attrs.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            attrs.push((name.to_string(), value));
        }
    }

    // ========================================================================
    // Symbols
    // ========================================================================

    /// Intern a symbol. Interned symbols are permanent GC roots.
    pub fn intern(&self, name: &str) -> Handle {
        if let Some(&h) = self.symbols.borrow().get(name) {
            return h;
        }
        let h = self.alloc(ObjData::Symbol(name.to_string()));
        self.symbols.borrow_mut().insert(name.to_string(), h);
        h
    }

    /// Print name of a symbol
    pub fn symbol_name(&self, h: Handle) -> String {
        match &self.heap.borrow().get(h).data {
            ObjData::Symbol(s) => s.clone(),
            d => panic!("symbol access on {} value", d.tag()),
        }
    }

    // ========================================================================
    // Pairlists and call expressions
    // ========================================================================

    /// Cons node. `car`, `cdr` and `tag` must be protected or rooted by
    /// the caller, since this allocates.
    pub fn cons(&self, car: Handle, cdr: Handle, tag: Option<Handle>) -> Handle {
        self.alloc(ObjData::Pair {
            car,
            cdr,
            tag: tag.unwrap_or(self.null),
        })
    }

    /// Call expression `head(args...)`. Inputs are protected internally
    /// for the duration of construction.
    pub fn new_call(&self, head: Handle, args: &[Handle]) -> Handle {
        self.protect(head);
        for &a in args {
            self.protect(a);
        }
        let mut protected = args.len() + 1;

        let mut tail = self.null;
        for &a in args.iter().rev() {
            let node = self.alloc(ObjData::Pair {
                car: a,
                cdr: tail,
                tag: self.null,
            });
            self.protect(node);
            protected += 1;
            tail = node;
        }
        let call = self.alloc(ObjData::Lang {
            car: head,
            cdr: tail,
        });
        self.unprotect(protected);
        call
    }

    /// Head of a pair or call node; null for null
    pub fn car(&self, h: Handle) -> Handle {
        match &self.heap.borrow().get(h).data {
            ObjData::Null => self.null,
            ObjData::Pair { car, .. } | ObjData::Lang { car, .. } => *car,
            d => panic!("car on {} value", d.tag()),
        }
    }

    /// Tail of a pair or call node; null for null
    pub fn cdr(&self, h: Handle) -> Handle {
        match &self.heap.borrow().get(h).data {
            ObjData::Null => self.null,
            ObjData::Pair { cdr, .. } | ObjData::Lang { cdr, .. } => *cdr,
            d => panic!("cdr on {} value", d.tag()),
        }
    }

    /// Name tag of a pair node; null when untagged
    pub fn pair_tag(&self, h: Handle) -> Handle {
        match &self.heap.borrow().get(h).data {
            ObjData::Null => self.null,
            ObjData::Pair { tag, .. } => *tag,
            ObjData::Lang { .. } => self.null,
            d => panic!("tag on {} value", d.tag()),
        }
    }

    // ========================================================================
    // Environments
    // ========================================================================

    /// Fresh environment with the given enclosure
    pub fn new_env(&self, enclos: Handle) -> Handle {
        self.alloc(ObjData::Env(EnvData {
            frame: FxHashMap::default(),
            enclos,
        }))
    }

    fn with_env<T>(&self, env: Handle, op: &str, f: impl FnOnce(&EnvData) -> T) -> T {
        match &self.heap.borrow().get(env).data {
            ObjData::Env(e) => f(e),
            d => panic!("{} on {} value", op, d.tag()),
        }
    }

    /// Bind a value in an environment frame
    pub fn define(&self, env: Handle, name: &str, value: Handle) {
        match &mut self.heap.borrow_mut().get_mut(env).data {
            ObjData::Env(e) => {
                e.frame.insert(name.to_string(), Binding::Value(value));
            }
            d => panic!("define on {} value", d.tag()),
        }
    }

    /// Install an active binding; reading it runs the hook
    pub fn define_active(&self, env: Handle, name: &str, hook: ActiveFn) {
        match &mut self.heap.borrow_mut().get_mut(env).data {
            ObjData::Env(e) => {
                e.frame.insert(name.to_string(), Binding::Active(hook));
            }
            d => panic!("define on {} value", d.tag()),
        }
    }

    /// Remove a binding; true if one existed
    pub fn env_remove(&self, env: Handle, name: &str) -> bool {
        match &mut self.heap.borrow_mut().get_mut(env).data {
            ObjData::Env(e) => e.frame.remove(name).is_some(),
            d => panic!("remove on {} value", d.tag()),
        }
    }

    /// Sorted bound names of an environment frame.
    ///
    /// Names starting with `.` are skipped unless `all_names` is set.
    /// Calling this on a non-environment is a fatal fault (panic), the
    /// same way the foreign listing primitive raises an uninterceptable
    /// error; callers are expected to validate the tag first.
    pub fn env_list(&self, env: Handle, all_names: bool) -> Vec<String> {
        let mut names = self.with_env(env, "ls", |e| {
            e.frame
                .keys()
                .filter(|n| all_names || !n.starts_with('.'))
                .cloned()
                .collect::<Vec<_>>()
        });
        names.sort();
        names
    }

    /// True if the binding exists and is active
    pub fn binding_is_active(&self, env: Handle, name: &str) -> bool {
        self.with_env(env, "binding test", |e| {
            matches!(e.frame.get(name), Some(Binding::Active(_)))
        })
    }

    /// Enclosing environment
    pub fn enclosing_env(&self, env: Handle) -> Handle {
        self.with_env(env, "enclosure", |e| e.enclos)
    }

    fn frame_binding(&self, env: Handle, name: &str) -> Option<FoundBinding> {
        self.with_env(env, "lookup", |e| match e.frame.get(name) {
            Some(Binding::Value(v)) => Some(FoundBinding::Value(*v)),
            Some(Binding::Active(f)) => Some(FoundBinding::Active(f.clone())),
            None => None,
        })
    }

    /// Single-frame lookup. Fires active bindings. Returns the unbound
    /// sentinel when the name is not in the frame.
    pub fn find_var_in_frame(&self, env: Handle, name: &str) -> Handle {
        match self.frame_binding(env, name) {
            Some(FoundBinding::Value(v)) => v,
            Some(FoundBinding::Active(f)) => f(self),
            None => self.unbound,
        }
    }

    /// Chained lookup through enclosing environments. Fires active
    /// bindings. Returns the unbound sentinel on a miss.
    pub fn find_var(&self, env: Handle, name: &str) -> Handle {
        let mut cur = env;
        loop {
            if cur == self.empty_env || self.tag_of(cur) != Tag::Env {
                return self.unbound;
            }
            match self.frame_binding(cur, name) {
                Some(FoundBinding::Value(v)) => return v,
                Some(FoundBinding::Active(f)) => return f(self),
                None => cur = self.enclosing_env(cur),
            }
        }
    }

    // ========================================================================
    // Closures, builtins, promises
    // ========================================================================

    /// Closure from a formals pairlist, a body expression and an
    /// environment. Inputs must be protected or rooted by the caller.
    pub fn new_closure(&self, formals: Handle, body: Handle, env: Handle) -> Handle {
        self.alloc(ObjData::Closure { formals, body, env })
    }

    /// Formals pairlist of a closure
    pub fn closure_formals(&self, h: Handle) -> Handle {
        match &self.heap.borrow().get(h).data {
            ObjData::Closure { formals, .. } => *formals,
            d => panic!("formals on {} value", d.tag()),
        }
    }

    /// Body expression of a closure
    pub fn closure_body(&self, h: Handle) -> Handle {
        match &self.heap.borrow().get(h).data {
            ObjData::Closure { body, .. } => *body,
            d => panic!("body on {} value", d.tag()),
        }
    }

    /// Environment of a closure
    pub fn closure_env(&self, h: Handle) -> Handle {
        match &self.heap.borrow().get(h).data {
            ObjData::Closure { env, .. } => *env,
            d => panic!("environment on {} value", d.tag()),
        }
    }

    /// Formals pairlist from parameter names (no defaults)
    pub fn formals_from_names(&self, names: &[&str]) -> Handle {
        let mut tail = self.null;
        let mut protected = 0;
        for name in names.iter().rev() {
            let sym = self.intern(name);
            let node = self.alloc(ObjData::Pair {
                car: self.null,
                cdr: tail,
                tag: sym,
            });
            self.protect(node);
            protected += 1;
            tail = node;
        }
        self.unprotect(protected);
        tail
    }

    /// Builtin function value
    pub fn new_builtin(&self, name: &str, func: BuiltinFn) -> Handle {
        self.alloc(ObjData::Builtin {
            name: name.to_string(),
            func,
        })
    }

    /// Builtin value bound in the base environment
    pub fn register_builtin(&self, name: &str, func: BuiltinFn) -> Handle {
        let h = self.new_builtin(name, func);
        self.define(self.base_env, name, h);
        h
    }

    /// Print name of a builtin
    pub fn builtin_name(&self, h: Handle) -> String {
        match &self.heap.borrow().get(h).data {
            ObjData::Builtin { name, .. } => name.clone(),
            d => panic!("builtin access on {} value", d.tag()),
        }
    }

    /// Invoke a builtin value
    pub fn call(&self, func: Handle, args: &[Arg]) -> EngineResult<Handle> {
        let f = match &self.heap.borrow().get(func).data {
            ObjData::Builtin { func, .. } => func.clone(),
            d => {
                return Err(EngineError::TypeMismatch {
                    expected: "builtin",
                    actual: d.tag().name(),
                })
            }
        };
        f(self, args)
    }

    /// Look up a callable by name from the global environment chain and
    /// invoke it. Promises found along the way are forced.
    pub fn call_by_name(&self, name: &str, args: &[Arg]) -> EngineResult<Handle> {
        let mut func = self.find_var(self.global_env, name);
        if self.tag_of(func) == Tag::Promise {
            func = self.force_promise(func)?;
        }
        if self.tag_of(func) != Tag::Builtin {
            return Err(EngineError::UnknownFunction(name.to_string()));
        }
        self.call(func, args)
    }

    /// Unforced promise from a thunk
    pub fn new_promise(&self, thunk: PromiseFn) -> Handle {
        self.alloc(ObjData::Promise(PromiseState::Pending(thunk)))
    }

    /// Force a promise; the result is memoized so the thunk runs at most
    /// once. Forcing may allocate and re-enter the runtime.
    pub fn force_promise(&self, h: Handle) -> EngineResult<Handle> {
        enum Step {
            Done(Handle),
            Run(PromiseFn),
        }
        let step = match &self.heap.borrow().get(h).data {
            ObjData::Promise(PromiseState::Forced(v)) => Step::Done(*v),
            ObjData::Promise(PromiseState::Pending(f)) => Step::Run(f.clone()),
            d => {
                return Err(EngineError::TypeMismatch {
                    expected: "promise",
                    actual: d.tag().name(),
                })
            }
        };
        match step {
            Step::Done(v) => Ok(v),
            Step::Run(f) => {
                let v = f(self)?;
                if let ObjData::Promise(state) = &mut self.heap.borrow_mut().get_mut(h).data {
                    *state = PromiseState::Forced(v);
                }
                Ok(v)
            }
        }
    }

    // ========================================================================
    // External pointers and weak references
    // ========================================================================

    /// External pointer wrapping a native address. With `on_exit` the
    /// finalizer also runs at runtime shutdown if the pointer is still
    /// alive then.
    pub fn new_external_ptr(
        &self,
        addr: usize,
        finalizer: Option<Finalizer>,
        on_exit: bool,
    ) -> Handle {
        self.alloc(ObjData::ExternalPtr {
            addr,
            finalizer,
            on_exit,
        })
    }

    /// Address of an external pointer; 0 after clearing
    pub fn external_ptr_addr(&self, h: Handle) -> usize {
        match &self.heap.borrow().get(h).data {
            ObjData::ExternalPtr { addr, .. } => *addr,
            d => panic!("external pointer access on {} value", d.tag()),
        }
    }

    /// Null out an external pointer's address
    pub fn clear_external_ptr(&self, h: Handle) {
        match &mut self.heap.borrow_mut().get_mut(h).data {
            ObjData::ExternalPtr { addr, .. } => *addr = 0,
            d => panic!("external pointer access on {} value", d.tag()),
        }
    }

    /// Attach (replace) the finalizer of an external pointer
    pub fn register_finalizer(&self, h: Handle, finalizer: Finalizer, on_exit: bool) {
        match &mut self.heap.borrow_mut().get_mut(h).data {
            ObjData::ExternalPtr {
                finalizer: f,
                on_exit: e,
                ..
            } => {
                *f = Some(finalizer);
                *e = on_exit;
            }
            d => panic!("external pointer access on {} value", d.tag()),
        }
    }

    /// Weak reference. The key is not kept alive by the reference; when
    /// the key dies the reference is cleared and the finalizer queued.
    pub fn new_weak_ref(
        &self,
        key: Handle,
        value: Handle,
        finalizer: Option<Finalizer>,
        on_exit: bool,
    ) -> Handle {
        self.alloc(ObjData::WeakRef {
            key,
            value,
            finalizer,
            on_exit,
            cleared: false,
        })
    }

    /// Key of a weak reference; null once cleared
    pub fn weak_ref_key(&self, h: Handle) -> Handle {
        match &self.heap.borrow().get(h).data {
            ObjData::WeakRef { key, .. } => *key,
            d => panic!("weak reference access on {} value", d.tag()),
        }
    }

    /// Value of a weak reference; null once cleared
    pub fn weak_ref_value(&self, h: Handle) -> Handle {
        match &self.heap.borrow().get(h).data {
            ObjData::WeakRef { value, .. } => *value,
            d => panic!("weak reference access on {} value", d.tag()),
        }
    }

    // ========================================================================
    // Namespaces and the debugger hook
    // ========================================================================

    /// Register a namespace environment under a name
    pub fn register_namespace(&self, name: &str, env: Handle) {
        self.define(self.namespace_registry, name, env);
    }

    /// Suspend the debugger single-step hook (counted; re-entrant)
    pub fn suspend_debug_hook(&self) {
        self.debug_suspended.set(self.debug_suspended.get() + 1);
    }

    /// Resume the debugger single-step hook
    pub fn resume_debug_hook(&self) {
        let n = self.debug_suspended.get();
        self.debug_suspended.set(n.saturating_sub(1));
    }

    /// True while at least one suspension is outstanding
    pub fn debug_hook_suspended(&self) -> bool {
        self.debug_suspended.get() > 0
    }

    // ========================================================================
    // Base builtins
    // ========================================================================

    fn register_base_builtins(&self) {
        self.register_builtin("as.POSIXct", Rc::new(as_posixct));
        self.register_builtin("getNamespaceExports", Rc::new(get_namespace_exports));
        self.register_builtin("loadedNamespaces", Rc::new(loaded_namespaces));
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

enum FoundBinding {
    Value(Handle),
    Active(ActiveFn),
}

/// `as.POSIXct(x, tz=, origin=)`: epoch seconds (integer or real) to a
/// real vector classed as a timestamp.
fn as_posixct(rt: &Runtime, args: &[Arg]) -> EngineResult<Handle> {
    let x = args
        .iter()
        .find(|a| a.name.is_none())
        .map(|a| a.value)
        .ok_or_else(|| EngineError::Eval("as.POSIXct: no input vector".to_string()))?;
    let tz = args
        .iter()
        .find(|a| a.name.as_deref() == Some("tz"))
        .map(|a| rt.string_elem(a.value, 0).translate())
        .unwrap_or_else(|| "GMT".to_string());

    let n = rt.length_of(x);
    let seconds: Vec<f64> = match rt.tag_of(x) {
        Tag::Integer => (0..n).map(|i| rt.integer_elem(x, i) as f64).collect(),
        Tag::Real => (0..n).map(|i| rt.real_elem(x, i)).collect(),
        other => {
            return Err(EngineError::TypeMismatch {
                expected: "integer",
                actual: other.name(),
            })
        }
    };

    let out = rt.alloc_real(n);
    rt.protect(out);
    for (i, s) in seconds.iter().enumerate() {
        rt.real_set(out, i, *s);
    }
    let class = rt.alloc_string(2);
    rt.protect(class);
    rt.string_set(class, 0, "POSIXct");
    rt.string_set(class, 1, "POSIXt");
    rt.set_attrib(out, "class", class);
    let tzone = rt.alloc_string(1);
    rt.protect(tzone);
    rt.string_set(tzone, 0, &tz);
    rt.set_attrib(out, "tzone", tzone);
    rt.unprotect(3);
    Ok(out)
}

/// `getNamespaceExports(ns)`: sorted bound names of a namespace env
fn get_namespace_exports(rt: &Runtime, args: &[Arg]) -> EngineResult<Handle> {
    let ns = args
        .first()
        .map(|a| a.value)
        .ok_or_else(|| EngineError::Eval("getNamespaceExports: no namespace".to_string()))?;
    if rt.tag_of(ns) != Tag::Env {
        return Err(EngineError::TypeMismatch {
            expected: "environment",
            actual: rt.tag_of(ns).name(),
        });
    }
    let names = rt.env_list(ns, true);
    let out = rt.alloc_string(names.len());
    for (i, name) in names.iter().enumerate() {
        rt.string_set(out, i, name);
    }
    Ok(out)
}

/// `loadedNamespaces()`: sorted names in the namespace registry
fn loaded_namespaces(rt: &Runtime, _args: &[Arg]) -> EngineResult<Handle> {
    let names = rt.env_list(rt.namespace_registry(), true);
    let out = rt.alloc_string(names.len());
    for (i, name) in names.iter().enumerate() {
        rt.string_set(out, i, name);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singletons() {
        let rt = Runtime::new();
        assert_eq!(rt.tag_of(rt.null_value()), Tag::Null);
        assert_eq!(rt.tag_of(rt.global_env()), Tag::Env);
        assert_eq!(rt.length_of(rt.null_value()), 0);
        assert_ne!(rt.null_value(), rt.unbound_value());
    }

    #[test]
    fn test_vector_alloc_and_access() {
        let rt = Runtime::new();
        let v = rt.alloc_integer(3);
        rt.integer_set(v, 0, 7);
        rt.integer_set(v, 2, -1);
        assert_eq!(rt.integer_elem(v, 0), 7);
        assert_eq!(rt.integer_elem(v, 1), 0);
        assert_eq!(rt.integer_elem(v, 2), -1);
        assert_eq!(rt.length_of(v), 3);
        assert_eq!(rt.tag_of(v), Tag::Integer);
    }

    #[test]
    fn test_intern_is_idempotent() {
        let rt = Runtime::new();
        let a = rt.intern("foo");
        let b = rt.intern("foo");
        assert_eq!(a, b);
        assert_eq!(rt.symbol_name(a), "foo");
    }

    #[test]
    fn test_env_define_and_lookup() {
        let rt = Runtime::new();
        let v = rt.alloc_integer(1);
        rt.define(rt.global_env(), "x", v);
        assert_eq!(rt.find_var_in_frame(rt.global_env(), "x"), v);
        assert_eq!(rt.find_var_in_frame(rt.global_env(), "y"), rt.unbound_value());

        // chained lookup reaches the base env
        let b = rt.alloc_real(1);
        rt.define(rt.base_env(), "b", b);
        assert_eq!(rt.find_var(rt.global_env(), "b"), b);
        assert_eq!(rt.find_var(rt.global_env(), "nope"), rt.unbound_value());
    }

    #[test]
    fn test_env_list_hidden_names() {
        let rt = Runtime::new();
        let env = rt.new_env(rt.empty_env());
        rt.protect(env);
        rt.define(env, "b", rt.null_value());
        rt.define(env, ".hidden", rt.null_value());
        rt.define(env, "a", rt.null_value());
        assert_eq!(rt.env_list(env, false), vec!["a", "b"]);
        assert_eq!(rt.env_list(env, true), vec![".hidden", "a", "b"]);
        rt.unprotect(1);
    }

    #[test]
    fn test_active_binding_fires_on_lookup() {
        let rt = Runtime::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        rt.define_active(
            rt.global_env(),
            "hot",
            Rc::new(move |rt| {
                c.set(c.get() + 1);
                rt.null_value()
            }),
        );
        assert!(rt.binding_is_active(rt.global_env(), "hot"));
        let _ = rt.find_var_in_frame(rt.global_env(), "hot");
        let _ = rt.find_var(rt.global_env(), "hot");
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_promise_forced_once() {
        let rt = Runtime::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let p = rt.new_promise(Rc::new(move |rt: &Runtime| {
            c.set(c.get() + 1);
            Ok(rt.alloc_integer(1))
        }));
        rt.protect(p);
        let a = rt.force_promise(p).unwrap();
        let b = rt.force_promise(p).unwrap();
        assert_eq!(a, b);
        assert_eq!(count.get(), 1);
        rt.unprotect(1);
    }

    #[test]
    fn test_call_expression_shape() {
        let rt = Runtime::new();
        let head = rt.intern("f");
        let arg = rt.intern("x");
        let call = rt.new_call(head, &[arg]);
        assert_eq!(rt.tag_of(call), Tag::Lang);
        assert_eq!(rt.car(call), head);
        assert_eq!(rt.car(rt.cdr(call)), arg);
        assert_eq!(rt.cdr(rt.cdr(call)), rt.null_value());
        assert_eq!(rt.length_of(call), 2);
    }

    #[test]
    fn test_attrib_set_get_remove() {
        let rt = Runtime::new();
        let v = rt.alloc_integer(2);
        rt.protect(v);
        let names = rt.alloc_string(2);
        rt.set_attrib(v, "names", names);
        assert_eq!(rt.attrib(v, "names"), names);
        rt.set_attrib(v, "names", rt.null_value());
        assert_eq!(rt.attrib(v, "names"), rt.null_value());
        rt.unprotect(1);
    }

    #[test]
    fn test_debug_hook_depth() {
        let rt = Runtime::new();
        assert!(!rt.debug_hook_suspended());
        rt.suspend_debug_hook();
        rt.suspend_debug_hook();
        rt.resume_debug_hook();
        assert!(rt.debug_hook_suspended());
        rt.resume_debug_hook();
        assert!(!rt.debug_hook_suspended());
    }

    #[test]
    fn test_as_posixct_builtin() {
        let rt = Runtime::new();
        let secs = rt.alloc_integer(2);
        rt.protect(secs);
        rt.integer_set(secs, 0, 0);
        rt.integer_set(secs, 1, 86_400);
        let tz = rt.alloc_string(1);
        rt.protect(tz);
        rt.string_set(tz, 0, "GMT");
        let out = rt
            .call_by_name(
                "as.POSIXct",
                &[Arg::positional(secs), Arg::named("tz", tz)],
            )
            .unwrap();
        assert_eq!(rt.tag_of(out), Tag::Real);
        assert_eq!(rt.real_elem(out, 1), 86_400.0);
        let class = rt.attrib(out, "class");
        assert_eq!(rt.string_elem(class, 0).translate(), "POSIXct");
        rt.unprotect(2);
    }
}
