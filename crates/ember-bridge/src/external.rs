//! External pointers and weak references
//!
//! Thin, protection-aware wrappers over the runtime's opaque-pointer and
//! weak-reference objects. External pointers carry a native address the
//! collector never traces; their finalizer runs when the object is
//! reclaimed or, if flagged, at runtime shutdown. Weak references observe
//! a key object without keeping it alive.

use ember_engine::{Finalizer, Handle, Runtime};

use crate::protect::Protect;

/// Wrap a native address in an opaque pointer object, protected on the
/// caller's ledger. The finalizer, if any, runs exactly once: when the
/// object dies, or at runtime shutdown if the object outlives it.
pub fn make_external_ptr(
    rt: &Runtime,
    addr: usize,
    finalizer: Option<Finalizer>,
    protect: &mut Protect<'_>,
) -> Handle {
    let ptr = rt.new_external_ptr(addr, finalizer, true);
    protect.add(ptr);
    ptr
}

/// Address held by an external pointer; zero once cleared
pub fn external_ptr_addr(rt: &Runtime, ptr: Handle) -> usize {
    rt.external_ptr_addr(ptr)
}

/// Zero the pointer's address without running its finalizer
pub fn clear_external_ptr(rt: &Runtime, ptr: Handle) {
    rt.clear_external_ptr(ptr);
}

/// Attach (or replace) a finalizer on an external pointer. With
/// `on_exit` the finalizer also runs at runtime shutdown if the object
/// is still alive then.
pub fn register_finalizer(rt: &Runtime, ptr: Handle, finalizer: Finalizer, on_exit: bool) {
    rt.register_finalizer(ptr, finalizer, on_exit);
}

/// Run the finalizers of everything flagged `on_exit` that is still
/// alive. Shutdown path; each finalizer runs at most once overall.
pub fn run_exit_finalizers(rt: &Runtime) {
    rt.run_exit_finalizers();
}

/// Weak reference observing `key` without rooting it. When `key` is
/// collected the reference clears and the finalizer, if any, runs once.
pub fn make_weak_ref(
    rt: &Runtime,
    key: Handle,
    value: Handle,
    finalizer: Option<Finalizer>,
    on_exit: bool,
) -> Handle {
    rt.new_weak_ref(key, value, finalizer, on_exit)
}

/// Referenced key, or null once cleared
pub fn weak_ref_key(rt: &Runtime, weak: Handle) -> Handle {
    rt.weak_ref_key(weak)
}

/// Associated value, or null once cleared
pub fn weak_ref_value(rt: &Runtime, weak: Handle) -> Handle {
    rt.weak_ref_value(weak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_engine::Tag;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_external_ptr_lifecycle() {
        let rt = Runtime::with_gc_stress();
        let ran = Rc::new(Cell::new(0u32));
        let r = ran.clone();

        let mut protect = Protect::new(&rt);
        let ptr = make_external_ptr(
            &rt,
            0xdead_beef,
            Some(Rc::new(move || r.set(r.get() + 1))),
            &mut protect,
        );
        assert_eq!(rt.tag_of(ptr), Tag::ExternalPtr);
        assert_eq!(external_ptr_addr(&rt, ptr), 0xdead_beef);

        clear_external_ptr(&rt, ptr);
        assert_eq!(external_ptr_addr(&rt, ptr), 0);
        // clearing does not run the finalizer
        assert_eq!(ran.get(), 0);

        protect.unprotect_all();
        rt.collect_now();
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn test_weak_ref_clears_when_key_dies() {
        let rt = Runtime::new();
        let cleared = Rc::new(Cell::new(0u32));
        let c = cleared.clone();

        let mut protect = Protect::new(&rt);
        let key = rt.alloc_integer(1);
        protect.add(key);
        let value = rt.alloc_integer(1);
        protect.add(value);

        let weak = make_weak_ref(&rt, key, value, Some(Rc::new(move || c.set(c.get() + 1))), false);
        rt.preserve(weak);
        assert_eq!(weak_ref_key(&rt, weak), key);
        assert_eq!(weak_ref_value(&rt, weak), value);

        // the weak reference alone does not keep the key alive
        protect.unprotect_all();
        rt.collect_now();
        assert_eq!(weak_ref_key(&rt, weak), rt.null_value());
        assert_eq!(weak_ref_value(&rt, weak), rt.null_value());
        assert_eq!(cleared.get(), 1);

        // already cleared; the finalizer does not run again
        rt.collect_now();
        assert_eq!(cleared.get(), 1);
    }
}
