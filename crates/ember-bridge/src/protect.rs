//! Handle rooting: scoped protection and long-lived preservation
//!
//! Two disjoint ownership strategies for handles into the runtime's
//! collected heap:
//!
//! - [`Protect`] is a stack-discipline ledger: push-only during a native
//!   call frame, released as one batch when the frame unwinds. Every
//!   handle passed to a constructor must be on a ledger before the next
//!   allocation, because any allocation may trigger a collection.
//! - [`PreservedHandle`] anchors a single handle for the whole lifetime
//!   of a native object, across arbitrarily many call frames.
//!
//! A handle must never escape a `Protect`'s scope without being
//! re-anchored through a `PreservedHandle` (or becoming reachable from an
//! environment).

use ember_engine::{Handle, Runtime};

/// Scoped protection ledger.
///
/// Tracks how many handles it pushed on the runtime's protect stack and
/// bulk-pops exactly that many on [`Protect::unprotect_all`] or drop.
/// Nesting is safe: each ledger only releases its own count.
pub struct Protect<'rt> {
    rt: &'rt Runtime,
    count: usize,
}

impl<'rt> Protect<'rt> {
    /// Empty ledger over a runtime
    pub fn new(rt: &'rt Runtime) -> Self {
        Protect { rt, count: 0 }
    }

    /// Ledger that immediately protects one handle
    pub fn with(rt: &'rt Runtime, handle: Handle) -> Self {
        let mut p = Protect::new(rt);
        p.add(handle);
        p
    }

    /// Register one handle for protection
    pub fn add(&mut self, handle: Handle) {
        self.rt.protect(handle);
        self.count += 1;
    }

    /// Number of handles this ledger currently protects
    pub fn len(&self) -> usize {
        self.count
    }

    /// True if nothing is protected
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Release every handle registered since construction, as one batch
    pub fn unprotect_all(&mut self) {
        if self.count > 0 {
            self.rt.unprotect(self.count);
            self.count = 0;
        }
    }
}

impl Drop for Protect<'_> {
    fn drop(&mut self) {
        // Runs during unwind; must not propagate anything.
        self.unprotect_all();
    }
}

/// Long-lived anchor for a single handle.
///
/// Unlike [`Protect`], a preserved handle survives across call frames
/// until explicitly released or dropped. Assigning a new handle releases
/// the previous one first; at most one preservation is active per holder.
pub struct PreservedHandle<'rt> {
    rt: &'rt Runtime,
    handle: Handle,
}

impl<'rt> PreservedHandle<'rt> {
    /// Empty (null) holder
    pub fn new(rt: &'rt Runtime) -> Self {
        PreservedHandle {
            rt,
            handle: rt.null_value(),
        }
    }

    /// Holder anchoring a handle immediately
    pub fn with(rt: &'rt Runtime, handle: Handle) -> Self {
        let mut p = PreservedHandle::new(rt);
        p.set(handle);
        p
    }

    /// Anchor a handle, releasing any previous anchor first.
    ///
    /// Null is stored but never registered with the preserve table.
    pub fn set(&mut self, handle: Handle) {
        self.release_now();
        self.handle = handle;
        if self.handle != self.rt.null_value() {
            self.rt.preserve(self.handle);
        }
    }

    /// The anchored handle (null when empty)
    pub fn get(&self) -> Handle {
        self.handle
    }

    /// True when nothing is anchored
    pub fn is_null(&self) -> bool {
        self.handle == self.rt.null_value()
    }

    /// Release the anchor and reset to null
    pub fn release_now(&mut self) {
        if self.handle != self.rt.null_value() {
            self.rt.release(self.handle);
            self.handle = self.rt.null_value();
        }
    }
}

impl Drop for PreservedHandle<'_> {
    fn drop(&mut self) {
        self.release_now();
    }
}
