//! Ember interpreter runtime
//!
//! A small embedded interpreter object model: a garbage-collected heap of
//! dynamically tagged values (vectors, pairlists, call expressions,
//! symbols, environments, closures, promises, external pointers, weak
//! references) behind a single-threaded `Runtime` facade.
//!
//! This crate is the *collaborator* side of the bridge: it exposes the
//! entry points native code consumes: allocation, element and attribute
//! access, symbol interning, environment lookup, builtin invocation,
//! promise forcing, and the protect/preserve rooting machinery. It has no
//! parser and no general evaluator; evaluation is limited to forcing
//! promises and invoking registered builtins.

#![warn(rust_2018_idioms)]

mod heap;

/// Error types for runtime entry points
pub mod error;

/// Runtime facade over the heap
pub mod runtime;

/// Handles, tags, and string element data
pub mod value;

pub use error::{EngineError, EngineResult};
pub use heap::GcStats;
pub use runtime::Runtime;
pub use value::{ActiveFn, Arg, BuiltinFn, CharData, Encoding, Finalizer, Handle, PromiseFn, Tag};
