//! Conversion and introspection layer over the ember runtime
//!
//! The bridge sits between native Rust code and the runtime's collected
//! heap. It owns four concerns:
//!
//! - **Rooting**: scoped [`Protect`] ledgers and long-lived
//!   [`PreservedHandle`] anchors keep handles alive across collections.
//! - **Extraction**: typed, tag-checked reads from runtime values into
//!   native scalars and containers ([`extract`]).
//! - **Construction**: allocation of runtime values from native data,
//!   with every intermediate rooted before the next allocation
//!   ([`create`]).
//! - **Inspection**: read-only environment listing, symbol and function
//!   lookup, and detection of argument-capturing functions ([`inspect`],
//!   [`nse`]).
//!
//! Lookups that miss return the runtime's unbound sentinel; only type
//! mismatches and failed foreign calls surface as [`BridgeError`].

pub mod create;
pub mod error;
pub mod extract;
pub mod external;
pub mod inspect;
pub mod nse;
pub mod protect;

pub use error::{BridgeError, BridgeResult};
pub use protect::{PreservedHandle, Protect};

// The runtime surface the bridge is built over, for downstream callers.
pub use ember_engine::{Handle, Runtime, Tag};
