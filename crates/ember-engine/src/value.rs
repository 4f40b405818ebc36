//! Tagged value handles
//!
//! A `Handle` is an opaque reference into the runtime's slab heap. It is
//! `Copy` and carries a generation counter so that a handle kept across a
//! collection that reclaimed its object faults deterministically instead of
//! silently aliasing a reused slot.

use std::fmt;
use std::rc::Rc;

use crate::error::EngineResult;
use crate::runtime::Runtime;

/// Opaque reference to an object on the runtime heap.
///
/// Handles do not own or root the object they refer to; the object stays
/// alive only while reachable from a GC root (protect stack, preserve
/// table, an environment, ...). Dereferencing a handle whose object has
/// been reclaimed is a fatal fault (panic).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Handle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Dynamic tag of a heap object.
///
/// The set is closed: every object on the heap carries exactly one of
/// these, and all typed access checks the tag first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Tag {
    /// The null value
    Null,
    /// Boolean vector
    Logical,
    /// 32-bit integer vector
    Integer,
    /// 64-bit float vector
    Real,
    /// String vector (elements carry their own encoding)
    String,
    /// Generic vector (list)
    List,
    /// Cons node of a pairlist
    Pair,
    /// Call expression node
    Lang,
    /// Interned symbol
    Symbol,
    /// Environment frame with an enclosing environment
    Env,
    /// Interpreted function (formals, body, closure env)
    Closure,
    /// Native builtin function
    Builtin,
    /// Lazily forced expression
    Promise,
    /// Opaque native pointer with optional finalizer
    ExternalPtr,
    /// Weak reference (key traced weakly)
    WeakRef,
}

impl Tag {
    /// Short lowercase name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Tag::Null => "null",
            Tag::Logical => "logical",
            Tag::Integer => "integer",
            Tag::Real => "real",
            Tag::String => "string",
            Tag::List => "list",
            Tag::Pair => "pairlist",
            Tag::Lang => "language",
            Tag::Symbol => "symbol",
            Tag::Env => "environment",
            Tag::Closure => "closure",
            Tag::Builtin => "builtin",
            Tag::Promise => "promise",
            Tag::ExternalPtr => "externalptr",
            Tag::WeakRef => "weakref",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoding mark of a string element.
///
/// `Native` bytes are in the host's native narrow encoding (treated as
/// Latin-1 here); `Utf8` bytes are UTF-8.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Encoding {
    /// Host native narrow encoding (Latin-1)
    Native,
    /// UTF-8
    Utf8,
}

/// One element of a string vector: raw bytes plus their encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharData {
    bytes: Vec<u8>,
    encoding: Encoding,
}

impl CharData {
    /// Element from a Rust string (always UTF-8)
    pub fn new(s: &str) -> Self {
        CharData {
            bytes: s.as_bytes().to_vec(),
            encoding: Encoding::Utf8,
        }
    }

    /// Element from raw native-encoding bytes
    pub fn native(bytes: Vec<u8>) -> Self {
        CharData {
            bytes,
            encoding: Encoding::Native,
        }
    }

    /// Encoding mark of this element
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Translate into the native encoding.
    ///
    /// The bytes are handed over as-is; byte sequences that are not valid
    /// UTF-8 are replaced rather than dropped.
    pub fn translate(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Translate into UTF-8, converting native-encoding (Latin-1) bytes.
    pub fn translate_utf8(&self) -> String {
        match self.encoding {
            Encoding::Utf8 => String::from_utf8_lossy(&self.bytes).into_owned(),
            Encoding::Native => self.bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Native function invoked for a builtin binding.
///
/// Builtins receive the runtime and the (optionally named) argument list;
/// they may allocate, and therefore may trigger a collection.
pub type BuiltinFn = Rc<dyn Fn(&Runtime, &[Arg]) -> EngineResult<Handle>>;

/// Body of an unforced promise
pub type PromiseFn = Rc<dyn Fn(&Runtime) -> EngineResult<Handle>>;

/// Read hook of an active binding; fires on every lookup of the binding
pub type ActiveFn = Rc<dyn Fn(&Runtime) -> Handle>;

/// Finalizer for external pointers and weak references.
///
/// Runs after the owning object has been reclaimed, so it receives no
/// handle; capture whatever state the cleanup needs.
pub type Finalizer = Rc<dyn Fn()>;

/// One argument to a builtin call
#[derive(Clone)]
pub struct Arg {
    /// Parameter name, if the call site named it
    pub name: Option<String>,
    /// Argument value
    pub value: Handle,
}

impl Arg {
    /// Positional argument
    pub fn positional(value: Handle) -> Self {
        Arg { name: None, value }
    }

    /// Named argument
    pub fn named(name: &str, value: Handle) -> Self {
        Arg {
            name: Some(name.to_string()),
            value,
        }
    }
}
