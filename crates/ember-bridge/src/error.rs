//! Error types for the bridge layer
//!
//! Two kinds dominate: a dynamic tag that does not match what a typed
//! operation expects, and a correctly-typed but zero-length source for a
//! scalar target. Failed *lookups* are not errors; they return the
//! runtime's unbound sentinel instead.

use ember_engine::Tag;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// Dynamic tag mismatch against what the operation expects
    #[error("unexpected data type: expected {expected}, got {actual}")]
    UnexpectedDataType {
        /// Tag the operation requires
        expected: Tag,
        /// Tag actually seen
        actual: Tag,
    },

    /// Correctly-typed source with no elements where a scalar is needed
    #[error("no data available")]
    NoDataAvailable,

    /// Named element missing from a composite value
    #[error("list element not found: '{name}'")]
    ListElementNotFound {
        /// Name of the missing element
        name: String,
    },

    /// A foreign call failed in a way the caller cannot recover
    #[error("code execution failed: {0}")]
    CodeExecution(String),
}

impl BridgeError {
    /// Shorthand for the tag-mismatch case
    pub fn unexpected(expected: Tag, actual: Tag) -> Self {
        BridgeError::UnexpectedDataType { expected, actual }
    }
}
