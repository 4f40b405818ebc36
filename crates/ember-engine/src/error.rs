//! Error types for runtime entry points

/// Result type for fallible runtime operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Runtime operation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// A named function was not found or is not callable
    #[error("no callable binding for '{0}'")]
    UnknownFunction(String),

    /// A builtin or promise body failed
    #[error("evaluation failed: {0}")]
    Eval(String),

    /// Operation applied to a value of the wrong tag
    #[error("expected {expected}, got {actual}")]
    TypeMismatch {
        /// Tag the operation requires
        expected: &'static str,
        /// Tag actually seen
        actual: &'static str,
    },
}
