//! Error types for the host-interop ABI

/// Result type for interop calls
pub type InteropResult<T> = Result<T, InteropError>;

/// Errors raised while marshalling values across the guest/host boundary.
///
/// Callers must be able to distinguish `UnsupportedType` (the value cannot
/// be represented on the other side) from `UnknownIdentifier` (the member
/// does not exist, is final, or is not exposed) because they drive different
/// guest-visible errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InteropError {
    /// Value cannot be represented as the requested type
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Member does not exist, is final, or is not exposed by the access policy
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    /// Wrong number of call arguments
    #[error("Arity mismatch: expected {expected}, got {got}")]
    ArityMismatch {
        /// Number of arguments the member declares
        expected: usize,
        /// Number of arguments supplied
        got: usize,
    },

    /// Type mismatch during conversion
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Interop operation failed
    #[error("{0}")]
    Message(String),
}

impl From<String> for InteropError {
    fn from(s: String) -> Self {
        InteropError::Message(s)
    }
}

impl From<&str> for InteropError {
    fn from(s: &str) -> Self {
        InteropError::Message(s.to_string())
    }
}
