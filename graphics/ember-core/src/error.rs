//! # EMBER Error Handling
//!
//! Error types for the render device stack.
//!
//! Only recoverable conditions are errors. Running out of buffer space is
//! reported as `None` by the allocators, and broken invariants (double
//! free, unbalanced stacks) abort with a diagnostic instead.

use alloc::string::String;
use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// EMBER Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// EMBER unified error type
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid parameter provided
    InvalidParameter,
    /// Configuration rejected, with the offending field
    InvalidConfig(&'static str),
    /// Resource context used before `init`
    NotInitialized,
    /// Resource context initialized twice
    AlreadyInitialized,
    /// Resource context already shut down
    DeviceShutdown,
    /// An immediate-mode callback failed during chain evaluation
    ImmediateCallback(ImmediateError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::InvalidConfig(field) => write!(f, "invalid configuration: {}", field),
            Self::NotInitialized => write!(f, "resource context not initialized"),
            Self::AlreadyInitialized => write!(f, "resource context already initialized"),
            Self::DeviceShutdown => write!(f, "resource context shut down"),
            Self::ImmediateCallback(e) => write!(f, "immediate callback failed: {}", e),
        }
    }
}

// =============================================================================
// IMMEDIATE CALLBACK ERROR
// =============================================================================

/// Failure reported by an immediate-mode draw callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateError {
    message: String,
}

impl ImmediateError {
    /// Create a new callback error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ImmediateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<ImmediateError> for Error {
    fn from(e: ImmediateError) -> Self {
        Error::ImmediateCallback(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display() {
        assert_eq!(
            Error::InvalidConfig("initial_vertex_capacity").to_string(),
            "invalid configuration: initial_vertex_capacity"
        );
        let err: Error = ImmediateError::new("boom").into();
        assert_eq!(err.to_string(), "immediate callback failed: boom");
    }
}
