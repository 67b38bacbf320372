//! Error types for shmqp core operations.

use thiserror::Error;

/// Core error type for descriptor and attribute handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Buffer is too short for the requested operation.
    #[error("buffer too short: required {required} bytes, available {available} bytes")]
    BufferTooShort {
        /// Required buffer size in bytes.
        required: usize,
        /// Available buffer size in bytes.
        available: usize,
    },

    /// A transport attribute has an unusable value.
    #[error("invalid attribute {name}: {message}")]
    InvalidAttribute {
        /// Attribute name.
        name: &'static str,
        /// Error message.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid attribute error.
    pub fn invalid_attribute(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            name,
            message: message.into(),
        }
    }
}

/// Result type alias for shmqp core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_too_short_display() {
        let err = CoreError::BufferTooShort {
            required: 16,
            available: 8,
        };
        assert_eq!(
            err.to_string(),
            "buffer too short: required 16 bytes, available 8 bytes"
        );
    }

    #[test]
    fn test_invalid_attribute_helper() {
        let err = CoreError::invalid_attribute("namespace", "must not be empty");
        assert_eq!(
            err.to_string(),
            "invalid attribute namespace: must not be empty"
        );
    }
}
