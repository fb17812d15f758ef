//! Error types for the scoped cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the scoped cache.
///
/// Every variant is a caller programming error. Misses and prefixes with no
/// matching entries are reported through return values, never as errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A key or key template was empty where one is structurally required
    #[error("Cache key must not be empty")]
    EmptyKey,

    /// Key template could not be parsed
    #[error("Malformed key template '{template}': {reason}")]
    MalformedTemplate { template: String, reason: String },

    /// Key template references a parameter that was not supplied
    #[error("Key template '{template}' references parameter {{{index}}} but only {supplied} supplied")]
    MissingParameter {
        template: String,
        index: usize,
        supplied: usize,
    },

    /// Cached value was read back as a different type than it was stored with
    #[error("Cached value for key '{key}' is not of type {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}

// == Result Type Alias ==
/// Convenience Result type for the scoped cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameter_message() {
        let err = CacheError::MissingParameter {
            template: "item-{0}-{1}".to_string(),
            index: 1,
            supplied: 1,
        };
        assert_eq!(
            err.to_string(),
            "Key template 'item-{0}-{1}' references parameter {1} but only 1 supplied"
        );
    }

    #[test]
    fn test_converts_into_anyhow() {
        let err: anyhow::Error = CacheError::EmptyKey.into();
        assert_eq!(err.to_string(), "Cache key must not be empty");
    }
}
