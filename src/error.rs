//! Error handling for the Kansatsu agent
//!
//! Observability must never change what an instrumented caller sees, so the
//! error types here are split by who is allowed to observe them:
//!
//! - **Caller-facing** - [`KansatsuError`] is returned from configuration,
//!   wrap-time validation and sensitive-content checks.
//! - **Best-effort** - [`ExportError`](crate::telemetry::ExportError) and
//!   [`SinkError`](crate::publisher::SinkError) are logged by the agent and
//!   never propagated into an instrumented call.
//! - **Transparent** - the wrapped function's own error is returned to the
//!   caller untouched; it is never converted into a `KansatsuError`.
//!
//! # Example
//!
//! ```rust
//! use kansatsu::error::KansatsuError;
//!
//! # fn handle(error: KansatsuError) {
//! if error.is_backend_unavailable() {
//!     eprintln!("Entity recognizer not loaded: {}", error);
//! } else if error.is_user_error() {
//!     eprintln!("Invalid input: {}", error);
//! }
//! # }
//! ```

use thiserror::Error;

/// Main error type for the Kansatsu library
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KansatsuError {
    /// Input validation errors (user-provided data is invalid)
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Wrap-time misconfiguration of an instrumented function
    #[error("Instrumentation error for '{name}': {message}")]
    Instrumentation { name: String, message: String },

    /// The sensitive-content backend has not been loaded
    #[error("Entity recognition backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    /// The sensitive-content backend failed while labeling text
    #[error("Entity recognition backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    /// Configuration errors (files, environment, validation)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Internal library errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl KansatsuError {
    /// Create a simple InvalidInput error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an Instrumentation error for the named target
    pub fn instrumentation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Instrumentation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a BackendUnavailable error
    pub fn backend_unavailable(backend: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
        }
    }

    /// Create a Backend failure error
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a Configuration error
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an Internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Errors caused by what the caller passed in
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::Instrumentation { .. } | Self::Configuration { .. }
        )
    }

    /// Whether the entity recognizer was missing rather than failing
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Whether retrying the same operation later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. } | Self::Backend { .. })
    }
}

impl From<serde_json::Error> for KansatsuError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}

impl From<crate::config::ConfigError> for KansatsuError {
    fn from(error: crate::config::ConfigError) -> Self {
        Self::Configuration {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = KansatsuError::instrumentation("llm_call", "name must not be empty");
        assert_eq!(
            error.to_string(),
            "Instrumentation error for 'llm_call': name must not be empty"
        );

        let error = KansatsuError::backend_unavailable("ner");
        assert_eq!(
            error.to_string(),
            "Entity recognition backend unavailable: ner"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(KansatsuError::invalid_input("bad").is_user_error());
        assert!(KansatsuError::instrumentation("f", "bad").is_user_error());
        assert!(!KansatsuError::backend_unavailable("ner").is_user_error());

        assert!(KansatsuError::backend_unavailable("ner").is_backend_unavailable());
        assert!(!KansatsuError::backend("ner", "oom").is_backend_unavailable());

        assert!(KansatsuError::backend("ner", "oom").is_retryable());
        assert!(!KansatsuError::internal_error("bug").is_retryable());
    }

    #[test]
    fn test_serde_json_conversion() {
        let parse_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: KansatsuError = parse_error.into();
        assert!(matches!(error, KansatsuError::Serialization { .. }));
    }
}
