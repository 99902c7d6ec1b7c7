//! Error types for the copilot workspace.
//!
//! Library crates use [`CopilotError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all copilot operations.
#[derive(Debug, thiserror::Error)]
pub enum CopilotError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Generation backend failure (transport, auth, or an unusable response envelope).
    #[error("backend error: {0}")]
    Backend(String),

    /// Generated text did not contain a recoverable structured value.
    #[error("malformed output: {message}")]
    MalformedOutput {
        message: String,
        /// The cleaned text the extractor last tried to parse.
        cleaned: String,
    },

    /// User input matched a prompt-injection rule.
    #[error("{field} rejected: {reason}")]
    InjectionDetected { field: String, reason: String },

    /// Retrieval collaborator failure.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input, empty corpus, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CopilotError>;

impl CopilotError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a malformed-output error, keeping the cleaned text for diagnostics.
    pub fn malformed(msg: impl Into<String>, cleaned: impl Into<String>) -> Self {
        Self::MalformedOutput {
            message: msg.into(),
            cleaned: cleaned.into(),
        }
    }

    /// Create an injection rejection for the named input field.
    pub fn injection(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InjectionDetected {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a user-facing input rejection rather than a failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::InjectionDetected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CopilotError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = CopilotError::validation("chunk_overlap must be smaller than chunk_size");
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn injection_names_field_and_reason() {
        let err = CopilotError::injection("goal", "Attempted role hijacking");
        assert_eq!(err.to_string(), "goal rejected: Attempted role hijacking");
        assert!(err.is_rejection());
        assert!(!CopilotError::Backend("timeout".into()).is_rejection());
    }

    #[test]
    fn malformed_output_keeps_cleaned_text() {
        let err = CopilotError::malformed("no JSON value found", "just prose");
        match err {
            CopilotError::MalformedOutput { message, cleaned } => {
                assert_eq!(message, "no JSON value found");
                assert_eq!(cleaned, "just prose");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
