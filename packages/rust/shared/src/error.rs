//! Error types for docflow.
//!
//! Library crates use [`DocflowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::sync::Arc;

/// Top-level error type for all docflow operations.
///
/// `Clone` so a failed run can both report the cause through the status
/// channel and return it to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DocflowError {
    /// No node's `connectsTo` references the step.
    #[error("missing predecessor: no node connects to step `{step_id}`")]
    MissingPredecessor { step_id: String },

    /// The resolved step input was empty after mode-specific filtering.
    #[error("empty input for step `{step_id}`")]
    EmptyInput { step_id: String },

    /// Provider, model, or credential is unset.
    #[error("provider config error: {message}")]
    ProviderConfig { message: String },

    /// Failure surfaced by the prompt runner (network, auth, rate limit).
    #[error("provider call failed ({provider}): {message}")]
    ProviderCall { provider: String, message: String },

    /// Code step source did not compile or did not produce a function.
    #[error("module load error in step `{step_id}`: {message}")]
    ModuleLoad { step_id: String, message: String },

    /// Code step function raised an error or exceeded its limits.
    #[error("code runtime error in step `{step_id}`: {message}")]
    CodeRuntime { step_id: String, message: String },

    /// Malformed step graph.
    #[error("invalid pipeline: {message}")]
    InvalidPipeline { message: String },

    /// No document with the requested id.
    #[error("document not found: {doc_id}")]
    DocumentNotFound { doc_id: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: Arc<std::io::Error>,
    },

    /// Data validation error (malformed JSON, bad field values, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocflowError>;

impl DocflowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a provider config error from any displayable message.
    pub fn provider_config(msg: impl Into<String>) -> Self {
        Self::ProviderConfig {
            message: msg.into(),
        }
    }

    /// Create a provider call error.
    pub fn provider_call(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ProviderCall {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-pipeline error from any displayable message.
    pub fn invalid_pipeline(msg: impl Into<String>) -> Self {
        Self::InvalidPipeline {
            message: msg.into(),
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
            source: Arc::new(source),
        }
    }
}
