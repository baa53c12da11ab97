//! Error types for tweetloom-core

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;
use crate::retry::Retryable;

/// Main error type for the tweetloom-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Model output could not be recovered into a single JSON value
    #[error(
        "malformed JSON at line {line}, column {column} (offset {offset}): {message}\n  near: {context:?}"
    )]
    MalformedJson {
        line: usize,
        column: usize,
        offset: usize,
        message: String,
        /// Excerpt of the input surrounding the failure point
        context: String,
    },

    /// Structurally valid JSON missing a required key path
    #[error("schema violation: missing required key `{path}`")]
    SchemaViolation { path: String },

    /// Top-level value is not an object
    #[error("unsupported document shape: expected a JSON object, found {found}")]
    UnsupportedShape { found: &'static str },

    /// Advisory lock not acquired within its bound
    #[error("timed out after {waited:?} waiting for lock on {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// Outbound LLM call failed
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Calendar generation or lookup failed
    #[error("calendar error: {0}")]
    Calendar(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a caller may reasonably retry the higher-level operation.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::LockTimeout { .. } => true,
            Error::Llm(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Result type alias for tweetloom-core
pub type Result<T> = std::result::Result<T, Error>;
