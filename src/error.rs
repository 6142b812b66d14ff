//! Error types for the exporter

use thiserror::Error;

/// Main error type for the exporter
#[derive(Error, Debug)]
pub enum Error {
    /// Upstream could not be reached or read (network, timeout, process I/O)
    #[error("Fetch from {upstream} failed: {reason}")]
    Fetch {
        /// Upstream URL, address or command
        upstream: String,
        /// Failure detail
        reason: String,
    },

    /// Upstream answered but the payload could not be decoded
    #[error("Malformed payload from {upstream}: {reason}")]
    MalformedPayload {
        /// Upstream URL, address or command
        upstream: String,
        /// Decode failure detail
        reason: String,
    },

    /// Failure before the exporter could start serving
    #[error("Startup error: {0}")]
    Startup(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Registry misuse (unknown metric, kind mismatch, invalid delta)
    #[error("Registry error: {0}")]
    Registry(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a fetch error for the given upstream
    pub fn fetch(upstream: impl Into<String>, reason: impl ToString) -> Self {
        Error::Fetch {
            upstream: upstream.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a malformed-payload error for the given upstream
    pub fn malformed(upstream: impl Into<String>, reason: impl ToString) -> Self {
        Error::MalformedPayload {
            upstream: upstream.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure only affects the current ingestion cycle
    ///
    /// Transient failures keep the previous snapshot visible and are retried
    /// on the next scrape.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Fetch { .. } | Error::MalformedPayload { .. })
    }
}

/// Per-field extraction failures
///
/// These never abort a cycle: only the affected metric update is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    /// Field absent from the record
    #[error("field {0} is missing")]
    Missing(String),

    /// Field present but not a number
    #[error("field {field} is {found}, expected a number")]
    TypeMismatch {
        /// Field path
        field: String,
        /// JSON type actually found
        found: &'static str,
    },

    /// Text value that does not parse as a float
    #[error("field {field} has unparseable value {value:?}")]
    Unparseable {
        /// Field name
        field: String,
        /// Raw value
        value: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
