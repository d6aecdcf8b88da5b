//! Bragi error types

/// Bragi error types.
///
/// Errors are `Clone` because a single generation outcome is handed to every
/// caller that joined the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BragiError {
    // Input errors
    #[error("text is empty")]
    EmptyText,

    #[error("text too long: {len} chars (max {max})")]
    TextTooLong { len: usize, max: usize },

    // Backpressure
    #[error("broker overloaded: queue limit reached")]
    Overloaded,

    // Upstream errors
    /// The service answered with a status that retrying will not fix.
    #[error("upstream rejected request ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// Every attempt failed with a transient error or no response at all.
    #[error("upstream unreachable after {attempts} attempts")]
    Unreachable { attempts: u32 },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("empty audio response from upstream")]
    EmptyResponse,

    // Local errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("broker is shutting down")]
    ShuttingDown,

    /// A generation task ended without producing a result (panic or abort).
    #[error("internal error: {0}")]
    Internal(String),
}

impl BragiError {
    /// Whether a retry has a chance of producing a different outcome.
    ///
    /// Mirrors the transport policy: rate limiting, server errors and
    /// transport-level failures are transient; other 4xx are not.
    pub fn is_transient(&self) -> bool {
        match self {
            BragiError::Upstream { status, .. } => is_retryable_status(*status),
            BragiError::Http(_) | BragiError::Unreachable { .. } => true,
            _ => false,
        }
    }

    /// Whether this outcome is the "busy" backpressure signal.
    pub fn is_overloaded(&self) -> bool {
        matches!(self, BragiError::Overloaded)
    }
}

/// Status codes worth another attempt: 429 and anything outside 4xx.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 429 || !(400..500).contains(&status)
}

impl From<std::io::Error> for BragiError {
    fn from(err: std::io::Error) -> Self {
        BragiError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BragiError {
    fn from(err: serde_json::Error) -> Self {
        BragiError::Json(err.to_string())
    }
}

impl From<reqwest::Error> for BragiError {
    fn from(err: reqwest::Error) -> Self {
        BragiError::Http(err.to_string())
    }
}

/// Result type alias for Bragi operations
pub type Result<T> = std::result::Result<T, BragiError>;
