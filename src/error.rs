//! Error types shared by the orchestration and reconciliation engines

use std::time::Duration;

/// Result type for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Error types for harvester operations
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    /// Permanent failure, never retried
    #[error("Non-retryable error: {0}")]
    NonRetryable(String),

    /// Transient failure, always retried
    #[error("Retryable error: {0}")]
    Retryable(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Raised without invoking the operation
    #[error("Circuit breaker is OPEN (consecutive failures: {consecutive_failures})")]
    CircuitOpen { consecutive_failures: u32 },

    #[error("All {attempts} attempts failed: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<HarvestError>,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl HarvestError {
    /// Decide whether a failed attempt deserves another try.
    ///
    /// Explicit markers win, then network/timeout, then HTTP status class.
    /// Anything unclassified is treated as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            HarvestError::NonRetryable(_) => false,
            HarvestError::Retryable(_) => true,
            HarvestError::Network(_) | HarvestError::Timeout(_) => true,
            HarvestError::Http { status, .. } => status_is_retryable(*status),
            HarvestError::CircuitOpen { .. } | HarvestError::RetriesExhausted { .. } => false,
            HarvestError::Json(_) | HarvestError::Config(_) | HarvestError::CheckpointNotFound(_) => false,
            HarvestError::Io(_) | HarvestError::Storage(_) => true,
            HarvestError::Other(message) => message_is_retryable(message),
        }
    }

    /// Stable label used when aggregating errors by classification
    pub fn error_type(&self) -> &'static str {
        match self {
            HarvestError::NonRetryable(_) => "non_retryable",
            HarvestError::Retryable(_) => "retryable",
            HarvestError::Http { status, .. } if *status == 429 => "http_rate_limited",
            HarvestError::Http { status, .. } if *status >= 500 => "http_server_error",
            HarvestError::Http { .. } => "http_client_error",
            HarvestError::Network(_) => "network",
            HarvestError::Timeout(_) => "timeout",
            HarvestError::CircuitOpen { .. } => "circuit_open",
            HarvestError::RetriesExhausted { .. } => "retries_exhausted",
            HarvestError::Storage(_) => "storage",
            HarvestError::CheckpointNotFound(_) => "checkpoint_not_found",
            HarvestError::Config(_) => "config",
            HarvestError::Io(_) => "io",
            HarvestError::Json(_) => "malformed_json",
            HarvestError::Other(_) => "other",
        }
    }
}

/// 429 and 5xx are transient, other 4xx are permanent, anything else gets another chance
pub fn status_is_retryable(status: u16) -> bool {
    match status {
        429 => true,
        400..=499 => false,
        500..=599 => true,
        _ => true,
    }
}

/// Fallback classification for errors that only carry a message
fn message_is_retryable(message: &str) -> bool {
    let message = message.to_lowercase();

    if message.contains("429") || message.contains("rate limit") {
        return true;
    }

    let server_errors = ["500", "502", "503", "504"];
    if server_errors.iter().any(|code| message.contains(code)) {
        return true;
    }

    let client_errors = ["400", "401", "403", "404", "not found", "unauthorized", "forbidden"];
    if client_errors.iter().any(|code| message.contains(code)) {
        return false;
    }

    true
}

impl From<reqwest::Error> for HarvestError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            // reqwest does not expose the configured deadline on the error
            return HarvestError::Timeout(Duration::ZERO);
        }
        if let Some(status) = error.status() {
            return HarvestError::Http {
                status: status.as_u16(),
                message: error.to_string(),
            };
        }
        if error.is_connect() || error.is_request() {
            return HarvestError::Network(error.to_string());
        }
        if error.is_decode() {
            return HarvestError::NonRetryable(format!("Malformed response body: {}", error));
        }
        HarvestError::Other(error.to_string())
    }
}
