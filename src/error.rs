// src/error.rs

//! Unified error handling for the notifier application.

use std::fmt;

use thiserror::Error;

/// Result type alias for notifier operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
///
/// The source/store/delivery variants carry the retry semantics the poll
/// loop acts on: transient errors back off and retry, everything else halts
/// the watcher and surfaces to the operator.
#[derive(Error, Debug)]
pub enum AppError {
    /// Listing source could not be reached (network, timeout, 5xx)
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Listing source rejected the request (bad query, auth, 4xx)
    #[error("source rejected request: {0}")]
    SourceRejected(String),

    /// Listing source response did not have the expected shape
    #[error("source format error: {0}")]
    SourceFormat(String),

    /// Seen-item store could not be read or written
    #[error("seen store unavailable: {0}")]
    StoreUnavailable(String),

    /// Notification delivery failed but may succeed on retry
    #[error("delivery failed via {channel}: {message}")]
    DeliveryFailed { channel: &'static str, message: String },

    /// Notification delivery permanently rejected by the channel
    #[error("delivery rejected via {channel}: {message}")]
    DeliveryRejected { channel: &'static str, message: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Watcher task failed to run to completion
    #[error("watcher task failed: {0}")]
    Task(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl AppError {
    /// Create a source-unavailable error.
    pub fn source_unavailable(message: impl fmt::Display) -> Self {
        Self::SourceUnavailable(message.to_string())
    }

    /// Create a source-rejected error.
    pub fn source_rejected(message: impl fmt::Display) -> Self {
        Self::SourceRejected(message.to_string())
    }

    /// Create a source-format error.
    pub fn source_format(message: impl fmt::Display) -> Self {
        Self::SourceFormat(message.to_string())
    }

    /// Create a store-unavailable error.
    pub fn store_unavailable(message: impl fmt::Display) -> Self {
        Self::StoreUnavailable(message.to_string())
    }

    /// Create a transient delivery error for the given channel.
    pub fn delivery_failed(channel: &'static str, message: impl fmt::Display) -> Self {
        Self::DeliveryFailed {
            channel,
            message: message.to_string(),
        }
    }

    /// Create a permanent delivery error for the given channel.
    pub fn delivery_rejected(channel: &'static str, message: impl fmt::Display) -> Self {
        Self::DeliveryRejected {
            channel,
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the poll loop should back off and retry after this error.
    ///
    /// Permanent classes (rejected queries, malformed responses, bad
    /// configuration) halt the loop instead.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable(_) | Self::StoreUnavailable(_) | Self::DeliveryFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classes_retry() {
        assert!(AppError::source_unavailable("timeout").is_transient());
        assert!(AppError::store_unavailable("disk full").is_transient());
        assert!(AppError::delivery_failed("email", "greylisted").is_transient());
    }

    #[test]
    fn permanent_classes_halt() {
        assert!(!AppError::source_rejected("401").is_transient());
        assert!(!AppError::source_format("no listings").is_transient());
        assert!(!AppError::delivery_rejected("email", "bad recipient").is_transient());
        assert!(!AppError::config("missing password").is_transient());
    }
}
