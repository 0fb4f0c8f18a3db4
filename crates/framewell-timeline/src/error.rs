//! Error types for timeline operations.

use thiserror::Error;

/// Errors that can occur while configuring or feeding a timeline.
#[derive(Debug, Error, PartialEq)]
pub enum TimelineError {
    /// Bad construction parameters (zero capacity, non-positive retention).
    /// Fatal at construction, never recovered.
    #[error("invalid timeline configuration: {0}")]
    InvalidConfiguration(String),

    /// Push collision on an existing timestamp with overwrite disallowed.
    /// Recoverable — the caller decides whether to retry with an adjusted
    /// timestamp or enable overwrite.
    #[error("timestamp {timestamp} already present")]
    DuplicateTimestamp {
        /// The colliding timestamp, in milliseconds.
        timestamp: f64,
    },

    /// Timestamps are ordering keys and must be finite.
    #[error("timestamp must be finite, got {timestamp}")]
    NonFiniteTimestamp {
        /// The rejected value.
        timestamp: f64,
    },
}
