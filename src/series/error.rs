//! Error types for the synchronization layer

use super::point::SeriesKey;
use thiserror::Error;

/// Errors that can occur within the synchronization layer.
///
/// The steady-state "nothing changed" outcome of a long-poll is not an
/// error; it is reported as [`ChangeSet::Unchanged`](super::snapshot::ChangeSet).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// A point addressed to one key was sent to the store of another key.
    #[error("key mismatch: store {expected} received a point for {actual}")]
    KeyMismatch {
        /// Key of the store that rejected the point
        expected: SeriesKey,
        /// Key carried by the rejected point
        actual: SeriesKey,
    },

    /// The requested point is neither cached nor available from the feed.
    #[error("point not found: {key} at open time {open_time}")]
    NotFound {
        /// Key that was queried
        key: SeriesKey,
        /// Open time that was requested
        open_time: i64,
    },

    /// The store actor for the key stopped after a fatal fault.
    #[error("source store for {key} is unavailable")]
    StoreUnavailable {
        /// Key whose store can no longer be reached
        key: SeriesKey,
    },

    /// The durable repository failed, after its own retries were exhausted.
    #[error("repository error: {message}")]
    Repository {
        /// Underlying error message
        message: String,
    },

    /// The exchange feed failed to return a page.
    #[error("exchange feed error: {message}")]
    Feed {
        /// Underlying error message
        message: String,
    },

    /// An interval code could not be parsed.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// Error while serializing or deserializing snapshot data
    #[error("serialization error: {message}")]
    Serialization {
        /// Underlying error message
        message: String,
    },

    /// The store was reached after the shutdown signal fired.
    #[error("shutdown in progress")]
    Shutdown,
}

impl SyncError {
    /// Builds a [`SyncError::Repository`] from any displayable error.
    #[cold]
    pub fn repository(err: impl std::fmt::Display) -> Self {
        SyncError::Repository {
            message: err.to_string(),
        }
    }

    /// Builds a [`SyncError::Feed`] from any displayable error.
    #[cold]
    pub fn feed(err: impl std::fmt::Display) -> Self {
        SyncError::Feed {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    #[cold]
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization {
            message: err.to_string(),
        }
    }
}
