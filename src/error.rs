//! Error types for keyed storage and polling.
//!
//! Store errors never reach rendering code through [`KeyedStore::read`] or
//! [`KeyedStore::write`]; they are only visible through the `try_` variants
//! and in logs.
//!
//! [`KeyedStore::read`]: crate::store::KeyedStore::read
//! [`KeyedStore::write`]: crate::store::KeyedStore::write

use thiserror::Error;

/// Errors that can occur while reading or writing a keyed value.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No backend is attached, or the backend reports itself disabled.
    #[error("storage backend unavailable")]
    BackendUnavailable,

    /// The value could not be encoded as JSON.
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    /// The stored text is not JSON, or does not have the expected shape.
    #[error("deserialization failure for {key}: {reason}")]
    DeserializationFailure { key: String, reason: String },

    /// The stored value decoded but the caller's schema rejected it.
    #[error("schema rejected value for {0}")]
    SchemaRejection(String),

    /// Invalid key format.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The backend refused the write because it would exceed its quota.
    #[error("quota exceeded: {used} of {limit} bytes")]
    QuotaExceeded { used: usize, limit: usize },

    /// The backend failed while serving the request.
    #[error("backend error: {0}")]
    Backend(String),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] r2d2_sqlite::rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Returns true if the failure came from the backend rather than from
    /// the data or the key.
    pub fn is_backend_fault(&self) -> bool {
        matches!(
            self,
            StoreError::BackendUnavailable
                | StoreError::QuotaExceeded { .. }
                | StoreError::Backend(_)
                | StoreError::Database(_)
                | StoreError::Pool(_)
        )
    }
}

/// Errors returned by [`Poller::start`](crate::poller::Poller::start).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollerError {
    /// The poller has already been started; pollers are single-use.
    #[error("poller already started")]
    AlreadyStarted,

    /// `start` was called outside of a tokio runtime.
    #[error("no tokio runtime available to drive the poller")]
    NoRuntime,
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value outside its permitted range.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The configuration text could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
