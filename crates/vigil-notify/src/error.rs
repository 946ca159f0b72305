//! Error types for sink synchronisation.

use thiserror::Error;

/// Errors reported by a [`crate::NotificationSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    /// Credentials or destination are missing; nothing was sent.
    #[error("sink is not configured: {0}")]
    NotConfigured(String),

    /// The HTTP request could not be completed.
    #[error("sink network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The sink answered but did not acknowledge success.
    #[error("sink rejected request: {0}")]
    Rejected(String),
}

/// Error reported by a [`crate::EventSource`].
#[derive(Debug, Error)]
#[error("event source query failed: {0}")]
pub struct SourceError(pub String);

/// Errors surfaced by [`crate::SyncTask`] operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Sink integration is administratively disabled.
    #[error("slack notifications are disabled")]
    Disabled,

    /// Sink integration is enabled but credentials are missing.
    #[error("slack bot token or channel id not configured")]
    NotConfigured,

    /// The connectivity probe failed, so the task was not started.
    #[error("failed to connect to slack: {0}")]
    ProbeFailed(#[source] SinkError),

    /// Querying the event source failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Delivering a batch failed; nothing was marked as sent.
    #[error("failed to deliver batch: {0}")]
    Delivery(#[source] SinkError),
}

impl SyncError {
    /// Whether the error is a configuration problem rather than an adapter
    /// failure. Configuration errors are never retried automatically.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Disabled | Self::NotConfigured)
    }
}
