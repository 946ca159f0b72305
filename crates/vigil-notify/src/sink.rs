//! External notification sink contract.

use async_trait::async_trait;
use vigil_types::ClassifiedEvent;

use crate::error::SinkError;

/// A destination that accepts batches of classified records.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Whether credentials and destination are present. Checked before any
    /// network call is attempted.
    fn is_configured(&self) -> bool;

    /// Connectivity check with no side effects.
    async fn probe(&self) -> Result<(), SinkError>;

    /// Delivers one batch. `Ok` only if the sink acknowledged success; the
    /// caller treats any error as "nothing in this batch was delivered".
    async fn deliver(
        &self,
        anomalies: &[ClassifiedEvent],
        unidentified: &[ClassifiedEvent],
    ) -> Result<(), SinkError>;
}
