//! Event source adapter contract.

use async_trait::async_trait;
use vigil_types::{ClassifiedEvent, RecordQuery};

use crate::error::SourceError;

/// Pull access to classified records.
///
/// Implementations must return records newest first, truncated at
/// `query.limit`, and must be safe to call concurrently.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Runs `query` against the record store.
    async fn query(&self, query: &RecordQuery) -> Result<Vec<ClassifiedEvent>, SourceError>;
}
