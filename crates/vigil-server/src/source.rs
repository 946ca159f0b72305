//! Event source backed by the record store.

use async_trait::async_trait;
use vigil_db::{query_records, DbPool};
use vigil_notify::{EventSource, SourceError};
use vigil_types::{ClassifiedEvent, RecordQuery};

/// [`EventSource`] that reads `classified_records` through the pool.
#[derive(Clone)]
pub struct DbEventSource {
    pool: DbPool,
}

impl DbEventSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSource for DbEventSource {
    async fn query(&self, query: &RecordQuery) -> Result<Vec<ClassifiedEvent>, SourceError> {
        let pool = self.pool.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| SourceError(e.to_string()))?;
            query_records(&conn, &query).map_err(|e| SourceError(e.to_string()))
        })
        .await
        .map_err(|e| SourceError(format!("task join error: {}", e)))?
    }
}
