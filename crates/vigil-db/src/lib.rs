//! Database layer for Vigil.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and the record store read by the event source.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: concurrent readers (the control surface and
//!   the sync task) alongside the single ingest writer.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so the schema cannot drift from the code that reads it.

mod error;
mod migrations;
mod pool;
mod records;

pub use error::RecordError;
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, PoolSettings, PoolError};
pub use records::{insert_record, query_records};
