//! Sink synchronisation for Vigil.
//!
//! Periodically discovers classified records that have not yet been
//! forwarded to the external notification sink (Slack), filters them
//! against the set of identifiers already delivered, and forwards the rest
//! exactly once per process lifetime. A manual trigger bypasses the schedule.
//!
//! # Components
//!
//! | Item | Role |
//! |------|------|
//! | [`EventSource`] | Pull query over classified records, newest first. |
//! | [`NotificationSink`] | Batched delivery plus a connectivity probe. |
//! | [`DedupStore`] | Identifiers confirmed delivered to the sink. |
//! | [`SyncTask`] | Background loop, manual trigger, and admin controls. |
//! | [`SlackSink`] | `NotificationSink` backed by the Slack Web API. |
//!
//! Delivery is all-or-nothing per batch: a failed delivery leaves every
//! identifier in the batch unmarked, so the next iteration retries the whole
//! batch. Bookkeeping is exactly-once; delivery to Slack is at-least-once.

mod config;
mod dedup;
mod error;
mod sink;
mod slack;
mod source;
mod task;

pub use config::SlackConfig;
pub use dedup::DedupStore;
pub use error::{SinkError, SourceError, SyncError};
pub use sink::NotificationSink;
pub use slack::{format_report, SlackSink};
pub use source::EventSource;
pub use task::{
    IterationOutcome, ManualOutcome, StartOutcome, SyncSettings, SyncStatus, SyncTask,
    MANUAL_PAGE_SIZE, POLL_PAGE_SIZE, SNAPSHOT_PAGE_SIZE,
};

#[cfg(test)]
mod tests;
