//! Notification sync task: scheduled and manual forwarding of unsent records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vigil_types::{ClassificationKind, ClassifiedEvent, RecordQuery};

use crate::config::SlackConfig;
use crate::dedup::DedupStore;
use crate::error::SyncError;
use crate::sink::NotificationSink;
use crate::source::EventSource;

/// Records fetched per kind by each scheduled iteration.
pub const POLL_PAGE_SIZE: usize = 50;

/// Records fetched per kind by the manual trigger.
pub const MANUAL_PAGE_SIZE: usize = 50;

/// Records fetched per kind for snapshot (test / full sync) deliveries.
pub const SNAPSHOT_PAGE_SIZE: usize = 20;

/// Tunables for [`SyncTask`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Administrative switch; when false nothing reaches the sink.
    pub enabled: bool,
    /// Delay between scheduled iterations.
    pub interval: Duration,
    /// Page size of scheduled queries.
    pub page_size: usize,
    /// Page size of manual-trigger queries.
    pub manual_page_size: usize,
    /// Page size of snapshot deliveries.
    pub snapshot_page_size: usize,
    /// Initial state of the auto-send gate.
    pub auto_send: bool,
}

impl SyncSettings {
    pub fn from_config(config: &SlackConfig) -> Self {
        Self {
            enabled: config.enabled,
            interval: Duration::from_secs(config.interval_seconds.max(1)),
            page_size: POLL_PAGE_SIZE,
            manual_page_size: MANUAL_PAGE_SIZE,
            snapshot_page_size: SNAPSHOT_PAGE_SIZE,
            auto_send: config.auto_send,
        }
    }
}

/// Result of [`SyncTask::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Result of [`SyncTask::send_manual_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualOutcome {
    /// A batch was delivered and marked sent.
    Sent { anomalies: usize, unidentified: usize },
    /// Every recent record had already been sent.
    NothingToSend,
}

impl ManualOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Sent {
                anomalies,
                unidentified,
            } => format!(
                "Sent {} anomalies and {} unidentified to Slack",
                anomalies, unidentified
            ),
            Self::NothingToSend => "No new data to send".to_string(),
        }
    }
}

/// Result of one scheduled iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No unsent records in the window.
    Idle,
    /// Unsent records found, but auto-send is off.
    Observed { anomalies: usize, unidentified: usize },
    /// Unsent records delivered and marked.
    Sent { anomalies: usize, unidentified: usize },
}

/// Snapshot of task state for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub auto_send_enabled: bool,
    pub sent_records_count: usize,
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub interval_seconds: u64,
}

/// Time bounds of the scheduled query.
#[derive(Debug, Default)]
struct SyncWindow {
    /// Start of the last completed iteration; `None` until first started.
    last_checkpoint: Option<DateTime<Utc>>,
    /// Oldest timestamp that still needs a retry after a failed iteration.
    retry_from: Option<DateTime<Utc>>,
}

impl SyncWindow {
    fn query_floor(&self) -> Option<DateTime<Utc>> {
        match (self.last_checkpoint, self.retry_from) {
            (Some(checkpoint), Some(retry)) => Some(checkpoint.min(retry)),
            (checkpoint, None) => checkpoint,
            (None, Some(_)) => None,
        }
    }

    fn hold_retry_from(&mut self, ts: DateTime<Utc>) {
        self.retry_from = Some(self.retry_from.map_or(ts, |current| current.min(ts)));
    }
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Forwards classified records to the sink exactly once per process.
///
/// Constructed once at startup and shared behind an `Arc`. Lifecycle is
/// `Stopped -> Running` on [`start`](Self::start) and back on
/// [`stop`](Self::stop); the manual trigger and admin controls work in
/// either state.
pub struct SyncTask {
    source: Arc<dyn EventSource>,
    sink: Arc<dyn NotificationSink>,
    settings: SyncSettings,
    dedup: DedupStore,
    auto_send: AtomicBool,
    running: AtomicBool,
    window: Mutex<SyncWindow>,
    worker: tokio::sync::Mutex<Option<Worker>>,
    /// Serialises "compute delta, deliver, mark" between the loop and the
    /// manual trigger.
    delivery: tokio::sync::Mutex<()>,
}

impl SyncTask {
    pub fn new(
        source: Arc<dyn EventSource>,
        sink: Arc<dyn NotificationSink>,
        settings: SyncSettings,
    ) -> Self {
        let auto_send = AtomicBool::new(settings.auto_send);
        Self {
            source,
            sink,
            settings,
            dedup: DedupStore::new(),
            auto_send,
            running: AtomicBool::new(false),
            window: Mutex::new(SyncWindow::default()),
            worker: tokio::sync::Mutex::new(None),
            delivery: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn auto_send_enabled(&self) -> bool {
        self.auto_send.load(Ordering::SeqCst)
    }

    pub fn sent_records_count(&self) -> usize {
        self.dedup.len()
    }

    /// Whether `id` has been confirmed delivered.
    pub fn is_sent(&self, id: i64) -> bool {
        self.dedup.contains(id)
    }

    pub fn last_checkpoint(&self) -> Option<DateTime<Utc>> {
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_checkpoint
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            running: self.is_running(),
            auto_send_enabled: self.auto_send_enabled(),
            sent_records_count: self.sent_records_count(),
            last_checkpoint: self.last_checkpoint(),
            interval_seconds: self.settings.interval.as_secs(),
        }
    }

    /// Rejects calls when the integration is disabled or unconfigured.
    ///
    /// # Errors
    ///
    /// `SyncError::Disabled` or `SyncError::NotConfigured`.
    pub fn ensure_ready(&self) -> Result<(), SyncError> {
        if !self.settings.enabled {
            return Err(SyncError::Disabled);
        }
        if !self.sink.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        Ok(())
    }

    /// Starts the scheduled loop after a successful connectivity probe.
    ///
    /// # Errors
    ///
    /// Configuration errors are returned before any adapter call;
    /// `SyncError::ProbeFailed` if the sink is unreachable.
    pub async fn start(self: &Arc<Self>) -> Result<StartOutcome, SyncError> {
        if let Err(e) = self.ensure_ready() {
            tracing::info!(reason = %e, "slack notification task not started");
            return Err(e);
        }

        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            tracing::warn!("slack notification task already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        tracing::info!(
            interval_seconds = self.settings.interval.as_secs(),
            "starting slack notification task"
        );

        if let Err(e) = self.sink.probe().await {
            tracing::error!(
                error = %e,
                "failed to connect to slack, notification task will not start"
            );
            return Err(SyncError::ProbeFailed(e));
        }

        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_checkpoint = Some(Utc::now());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(self).run(shutdown_rx));
        *worker = Some(Worker { shutdown, handle });
        self.running.store(true, Ordering::SeqCst);

        Ok(StartOutcome::Started)
    }

    /// Stops the scheduled loop and waits for the in-flight iteration to
    /// finish. Returns `false` if the task was not running.
    ///
    /// The join runs in its own task while holding the worker lock, so it
    /// completes even if the caller is dropped, and a concurrent
    /// [`start`](Self::start) waits until the old loop has exited.
    pub async fn stop(self: &Arc<Self>) -> bool {
        let task = Arc::clone(self);
        match tokio::spawn(async move { task.join_worker().await }).await {
            Ok(stopped) => stopped,
            Err(e) => {
                tracing::error!(error = %e, "failed to stop slack notification task");
                false
            }
        }
    }

    async fn join_worker(&self) -> bool {
        let mut worker = self.worker.lock().await;
        let Some(active) = worker.take() else {
            return false;
        };

        tracing::info!("stopping slack notification task");
        // A send error means the loop already exited.
        let _ = active.shutdown.send(true);
        if let Err(e) = active.handle.await {
            tracing::error!(error = %e, "slack notification loop ended abnormally");
        }
        self.running.store(false, Ordering::SeqCst);
        true
    }

    pub fn enable_auto_send(&self, enabled: bool) {
        self.auto_send.store(enabled, Ordering::SeqCst);
        tracing::info!(
            enabled,
            "auto-send {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Forgets every sent identifier. Previously delivered records become
    /// eligible again on the next delta computation.
    pub fn clear_sent_records(&self) -> usize {
        let dropped = self.dedup.clear();
        tracing::info!(dropped, "cleared sent records tracking");
        dropped
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            // Each iteration runs in its own task so a panic surfaces here as
            // a JoinError instead of killing the loop.
            let task = Arc::clone(&self);
            match tokio::spawn(async move { task.run_iteration().await }).await {
                Ok(Ok(outcome)) => {
                    tracing::debug!(?outcome, "slack sync iteration complete");
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "error checking for new records");
                }
                Err(e) => {
                    tracing::error!(error = %e, "slack sync iteration panicked");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }
        tracing::info!("slack notification task stopped");
    }

    /// Runs one scheduled iteration: query since the checkpoint, compute the
    /// delta, forward it when auto-send is on, then advance the checkpoint.
    ///
    /// The checkpoint always advances. Any batch that was not delivered pins
    /// the query floor at its oldest timestamp, so later iterations see those
    /// records again. Anything that pages out of the bounded query meanwhile
    /// is left to the manual trigger.
    pub async fn run_iteration(&self) -> Result<IterationOutcome, SyncError> {
        let now = Utc::now();
        let since = self
            .window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .query_floor();

        let result = self.check_window(since).await;

        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.last_checkpoint = Some(now);
        match &result {
            Ok(IterationOutcome::Idle) | Ok(IterationOutcome::Sent { .. }) => {
                window.retry_from = None;
            }
            Ok(IterationOutcome::Observed { .. }) | Err(SyncError::Delivery(_)) => {}
            Err(_) => {
                if let Some(since) = since {
                    window.hold_retry_from(since);
                }
            }
        }

        result
    }

    async fn check_window(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<IterationOutcome, SyncError> {
        let (anomalies, unidentified) = self.fetch(self.settings.page_size, since).await?;

        let _delivery = self.delivery.lock().await;
        let anomalies = self.dedup.unsent(anomalies);
        let unidentified = self.dedup.unsent(unidentified);

        if anomalies.is_empty() && unidentified.is_empty() {
            tracing::debug!("no unsent anomaly or unidentified records since last check");
            return Ok(IterationOutcome::Idle);
        }

        tracing::info!(
            anomalies = anomalies.len(),
            unidentified = unidentified.len(),
            "found records not yet sent to slack"
        );

        if !self.auto_send_enabled() {
            tracing::info!("auto-send disabled; new records detected but not sent");
            self.hold_oldest(&anomalies, &unidentified);
            return Ok(IterationOutcome::Observed {
                anomalies: anomalies.len(),
                unidentified: unidentified.len(),
            });
        }

        if let Err(e) = self.forward(&anomalies, &unidentified).await {
            self.hold_oldest(&anomalies, &unidentified);
            return Err(e);
        }

        Ok(IterationOutcome::Sent {
            anomalies: anomalies.len(),
            unidentified: unidentified.len(),
        })
    }

    /// Keeps unsent records in the next query window after the checkpoint
    /// has moved past them.
    fn hold_oldest(&self, anomalies: &[ClassifiedEvent], unidentified: &[ClassifiedEvent]) {
        let oldest = anomalies
            .iter()
            .chain(unidentified)
            .map(|record| record.timestamp)
            .min();
        if let Some(oldest) = oldest {
            self.window
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .hold_retry_from(oldest);
        }
    }

    /// Forwards every recent record not yet sent. Ignores the auto-send gate
    /// and works whether or not the loop is running.
    ///
    /// # Errors
    ///
    /// Any failure is returned to the caller; nothing is retried here.
    pub async fn send_manual_update(&self) -> Result<ManualOutcome, SyncError> {
        self.ensure_ready()?;

        let (anomalies, unidentified) = self.fetch(self.settings.manual_page_size, None).await?;

        let _delivery = self.delivery.lock().await;
        let anomalies = self.dedup.unsent(anomalies);
        let unidentified = self.dedup.unsent(unidentified);

        if anomalies.is_empty() && unidentified.is_empty() {
            return Ok(ManualOutcome::NothingToSend);
        }

        self.forward(&anomalies, &unidentified).await?;
        Ok(ManualOutcome::Sent {
            anomalies: anomalies.len(),
            unidentified: unidentified.len(),
        })
    }

    /// Delivers the newest `limit` records of each kind without consulting
    /// or updating sent-record tracking. Returns the per-kind counts.
    ///
    /// # Errors
    ///
    /// Configuration, query, or delivery failure.
    pub async fn send_snapshot(&self, limit: usize) -> Result<(usize, usize), SyncError> {
        self.ensure_ready()?;
        let (anomalies, unidentified) = self.fetch(limit, None).await?;
        self.deliver_untracked(&anomalies, &unidentified).await?;
        Ok((anomalies.len(), unidentified.len()))
    }

    /// Delivers an arbitrary batch without touching sent-record tracking.
    ///
    /// # Errors
    ///
    /// Configuration or delivery failure.
    pub async fn deliver_untracked(
        &self,
        anomalies: &[ClassifiedEvent],
        unidentified: &[ClassifiedEvent],
    ) -> Result<(), SyncError> {
        self.ensure_ready()?;
        self.sink
            .deliver(anomalies, unidentified)
            .await
            .map_err(SyncError::Delivery)
    }

    /// Runs the connectivity probe on demand.
    ///
    /// # Errors
    ///
    /// Configuration errors, or `SyncError::ProbeFailed`.
    pub async fn test_connection(&self) -> Result<(), SyncError> {
        self.ensure_ready()?;
        self.sink.probe().await.map_err(SyncError::ProbeFailed)
    }

    async fn fetch(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<(Vec<ClassifiedEvent>, Vec<ClassifiedEvent>), SyncError> {
        let query = |kind| RecordQuery {
            since,
            ..RecordQuery::newest(kind, limit)
        };
        let anomalies = self
            .source
            .query(&query(ClassificationKind::Anomaly))
            .await?;
        let unidentified = self
            .source
            .query(&query(ClassificationKind::Unidentified))
            .await?;
        Ok((anomalies, unidentified))
    }

    /// Delivers a batch and, only on acknowledged success, marks every
    /// identifier in it as sent.
    async fn forward(
        &self,
        anomalies: &[ClassifiedEvent],
        unidentified: &[ClassifiedEvent],
    ) -> Result<(), SyncError> {
        match self.sink.deliver(anomalies, unidentified).await {
            Ok(()) => {
                let marked = self.dedup.mark_sent(anomalies.iter().chain(unidentified));
                tracing::info!(
                    anomalies = anomalies.len(),
                    unidentified = unidentified.len(),
                    marked,
                    "sent new records to slack"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to send new records to slack");
                Err(SyncError::Delivery(e))
            }
        }
    }
}
