use super::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vigil_types::{ClassificationKind, ClassifiedEvent, RecordQuery};

#[derive(Default)]
struct FakeSource {
    records: Mutex<Vec<ClassifiedEvent>>,
    calls: AtomicUsize,
    fail: AtomicBool,
    panic: AtomicBool,
}

impl FakeSource {
    fn push(&self, id: i64, kind: ClassificationKind, timestamp: DateTime<Utc>) {
        self.records.lock().unwrap().push(ClassifiedEvent {
            id,
            timestamp,
            param_value: format!("blk_{id} replica mismatch"),
            classification_type: kind,
        });
    }

    fn push_now(&self, id: i64, kind: ClassificationKind) {
        self.push(id, kind, Utc::now());
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSource for FakeSource {
    async fn query(&self, query: &RecordQuery) -> Result<Vec<ClassifiedEvent>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic.load(Ordering::SeqCst) {
            panic!("record store exploded");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError("database is locked".to_string()));
        }

        let mut rows: Vec<ClassifiedEvent> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| query.kind.map_or(true, |k| r.classification_type == k))
            .filter(|r| query.since.map_or(true, |s| r.timestamp >= s))
            .filter(|r| query.until.map_or(true, |u| r.timestamp <= u))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }
}

struct FakeSink {
    configured: AtomicBool,
    probe_ok: AtomicBool,
    deliver_ok: AtomicBool,
    probes: AtomicUsize,
    attempts: AtomicUsize,
    /// Simulated round trip of each delivery, in milliseconds.
    latency_ms: AtomicU64,
    deliveries: Mutex<Vec<Vec<i64>>>,
}

impl Default for FakeSink {
    fn default() -> Self {
        Self {
            configured: AtomicBool::new(true),
            probe_ok: AtomicBool::new(true),
            deliver_ok: AtomicBool::new(true),
            probes: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            latency_ms: AtomicU64::new(0),
            deliveries: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSink {
    fn delivered_batches(&self) -> Vec<Vec<i64>> {
        self.deliveries.lock().unwrap().clone()
    }

    fn delivered_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.delivered_batches().into_iter().flatten().collect();
        ids.sort_unstable();
        ids
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for FakeSink {
    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn probe(&self) -> Result<(), SinkError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SinkError::Rejected("invalid_auth".to_string()))
        }
    }

    async fn deliver(
        &self,
        anomalies: &[ClassifiedEvent],
        unidentified: &[ClassifiedEvent],
    ) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.deliver_ok.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("channel_not_found".to_string()));
        }
        let ids = anomalies.iter().chain(unidentified).map(|r| r.id).collect();
        self.deliveries.lock().unwrap().push(ids);
        Ok(())
    }
}

fn settings(auto_send: bool) -> SyncSettings {
    SyncSettings {
        enabled: true,
        interval: Duration::from_secs(60),
        page_size: POLL_PAGE_SIZE,
        manual_page_size: MANUAL_PAGE_SIZE,
        snapshot_page_size: SNAPSHOT_PAGE_SIZE,
        auto_send,
    }
}

fn harness(settings: SyncSettings) -> (Arc<FakeSource>, Arc<FakeSink>, Arc<SyncTask>) {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    let task = Arc::new(SyncTask::new(source.clone(), sink.clone(), settings));
    (source, sink, task)
}

// ── Iteration ───────────────────────────────────────────────────────

#[tokio::test]
async fn auto_send_off_observes_without_delivering() {
    let (source, sink, task) = harness(settings(false));
    source.push_now(10, ClassificationKind::Anomaly);
    source.push_now(11, ClassificationKind::Unidentified);

    let outcome = task.run_iteration().await.unwrap();

    assert_eq!(
        outcome,
        IterationOutcome::Observed {
            anomalies: 1,
            unidentified: 1
        }
    );
    assert_eq!(task.sent_records_count(), 0);
    assert_eq!(sink.attempts(), 0);
    assert!(task.last_checkpoint().is_some());
}

#[tokio::test]
async fn auto_send_on_delivers_and_marks() {
    let (source, sink, task) = harness(settings(true));
    source.push_now(10, ClassificationKind::Anomaly);
    source.push_now(11, ClassificationKind::Unidentified);

    let outcome = task.run_iteration().await.unwrap();

    assert_eq!(
        outcome,
        IterationOutcome::Sent {
            anomalies: 1,
            unidentified: 1
        }
    );
    assert!(task.is_sent(10));
    assert!(task.is_sent(11));
    assert_eq!(task.sent_records_count(), 2);
    assert_eq!(sink.delivered_batches(), vec![vec![10, 11]]);
}

#[tokio::test]
async fn manual_trigger_with_everything_sent_reports_no_data() {
    let (source, sink, task) = harness(settings(true));
    source.push_now(10, ClassificationKind::Anomaly);
    source.push_now(11, ClassificationKind::Unidentified);
    task.run_iteration().await.unwrap();
    assert_eq!(sink.attempts(), 1);

    let outcome = task.send_manual_update().await.unwrap();

    assert_eq!(outcome, ManualOutcome::NothingToSend);
    assert_eq!(outcome.message(), "No new data to send");
    assert_eq!(sink.attempts(), 1);
}

#[tokio::test]
async fn clearing_sent_records_allows_redelivery() {
    let (source, sink, task) = harness(settings(true));
    source.push_now(10, ClassificationKind::Anomaly);
    source.push_now(11, ClassificationKind::Unidentified);
    task.run_iteration().await.unwrap();

    assert_eq!(task.clear_sent_records(), 2);
    assert_eq!(task.sent_records_count(), 0);

    let outcome = task.send_manual_update().await.unwrap();
    assert_eq!(
        outcome,
        ManualOutcome::Sent {
            anomalies: 1,
            unidentified: 1
        }
    );
    assert_eq!(sink.delivered_batches(), vec![vec![10, 11], vec![10, 11]]);
}

#[tokio::test]
async fn dedup_never_grows_while_auto_send_is_off() {
    let (source, sink, task) = harness(settings(false));

    for id in 0..5 {
        source.push_now(id, ClassificationKind::Anomaly);
        task.run_iteration().await.unwrap();
        assert_eq!(task.sent_records_count(), 0);
    }
    assert_eq!(sink.attempts(), 0);

    task.enable_auto_send(true);
    let outcome = task.run_iteration().await.unwrap();
    assert_eq!(
        outcome,
        IterationOutcome::Sent {
            anomalies: 5,
            unidentified: 0
        }
    );
    assert_eq!(sink.delivered_ids(), vec![0, 1, 2, 3, 4]);
    assert_eq!(task.run_iteration().await.unwrap(), IterationOutcome::Idle);
}

#[tokio::test]
async fn failed_delivery_marks_nothing_and_is_retried() {
    let (source, sink, task) = harness(settings(true));
    assert_eq!(task.run_iteration().await.unwrap(), IterationOutcome::Idle);

    source.push_now(20, ClassificationKind::Anomaly);
    sink.deliver_ok.store(false, Ordering::SeqCst);

    let err = task.run_iteration().await.unwrap_err();
    assert!(matches!(err, SyncError::Delivery(_)));
    assert!(!err.is_configuration());
    assert_eq!(task.sent_records_count(), 0);

    // The checkpoint has moved past record 20; the retry floor keeps it in
    // the next query window.
    sink.deliver_ok.store(true, Ordering::SeqCst);
    let outcome = task.run_iteration().await.unwrap();
    assert_eq!(
        outcome,
        IterationOutcome::Sent {
            anomalies: 1,
            unidentified: 0
        }
    );
    assert_eq!(sink.delivered_ids(), vec![20]);

    assert_eq!(task.run_iteration().await.unwrap(), IterationOutcome::Idle);
}

#[tokio::test]
async fn source_failure_holds_the_query_floor() {
    let (source, sink, task) = harness(settings(true));
    task.run_iteration().await.unwrap();

    source.push_now(30, ClassificationKind::Unidentified);
    source.fail.store(true, Ordering::SeqCst);
    let err = task.run_iteration().await.unwrap_err();
    assert!(matches!(err, SyncError::Source(_)));

    source.fail.store(false, Ordering::SeqCst);
    task.run_iteration().await.unwrap();
    assert_eq!(sink.delivered_ids(), vec![30]);
}

#[tokio::test]
async fn outage_below_page_size_loses_nothing() {
    let mut s = settings(true);
    s.page_size = 5;
    let (source, sink, task) = harness(s);
    task.run_iteration().await.unwrap();

    sink.deliver_ok.store(false, Ordering::SeqCst);
    for id in 1..=4 {
        source.push_now(id, ClassificationKind::Anomaly);
        assert!(task.run_iteration().await.is_err());
    }

    sink.deliver_ok.store(true, Ordering::SeqCst);
    task.run_iteration().await.unwrap();
    assert_eq!(sink.delivered_ids(), vec![1, 2, 3, 4]);
    assert_eq!(task.sent_records_count(), 4);
}

#[tokio::test]
async fn outage_beyond_page_size_leaves_oldest_for_manual_trigger() {
    let mut s = settings(true);
    s.page_size = 5;
    let (source, sink, task) = harness(s);
    task.run_iteration().await.unwrap();

    sink.deliver_ok.store(false, Ordering::SeqCst);
    for id in 1..=7 {
        source.push_now(id, ClassificationKind::Anomaly);
        assert!(task.run_iteration().await.is_err());
    }

    sink.deliver_ok.store(true, Ordering::SeqCst);
    task.run_iteration().await.unwrap();
    assert_eq!(sink.delivered_ids(), vec![3, 4, 5, 6, 7]);

    // Records 1 and 2 paged out of the bounded window.
    assert_eq!(task.run_iteration().await.unwrap(), IterationOutcome::Idle);
    assert!(!task.is_sent(1));

    task.send_manual_update().await.unwrap();
    assert_eq!(sink.delivered_ids(), vec![1, 2, 3, 4, 5, 6, 7]);
}

// ── Snapshot and probe ──────────────────────────────────────────────

#[tokio::test]
async fn snapshot_ignores_sent_tracking() {
    let (source, sink, task) = harness(settings(true));
    source.push_now(1, ClassificationKind::Anomaly);
    task.run_iteration().await.unwrap();

    let counts = task.send_snapshot(SNAPSHOT_PAGE_SIZE).await.unwrap();
    assert_eq!(counts, (1, 0));
    assert_eq!(sink.delivered_batches(), vec![vec![1], vec![1]]);
    assert_eq!(task.sent_records_count(), 1);

    task.clear_sent_records();
    task.send_snapshot(SNAPSHOT_PAGE_SIZE).await.unwrap();
    assert_eq!(task.sent_records_count(), 0);
}

#[tokio::test]
async fn test_connection_reports_probe_failure() {
    let (_source, sink, task) = harness(settings(false));
    task.test_connection().await.unwrap();

    sink.probe_ok.store(false, Ordering::SeqCst);
    let err = task.test_connection().await.unwrap_err();
    assert!(matches!(err, SyncError::ProbeFailed(_)));
}

#[tokio::test]
async fn manual_paths_reject_disabled_integration() {
    let mut s = settings(true);
    s.enabled = false;
    let (source, sink, task) = harness(s);
    source.push_now(1, ClassificationKind::Anomaly);

    let err = task.send_manual_update().await.unwrap_err();
    assert!(matches!(err, SyncError::Disabled));
    assert!(err.is_configuration());
    assert!(task.send_snapshot(20).await.is_err());
    assert_eq!(source.calls(), 0);
    assert_eq!(sink.attempts(), 0);
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn start_when_disabled_never_touches_the_sink() {
    let mut s = settings(true);
    s.enabled = false;
    let (_source, sink, task) = harness(s);

    let err = task.start().await.unwrap_err();
    assert!(matches!(err, SyncError::Disabled));
    assert_eq!(sink.probes.load(Ordering::SeqCst), 0);
    assert!(!task.is_running());
}

#[tokio::test]
async fn start_when_unconfigured_is_refused() {
    let (_source, sink, task) = harness(settings(true));
    sink.configured.store(false, Ordering::SeqCst);

    let err = task.start().await.unwrap_err();
    assert!(matches!(err, SyncError::NotConfigured));
    assert_eq!(sink.probes.load(Ordering::SeqCst), 0);
    assert!(!task.is_running());
}

#[tokio::test]
async fn probe_failure_leaves_task_stopped() {
    let (source, sink, task) = harness(settings(true));
    sink.probe_ok.store(false, Ordering::SeqCst);

    let err = task.start().await.unwrap_err();
    assert!(matches!(err, SyncError::ProbeFailed(_)));
    assert!(!task.is_running());
    assert!(task.last_checkpoint().is_none());
    assert!(!task.stop().await);
    assert_eq!(source.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn start_twice_is_a_no_op() {
    let (_source, sink, task) = harness(settings(true));

    assert_eq!(task.start().await.unwrap(), StartOutcome::Started);
    assert_eq!(task.start().await.unwrap(), StartOutcome::AlreadyRunning);
    assert_eq!(sink.probes.load(Ordering::SeqCst), 1);
    assert!(task.is_running());

    assert!(task.stop().await);
    assert!(!task.is_running());
    assert!(!task.stop().await);
}

#[tokio::test(start_paused = true)]
async fn abandoned_stop_still_waits_for_the_loop_to_exit() {
    let (source, sink, task) = harness(settings(true));
    sink.latency_ms.store(10_000, Ordering::SeqCst);
    source.push_now(1, ClassificationKind::Anomaly);

    task.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.attempts(), 1);

    // The caller gives up while the first delivery is still in flight.
    let abandoned = tokio::time::timeout(Duration::from_millis(10), task.stop()).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!task.is_running());
    assert!(!task.status().running);
    assert_eq!(sink.delivered_batches(), vec![vec![1]]);
    assert_eq!(sink.attempts(), 1);

    assert_eq!(task.start().await.unwrap(), StartOutcome::Started);
    assert!(task.stop().await);
}

#[tokio::test(start_paused = true)]
async fn start_during_stop_waits_for_the_old_loop() {
    let (source, sink, task) = harness(settings(true));
    sink.latency_ms.store(5_000, Ordering::SeqCst);
    source.push_now(1, ClassificationKind::Anomaly);

    task.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopping = {
        let task = Arc::clone(&task);
        tokio::spawn(async move { task.stop().await })
    };
    // Let the stop request take the worker before starting again.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(sink.attempts(), 1);

    assert_eq!(task.start().await.unwrap(), StartOutcome::Started);
    // The old delivery completed before the new loop was spawned.
    assert!(task.is_sent(1));
    assert!(stopping.await.unwrap());
    assert!(task.stop().await);
}

#[tokio::test(start_paused = true)]
async fn running_loop_delivers_each_interval() {
    let (source, sink, task) = harness(settings(true));
    task.start().await.unwrap();
    source.push_now(1, ClassificationKind::Anomaly);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.delivered_batches(), vec![vec![1]]);

    source.push_now(2, ClassificationKind::Unidentified);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(sink.delivered_batches(), vec![vec![1], vec![2]]);

    let status = task.status();
    assert!(status.running);
    assert_eq!(status.sent_records_count, 2);
    assert_eq!(status.interval_seconds, 60);

    task.stop().await;
    source.push_now(3, ClassificationKind::Anomaly);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!task.is_sent(3));
}

#[tokio::test(start_paused = true)]
async fn panicking_iteration_does_not_stop_the_loop() {
    let (source, sink, task) = harness(settings(true));
    source.panic.store(true, Ordering::SeqCst);

    task.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(task.is_running());
    let calls_after_panic = source.calls();
    assert!(calls_after_panic >= 1);

    source.panic.store(false, Ordering::SeqCst);
    source.push_now(7, ClassificationKind::Anomaly);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(source.calls() > calls_after_panic);
    assert_eq!(sink.delivered_ids(), vec![7]);
    assert!(task.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_manual_triggers_never_double_deliver() {
    let (source, sink, task) = harness(settings(true));
    for id in 0..10 {
        let kind = if id % 2 == 0 {
            ClassificationKind::Anomaly
        } else {
            ClassificationKind::Unidentified
        };
        source.push_now(id, kind);
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let task = Arc::clone(&task);
            tokio::spawn(async move { task.send_manual_update().await })
        })
        .collect();

    let mut sent = 0;
    for handle in handles {
        if let ManualOutcome::Sent { .. } = handle.await.unwrap().unwrap() {
            sent += 1;
        }
    }

    assert_eq!(sent, 1);
    assert_eq!(sink.delivered_ids(), (0..10).collect::<Vec<_>>());
    assert_eq!(task.sent_records_count(), 10);
}
