//! Offline buffer delivery scenarios: at-least-once replay into the
//! engine, retry backoff, conflicts, and the operator queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use episignal::buffer::{
    BufferedRecord, DeliveryStatus, EngineSyncTarget, EnqueueOutcome, OfflineBuffer, RecordType,
    SyncState, SyncTarget,
};
use episignal::config::{BufferConfig, EngineConfig};
use episignal::engine::CorrelationEngine;
use episignal::persistence::memory::MemoryEventStore;
use episignal::persistence::EventStore;
use episignal::signal::{Signal, SignalSource};
use episignal::utils::geo::Location;

fn test_buffer(dir: &tempfile::TempDir) -> OfflineBuffer {
    let cfg = BufferConfig {
        db_path: Some(dir.path().join("buffer").to_string_lossy().into_owned()),
        ..BufferConfig::default()
    };
    OfflineBuffer::open(cfg).unwrap()
}

fn signal(source: SignalSource, minutes: i64, lat: f64, symptom: &str) -> Signal {
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    Signal {
        source,
        observed_at: base + Duration::minutes(minutes),
        location: Location { lat, lng: 44.0 },
        symptom: symptom.to_string(),
        severity: 0.6,
        confidence: 0.8,
        metadata: HashMap::new(),
    }
}

/// Acks everything after the first `fail_first` attempts.
struct FlakyTarget {
    attempts: AtomicUsize,
    fail_first: usize,
}

#[async_trait]
impl SyncTarget for FlakyTarget {
    async fn deliver(&self, _record: &BufferedRecord) -> DeliveryStatus {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            DeliveryStatus::Retry("endpoint unreachable".to_string())
        } else {
            DeliveryStatus::Acked
        }
    }
}

struct ConflictTarget;

#[async_trait]
impl SyncTarget for ConflictTarget {
    async fn deliver(&self, _record: &BufferedRecord) -> DeliveryStatus {
        DeliveryStatus::Conflict("remote disagrees on payload".to_string())
    }
}

#[tokio::test]
async fn buffered_signals_replay_into_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let buffer = test_buffer(&dir);
    let now = Utc::now();

    // Two correlated signals captured while offline.
    let a = signal(SignalSource::CommunityReport, 0, 12.0, "cholera");
    let b = signal(SignalSource::ClinicalRecord, 30, 12.003, "cholera");
    for s in [&a, &b] {
        let outcome = buffer
            .enqueue(RecordType::Signal, bincode::serialize(s).unwrap(), s.observed_at)
            .unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Buffered(_)));
    }

    let engine = Arc::new(CorrelationEngine::new(EngineConfig::default()));
    let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
    let target = EngineSyncTarget::new(engine.clone(), store.clone());

    let report = buffer.run_sync_pass(&target, now, 16).await.unwrap();
    assert_eq!(report.synced, 2);
    assert_eq!(report.failed, 0);

    // Both delivered; the pair fused and landed in hot storage.
    assert_eq!(engine.report().signals_ingested, 2);
    assert_eq!(store.list_hot().await.unwrap().len(), 1);

    // A second pass has nothing left to do.
    let again = buffer.run_sync_pass(&target, now, 16).await.unwrap();
    assert_eq!(again.attempted, 0);
}

#[tokio::test]
async fn duplicate_payload_is_never_buffered_twice() {
    let dir = tempfile::tempdir().unwrap();
    let buffer = test_buffer(&dir);
    let s = signal(SignalSource::IoTSensor, 0, 12.0, "fever");
    let payload = bincode::serialize(&s).unwrap();

    let first = buffer.enqueue(RecordType::Signal, payload.clone(), s.observed_at).unwrap();
    let id = match first {
        EnqueueOutcome::Buffered(id) => id,
        other => panic!("expected buffered, got {:?}", other),
    };
    assert_eq!(
        buffer.enqueue(RecordType::Signal, payload, s.observed_at).unwrap(),
        EnqueueOutcome::Duplicate(id)
    );
    assert_eq!(buffer.len(), 1);
}

#[tokio::test]
async fn failed_delivery_backs_off_then_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let buffer = test_buffer(&dir);
    let now = Utc::now();
    let s = signal(SignalSource::CommunityReport, 0, 12.0, "fever");
    buffer
        .enqueue(RecordType::Signal, bincode::serialize(&s).unwrap(), s.observed_at)
        .unwrap();

    let target = FlakyTarget { attempts: AtomicUsize::new(0), fail_first: 1 };

    let first = buffer.run_sync_pass(&target, now, 16).await.unwrap();
    assert_eq!(first.failed, 1);
    // Still backing off: not retryable yet.
    let during_backoff = buffer.run_sync_pass(&target, now, 16).await.unwrap();
    assert_eq!(during_backoff.attempted, 0);

    // After the base backoff elapses the record is released and acked.
    let later = now + Duration::seconds(31);
    let retry = buffer.run_sync_pass(&target, later, 16).await.unwrap();
    assert_eq!(retry.synced, 1);
}

#[tokio::test]
async fn exhausted_and_conflicted_records_reach_the_operator_queue() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = BufferConfig {
        db_path: Some(dir.path().join("buffer").to_string_lossy().into_owned()),
        max_retry_attempts: 2,
        backoff_base_secs: 1,
        ..BufferConfig::default()
    };
    let buffer = OfflineBuffer::open(cfg).unwrap();
    let mut now = Utc::now();

    let a = signal(SignalSource::CommunityReport, 0, 12.0, "fever");
    let b = signal(SignalSource::ClinicalRecord, 5, 13.0, "cough");
    let conflicted = buffer
        .enqueue(RecordType::Signal, bincode::serialize(&b).unwrap(), b.observed_at)
        .unwrap();
    buffer
        .enqueue(RecordType::Signal, bincode::serialize(&a).unwrap(), a.observed_at)
        .unwrap();

    // Conflicts surface immediately.
    let conflict_id = match conflicted {
        EnqueueOutcome::Buffered(id) => id,
        other => panic!("expected buffered, got {:?}", other),
    };
    buffer.mark_conflict(conflict_id, now).unwrap();

    // Exhaust the retry budget on the other record.
    let always_down = FlakyTarget { attempts: AtomicUsize::new(0), fail_first: usize::MAX };
    for _ in 0..2 {
        buffer.run_sync_pass(&always_down, now, 16).await.unwrap();
        now = now + Duration::seconds(600);
    }

    let queue = buffer.operator_queue().unwrap();
    assert_eq!(queue.len(), 2);
    assert!(queue.iter().any(|r| r.sync_state == SyncState::Conflict));
    assert!(queue.iter().any(|r| r.sync_state == SyncState::Failed));

    // Operator-queue records are never retried automatically.
    let retry = buffer.run_sync_pass(&always_down, now + Duration::days(1), 16).await.unwrap();
    assert_eq!(retry.attempted, 0);
}

#[tokio::test]
async fn conflict_is_surfaced_not_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let buffer = test_buffer(&dir);
    let now = Utc::now();
    let s = signal(SignalSource::VoiceChannel, 0, 12.0, "rash");
    buffer
        .enqueue(RecordType::Signal, bincode::serialize(&s).unwrap(), s.observed_at)
        .unwrap();

    let report = buffer.run_sync_pass(&ConflictTarget, now, 16).await.unwrap();
    assert_eq!(report.conflicts, 1);
    assert_eq!(buffer.operator_queue().unwrap().len(), 1);
}

#[test]
fn purge_removes_only_synced_records_past_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = BufferConfig {
        db_path: Some(dir.path().join("buffer").to_string_lossy().into_owned()),
        synced_retention_days: 0,
        ..BufferConfig::default()
    };
    let buffer = OfflineBuffer::open(cfg).unwrap();
    let now = Utc::now();

    let mut ids = Vec::new();
    for i in 0..3 {
        let s = signal(SignalSource::CommunityReport, i, 12.0 + i as f64, "fever");
        match buffer
            .enqueue(RecordType::Signal, bincode::serialize(&s).unwrap(), s.observed_at)
            .unwrap()
        {
            EnqueueOutcome::Buffered(id) => ids.push(id),
            other => panic!("expected buffered, got {:?}", other),
        }
    }
    buffer.mark_synced(ids[0], now).unwrap();
    buffer.mark_synced(ids[1], now).unwrap();

    assert_eq!(buffer.purge_synced(now).unwrap(), 2);
    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer.get_pending(16).unwrap().len(), 1);
}
