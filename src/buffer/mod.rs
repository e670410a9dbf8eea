//! Durable offline buffer: absorbs signals and outbound fusion output
//! during connectivity loss and guarantees at-least-once delivery into
//! the engine. Uses the `sled` embedded database.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sled::{Db, Tree};

use crate::config::BufferConfig;
use crate::engine::CorrelationEngine;
use crate::persistence::{EventStore, HotRecord};
use crate::signal::Signal;
use crate::utils::error::{Error, Result};

const RECORDS_TREE: &str = "records";
const HASH_TREE: &str = "hashes";

/// Sync lifecycle of one buffered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Pending,
    Synced,
    Failed,
    Conflict,
}

/// What the payload wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    Signal,
    FusionOutput,
}

/// Local durability unit wrapping a not-yet-processed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedRecord {
    pub record_id: u64,
    pub observed_at: DateTime<Utc>,
    pub record_type: RecordType,
    pub payload: Vec<u8>,
    /// Content hash used for dedup.
    pub payload_hash: String,
    pub sync_state: SyncState,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    /// Earliest time a FAILED record becomes retryable again.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Buffered(u64),
    /// Identical content already buffered; no-op.
    Duplicate(u64),
}

/// Downstream acknowledgement for one delivery attempt.
#[derive(Debug, Clone)]
pub enum DeliveryStatus {
    Acked,
    /// Transient failure; retried with backoff up to the attempt cap.
    Retry(String),
    /// Remote holds different content for the same logical key.
    /// Surfaced, never auto-resolved.
    Conflict(String),
}

/// The downstream a sync pass delivers into (the local engine, or a
/// remote aggregation endpoint).
#[async_trait]
pub trait SyncTarget: Send + Sync {
    async fn deliver(&self, record: &BufferedRecord) -> DeliveryStatus;
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncPassReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub conflicts: usize,
}

pub struct OfflineBuffer {
    _db: Db,
    records: Tree,
    hashes: Tree,
    cfg: BufferConfig,
}

impl OfflineBuffer {
    /// Open (or create) the buffer database.
    pub fn open(cfg: BufferConfig) -> Result<Self> {
        let path = cfg
            .db_path
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let mut p = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
                p.push("episignal");
                p.push("buffer");
                p
            });
        let db = sled::open(path)?;
        let records = db.open_tree(RECORDS_TREE)?;
        let hashes = db.open_tree(HASH_TREE)?;
        Ok(Self { _db: db, records, hashes, cfg })
    }

    pub fn hash_payload(payload: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        hex::encode(hasher.finalize())
    }

    /// Buffer a payload. Durability is flushed before returning, so the
    /// caller's acknowledgement implies the record survives a crash.
    /// Re-buffering identical content is a no-op.
    pub fn enqueue(
        &self,
        record_type: RecordType,
        payload: Vec<u8>,
        observed_at: DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        let payload_hash = Self::hash_payload(&payload);
        if let Some(existing) = self.hashes.get(payload_hash.as_bytes())? {
            let id = u64::from_be_bytes(existing.as_ref().try_into().map_err(|_| {
                Error::BufferError("corrupt hash index entry".to_string())
            })?);
            return Ok(EnqueueOutcome::Duplicate(id));
        }

        let record_id = self._db.generate_id()?;
        let record = BufferedRecord {
            record_id,
            observed_at,
            record_type,
            payload,
            payload_hash: payload_hash.clone(),
            sync_state: SyncState::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            synced_at: None,
            next_attempt_at: None,
        };
        self.records
            .insert(record_id.to_be_bytes(), bincode::serialize(&record)?)?;
        self.hashes
            .insert(payload_hash.as_bytes(), &record_id.to_be_bytes())?;
        self.records.flush()?;
        Ok(EnqueueOutcome::Buffered(record_id))
    }

    fn get(&self, record_id: u64) -> Result<BufferedRecord> {
        let ivec = self
            .records
            .get(record_id.to_be_bytes())?
            .ok_or_else(|| Error::BufferError(format!("no such record: {}", record_id)))?;
        Ok(bincode::deserialize(&ivec)?)
    }

    fn put(&self, record: &BufferedRecord) -> Result<()> {
        self.records
            .insert(record.record_id.to_be_bytes(), bincode::serialize(record)?)?;
        Ok(())
    }

    /// Oldest-first PENDING records, up to `limit`.
    pub fn get_pending(&self, limit: usize) -> Result<Vec<BufferedRecord>> {
        let mut out = Vec::new();
        for item in self.records.iter() {
            let (_, ivec) = item?;
            let record: BufferedRecord = bincode::deserialize(&ivec)?;
            if record.sync_state == SyncState::Pending {
                out.push(record);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Flip FAILED records whose backoff has elapsed (and that still
    /// have retry budget) back to PENDING.
    pub fn release_retries(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut released = 0;
        for item in self.records.iter() {
            let (_, ivec) = item?;
            let mut record: BufferedRecord = bincode::deserialize(&ivec)?;
            if record.sync_state == SyncState::Failed
                && record.attempt_count < self.cfg.max_retry_attempts
                && record.next_attempt_at.map_or(true, |at| at <= now)
            {
                record.sync_state = SyncState::Pending;
                self.put(&record)?;
                released += 1;
            }
        }
        Ok(released)
    }

    /// Record a successful downstream acknowledgement.
    pub fn mark_synced(&self, record_id: u64, now: DateTime<Utc>) -> Result<()> {
        let mut record = self.get(record_id)?;
        record.sync_state = SyncState::Synced;
        record.attempt_count += 1;
        record.last_attempt_at = Some(now);
        record.synced_at = Some(now);
        record.next_attempt_at = None;
        self.put(&record)?;
        Ok(())
    }

    /// Record a transient failure with exponential backoff. Past the
    /// attempt cap the record stays FAILED and surfaces on the operator
    /// queue instead of being dropped.
    pub fn mark_failed(&self, record_id: u64, now: DateTime<Utc>) -> Result<()> {
        let mut record = self.get(record_id)?;
        record.attempt_count += 1;
        record.last_attempt_at = Some(now);
        record.sync_state = SyncState::Failed;
        if record.attempt_count < self.cfg.max_retry_attempts {
            let backoff =
                self.cfg.backoff_base_secs.saturating_mul(1u64 << (record.attempt_count - 1).min(16));
            record.next_attempt_at = Some(now + Duration::seconds(backoff as i64));
        } else {
            record.next_attempt_at = None;
            warn!(
                "buffer record {} exhausted its {} attempts, surfacing to operator queue",
                record_id, self.cfg.max_retry_attempts
            );
        }
        self.put(&record)?;
        Ok(())
    }

    pub fn mark_conflict(&self, record_id: u64, now: DateTime<Utc>) -> Result<()> {
        let mut record = self.get(record_id)?;
        record.sync_state = SyncState::Conflict;
        record.attempt_count += 1;
        record.last_attempt_at = Some(now);
        record.next_attempt_at = None;
        self.put(&record)?;
        Ok(())
    }

    /// Records needing human triage: conflicts plus records that
    /// exhausted their retry budget.
    pub fn operator_queue(&self) -> Result<Vec<BufferedRecord>> {
        let mut out = Vec::new();
        for item in self.records.iter() {
            let (_, ivec) = item?;
            let record: BufferedRecord = bincode::deserialize(&ivec)?;
            let exhausted = record.sync_state == SyncState::Failed
                && record.attempt_count >= self.cfg.max_retry_attempts;
            if exhausted || record.sync_state == SyncState::Conflict {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Remove SYNCED records older than the retention window. Returns
    /// the number purged.
    pub fn purge_synced(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(self.cfg.synced_retention_days);
        let mut purged = 0;
        for item in self.records.iter() {
            let (key, ivec) = item?;
            let record: BufferedRecord = bincode::deserialize(&ivec)?;
            if record.sync_state == SyncState::Synced
                && record.synced_at.map_or(false, |at| at <= cutoff)
            {
                self.records.remove(key)?;
                self.hashes.remove(record.payload_hash.as_bytes())?;
                purged += 1;
            }
        }
        if purged > 0 {
            self.records.flush()?;
        }
        Ok(purged)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One delivery pass: release due retries, then deliver PENDING
    /// records oldest-first with bounded parallelism. Each record is
    /// owned by exactly one in-flight delivery, so no cross-record lock
    /// is needed.
    pub async fn run_sync_pass(
        &self,
        target: &dyn SyncTarget,
        now: DateTime<Utc>,
        batch: usize,
    ) -> Result<SyncPassReport> {
        self.release_retries(now)?;
        let pending = self.get_pending(batch)?;
        let mut report = SyncPassReport::default();

        for chunk in pending.chunks(self.cfg.sync_parallelism.max(1)) {
            let deliveries = chunk.iter().map(|record| async move {
                (record.record_id, target.deliver(record).await)
            });
            for (record_id, status) in futures::future::join_all(deliveries).await {
                report.attempted += 1;
                match status {
                    DeliveryStatus::Acked => {
                        self.mark_synced(record_id, now)?;
                        report.synced += 1;
                    }
                    DeliveryStatus::Retry(reason) => {
                        warn!("sync of record {} failed: {}", record_id, reason);
                        self.mark_failed(record_id, now)?;
                        report.failed += 1;
                    }
                    DeliveryStatus::Conflict(reason) => {
                        warn!("sync of record {} conflicted: {}", record_id, reason);
                        self.mark_conflict(record_id, now)?;
                        report.conflicts += 1;
                    }
                }
            }
        }
        if report.attempted > 0 {
            self.records.flush()?;
            info!(
                "sync pass: {} attempted, {} synced, {} failed, {} conflicts",
                report.attempted, report.synced, report.failed, report.conflicts
            );
        }
        Ok(report)
    }
}

/// Delivers buffered signals into the local correlation engine and
/// persists any fused output into HOT storage.
pub struct EngineSyncTarget {
    engine: Arc<CorrelationEngine>,
    store: Arc<dyn EventStore>,
}

impl EngineSyncTarget {
    pub fn new(engine: Arc<CorrelationEngine>, store: Arc<dyn EventStore>) -> Self {
        Self { engine, store }
    }
}

#[async_trait]
impl SyncTarget for EngineSyncTarget {
    async fn deliver(&self, record: &BufferedRecord) -> DeliveryStatus {
        if record.record_type != RecordType::Signal {
            return DeliveryStatus::Acked;
        }
        let signal: Signal = match bincode::deserialize(&record.payload) {
            Ok(signal) => signal,
            Err(e) => return DeliveryStatus::Retry(format!("undecodable payload: {}", e)),
        };
        match self.engine.ingest(signal) {
            // Duplicates are acknowledged as already processed.
            Ok(outcome) => {
                if let Some(event) = outcome.event() {
                    let hot = HotRecord { event: event.clone(), stored_at: Utc::now() };
                    if let Err(e) = self.store.put_hot(&hot).await {
                        return DeliveryStatus::Retry(format!("event store write failed: {}", e));
                    }
                }
                DeliveryStatus::Acked
            }
            Err(e) => DeliveryStatus::Retry(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> (OfflineBuffer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BufferConfig {
            db_path: Some(dir.path().to_string_lossy().into_owned()),
            max_retry_attempts: 3,
            backoff_base_secs: 30,
            synced_retention_days: 7,
            sync_interval_secs: 60,
            sync_parallelism: 2,
        };
        (OfflineBuffer::open(cfg).unwrap(), dir)
    }

    #[test]
    fn enqueue_dedups_identical_content() {
        let (buffer, _dir) = buffer();
        let now = Utc::now();
        let first = buffer.enqueue(RecordType::Signal, b"payload".to_vec(), now).unwrap();
        let second = buffer.enqueue(RecordType::Signal, b"payload".to_vec(), now).unwrap();

        let EnqueueOutcome::Buffered(id) = first else { panic!("expected buffered") };
        assert_eq!(second, EnqueueOutcome::Duplicate(id));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn pending_is_oldest_first() {
        let (buffer, _dir) = buffer();
        let now = Utc::now();
        for i in 0..3u8 {
            buffer.enqueue(RecordType::Signal, vec![i], now).unwrap();
        }
        let pending = buffer.get_pending(10).unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending.windows(2).all(|w| w[0].record_id < w[1].record_id));
    }

    #[test]
    fn failed_records_back_off_then_release() {
        let (buffer, _dir) = buffer();
        let now = Utc::now();
        let EnqueueOutcome::Buffered(id) =
            buffer.enqueue(RecordType::Signal, b"x".to_vec(), now).unwrap()
        else {
            panic!("expected buffered")
        };

        buffer.mark_failed(id, now).unwrap();
        assert!(buffer.get_pending(10).unwrap().is_empty());

        // Backoff not yet elapsed
        assert_eq!(buffer.release_retries(now).unwrap(), 0);
        // After the base delay it becomes retryable
        assert_eq!(buffer.release_retries(now + Duration::seconds(31)).unwrap(), 1);
        assert_eq!(buffer.get_pending(10).unwrap().len(), 1);
    }

    #[test]
    fn exhausted_records_surface_on_operator_queue() {
        let (buffer, _dir) = buffer();
        let now = Utc::now();
        let EnqueueOutcome::Buffered(id) =
            buffer.enqueue(RecordType::Signal, b"x".to_vec(), now).unwrap()
        else {
            panic!("expected buffered")
        };

        for _ in 0..3 {
            buffer.mark_failed(id, now).unwrap();
        }
        // Past the cap: no more retries, but never dropped.
        assert_eq!(buffer.release_retries(now + Duration::days(1)).unwrap(), 0);
        let queue = buffer.operator_queue().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].record_id, id);
    }

    #[test]
    fn conflict_is_surfaced_not_resolved() {
        let (buffer, _dir) = buffer();
        let now = Utc::now();
        let EnqueueOutcome::Buffered(id) =
            buffer.enqueue(RecordType::Signal, b"x".to_vec(), now).unwrap()
        else {
            panic!("expected buffered")
        };
        buffer.mark_conflict(id, now).unwrap();
        assert!(buffer.get_pending(10).unwrap().is_empty());
        assert_eq!(buffer.release_retries(now + Duration::days(30)).unwrap(), 0);
        assert_eq!(buffer.operator_queue().unwrap().len(), 1);
    }

    #[test]
    fn purge_removes_only_aged_synced_records() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BufferConfig {
            db_path: Some(dir.path().to_string_lossy().into_owned()),
            synced_retention_days: 0,
            ..BufferConfig::default()
        };
        let buffer = OfflineBuffer::open(cfg).unwrap();
        let now = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3u8 {
            let EnqueueOutcome::Buffered(id) =
                buffer.enqueue(RecordType::Signal, vec![i], now).unwrap()
            else {
                panic!("expected buffered")
            };
            ids.push(id);
        }
        buffer.mark_synced(ids[0], now).unwrap();
        buffer.mark_synced(ids[1], now).unwrap();

        // 0-day retention window: both SYNCED records purge, the
        // PENDING one remains.
        let purged = buffer.purge_synced(now).unwrap();
        assert_eq!(purged, 2);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get_pending(10).unwrap().len(), 1);
    }

    struct FlakyTarget {
        fail_first: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SyncTarget for FlakyTarget {
        async fn deliver(&self, _record: &BufferedRecord) -> DeliveryStatus {
            if self.fail_first.swap(false, std::sync::atomic::Ordering::SeqCst) {
                DeliveryStatus::Retry("link down".to_string())
            } else {
                DeliveryStatus::Acked
            }
        }
    }

    #[tokio::test]
    async fn sync_pass_retries_transient_failures() {
        let (buffer, _dir) = buffer();
        let now = Utc::now();
        buffer.enqueue(RecordType::Signal, b"x".to_vec(), now).unwrap();

        let target = FlakyTarget { fail_first: std::sync::atomic::AtomicBool::new(true) };
        let report = buffer.run_sync_pass(&target, now, 16).await.unwrap();
        assert_eq!(report.failed, 1);

        // Next pass after the backoff window succeeds.
        let later = now + Duration::seconds(60);
        let report = buffer.run_sync_pass(&target, later, 16).await.unwrap();
        assert_eq!(report.synced, 1);
        assert!(buffer.get_pending(10).unwrap().is_empty());
    }
}
