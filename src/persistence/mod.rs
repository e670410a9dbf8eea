//! Persistence layer traits and implementations
//!
//! This module defines a thin abstraction so the correlation/fusion
//! logic can be decoupled from the concrete storage backend.  The
//! embedded sled store is the production backend; an in-memory fake
//! keeps the lifecycle logic testable without touching disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fusion::{FusedEvent, RetentionTier};
use crate::utils::error::Result;

/// A fused event in HOT storage, still plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotRecord {
    pub event: FusedEvent,
    pub stored_at: DateTime<Utc>,
}

/// A fused event in COLD archival storage: ciphertext under an
/// ephemeral retention key. Once that key is shredded this record is
/// permanently unrecoverable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdRecord {
    pub event_id: String,
    pub key_id: String,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub archived_at: DateTime<Utc>,
}

/// Narrow repository interface over the fused-event store.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a fused event into the HOT tier (insert or update).
    async fn put_hot(&self, record: &HotRecord) -> Result<()>;

    async fn get_hot(&self, event_id: &str) -> Result<Option<HotRecord>>;

    async fn list_hot(&self) -> Result<Vec<HotRecord>>;

    async fn delete_hot(&self, event_id: &str) -> Result<()>;

    async fn put_cold(&self, record: &ColdRecord) -> Result<()>;

    async fn get_cold(&self, event_id: &str) -> Result<Option<ColdRecord>>;

    async fn list_cold(&self) -> Result<Vec<ColdRecord>>;

    async fn delete_cold(&self, event_id: &str) -> Result<()>;

    /// Current retention tier of a record, if known.
    async fn tier(&self, event_id: &str) -> Result<Option<RetentionTier>>;

    /// Atomically advance the tier iff it still equals `expected`.
    /// Returns false when another scan already applied the transition,
    /// which makes interrupted scans safe to re-run.
    async fn compare_and_swap_tier(
        &self,
        event_id: &str,
        expected: RetentionTier,
        next: RetentionTier,
    ) -> Result<bool>;

    /// Flush any outstanding writes.
    async fn flush(&self) -> Result<()>;
}

pub mod memory;
pub mod sled_store;
