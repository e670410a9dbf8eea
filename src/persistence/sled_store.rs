//! Sled-backed event store using one tree per retention tier plus a
//! small tier index that supports atomic per-record transitions.

use std::path::PathBuf;

use async_trait::async_trait;
use sled::{Db, Tree};

use super::{ColdRecord, EventStore, HotRecord};
use crate::fusion::RetentionTier;
use crate::utils::error::{Error, Result};

const HOT_TREE: &str = "hot";
const COLD_TREE: &str = "cold";
const TIER_TREE: &str = "tiers";

#[derive(Clone)]
pub struct SledEventStore {
    _db: Db,
    hot: Tree,
    cold: Tree,
    tiers: Tree,
}

impl SledEventStore {
    /// Open (or create) the store under the given directory, defaulting
    /// to the per-user data dir.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = db_path.unwrap_or_else(|| {
            let mut p = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
            p.push("episignal");
            p.push("events");
            p
        });
        let db = sled::open(path)?;
        let hot = db.open_tree(HOT_TREE)?;
        let cold = db.open_tree(COLD_TREE)?;
        let tiers = db.open_tree(TIER_TREE)?;
        Ok(Self { _db: db, hot, cold, tiers })
    }

    fn tier_byte(tier: RetentionTier) -> u8 {
        match tier {
            RetentionTier::Hot => 0,
            RetentionTier::Cold => 1,
            RetentionTier::Shredded => 2,
        }
    }

    fn tier_from_byte(byte: u8) -> Result<RetentionTier> {
        match byte {
            0 => Ok(RetentionTier::Hot),
            1 => Ok(RetentionTier::Cold),
            2 => Ok(RetentionTier::Shredded),
            other => Err(Error::StorageError(format!("unknown tier byte: {}", other))),
        }
    }
}

#[async_trait]
impl EventStore for SledEventStore {
    async fn put_hot(&self, record: &HotRecord) -> Result<()> {
        let bytes = bincode::serialize(record)?;
        self.hot.insert(record.event.event_id.as_bytes(), bytes)?;
        // New records enter at HOT; updates to an already-archived
        // event never resurrect its tier.
        if self.tiers.get(record.event.event_id.as_bytes())?.is_none() {
            self.tiers.insert(
                record.event.event_id.as_bytes(),
                &[Self::tier_byte(RetentionTier::Hot)],
            )?;
        }
        self.hot.flush()?;
        Ok(())
    }

    async fn get_hot(&self, event_id: &str) -> Result<Option<HotRecord>> {
        match self.hot.get(event_id.as_bytes())? {
            Some(ivec) => Ok(Some(bincode::deserialize(&ivec)?)),
            None => Ok(None),
        }
    }

    async fn list_hot(&self) -> Result<Vec<HotRecord>> {
        let mut records = Vec::new();
        for item in self.hot.iter() {
            let (_, ivec) = item?;
            records.push(bincode::deserialize(&ivec)?);
        }
        Ok(records)
    }

    async fn delete_hot(&self, event_id: &str) -> Result<()> {
        self.hot.remove(event_id.as_bytes())?;
        self.hot.flush()?;
        Ok(())
    }

    async fn put_cold(&self, record: &ColdRecord) -> Result<()> {
        let bytes = bincode::serialize(record)?;
        self.cold.insert(record.event_id.as_bytes(), bytes)?;
        self.cold.flush()?;
        Ok(())
    }

    async fn get_cold(&self, event_id: &str) -> Result<Option<ColdRecord>> {
        match self.cold.get(event_id.as_bytes())? {
            Some(ivec) => Ok(Some(bincode::deserialize(&ivec)?)),
            None => Ok(None),
        }
    }

    async fn list_cold(&self) -> Result<Vec<ColdRecord>> {
        let mut records = Vec::new();
        for item in self.cold.iter() {
            let (_, ivec) = item?;
            records.push(bincode::deserialize(&ivec)?);
        }
        Ok(records)
    }

    async fn delete_cold(&self, event_id: &str) -> Result<()> {
        self.cold.remove(event_id.as_bytes())?;
        self.cold.flush()?;
        Ok(())
    }

    async fn tier(&self, event_id: &str) -> Result<Option<RetentionTier>> {
        match self.tiers.get(event_id.as_bytes())? {
            Some(ivec) => Ok(Some(Self::tier_from_byte(ivec[0])?)),
            None => Ok(None),
        }
    }

    async fn compare_and_swap_tier(
        &self,
        event_id: &str,
        expected: RetentionTier,
        next: RetentionTier,
    ) -> Result<bool> {
        let swapped = self
            .tiers
            .compare_and_swap(
                event_id.as_bytes(),
                Some(&[Self::tier_byte(expected)][..]),
                Some(&[Self::tier_byte(next)][..]),
            )?
            .is_ok();
        if swapped {
            self.tiers.flush()?;
        }
        Ok(swapped)
    }

    async fn flush(&self) -> Result<()> {
        self.hot.flush()?;
        self.cold.flush()?;
        self.tiers.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{FusedEvent, VerificationStatus};
    use crate::signal::SignalSource;
    use crate::utils::geo::Location;
    use chrono::Utc;

    fn hot_record(event_id: &str) -> HotRecord {
        HotRecord {
            event: FusedEvent {
                event_id: event_id.to_string(),
                correlation_score: 0.8,
                verification_status: VerificationStatus::Probable,
                primary_source: SignalSource::ClinicalRecord,
                contributing_sources: vec![SignalSource::ClinicalRecord],
                canonical_location: Location::new(0.05, 40.31),
                canonical_symptom: "cholera".to_string(),
                severity: 0.7,
                created_at: Utc::now(),
                retention_tier: crate::fusion::RetentionTier::Hot,
            },
            stored_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn hot_roundtrip_and_tier_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledEventStore::open(Some(dir.path().to_path_buf())).unwrap();

        store.put_hot(&hot_record("ev-1")).await.unwrap();
        let fetched = store.get_hot("ev-1").await.unwrap().unwrap();
        assert_eq!(fetched.event.event_id, "ev-1");
        assert_eq!(store.tier("ev-1").await.unwrap(), Some(RetentionTier::Hot));
    }

    #[tokio::test]
    async fn cas_tier_applies_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledEventStore::open(Some(dir.path().to_path_buf())).unwrap();
        store.put_hot(&hot_record("ev-2")).await.unwrap();

        assert!(store
            .compare_and_swap_tier("ev-2", RetentionTier::Hot, RetentionTier::Cold)
            .await
            .unwrap());
        // A resumed scan re-trying the same transition must not win twice.
        assert!(!store
            .compare_and_swap_tier("ev-2", RetentionTier::Hot, RetentionTier::Cold)
            .await
            .unwrap());
        assert_eq!(store.tier("ev-2").await.unwrap(), Some(RetentionTier::Cold));
    }
}
