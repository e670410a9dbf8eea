//! In-memory event store for tests: same contract as the sled backend,
//! no disk.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{ColdRecord, EventStore, HotRecord};
use crate::fusion::RetentionTier;
use crate::utils::error::Result;

#[derive(Default)]
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    hot: HashMap<String, HotRecord>,
    cold: HashMap<String, ColdRecord>,
    tiers: HashMap<String, RetentionTier>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn put_hot(&self, record: &HotRecord) -> Result<()> {
        let mut inner = self.inner.write().expect("store poisoned");
        let id = record.event.event_id.clone();
        inner.tiers.entry(id.clone()).or_insert(RetentionTier::Hot);
        inner.hot.insert(id, record.clone());
        Ok(())
    }

    async fn get_hot(&self, event_id: &str) -> Result<Option<HotRecord>> {
        Ok(self.inner.read().expect("store poisoned").hot.get(event_id).cloned())
    }

    async fn list_hot(&self) -> Result<Vec<HotRecord>> {
        Ok(self.inner.read().expect("store poisoned").hot.values().cloned().collect())
    }

    async fn delete_hot(&self, event_id: &str) -> Result<()> {
        self.inner.write().expect("store poisoned").hot.remove(event_id);
        Ok(())
    }

    async fn put_cold(&self, record: &ColdRecord) -> Result<()> {
        let mut inner = self.inner.write().expect("store poisoned");
        inner.cold.insert(record.event_id.clone(), record.clone());
        Ok(())
    }

    async fn get_cold(&self, event_id: &str) -> Result<Option<ColdRecord>> {
        Ok(self.inner.read().expect("store poisoned").cold.get(event_id).cloned())
    }

    async fn list_cold(&self) -> Result<Vec<ColdRecord>> {
        Ok(self.inner.read().expect("store poisoned").cold.values().cloned().collect())
    }

    async fn delete_cold(&self, event_id: &str) -> Result<()> {
        self.inner.write().expect("store poisoned").cold.remove(event_id);
        Ok(())
    }

    async fn tier(&self, event_id: &str) -> Result<Option<RetentionTier>> {
        Ok(self.inner.read().expect("store poisoned").tiers.get(event_id).copied())
    }

    async fn compare_and_swap_tier(
        &self,
        event_id: &str,
        expected: RetentionTier,
        next: RetentionTier,
    ) -> Result<bool> {
        let mut inner = self.inner.write().expect("store poisoned");
        match inner.tiers.get_mut(event_id) {
            Some(tier) if *tier == expected => {
                *tier = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
