//! Tier lifecycle scans: HOT -> COLD decay and COLD expiry shredding.
//!
//! Both scans take an explicit `now` so tests can advance simulated
//! time, and a cancellation token so a shutdown never leaves a record
//! half-transitioned. Each transition writes its destination before
//! deleting its source, and the tier marker moves via compare-and-swap,
//! so an interrupted scan is safe to re-run.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::RetentionConfig;
use crate::fusion::{FusedEvent, RetentionTier};
use crate::persistence::{ColdRecord, EventStore};
use crate::retention::{AuditAction, Decryption, KeyVault, RetentionPolicy};
use crate::utils::error::Result;

/// Counters from one scan pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub examined: usize,
    pub transitioned: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Where a retrieval found the event, if anywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Hot(FusedEvent),
    Cold(FusedEvent),
    /// The record exists only as ciphertext under a shredded key, or
    /// not at all. Expected for anything past its retention window.
    Unavailable,
}

/// Drives records through the HOT -> COLD -> SHREDDED lifecycle.
pub struct LifecycleManager {
    store: Arc<dyn EventStore>,
    vault: Arc<KeyVault>,
    cfg: RetentionConfig,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn EventStore>, vault: Arc<KeyVault>, cfg: RetentionConfig) -> Self {
        Self { store, vault, cfg }
    }

    /// Move HOT records older than the hot threshold into COLD storage:
    /// encrypt under a fresh ephemeral key, write the ciphertext, swap
    /// the tier marker, then delete the plaintext. A failure on one
    /// record leaves it untouched in HOT and the scan moves on.
    pub async fn decay_scan(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let threshold = Duration::days(self.cfg.hot_threshold_days);
        let mut report = ScanReport::default();

        for record in self.store.list_hot().await? {
            if cancel.is_cancelled() {
                info!("decay scan cancelled after {} records", report.examined);
                break;
            }
            report.examined += 1;

            if now - record.stored_at < threshold {
                report.skipped += 1;
                continue;
            }

            let event_id = record.event.event_id.clone();
            match self.archive_record(&record.event, now).await {
                Ok(true) => {
                    report.transitioned += 1;
                    debug!("archived {} to cold storage", event_id);
                }
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("decay of {} failed, will retry next scan: {}", event_id, e);
                }
            }
        }
        Ok(report)
    }

    /// Archive one event. Returns false when another scan already moved
    /// it; in that case any leftover plaintext copy is cleaned up.
    async fn archive_record(&self, event: &FusedEvent, now: DateTime<Utc>) -> Result<bool> {
        // A previous interrupted scan may have written the ciphertext
        // and swapped the tier but died before deleting the plaintext.
        // A shredded event must never re-enter the lifecycle, so any
        // replayed plaintext copy of one is simply dropped.
        match self.store.tier(&event.event_id).await? {
            Some(RetentionTier::Cold) | Some(RetentionTier::Shredded) => {
                self.store.delete_hot(&event.event_id).await?;
                return Ok(false);
            }
            _ => {}
        }

        let key = self.vault.create_key(RetentionPolicy::Cold, now)?;
        let plaintext = bincode::serialize(event)?;
        let (nonce, ciphertext) = self.vault.encrypt(&key.key_id, &plaintext, now)?;

        self.store
            .put_cold(&ColdRecord {
                event_id: event.event_id.clone(),
                key_id: key.key_id.clone(),
                nonce,
                ciphertext,
                archived_at: now,
            })
            .await?;

        let swapped = self
            .store
            .compare_and_swap_tier(&event.event_id, RetentionTier::Hot, RetentionTier::Cold)
            .await?;
        // Ciphertext is durable either way; the plaintext can go.
        self.store.delete_hot(&event.event_id).await?;
        if swapped {
            self.vault.record_audit(AuditAction::Archive, &key, now)?;
        }
        Ok(swapped)
    }

    /// Shred the keys of COLD records past the cold retention window or
    /// whose key carries an earlier explicit expiry, then drop the
    /// (now unrecoverable) ciphertext.
    pub async fn expiry_scan(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let window = Duration::days(self.cfg.cold_retention_days);
        let mut report = ScanReport::default();

        for record in self.store.list_cold().await? {
            if cancel.is_cancelled() {
                info!("expiry scan cancelled after {} records", report.examined);
                break;
            }
            report.examined += 1;

            let key_expired = match self.vault.get_key(&record.key_id)? {
                Some(key) => key.expires_at.map_or(false, |at| now >= at),
                None => false,
            };
            if now - record.archived_at < window && !key_expired {
                report.skipped += 1;
                continue;
            }

            match self.shred_record(&record, now).await {
                Ok(()) => {
                    report.transitioned += 1;
                    info!("shredded key for expired record {}", record.event_id);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("expiry of {} failed, will retry next scan: {}", record.event_id, e);
                }
            }
        }
        Ok(report)
    }

    /// Shred first, then advance the tier, then drop the ciphertext.
    /// Every step is idempotent, so a crash mid-way re-runs cleanly.
    async fn shred_record(&self, record: &ColdRecord, now: DateTime<Utc>) -> Result<()> {
        self.vault.shred(&record.key_id, now)?;
        self.store
            .compare_and_swap_tier(&record.event_id, RetentionTier::Cold, RetentionTier::Shredded)
            .await?;
        self.store.delete_cold(&record.event_id).await?;
        Ok(())
    }

    /// Look an event up across tiers, decrypting COLD ciphertext when
    /// its key still exists.
    pub async fn retrieve(&self, event_id: &str) -> Result<Retrieval> {
        if let Some(hot) = self.store.get_hot(event_id).await? {
            return Ok(Retrieval::Hot(hot.event));
        }
        if let Some(cold) = self.store.get_cold(event_id).await? {
            return Ok(match self.vault.decrypt(&cold.key_id, &cold.nonce, &cold.ciphertext)? {
                Decryption::Plaintext(bytes) => Retrieval::Cold(bincode::deserialize(&bytes)?),
                Decryption::Unavailable => Retrieval::Unavailable,
            });
        }
        Ok(Retrieval::Unavailable)
    }
}
