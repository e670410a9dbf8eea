//! Retention keys, archival encryption, and cryptographic shredding.
//!
//! Archived fused events are encrypted under per-record ephemeral keys
//! held in the vault. Destroying a key (overwriting its material and
//! marking it shredded) makes the ciphertext permanently unrecoverable
//! without touching the ciphertext itself, and survives restarts
//! because the shredded flag is persisted with the overwritten
//! material.

pub mod lifecycle;

use std::fmt;
use std::path::PathBuf;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::utils::error::{Error, Result};

const KEYS_TREE: &str = "keys";
const AUDIT_TREE: &str = "audit";

/// Retention policy governing when a key may be destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionPolicy {
    Hot,
    Warm,
    Cold,
    Eternal,
}

impl RetentionPolicy {
    /// Days until expiry, or None for keys that never expire.
    pub fn days(&self) -> Option<i64> {
        match self {
            Self::Hot => Some(180),
            Self::Warm => Some(365),
            Self::Cold => Some(1825),
            Self::Eternal => None,
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hot => "HOT",
            Self::Warm => "WARM",
            Self::Cold => "COLD",
            Self::Eternal => "ETERNAL",
        };
        f.write_str(s)
    }
}

/// Key metadata plus material. `shredded` is monotonic false -> true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionKey {
    pub key_id: String,
    pub policy: RetentionPolicy,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub shredded: bool,
    /// 32 bytes of AES-256 key material; random garbage once shredded.
    material: Vec<u8>,
}

/// Outcome of decrypting under a retention key. A shredded key yields
/// `Unavailable`: that is the expected, correct outcome of the
/// retention design, not a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decryption {
    Plaintext(Vec<u8>),
    Unavailable,
}

/// Action recorded on the append-only audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Encrypt,
    Archive,
    Shred,
}

/// Append-only audit record consumed by the compliance collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub key_id: String,
    pub timestamp: DateTime<Utc>,
    pub policy: RetentionPolicy,
}

/// Sled-backed vault holding retention keys and the audit trail.
pub struct KeyVault {
    db: Db,
    keys: Tree,
    audit: Tree,
}

impl KeyVault {
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = db_path.unwrap_or_else(|| {
            let mut p = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
            p.push("episignal");
            p.push("vault");
            p
        });
        let db = sled::open(path)?;
        let keys = db.open_tree(KEYS_TREE)?;
        let audit = db.open_tree(AUDIT_TREE)?;
        Ok(Self { db, keys, audit })
    }

    /// Mint a fresh ephemeral key under the given policy.
    pub fn create_key(&self, policy: RetentionPolicy, now: DateTime<Utc>) -> Result<RetentionKey> {
        let mut id_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let mut material = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut material);

        let key = RetentionKey {
            key_id: hex::encode(id_bytes),
            policy,
            created_at: now,
            expires_at: policy.days().map(|d| now + Duration::days(d)),
            shredded: false,
            material,
        };
        self.put_key(&key)?;
        Ok(key)
    }

    fn put_key(&self, key: &RetentionKey) -> Result<()> {
        self.keys.insert(key.key_id.as_bytes(), bincode::serialize(key)?)?;
        self.keys.flush()?;
        Ok(())
    }

    pub fn get_key(&self, key_id: &str) -> Result<Option<RetentionKey>> {
        match self.keys.get(key_id.as_bytes())? {
            Some(ivec) => Ok(Some(bincode::deserialize(&ivec)?)),
            None => Ok(None),
        }
    }

    /// Encrypt plaintext under the key. Returns (nonce, ciphertext).
    /// The caller supplies the clock so simulated-time runs produce a
    /// consistent audit trail.
    pub fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let key = self
            .get_key(key_id)?
            .ok_or_else(|| Error::CryptoError(format!("no such key: {}", key_id)))?;
        if key.shredded {
            return Err(Error::CryptoError(format!(
                "cannot encrypt under shredded key {}",
                key_id
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key.material)
            .map_err(|e| Error::CryptoError(format!("bad key material: {}", e)))?;
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| Error::CryptoError(format!("encrypt failed: {}", e)))?;
        self.record_audit(AuditAction::Encrypt, &key, now)?;
        Ok((nonce_bytes.to_vec(), ciphertext))
    }

    /// Decrypt ciphertext. A shredded or unknown key yields
    /// `Decryption::Unavailable`, never an error.
    pub fn decrypt(&self, key_id: &str, nonce: &[u8], ciphertext: &[u8]) -> Result<Decryption> {
        let key = match self.get_key(key_id)? {
            Some(key) if !key.shredded => key,
            _ => return Ok(Decryption::Unavailable),
        };
        let cipher = Aes256Gcm::new_from_slice(&key.material)
            .map_err(|e| Error::CryptoError(format!("bad key material: {}", e)))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::CryptoError(format!("decrypt failed: {}", e)))?;
        Ok(Decryption::Plaintext(plaintext))
    }

    /// Destroy the key material: overwrite it with random bytes and set
    /// the shredded flag. Irreversible and idempotent; shredding an
    /// already-shredded key is a no-op, not an error. Returns true when
    /// this call performed the shred.
    pub fn shred(&self, key_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut key = self
            .get_key(key_id)?
            .ok_or_else(|| Error::CryptoError(format!("no such key: {}", key_id)))?;
        if key.shredded {
            return Ok(false);
        }
        rand::thread_rng().fill_bytes(&mut key.material);
        key.shredded = true;
        self.put_key(&key)?;
        self.record_audit(AuditAction::Shred, &key, now)?;
        Ok(true)
    }

    /// Append one audit record; the trail is never rewritten.
    pub fn record_audit(
        &self,
        action: AuditAction,
        key: &RetentionKey,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let record = AuditRecord {
            action,
            key_id: key.key_id.clone(),
            timestamp,
            policy: key.policy,
        };
        let id = self.db.generate_id()?;
        self.audit.insert(id.to_be_bytes(), bincode::serialize(&record)?)?;
        self.audit.flush()?;
        Ok(())
    }

    /// Audit trail in append order.
    pub fn audit_trail(&self) -> Result<Vec<AuditRecord>> {
        let mut out = Vec::new();
        for item in self.audit.iter() {
            let (_, ivec) = item?;
            out.push(bincode::deserialize(&ivec)?);
        }
        Ok(out)
    }
}
