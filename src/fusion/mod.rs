//! Fusion record builder: converts a correlated cluster into an
//! immutable, deterministically-identified `FusedEvent`.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::engine::cluster::Cluster;
use crate::signal::SignalSource;
use crate::utils::geo::Location;
use chrono::{DateTime, Utc};

/// Confidence tier assigned to a fused event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Unverified,
    Possible,
    Probable,
    Confirmed,
    Entangled,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unverified => "UNVERIFIED",
            Self::Possible => "POSSIBLE",
            Self::Probable => "PROBABLE",
            Self::Confirmed => "CONFIRMED",
            Self::Entangled => "ENTANGLED",
        };
        f.write_str(s)
    }
}

/// Storage/lifecycle stage of a fused event's underlying data.
/// Transitions only move forward: HOT -> COLD -> SHREDDED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionTier {
    Hot,
    Cold,
    Shredded,
}

impl fmt::Display for RetentionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hot => "HOT",
            Self::Cold => "COLD",
            Self::Shredded => "SHREDDED",
        };
        f.write_str(s)
    }
}

/// Durable output of successful correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedEvent {
    pub event_id: String,
    pub correlation_score: f64,
    pub verification_status: VerificationStatus,
    pub primary_source: SignalSource,
    pub contributing_sources: Vec<SignalSource>,
    pub canonical_location: Location,
    pub canonical_symptom: String,
    pub severity: f64,
    pub created_at: DateTime<Utc>,
    pub retention_tier: RetentionTier,
}

/// Classify a cluster's aggregate score into a verification status.
pub fn classify(aggregate_score: f64, distinct_sources: usize) -> VerificationStatus {
    if aggregate_score >= 0.9 {
        if distinct_sources >= 2 {
            VerificationStatus::Entangled
        } else {
            VerificationStatus::Confirmed
        }
    } else if aggregate_score >= 0.7 {
        VerificationStatus::Probable
    } else if aggregate_score >= 0.4 {
        VerificationStatus::Possible
    } else {
        VerificationStatus::Unverified
    }
}

/// Deterministic event id: SHA-256 over the sorted member identities.
/// Order-independent, so re-fusing the same membership after a crash
/// yields the same id.
pub fn event_id(cluster: &Cluster) -> String {
    let mut identities: Vec<String> = cluster.members.iter().map(|s| s.identity()).collect();
    identities.sort();
    let mut hasher = Sha256::new();
    for identity in &identities {
        hasher.update(identity.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Materialize a fused event from a cluster. Referentially transparent:
/// an identical membership set always yields an identical event, which
/// is what permits safe reprocessing after a crash. Safe to call
/// concurrently for the same cluster; duplicate results converge.
pub fn materialize(cluster: &Cluster) -> FusedEvent {
    // Primary source: highest confidence, ties broken by most recent
    // observed_at. max_by with this ordering picks the last maximum, so
    // sort keys are compared as (confidence, observed_at).
    let primary = cluster
        .members
        .iter()
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.observed_at.cmp(&b.observed_at))
        })
        .expect("cluster is never empty");

    let mut contributing: Vec<SignalSource> =
        cluster.members.iter().map(|s| s.source).collect();
    contributing.sort_by_key(|s| s.to_string());
    contributing.dedup();

    let severity =
        cluster.members.iter().map(|s| s.severity).sum::<f64>() / cluster.members.len() as f64;

    FusedEvent {
        event_id: event_id(cluster),
        correlation_score: cluster.aggregate_score.clamp(0.0, 1.0),
        verification_status: classify(cluster.aggregate_score, cluster.distinct_sources()),
        primary_source: primary.source,
        contributing_sources: contributing,
        canonical_location: primary.location,
        canonical_symptom: primary.symptom.clone(),
        severity,
        // Derived from membership, not wall clock, to keep materialize pure.
        created_at: cluster.envelope_end,
        retention_tier: RetentionTier::Hot,
    }
}
