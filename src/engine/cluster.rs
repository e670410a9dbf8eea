//! Transient working sets of signals hypothesized to describe one
//! real-world event. Owned exclusively by the correlation engine.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::engine::scoring::{mean_pairwise_score, ScoreParams};
use crate::signal::{Signal, SignalSource};
use crate::utils::geo::Location;

pub type ClusterId = u64;

#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub members: Vec<Signal>,
    /// Member identities, for duplicate rejection.
    identities: HashSet<String>,
    /// Wall-clock receipt time when the cluster was opened; only used
    /// for the age cap, never for correlation math.
    pub opened_at: DateTime<Utc>,
    /// Earliest member observed_at; the window cutoff applies to this.
    pub envelope_start: DateTime<Utc>,
    /// Latest member observed_at.
    pub envelope_end: DateTime<Utc>,
    pub centroid: Location,
    /// Mean pairwise score across all member pairs.
    pub aggregate_score: f64,
    /// Fixed at first materialization; later updates reuse it.
    pub fused_id: Option<String>,
    pub closed: bool,
}

impl Cluster {
    pub fn new(id: ClusterId, seed: Signal, opened_at: DateTime<Utc>) -> Self {
        let mut identities = HashSet::new();
        identities.insert(seed.identity());
        Self {
            id,
            opened_at,
            envelope_start: seed.observed_at,
            envelope_end: seed.observed_at,
            centroid: seed.location,
            aggregate_score: 0.0,
            fused_id: None,
            closed: false,
            identities,
            members: vec![seed],
        }
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.identities.contains(identity)
    }

    /// Add a member, grow the envelope, and recompute the aggregate.
    pub fn add(&mut self, signal: Signal, params: &ScoreParams) {
        self.identities.insert(signal.identity());
        if signal.observed_at < self.envelope_start {
            self.envelope_start = signal.observed_at;
        }
        if signal.observed_at > self.envelope_end {
            self.envelope_end = signal.observed_at;
        }
        self.members.push(signal);
        self.recompute_centroid();
        self.aggregate_score = mean_pairwise_score(&self.members, params);
    }

    fn recompute_centroid(&mut self) {
        let n = self.members.len() as f64;
        let lat = self.members.iter().map(|s| s.location.lat).sum::<f64>() / n;
        let lng = self.members.iter().map(|s| s.location.lng).sum::<f64>() / n;
        self.centroid = Location::new(lat, lng);
    }

    pub fn distinct_sources(&self) -> usize {
        self.members
            .iter()
            .map(|s| s.source)
            .collect::<HashSet<SignalSource>>()
            .len()
    }

    /// A synthetic member at the centroid, used to score a candidate
    /// signal against the cluster as a whole.
    pub fn centroid_signal(&self) -> Signal {
        // Symptom and severity follow the most recent member; time is
        // the envelope midpoint.
        let latest = self
            .members
            .iter()
            .max_by_key(|s| s.observed_at)
            .expect("cluster is never empty");
        let mid = self.envelope_start + (self.envelope_end - self.envelope_start) / 2;
        Signal {
            source: latest.source,
            observed_at: mid,
            location: self.centroid,
            symptom: latest.symptom.clone(),
            severity: latest.severity,
            confidence: 1.0,
            metadata: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn signal(minutes: i64, lat: f64, symptom: &str) -> Signal {
        Signal {
            source: SignalSource::CommunityReport,
            observed_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
                + chrono::Duration::minutes(minutes),
            location: Location::new(lat, 40.31),
            symptom: symptom.to_string(),
            severity: 0.7,
            confidence: 0.9,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn envelope_grows_with_members() {
        let params = ScoreParams::from(&EngineConfig::default());
        let mut cluster = Cluster::new(1, signal(30, 0.05, "cholera"), Utc::now());
        cluster.add(signal(0, 0.06, "cholera"), &params);
        cluster.add(signal(60, 0.04, "cholera"), &params);

        assert_eq!(cluster.members.len(), 3);
        assert!(cluster.envelope_start < cluster.envelope_end);
        assert!((cluster.centroid.lat - 0.05).abs() < 1e-9);
        assert!(cluster.aggregate_score > 0.0);
    }

    #[test]
    fn duplicate_identities_are_detectable() {
        let seed = signal(0, 0.05, "cholera");
        let identity = seed.identity();
        let cluster = Cluster::new(1, seed, Utc::now());
        assert!(cluster.contains(&identity));
        assert!(!cluster.contains("other"));
    }

    #[test]
    fn distinct_sources_counts_source_types() {
        let params = ScoreParams::from(&EngineConfig::default());
        let mut cluster = Cluster::new(1, signal(0, 0.05, "cholera"), Utc::now());
        let mut clinic = signal(10, 0.05, "cholera");
        clinic.source = SignalSource::ClinicalRecord;
        cluster.add(clinic, &params);
        assert_eq!(cluster.distinct_sources(), 2);
    }
}
