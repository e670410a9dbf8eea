//! Deterministic pairwise correlation scoring.
//!
//! Every term is normalized to [0,1] and the weighted sum is scaled by a
//! source-reliability multiplier, so the same pair of signals always
//! produces the same score regardless of arrival order or reprocessing.

use crate::config::EngineConfig;
use crate::signal::{symptoms, Signal};
use crate::utils::geo::haversine_km;

/// Scoring parameters lifted out of `EngineConfig` once at engine
/// construction so the hot path never touches configuration plumbing.
#[derive(Debug, Clone, Copy)]
pub struct ScoreParams {
    pub temporal_window_hours: f64,
    pub spatial_threshold_km: f64,
    pub partial_symptom_score: f64,
    pub w_temporal: f64,
    pub w_spatial: f64,
    pub w_symptom: f64,
    pub w_severity: f64,
}

impl From<&EngineConfig> for ScoreParams {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            temporal_window_hours: cfg.temporal_window_hours,
            spatial_threshold_km: cfg.spatial_threshold_km,
            partial_symptom_score: cfg.partial_symptom_score,
            w_temporal: cfg.w_temporal,
            w_spatial: cfg.w_spatial,
            w_symptom: cfg.w_symptom,
            w_severity: cfg.w_severity,
        }
    }
}

/// Raw weighted score between two signals, before confidence weighting.
pub fn raw_pair_score(a: &Signal, b: &Signal, p: &ScoreParams) -> f64 {
    let dt_hours = (a.observed_at - b.observed_at).num_seconds().abs() as f64 / 3600.0;
    let temporal = (1.0 - dt_hours / p.temporal_window_hours).max(0.0);

    let dist_km = haversine_km(a.location, b.location);
    let spatial = (1.0 - dist_km / p.spatial_threshold_km).max(0.0);

    let symptom = if a.symptom == b.symptom {
        1.0
    } else if symptoms::same_category(&a.symptom, &b.symptom) {
        p.partial_symptom_score
    } else {
        0.0
    };

    let severity = 1.0 - (a.severity - b.severity).abs();

    p.w_temporal * temporal + p.w_spatial * spatial + p.w_symptom * symptom + p.w_severity * severity
}

/// Source-reliability multiplier: a zero-confidence signal can at most
/// contribute half its raw score, a full-confidence signal passes the
/// raw score unchanged.
pub fn confidence_multiplier(confidence: f64) -> f64 {
    0.5 + 0.5 * confidence
}

/// Pairwise score with symmetric confidence weighting (the less
/// reliable member of the pair bounds the pair's contribution).
pub fn pair_score(a: &Signal, b: &Signal, p: &ScoreParams) -> f64 {
    raw_pair_score(a, b, p) * confidence_multiplier(a.confidence.min(b.confidence))
}

/// Mean pairwise score across all member pairs. Zero until the set has
/// at least one pair, so singleton clusters never materialize.
pub fn mean_pairwise_score(members: &[Signal], p: &ScoreParams) -> f64 {
    if members.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            total += pair_score(&members[i], &members[j], p);
            pairs += 1;
        }
    }
    (total / pairs as f64).clamp(0.0, 1.0)
}
