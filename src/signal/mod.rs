//! Signal types and the normalizer that turns raw observations into
//! canonical, immutable `Signal` values.

pub mod symptoms;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};
use crate::utils::geo::Location;

/// Origin of one raw observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalSource {
    CommunityReport,
    ClinicalRecord,
    VoiceChannel,
    IoTSensor,
}

impl SignalSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "community_report" | "CommunityReport" => Some(Self::CommunityReport),
            "clinical_record" | "ClinicalRecord" => Some(Self::ClinicalRecord),
            "voice_channel" | "VoiceChannel" => Some(Self::VoiceChannel),
            "iot_sensor" | "IoTSensor" => Some(Self::IoTSensor),
            _ => None,
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CommunityReport => "community_report",
            Self::ClinicalRecord => "clinical_record",
            Self::VoiceChannel => "voice_channel",
            Self::IoTSensor => "iot_sensor",
        };
        f.write_str(s)
    }
}

/// One canonical observation. Immutable once normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub source: SignalSource,
    /// Source-supplied observation time, not receipt time.
    pub observed_at: DateTime<Utc>,
    pub location: Location,
    pub symptom: String,
    pub severity: f64,
    /// Source-intrinsic reliability in [0,1].
    pub confidence: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Signal {
    /// Stable identity used for dedup and for the deterministic
    /// `event_id`: source + observed_at + rounded location + symptom.
    pub fn identity(&self) -> String {
        let (lat, lng) = self.location.rounded();
        format!(
            "{}|{}|{:.4}|{:.4}|{}",
            self.source,
            self.observed_at.to_rfc3339(),
            lat,
            lng,
            self.symptom
        )
    }
}

/// Unvalidated inbound observation as it arrives off the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawObservation {
    pub source: Option<String>,
    pub observed_at: Option<String>,
    pub location: Option<RawLocation>,
    pub symptom: Option<String>,
    pub severity: Option<f64>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawLocation {
    pub lat: f64,
    pub lng: f64,
}

/// Validate and canonicalize a raw observation. Pure: no side effects
/// beyond validation. Out-of-range values are rejected, never clamped.
pub fn normalize(raw: RawObservation) -> Result<Signal> {
    let source_str = raw
        .source
        .ok_or_else(|| Error::ValidationError("source is required".to_string()))?;
    let source = SignalSource::parse(&source_str)
        .ok_or_else(|| Error::ValidationError(format!("unknown source: {}", source_str)))?;

    let observed_str = raw
        .observed_at
        .ok_or_else(|| Error::ValidationError("observed_at is required".to_string()))?;
    let observed_at = DateTime::parse_from_rfc3339(&observed_str)
        .map_err(|e| Error::ValidationError(format!("malformed observed_at: {}", e)))?
        .with_timezone(&Utc);

    let loc = raw
        .location
        .ok_or_else(|| Error::ValidationError("location is required".to_string()))?;
    let location = Location::new(loc.lat, loc.lng);
    if !location.is_valid() {
        return Err(Error::ValidationError(format!(
            "location out of range: ({}, {})",
            loc.lat, loc.lng
        )));
    }

    let symptom = raw
        .symptom
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::ValidationError("symptom is required".to_string()))?;

    let severity = raw
        .severity
        .ok_or_else(|| Error::ValidationError("severity is required".to_string()))?;
    if !(0.0..=1.0).contains(&severity) || !severity.is_finite() {
        return Err(Error::ValidationError(format!(
            "severity must be within [0,1], got {}",
            severity
        )));
    }

    let confidence = raw
        .confidence
        .ok_or_else(|| Error::ValidationError("confidence is required".to_string()))?;
    if !(0.0..=1.0).contains(&confidence) || !confidence.is_finite() {
        return Err(Error::ValidationError(format!(
            "confidence must be within [0,1], got {}",
            confidence
        )));
    }

    Ok(Signal {
        source,
        observed_at,
        location,
        symptom,
        severity,
        confidence,
        metadata: raw.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn valid_raw() -> RawObservation {
        RawObservation {
            source: Some("community_report".to_string()),
            observed_at: Some("2026-03-01T08:30:00Z".to_string()),
            location: Some(RawLocation { lat: 0.0512, lng: 40.3129 }),
            symptom: Some(" Diarrhea ".to_string()),
            severity: Some(0.7),
            confidence: Some(0.8),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn normalize_canonicalizes_symptom() {
        let sig = normalize(valid_raw()).unwrap();
        assert_eq!(sig.symptom, "diarrhea");
        assert_eq!(sig.source, SignalSource::CommunityReport);
    }

    #[test]
    fn missing_location_is_rejected() {
        let mut raw = valid_raw();
        raw.location = None;
        assert_matches!(normalize(raw), Err(Error::ValidationError(_)));
    }

    #[test]
    fn malformed_observed_at_is_rejected() {
        let mut raw = valid_raw();
        raw.observed_at = Some("yesterday".to_string());
        assert_matches!(normalize(raw), Err(Error::ValidationError(_)));
    }

    #[test]
    fn out_of_range_severity_is_rejected_not_clamped() {
        let mut raw = valid_raw();
        raw.severity = Some(1.3);
        assert_matches!(normalize(raw), Err(Error::ValidationError(_)));

        let mut raw = valid_raw();
        raw.confidence = Some(-0.1);
        assert_matches!(normalize(raw), Err(Error::ValidationError(_)));
    }

    #[test]
    fn identity_is_stable_across_metadata() {
        let a = normalize(valid_raw()).unwrap();
        let mut raw = valid_raw();
        raw.metadata.insert("device".to_string(), serde_json::json!("pump-7"));
        let b = normalize(raw).unwrap();
        assert_eq!(a.identity(), b.identity());
    }
}
