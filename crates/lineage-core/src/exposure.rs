//! Exposure intervals: the temporal EXPOSES edges between assets and PII leaves.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::nodes::unit_interval;
use crate::types::{NodeKind, PassId};

/// Identity of an (asset, PII type) pair. At most one open interval exists per key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExposureKey {
    pub asset_id: String,
    pub pii_type: String,
}

impl ExposureKey {
    pub fn new(asset_id: impl Into<String>, pii_type: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            pii_type: pii_type.into(),
        }
    }
}

/// What one pass saw for a pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExposureObservation {
    pub key: ExposureKey,
    pub finding_count: i64,
    pub avg_confidence: f64,
    pub max_confidence: f64,
}

impl ExposureObservation {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key.asset_id.trim().is_empty() {
            return Err(ValidationError::EmptyKey {
                kind: NodeKind::Asset,
            });
        }
        if self.key.pii_type.trim().is_empty() {
            return Err(ValidationError::EmptyKey {
                kind: NodeKind::PiiType,
            });
        }
        if self.finding_count < 0 {
            return Err(ValidationError::NegativeCount {
                kind: NodeKind::Asset,
                key: self.key.asset_id.clone(),
                field: "finding_count",
                value: self.finding_count,
            });
        }
        unit_interval(&self.key.pii_type, "avg_confidence", self.avg_confidence)?;
        unit_interval(&self.key.pii_type, "max_confidence", self.max_confidence)
    }
}

/// One exposure window as stored on an EXPOSES edge.
///
/// `finding_count` accumulates across every pass inside the window;
/// `last_finding_count` holds the most recent pass alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExposureRecord {
    pub id: Uuid,
    pub key: ExposureKey,
    pub since: DateTime<Utc>,
    pub until: Option<DateTime<Utc>>,
    pub finding_count: i64,
    pub last_finding_count: i64,
    pub avg_confidence: f64,
    pub max_confidence: f64,
    pub observations: i64,
    pub last_seen: DateTime<Utc>,
    pub first_pass_id: String,
    pub last_pass_id: String,
}

impl ExposureRecord {
    /// Open a fresh interval seeded from the first observation.
    pub fn open(obs: &ExposureObservation, at: DateTime<Utc>, pass_id: PassId) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: obs.key.clone(),
            since: at,
            until: None,
            finding_count: obs.finding_count,
            last_finding_count: obs.finding_count,
            avg_confidence: obs.avg_confidence,
            max_confidence: obs.max_confidence,
            observations: 1,
            last_seen: at,
            first_pass_id: pass_id.to_string(),
            last_pass_id: pass_id.to_string(),
        }
    }

    /// Fold a repeat observation into this interval. `since`/`until` are untouched.
    pub fn refresh(&mut self, obs: &ExposureObservation, at: DateTime<Utc>, pass_id: PassId) {
        let n = self.observations.max(0) as f64;
        self.avg_confidence = (self.avg_confidence * n + obs.avg_confidence) / (n + 1.0);
        self.max_confidence = self.max_confidence.max(obs.max_confidence);
        self.finding_count += obs.finding_count;
        self.last_finding_count = obs.finding_count;
        self.observations += 1;
        self.last_seen = at;
        self.last_pass_id = pass_id.to_string();
    }

    /// Close the interval. Returns false (and changes nothing) if it is already closed.
    pub fn close(&mut self, at: DateTime<Utc>) -> bool {
        if self.until.is_some() {
            return false;
        }
        self.until = Some(at);
        true
    }

    pub fn is_open(&self) -> bool {
        self.until.is_none()
    }

    /// Whether the asset was exposed at `t` (half-open: since ≤ t < until).
    pub fn covers(&self, t: DateTime<Utc>) -> bool {
        self.since <= t && self.until.map_or(true, |until| t < until)
    }

    /// Length of the window; open windows run until `now`.
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        let end = self.until.unwrap_or(now);
        if end > self.since {
            end - self.since
        } else {
            Duration::zero()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(count: i64, confidence: f64) -> ExposureObservation {
        ExposureObservation {
            key: ExposureKey::new("asset-a", "NationalID"),
            finding_count: count,
            avg_confidence: confidence,
            max_confidence: confidence,
        }
    }

    #[test]
    fn refresh_updates_stats_in_place() {
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let mut rec = ExposureRecord::open(&obs(3, 0.8), t1, PassId::new());
        let id = rec.id;

        rec.refresh(&obs(5, 0.9), t2, PassId::new());

        assert_eq!(rec.id, id);
        assert_eq!(rec.since, t1);
        assert!(rec.is_open());
        assert_eq!(rec.finding_count, 8);
        assert_eq!(rec.last_finding_count, 5);
        assert!((rec.avg_confidence - 0.85).abs() < 1e-9);
        assert_eq!(rec.max_confidence, 0.9);
        assert_eq!(rec.observations, 2);
        assert_eq!(rec.last_seen, t2);
    }

    #[test]
    fn close_twice_keeps_first_until() {
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let t3 = Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap();
        let mut rec = ExposureRecord::open(&obs(1, 0.5), t1, PassId::new());

        assert!(rec.close(t2));
        assert!(!rec.close(t3));
        assert_eq!(rec.until, Some(t2));
    }

    #[test]
    fn covers_is_half_open() {
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap();
        let mut rec = ExposureRecord::open(&obs(1, 0.5), t1, PassId::new());
        rec.close(t2);

        assert!(rec.covers(t1));
        assert!(rec.covers(t1 + Duration::days(2)));
        assert!(!rec.covers(t2));
        assert!(!rec.covers(t1 - Duration::seconds(1)));
        assert_eq!(rec.duration(Utc::now()), Duration::days(4));
    }

    #[test]
    fn observation_validation() {
        assert!(obs(2, 0.7).validate().is_ok());
        assert!(obs(-2, 0.7).validate().is_err());
        assert!(obs(2, -0.1).validate().is_err());
        let mut blank = obs(1, 0.5);
        blank.key.pii_type = String::new();
        assert!(blank.validate().is_err());
    }
}
