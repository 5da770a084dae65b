//! Point-in-time and history questions over exposure intervals.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lineage_core::ExposureRecord;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceEventKind {
    // Ended sorts first so a close and a reopen at the same instant read in order.
    ExposureEnded,
    ExposureStarted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceEvent {
    pub at: DateTime<Utc>,
    pub event: ComplianceEventKind,
    pub asset_id: String,
    pub pii_type: String,
    pub exposure_id: Uuid,
    pub finding_count: i64,
}

pub fn active(records: Vec<ExposureRecord>) -> Vec<ExposureRecord> {
    records.into_iter().filter(|r| r.is_open()).collect()
}

pub fn at(records: Vec<ExposureRecord>, t: DateTime<Utc>) -> Vec<ExposureRecord> {
    records.into_iter().filter(|r| r.covers(t)).collect()
}

/// Total exposed time for one PII type, summed over its intervals.
pub fn duration(records: &[ExposureRecord], pii_type: &str, now: DateTime<Utc>) -> Duration {
    records
        .iter()
        .filter(|r| r.key.pii_type == pii_type)
        .fold(Duration::zero(), |acc, r| acc + r.duration(now))
}

pub fn compliant_at(records: &[ExposureRecord], t: DateTime<Utc>) -> bool {
    !records.iter().any(|r| r.covers(t))
}

pub fn timeline(records: &[ExposureRecord]) -> Vec<ComplianceEvent> {
    let mut events = Vec::with_capacity(records.len() * 2);
    for r in records {
        let event = |at, event| ComplianceEvent {
            at,
            event,
            asset_id: r.key.asset_id.clone(),
            pii_type: r.key.pii_type.clone(),
            exposure_id: r.id,
            finding_count: r.finding_count,
        };
        events.push(event(r.since, ComplianceEventKind::ExposureStarted));
        if let Some(until) = r.until {
            events.push(event(until, ComplianceEventKind::ExposureEnded));
        }
    }
    events.sort_by(|a, b| {
        a.at.cmp(&b.at)
            .then(a.event.cmp(&b.event))
            .then_with(|| a.pii_type.cmp(&b.pii_type))
    });
    events
}
