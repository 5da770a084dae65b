//! Exposure interval planning.
//!
//! Compares the currently open intervals with the pairs observed in a pass
//! and decides which intervals to open, refresh in place, or close. Pure; the
//! engine applies the result through the store.

use std::collections::{BTreeMap, BTreeSet};

use lineage_core::{ExposureKey, ExposureObservation, ExposureRecord};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Observed pairs without an open interval.
    pub open: Vec<ExposureObservation>,
    /// Observed pairs whose open interval continues.
    pub refresh: Vec<ExposureObservation>,
    /// Open intervals whose pair was not observed.
    pub close: Vec<ExposureKey>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.open.is_empty() && self.refresh.is_empty() && self.close.is_empty()
    }
}

pub fn reconcile(open: &[ExposureRecord], observed: &[ExposureObservation]) -> ReconcilePlan {
    let open_keys: BTreeSet<&ExposureKey> =
        open.iter().filter(|r| r.is_open()).map(|r| &r.key).collect();

    // Last observation wins if a pair shows up twice.
    let observed: BTreeMap<&ExposureKey, &ExposureObservation> =
        observed.iter().map(|o| (&o.key, o)).collect();

    let mut plan = ReconcilePlan::default();
    for (key, obs) in &observed {
        if open_keys.contains(key) {
            plan.refresh.push((*obs).clone());
        } else {
            plan.open.push((*obs).clone());
        }
    }
    plan.close = open_keys
        .into_iter()
        .filter(|k| !observed.contains_key(k))
        .cloned()
        .collect();
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lineage_core::PassId;

    fn obs(asset: &str, pii: &str, count: i64) -> ExposureObservation {
        ExposureObservation {
            key: ExposureKey::new(asset, pii),
            finding_count: count,
            avg_confidence: 0.8,
            max_confidence: 0.8,
        }
    }

    fn record(asset: &str, pii: &str) -> ExposureRecord {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        ExposureRecord::open(&obs(asset, pii, 1), t, PassId::new())
    }

    #[test]
    fn first_pass_opens_everything() {
        let plan = reconcile(&[], &[obs("a1", "IN_PAN", 2), obs("a1", "IN_AADHAAR", 1)]);
        assert_eq!(plan.open.len(), 2);
        assert_eq!(plan.open[0].key.pii_type, "IN_AADHAAR");
        assert!(plan.refresh.is_empty());
        assert!(plan.close.is_empty());
    }

    #[test]
    fn splits_open_refresh_close() {
        let open = vec![record("a1", "IN_PAN"), record("a2", "IN_PHONE")];
        let observed = vec![obs("a1", "IN_PAN", 4), obs("a3", "IN_PAN", 1)];

        let plan = reconcile(&open, &observed);
        assert_eq!(plan.refresh, vec![obs("a1", "IN_PAN", 4)]);
        assert_eq!(plan.open, vec![obs("a3", "IN_PAN", 1)]);
        assert_eq!(plan.close, vec![ExposureKey::new("a2", "IN_PHONE")]);
    }

    #[test]
    fn closed_records_do_not_count_as_open() {
        let mut closed = record("a1", "IN_PAN");
        closed.close(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());

        let plan = reconcile(&[closed], &[obs("a1", "IN_PAN", 1)]);
        assert_eq!(plan.open.len(), 1);
        assert!(plan.close.is_empty());
    }

    #[test]
    fn empty_pass_closes_all() {
        let open = vec![record("a1", "IN_PAN"), record("a1", "IN_PAN")];
        let plan = reconcile(&open, &[]);
        assert_eq!(plan.close, vec![ExposureKey::new("a1", "IN_PAN")]);
        assert!(!plan.is_empty());
        assert!(reconcile(&[], &[]).is_empty());
    }
}
