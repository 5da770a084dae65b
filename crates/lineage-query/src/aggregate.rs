//! Per-PII-type rollups, computed live from hierarchy paths and exposure
//! intervals.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use lineage_core::{ExposureRecord, HierarchyPath, HierarchyShape, Severity};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PiiTypeAggregation {
    pub pii_type: String,
    /// Sum of `finding_count` over every interval on this type.
    pub total_findings: i64,
    pub max_risk: Option<Severity>,
    pub max_confidence: f64,
    pub affected_assets: usize,
    pub affected_systems: usize,
    pub categories: Vec<String>,
    pub open_exposures: usize,
}

#[derive(Default)]
struct Acc {
    max_risk: Option<Severity>,
    max_confidence: f64,
    assets: BTreeSet<String>,
    systems: BTreeSet<String>,
    categories: BTreeSet<String>,
}

pub fn aggregate_by_pii_type(
    paths: &[HierarchyPath],
    exposures: &[ExposureRecord],
    shape: HierarchyShape,
) -> Vec<PiiTypeAggregation> {
    let exposed: HashSet<(&str, &str)> = exposures
        .iter()
        .map(|e| (e.key.asset_id.as_str(), e.key.pii_type.as_str()))
        .collect();

    let mut by_type: BTreeMap<String, Acc> = BTreeMap::new();
    for path in paths {
        let Some(leaf) = &path.leaf else { continue };
        let acc = by_type.entry(leaf.key.clone()).or_default();
        acc.max_risk = acc.max_risk.max(leaf.max_risk());
        acc.max_confidence = acc
            .max_confidence
            .max(leaf.f64_prop("max_confidence").unwrap_or_default());

        match (&path.category, shape) {
            (Some(category), _) => {
                acc.categories.insert(category.label.clone());
            }
            (None, HierarchyShape::ThreeLevel) => {
                if let Some(c) = leaf.str_prop("data_category").filter(|c| !c.is_empty()) {
                    acc.categories.insert(c.to_string());
                }
            }
            (None, HierarchyShape::FourLevel) => {}
        }

        let Some(asset) = &path.asset else { continue };
        // A shared DataCategory fans out to every asset holding it; only
        // assets with an interval on this type are affected.
        if shape == HierarchyShape::FourLevel
            && !exposed.contains(&(asset.key.as_str(), leaf.key.as_str()))
        {
            continue;
        }
        acc.assets.insert(asset.key.clone());
        acc.systems.insert(path.system.key.clone());
    }

    let mut totals: BTreeMap<&str, (i64, usize)> = BTreeMap::new();
    for e in exposures {
        let t = totals.entry(e.key.pii_type.as_str()).or_default();
        t.0 += e.finding_count;
        if e.is_open() {
            t.1 += 1;
        }
    }

    let mut rows: Vec<PiiTypeAggregation> = by_type
        .into_iter()
        .map(|(pii_type, acc)| {
            let (total_findings, open_exposures) =
                totals.get(pii_type.as_str()).copied().unwrap_or_default();
            PiiTypeAggregation {
                pii_type,
                total_findings,
                max_risk: acc.max_risk,
                max_confidence: acc.max_confidence,
                affected_assets: acc.assets.len(),
                affected_systems: acc.systems.len(),
                categories: acc.categories.into_iter().collect(),
                open_exposures,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.total_findings
            .cmp(&a.total_findings)
            .then_with(|| a.pii_type.cmp(&b.pii_type))
    });
    rows
}
