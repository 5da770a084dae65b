//! Turn a source snapshot into the writes of one pass.
//!
//! Findings are folded per (asset, PII type) pair. Each pair becomes one
//! exposure observation and contributes to the leaf and category aggregates.
//! Nodes and links come out ordered top-down so every link finds both of its
//! endpoints already written.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lineage_core::{
    AssetNode, CategoryNode, ExposureKey, ExposureObservation, HierarchyEdge, HierarchyLink,
    HierarchyShape, LineageNode, PiiTypeNode, Severity, SystemNode,
};

use crate::source::{AssetRow, SourceSnapshot};

/// Category used when a classification carries no type.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Rows left out of the graph, by reason.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkipCounts {
    pub low_confidence: usize,
    pub missing_pii_type: usize,
    pub unknown_asset: usize,
    /// NaN, infinite, or outside `[0, 1]`.
    #[serde(default)]
    pub invalid_confidence: usize,
}

#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub shape: HierarchyShape,
    /// Systems, assets, categories (4-level only), then leaves.
    pub nodes: Vec<LineageNode>,
    /// CONTAINS first, then the asset edge, then INCLUDES (4-level only).
    pub links: Vec<HierarchyLink>,
    pub observations: Vec<ExposureObservation>,
    pub skipped: SkipCounts,
}

#[derive(Default)]
struct PairAgg {
    count: i64,
    confidence_sum: f64,
    confidence_max: f64,
    explicit_risk: Option<Severity>,
    category: String,
    dpdpa_category: String,
    requires_consent: bool,
}

impl PairAgg {
    fn avg_confidence(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.confidence_sum / self.count as f64
        }
    }

    fn risk(&self, pii_type: &str) -> Severity {
        self.explicit_risk
            .unwrap_or_else(|| fallback_risk(pii_type, self.avg_confidence()))
    }
}

#[derive(Default)]
struct CategoryAgg {
    count: i64,
    confidence_sum: f64,
    risk: Option<Severity>,
    dpdpa_category: String,
    requires_consent: bool,
}

impl SyncPlan {
    pub fn build(
        snapshot: &SourceSnapshot,
        shape: HierarchyShape,
        min_confidence: f64,
        at: DateTime<Utc>,
    ) -> Self {
        let assets: BTreeMap<&str, &AssetRow> = snapshot
            .assets
            .iter()
            .map(|a| (a.stable_id.as_str(), a))
            .collect();

        let mut skipped = SkipCounts::default();
        let mut pairs: BTreeMap<(String, String), PairAgg> = BTreeMap::new();

        for finding in &snapshot.findings {
            if !(0.0..=1.0).contains(&finding.confidence) {
                skipped.invalid_confidence += 1;
                continue;
            }
            if finding.confidence < min_confidence {
                skipped.low_confidence += 1;
                continue;
            }
            let pii_type = match finding.pii_type.as_deref().map(str::trim) {
                Some(t) if !t.is_empty() => t.to_string(),
                _ => {
                    skipped.missing_pii_type += 1;
                    continue;
                }
            };
            if !assets.contains_key(finding.asset_id.as_str()) {
                skipped.unknown_asset += 1;
                continue;
            }

            let agg = pairs
                .entry((finding.asset_id.clone(), pii_type))
                .or_insert_with(|| PairAgg {
                    category: category_id(&finding.classification_type),
                    dpdpa_category: finding.dpdpa_category.clone(),
                    ..Default::default()
                });
            agg.count += 1;
            agg.confidence_sum += finding.confidence;
            agg.confidence_max = agg.confidence_max.max(finding.confidence);
            agg.requires_consent |= finding.requires_consent;
            if let Some(risk) = finding
                .risk_level
                .as_deref()
                .and_then(|r| r.parse::<Severity>().ok())
            {
                agg.explicit_risk = agg.explicit_risk.max(Some(risk));
            }
        }

        let mut nodes = Vec::new();
        let mut links = Vec::new();

        // Systems and assets.
        let mut systems: BTreeMap<String, &AssetRow> = BTreeMap::new();
        for asset in assets.values() {
            systems.entry(system_id(&asset.host)).or_insert(*asset);
        }
        for (id, asset) in &systems {
            nodes.push(LineageNode::System(SystemNode {
                id: id.clone(),
                label: host_label(&asset.host),
                host: asset.host.clone(),
                source_system: asset.source_system.clone(),
            }));
        }
        for asset in assets.values() {
            let sid = system_id(&asset.host);
            nodes.push(LineageNode::Asset(AssetNode {
                stable_id: asset.stable_id.clone(),
                name: asset.name.clone(),
                path: asset.path.clone(),
                asset_type: asset.asset_type.clone(),
                environment: asset.environment.clone(),
                owner: asset.owner.clone(),
                risk_score: asset.risk_score,
                total_findings: asset.total_findings,
                system_id: sid.clone(),
            }));
            links.push(HierarchyLink::new(
                HierarchyEdge::Contains,
                sid,
                asset.stable_id.clone(),
            ));
        }

        // Leaf and category aggregates.
        let mut leaves: BTreeMap<&str, PiiTypeNode> = BTreeMap::new();
        let mut categories: BTreeMap<&str, CategoryAgg> = BTreeMap::new();
        let mut observations = Vec::with_capacity(pairs.len());

        for ((asset_id, pii_type), agg) in &pairs {
            let risk = agg.risk(pii_type);

            let leaf = leaves.entry(pii_type.as_str()).or_insert_with(|| PiiTypeNode {
                pii_type: pii_type.clone(),
                data_category: agg.category.clone(),
                dpdpa_category: agg.dpdpa_category.clone(),
                requires_consent: false,
                count: 0,
                max_risk: risk,
                max_confidence: 0.0,
                first_detected: at,
                last_detected: at,
            });
            leaf.count += agg.count;
            leaf.max_risk = leaf.max_risk.max(risk);
            leaf.max_confidence = leaf.max_confidence.max(agg.confidence_max);
            leaf.requires_consent |= agg.requires_consent;

            let cat = categories.entry(agg.category.as_str()).or_default();
            cat.count += agg.count;
            cat.confidence_sum += agg.confidence_sum;
            cat.risk = cat.risk.max(Some(risk));
            cat.requires_consent |= agg.requires_consent;
            if cat.dpdpa_category.is_empty() {
                cat.dpdpa_category = agg.dpdpa_category.clone();
            }

            observations.push(ExposureObservation {
                key: ExposureKey::new(asset_id.clone(), pii_type.clone()),
                finding_count: agg.count,
                avg_confidence: agg.avg_confidence(),
                max_confidence: agg.confidence_max,
            });
        }

        match shape {
            HierarchyShape::ThreeLevel => {
                for (asset_id, pii_type) in pairs.keys() {
                    links.push(HierarchyLink::new(
                        HierarchyEdge::AssetContainsPii,
                        asset_id.clone(),
                        pii_type.clone(),
                    ));
                }
            }
            HierarchyShape::FourLevel => {
                for (id, cat) in &categories {
                    let avg = if cat.count == 0 {
                        0.0
                    } else {
                        cat.confidence_sum / cat.count as f64
                    };
                    nodes.push(LineageNode::Category(CategoryNode {
                        id: id.to_string(),
                        label: id.to_string(),
                        dpdpa_category: cat.dpdpa_category.clone(),
                        requires_consent: cat.requires_consent,
                        finding_count: cat.count,
                        avg_confidence: avg,
                        risk_level: cat.risk,
                    }));
                }
                let has_category: BTreeSet<(&str, &str)> = pairs
                    .iter()
                    .map(|((asset_id, _), agg)| (asset_id.as_str(), agg.category.as_str()))
                    .collect();
                for (asset_id, category) in has_category {
                    links.push(HierarchyLink::new(
                        HierarchyEdge::HasCategory,
                        asset_id,
                        category,
                    ));
                }
                let includes: BTreeSet<(&str, &str)> = pairs
                    .iter()
                    .map(|((_, pii_type), agg)| (agg.category.as_str(), pii_type.as_str()))
                    .collect();
                for (category, pii_type) in includes {
                    links.push(HierarchyLink::new(HierarchyEdge::Includes, category, pii_type));
                }
            }
        }

        nodes.extend(leaves.into_values().map(LineageNode::Leaf));

        Self {
            shape,
            nodes,
            links,
            observations,
            skipped,
        }
    }
}

/// System key for an asset host.
fn system_id(host: &str) -> String {
    SystemNode::key_for_host(&host_label(host))
}

fn host_label(host: &str) -> String {
    let host = host.trim();
    if host.is_empty() {
        "unknown".to_string()
    } else {
        host.to_string()
    }
}

fn category_id(classification_type: &str) -> String {
    let t = classification_type.trim();
    if t.is_empty() {
        UNCATEGORIZED.to_string()
    } else {
        t.to_string()
    }
}

/// Risk for a PII type when no classification carried an explicit level.
///
/// Government and financial identifiers start at the top, contact and
/// secondary identifiers one below, everything else at the bottom. Weak
/// average confidence lowers the score by one, strong confidence raises it.
pub fn fallback_risk(pii_type: &str, avg_confidence: f64) -> Severity {
    let base: i64 = match pii_type {
        "IN_AADHAAR" | "IN_PAN" | "IN_PASSPORT" | "CREDIT_CARD" | "IN_BANK_ACCOUNT" => 3,
        "IN_DRIVING_LICENSE" | "IN_VOTER_ID" | "IN_UPI" | "IN_PHONE" | "EMAIL_ADDRESS" => 2,
        _ => 1,
    };
    let score = if avg_confidence < 0.65 {
        base - 1
    } else if avg_confidence > 0.85 {
        base + 1
    } else {
        base
    };
    match score {
        s if s >= 3 => Severity::Critical,
        2 => Severity::High,
        1 => Severity::Medium,
        _ => Severity::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ClassifiedFinding;
    use chrono::TimeZone;

    fn asset(id: &str, host: &str) -> AssetRow {
        AssetRow {
            stable_id: id.to_string(),
            name: format!("{id}.csv"),
            host: host.to_string(),
            source_system: "smb".to_string(),
            ..Default::default()
        }
    }

    fn finding(id: &str, asset: &str, category: &str, pii: Option<&str>, conf: f64) -> ClassifiedFinding {
        ClassifiedFinding {
            finding_id: id.to_string(),
            asset_id: asset.to_string(),
            classification_type: category.to_string(),
            pii_type: pii.map(str::to_string),
            dpdpa_category: "Sensitive".to_string(),
            confidence: conf,
            ..Default::default()
        }
    }

    fn snapshot() -> SourceSnapshot {
        SourceSnapshot {
            assets: vec![asset("a1", "files01"), asset("a2", "files01"), asset("a3", "db01")],
            findings: vec![
                finding("f1", "a1", "Identity", Some("IN_AADHAAR"), 0.8),
                finding("f2", "a1", "Identity", Some("IN_AADHAAR"), 0.9),
                finding("f3", "a2", "Identity", Some("IN_AADHAAR"), 0.7),
                finding("f4", "a3", "Financial", Some("IN_PAN"), 0.6),
                finding("f5", "a3", "Financial", Some("IN_PAN"), 0.3),
                finding("f6", "a3", "Contact", None, 0.9),
                finding("f7", "ghost", "Contact", Some("EMAIL_ADDRESS"), 0.9),
            ],
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_skip_counts() {
        let plan = SyncPlan::build(&snapshot(), HierarchyShape::FourLevel, 0.45, at());
        assert_eq!(
            plan.skipped,
            SkipCounts {
                low_confidence: 1,
                missing_pii_type: 1,
                unknown_asset: 1,
                invalid_confidence: 0,
            }
        );
    }

    #[test]
    fn test_malformed_confidence_is_skipped() {
        let mut snap = snapshot();
        snap.findings.push(finding("f8", "a1", "Identity", Some("IN_AADHAAR"), f64::NAN));
        snap.findings.push(finding("f9", "a1", "Identity", Some("IN_AADHAAR"), f64::INFINITY));
        snap.findings.push(finding("f10", "a2", "Identity", Some("IN_AADHAAR"), 1.5));

        let plan = SyncPlan::build(&snap, HierarchyShape::FourLevel, 0.45, at());
        assert_eq!(plan.skipped.invalid_confidence, 3);
        assert_eq!(plan.skipped.low_confidence, 1);
        for node in &plan.nodes {
            assert!(node.validate(HierarchyShape::FourLevel).is_ok(), "{node:?}");
        }
        let a1 = plan
            .observations
            .iter()
            .find(|o| o.key.asset_id == "a1" && o.key.pii_type == "IN_AADHAAR")
            .unwrap();
        assert_eq!(a1.finding_count, 2);
        assert!(a1.avg_confidence.is_finite());
    }

    #[test]
    fn test_observations_per_pair() {
        let plan = SyncPlan::build(&snapshot(), HierarchyShape::FourLevel, 0.45, at());
        let keys: Vec<(&str, &str)> = plan
            .observations
            .iter()
            .map(|o| (o.key.asset_id.as_str(), o.key.pii_type.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![("a1", "IN_AADHAAR"), ("a2", "IN_AADHAAR"), ("a3", "IN_PAN")]
        );
        let a1 = &plan.observations[0];
        assert_eq!(a1.finding_count, 2);
        assert!((a1.avg_confidence - 0.85).abs() < 1e-9);
        assert_eq!(a1.max_confidence, 0.9);
    }

    #[test]
    fn test_four_level_nodes_are_top_down() {
        let plan = SyncPlan::build(&snapshot(), HierarchyShape::FourLevel, 0.45, at());
        let order: Vec<&str> = plan
            .nodes
            .iter()
            .map(|n| match n {
                LineageNode::System(_) => "system",
                LineageNode::Asset(_) => "asset",
                LineageNode::Category(_) => "category",
                LineageNode::Leaf(_) => "leaf",
            })
            .collect();
        assert_eq!(
            order,
            vec!["system", "system", "asset", "asset", "asset", "category", "category", "leaf", "leaf"]
        );

        let leaf = plan
            .nodes
            .iter()
            .find_map(|n| match n {
                LineageNode::Leaf(l) if l.pii_type == "IN_AADHAAR" => Some(l),
                _ => None,
            })
            .unwrap();
        assert_eq!(leaf.count, 3);
        assert_eq!(leaf.max_confidence, 0.9);
        assert_eq!(leaf.data_category, "Identity");
        assert_eq!(leaf.first_detected, at());
    }

    #[test]
    fn test_links_per_shape() {
        let four = SyncPlan::build(&snapshot(), HierarchyShape::FourLevel, 0.45, at());
        let edges: Vec<HierarchyEdge> = four.links.iter().map(|l| l.edge).collect();
        assert_eq!(edges.iter().filter(|e| **e == HierarchyEdge::Contains).count(), 3);
        assert_eq!(edges.iter().filter(|e| **e == HierarchyEdge::HasCategory).count(), 3);
        assert_eq!(edges.iter().filter(|e| **e == HierarchyEdge::Includes).count(), 2);
        assert!(four.links.iter().all(|l| l.validate(HierarchyShape::FourLevel).is_ok()));

        let three = SyncPlan::build(&snapshot(), HierarchyShape::ThreeLevel, 0.45, at());
        assert!(three
            .nodes
            .iter()
            .all(|n| !matches!(n, LineageNode::Category(_))));
        assert_eq!(
            three
                .links
                .iter()
                .filter(|l| l.edge == HierarchyEdge::AssetContainsPii)
                .count(),
            3
        );
        assert!(three.links.iter().all(|l| l.validate(HierarchyShape::ThreeLevel).is_ok()));
    }

    #[test]
    fn test_system_key_from_host() {
        let mut snap = snapshot();
        snap.assets.push(asset("a4", ""));
        let plan = SyncPlan::build(&snap, HierarchyShape::FourLevel, 0.45, at());
        let ids: Vec<&str> = plan
            .nodes
            .iter()
            .filter_map(|n| match n {
                LineageNode::System(s) => Some(s.id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["system-db01", "system-files01", "system-unknown"]);
    }

    #[test]
    fn test_explicit_risk_beats_fallback() {
        let mut snap = snapshot();
        snap.findings[0].risk_level = Some("Low".to_string());
        snap.findings[1].risk_level = Some("medium".to_string());
        let plan = SyncPlan::build(&snap, HierarchyShape::FourLevel, 0.45, at());
        let cat = plan
            .nodes
            .iter()
            .find_map(|n| match n {
                LineageNode::Category(c) if c.id == "Identity" => Some(c),
                _ => None,
            })
            .unwrap();
        // a2 falls back: IN_AADHAAR at 0.7 stays at base 3.
        assert_eq!(cat.risk_level, Some(Severity::Critical));
        assert_eq!(cat.finding_count, 3);
    }

    #[test]
    fn test_fallback_risk_table() {
        assert_eq!(fallback_risk("IN_AADHAAR", 0.7), Severity::Critical);
        assert_eq!(fallback_risk("IN_AADHAAR", 0.5), Severity::High);
        assert_eq!(fallback_risk("EMAIL_ADDRESS", 0.7), Severity::High);
        assert_eq!(fallback_risk("EMAIL_ADDRESS", 0.9), Severity::Critical);
        assert_eq!(fallback_risk("IN_IFSC", 0.7), Severity::Medium);
        assert_eq!(fallback_risk("SOMETHING_ELSE", 0.5), Severity::Low);
    }

    #[test]
    fn test_blank_classification_type_is_uncategorized() {
        let snap = SourceSnapshot {
            assets: vec![asset("a1", "files01")],
            findings: vec![finding("f1", "a1", " ", Some("IN_PHONE"), 0.7)],
        };
        let plan = SyncPlan::build(&snap, HierarchyShape::FourLevel, 0.45, at());
        assert!(plan.links.iter().any(|l| l.edge == HierarchyEdge::Includes
            && l.parent.key == UNCATEGORIZED
            && l.child.key == "IN_PHONE"));
    }
}
