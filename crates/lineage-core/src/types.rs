//! Identifiers, severities, and hierarchy vocabulary for the lineage graph.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// ── Tenant ────────────────────────────────────────────────────────

/// Every node and edge in the lineage graph belongs to a tenant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single sync pass. Stamped on exposure intervals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PassId(pub Uuid);

impl PassId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PassId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Severity ──────────────────────────────────────────────────────

/// Risk label attached to classifications. Ordered Low < Medium < High < Critical.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric rank stored next to the label so Cypher can compare severities.
    pub fn rank(self) -> i64 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        match rank {
            i64::MIN..=1 => Self::Low,
            2 => Self::Medium,
            3 => Self::High,
            _ => Self::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ValidationError::Unknown {
                what: "severity",
                value: s.to_string(),
            }),
        }
    }
}

// ── Hierarchy shape ───────────────────────────────────────────────

/// The canonical set of hierarchy levels a graph is written with.
///
/// - `ThreeLevel`: System → Asset → PII_Category
/// - `FourLevel`: System → Asset → DataCategory → PIIType
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyShape {
    ThreeLevel,
    #[default]
    FourLevel,
}

impl HierarchyShape {
    /// The node kind that represents a specific PII type in this shape.
    pub fn leaf_kind(self) -> NodeKind {
        match self {
            Self::ThreeLevel => NodeKind::PiiCategory,
            Self::FourLevel => NodeKind::PiiType,
        }
    }

    /// The edge leaving an Asset towards the next level down.
    pub fn asset_edge(self) -> HierarchyEdge {
        match self {
            Self::ThreeLevel => HierarchyEdge::AssetContainsPii,
            Self::FourLevel => HierarchyEdge::HasCategory,
        }
    }

    pub fn kinds(self) -> &'static [NodeKind] {
        match self {
            Self::ThreeLevel => &[NodeKind::System, NodeKind::Asset, NodeKind::PiiCategory],
            Self::FourLevel => &[
                NodeKind::System,
                NodeKind::Asset,
                NodeKind::DataCategory,
                NodeKind::PiiType,
            ],
        }
    }

    pub fn edges(self) -> &'static [HierarchyEdge] {
        match self {
            Self::ThreeLevel => &[HierarchyEdge::Contains, HierarchyEdge::AssetContainsPii],
            Self::FourLevel => &[
                HierarchyEdge::Contains,
                HierarchyEdge::HasCategory,
                HierarchyEdge::Includes,
            ],
        }
    }

    pub fn has_kind(self, kind: NodeKind) -> bool {
        self.kinds().contains(&kind)
    }

    pub fn has_edge(self, edge: HierarchyEdge) -> bool {
        self.edges().contains(&edge)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ThreeLevel => "three_level",
            Self::FourLevel => "four_level",
        }
    }
}

impl fmt::Display for HierarchyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HierarchyShape {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "three_level" | "3_level" | "3" => Ok(Self::ThreeLevel),
            "four_level" | "4_level" | "4" => Ok(Self::FourLevel),
            _ => Err(ValidationError::Unknown {
                what: "hierarchy shape",
                value: s.to_string(),
            }),
        }
    }
}

// ── Node kinds ────────────────────────────────────────────────────

/// Node labels in the lineage graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    System,
    Asset,
    DataCategory,
    PiiCategory,
    PiiType,
}

impl NodeKind {
    /// Neo4j label.
    pub fn label(self) -> &'static str {
        match self {
            Self::System => "System",
            Self::Asset => "Asset",
            Self::DataCategory => "DataCategory",
            Self::PiiCategory => "PII_Category",
            Self::PiiType => "PIIType",
        }
    }

    /// Property holding the natural key. Together with `tenant_id` it is unique per label.
    pub fn key_property(self) -> &'static str {
        match self {
            Self::System | Self::DataCategory => "id",
            Self::Asset => "stable_id",
            Self::PiiCategory => "pii_type",
            Self::PiiType => "type",
        }
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, Self::PiiCategory | Self::PiiType)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Hierarchy edges ───────────────────────────────────────────────

/// Append-only containment edges between hierarchy levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HierarchyEdge {
    Contains,
    HasCategory,
    AssetContainsPii,
    Includes,
}

impl HierarchyEdge {
    /// Cypher relationship type.
    pub fn rel_type(self) -> &'static str {
        match self {
            Self::Contains => "CONTAINS",
            Self::HasCategory => "HAS_CATEGORY",
            Self::AssetContainsPii => "ASSET_CONTAINS_PII",
            Self::Includes => "INCLUDES",
        }
    }

    /// Expected (parent, child) node kinds.
    pub fn endpoints(self) -> (NodeKind, NodeKind) {
        match self {
            Self::Contains => (NodeKind::System, NodeKind::Asset),
            Self::HasCategory => (NodeKind::Asset, NodeKind::DataCategory),
            Self::AssetContainsPii => (NodeKind::Asset, NodeKind::PiiCategory),
            Self::Includes => (NodeKind::DataCategory, NodeKind::PiiType),
        }
    }
}

impl fmt::Display for HierarchyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rel_type())
    }
}

// ── Scope ─────────────────────────────────────────────────────────

/// Explicit context for every graph call: whose graph, and which shape it uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphScope {
    pub tenant_id: TenantId,
    pub shape: HierarchyShape,
}

impl GraphScope {
    pub fn new(tenant_id: TenantId, shape: HierarchyShape) -> Self {
        Self { tenant_id, shape }
    }

    pub fn leaf_kind(&self) -> NodeKind {
        self.shape.leaf_kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_critical_highest() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(
            [Severity::Medium, Severity::Critical, Severity::Low]
                .into_iter()
                .max(),
            Some(Severity::Critical)
        );
    }

    #[test]
    fn severity_rank_roundtrips() {
        for sev in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(Severity::from_rank(sev.rank()), sev);
        }
        assert_eq!(Severity::from_rank(0), Severity::Low);
    }

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!(" critical ".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn shape_parses_aliases() {
        assert_eq!(
            "3-level".parse::<HierarchyShape>().unwrap(),
            HierarchyShape::ThreeLevel
        );
        assert_eq!(
            "four_level".parse::<HierarchyShape>().unwrap(),
            HierarchyShape::FourLevel
        );
        assert!("five".parse::<HierarchyShape>().is_err());
    }

    #[test]
    fn shapes_do_not_share_leaf_or_asset_edge() {
        let three = HierarchyShape::ThreeLevel;
        let four = HierarchyShape::FourLevel;
        assert_eq!(three.leaf_kind(), NodeKind::PiiCategory);
        assert_eq!(four.leaf_kind(), NodeKind::PiiType);
        assert!(!three.has_edge(HierarchyEdge::Includes));
        assert!(!four.has_edge(HierarchyEdge::AssetContainsPii));
        assert!(three.has_edge(HierarchyEdge::Contains) && four.has_edge(HierarchyEdge::Contains));
    }

    #[test]
    fn shape_serializes_snake_case() {
        let json = serde_json::to_string(&HierarchyShape::ThreeLevel).unwrap();
        assert_eq!(json, "\"three_level\"");
    }

    #[test]
    fn edge_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&HierarchyEdge::AssetContainsPii).unwrap();
        assert_eq!(json, "\"ASSET_CONTAINS_PII\"");
    }
}
