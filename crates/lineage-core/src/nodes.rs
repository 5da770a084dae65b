//! Node types of the lineage hierarchy, hierarchy links, and read-side views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{HierarchyEdge, HierarchyShape, NodeKind, Severity};

/// A host or platform that owns data assets. Keyed by `id` (`system-<host>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemNode {
    pub id: String,
    pub label: String,
    pub host: String,
    pub source_system: String,
}

impl SystemNode {
    /// Natural key derived from the asset host.
    pub fn key_for_host(host: &str) -> String {
        format!("system-{host}")
    }
}

/// A scanned data asset (file, table, bucket object). Keyed by `stable_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetNode {
    pub stable_id: String,
    pub name: String,
    pub path: String,
    pub asset_type: String,
    pub environment: String,
    pub owner: String,
    pub risk_score: i64,
    pub total_findings: i64,
    pub system_id: String,
}

/// A classification bucket in the 4-level shape (e.g. "Identity", "Financial").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryNode {
    pub id: String,
    pub label: String,
    pub dpdpa_category: String,
    pub requires_consent: bool,
    pub finding_count: i64,
    pub avg_confidence: f64,
    pub risk_level: Option<Severity>,
}

/// The PII-type leaf (PII_Category in the 3-level shape, PIIType in the 4-level shape).
///
/// Carries running aggregates that merge across passes rather than being overwritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PiiTypeNode {
    pub pii_type: String,
    pub data_category: String,
    pub dpdpa_category: String,
    pub requires_consent: bool,
    pub count: i64,
    pub max_risk: Severity,
    pub max_confidence: f64,
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
}

impl PiiTypeNode {
    /// Fold an incoming observation into the stored aggregate.
    ///
    /// count accumulates, risk and confidence keep their maximum, `last_detected`
    /// follows the incoming value and `first_detected` never moves.
    pub fn merge(&mut self, incoming: &PiiTypeNode) {
        self.count += incoming.count;
        self.max_risk = self.max_risk.max(incoming.max_risk);
        self.max_confidence = self.max_confidence.max(incoming.max_confidence);
        self.last_detected = incoming.last_detected;
        self.data_category = incoming.data_category.clone();
        self.dpdpa_category = incoming.dpdpa_category.clone();
        self.requires_consent = incoming.requires_consent;
    }
}

/// Any node the upsert layer accepts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "node_type")]
pub enum LineageNode {
    System(SystemNode),
    Asset(AssetNode),
    Category(CategoryNode),
    Leaf(PiiTypeNode),
}

impl LineageNode {
    /// The label this node is written under for the given shape.
    pub fn kind(&self, shape: HierarchyShape) -> NodeKind {
        match self {
            Self::System(_) => NodeKind::System,
            Self::Asset(_) => NodeKind::Asset,
            Self::Category(_) => NodeKind::DataCategory,
            Self::Leaf(_) => shape.leaf_kind(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::System(n) => &n.id,
            Self::Asset(n) => &n.stable_id,
            Self::Category(n) => &n.id,
            Self::Leaf(n) => &n.pii_type,
        }
    }

    pub fn node_ref(&self, shape: HierarchyShape) -> NodeRef {
        NodeRef::new(self.kind(shape), self.key())
    }

    /// Reject malformed aggregate input before it is written.
    pub fn validate(&self, shape: HierarchyShape) -> Result<(), ValidationError> {
        let kind = self.kind(shape);
        if !shape.has_kind(kind) {
            return Err(ValidationError::NodeNotInShape { kind, shape });
        }
        if self.key().trim().is_empty() {
            return Err(ValidationError::EmptyKey { kind });
        }

        let key = self.key();
        match self {
            Self::System(_) => Ok(()),
            Self::Asset(a) => {
                non_negative(kind, key, "risk_score", a.risk_score)?;
                non_negative(kind, key, "total_findings", a.total_findings)
            }
            Self::Category(c) => {
                non_negative(kind, key, "finding_count", c.finding_count)?;
                unit_interval(key, "avg_confidence", c.avg_confidence)
            }
            Self::Leaf(l) => {
                non_negative(kind, key, "count", l.count)?;
                unit_interval(key, "max_confidence", l.max_confidence)
            }
        }
    }
}

fn non_negative(
    kind: NodeKind,
    key: &str,
    field: &'static str,
    value: i64,
) -> Result<(), ValidationError> {
    if value < 0 {
        return Err(ValidationError::NegativeCount {
            kind,
            key: key.to_string(),
            field,
            value,
        });
    }
    Ok(())
}

pub(crate) fn unit_interval(
    key: &str,
    field: &'static str,
    value: f64,
) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::ConfidenceOutOfRange {
            key: key.to_string(),
            field,
            value,
        });
    }
    Ok(())
}

// ── Links ─────────────────────────────────────────────────────────

/// A node identified by label and natural key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub key: String,
}

impl NodeRef {
    pub fn new(kind: NodeKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// A containment edge between two hierarchy levels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HierarchyLink {
    pub parent: NodeRef,
    pub child: NodeRef,
    pub edge: HierarchyEdge,
}

impl HierarchyLink {
    /// Build a link whose endpoint kinds follow from the edge type.
    pub fn new(edge: HierarchyEdge, parent_key: impl Into<String>, child_key: impl Into<String>) -> Self {
        let (parent_kind, child_kind) = edge.endpoints();
        Self {
            parent: NodeRef::new(parent_kind, parent_key),
            child: NodeRef::new(child_kind, child_key),
            edge,
        }
    }

    pub fn validate(&self, shape: HierarchyShape) -> Result<(), ValidationError> {
        if !shape.has_edge(self.edge) {
            return Err(ValidationError::EdgeNotInShape {
                edge: self.edge,
                shape,
            });
        }
        let (expected_parent, expected_child) = self.edge.endpoints();
        if self.parent.kind != expected_parent || self.child.kind != expected_child {
            return Err(ValidationError::EndpointKindMismatch {
                edge: self.edge,
                expected_parent,
                expected_child,
                parent: self.parent.kind,
                child: self.child.kind,
            });
        }
        if self.parent.key.trim().is_empty() {
            return Err(ValidationError::EmptyKey {
                kind: self.parent.kind,
            });
        }
        if self.child.key.trim().is_empty() {
            return Err(ValidationError::EmptyKey {
                kind: self.child.kind,
            });
        }
        Ok(())
    }
}

// ── Read-side views ───────────────────────────────────────────────

/// A node as read back from the graph: natural key, display label, and flat properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeView {
    pub kind: NodeKind,
    pub key: String,
    pub label: String,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl NodeView {
    /// Build a view from a typed node, using the same property names the graph stores.
    pub fn from_node(node: &LineageNode, shape: HierarchyShape) -> Self {
        let mut properties = match serde_json::to_value(node) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        properties.remove("node_type");
        if let LineageNode::Leaf(leaf) = node {
            properties.insert("max_risk_rank".to_string(), leaf.max_risk.rank().into());
        }

        let label = match node {
            LineageNode::System(s) => s.label.clone(),
            LineageNode::Asset(a) if !a.name.is_empty() => a.name.clone(),
            LineageNode::Asset(a) => a.path.clone(),
            LineageNode::Category(c) => c.label.clone(),
            LineageNode::Leaf(l) => l.pii_type.clone(),
        };

        Self {
            kind: node.kind(shape),
            key: node.key().to_string(),
            label,
            properties,
        }
    }

    pub fn str_prop(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_str())
    }

    pub fn i64_prop(&self, name: &str) -> Option<i64> {
        self.properties.get(name).and_then(|v| v.as_i64())
    }

    pub fn f64_prop(&self, name: &str) -> Option<f64> {
        self.properties.get(name).and_then(|v| v.as_f64())
    }

    /// The leaf's maximum risk, when this view is a leaf.
    pub fn max_risk(&self) -> Option<Severity> {
        self.str_prop("max_risk").and_then(|s| s.parse().ok())
    }
}

/// One traversal row: a system and, when present, the asset, category, and leaf below it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HierarchyPath {
    pub system: NodeView,
    pub asset: Option<NodeView>,
    pub category: Option<NodeView>,
    pub leaf: Option<NodeView>,
}
