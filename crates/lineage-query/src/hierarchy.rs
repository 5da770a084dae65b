//! Hierarchy view for the lineage UI: a deduplicated node/edge graph built
//! from traversal paths.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use lineage_core::{HierarchyEdge, HierarchyPath, HierarchyShape, NodeKind, NodeView, Severity};

/// Optional narrowing for [`crate::LineageQuery::get_hierarchy`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HierarchyFilters {
    /// System key (`system-<host>`), host, or label.
    pub system: Option<String>,
    /// Exact leaf `max_risk`.
    pub risk: Option<Severity>,
    /// DataCategory key or label, leaf PII type, or DPDPA category.
    pub category: Option<String>,
}

impl HierarchyFilters {
    fn filters_leaves(&self) -> bool {
        self.risk.is_some() || self.category.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HierarchyEdgeView {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: HierarchyEdge,
}

impl HierarchyEdgeView {
    fn new(edge: HierarchyEdge, source: &NodeView, target: &NodeView) -> Self {
        Self {
            id: format!("{}-{}-{}", source.key, edge.rel_type(), target.key),
            source: source.key.clone(),
            target: target.key.clone(),
            edge_type: edge,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HierarchyGraph {
    pub nodes: Vec<NodeView>,
    pub edges: Vec<HierarchyEdgeView>,
}

#[derive(Default)]
struct GraphBuilder {
    graph: HierarchyGraph,
    seen_nodes: HashSet<(NodeKind, String)>,
    seen_edges: HashSet<String>,
}

impl GraphBuilder {
    fn node(&mut self, view: &NodeView) {
        if self.seen_nodes.insert((view.kind, view.key.clone())) {
            self.graph.nodes.push(view.clone());
        }
    }

    fn edge(&mut self, edge: HierarchyEdge, source: &NodeView, target: &NodeView) {
        // Endpoint keys come straight from the path; never emit a dangling edge.
        if source.key.is_empty() || target.key.is_empty() {
            return;
        }
        let view = HierarchyEdgeView::new(edge, source, target);
        if self.seen_edges.insert(view.id.clone()) {
            self.graph.edges.push(view);
        }
    }
}

fn eq_ci(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn system_matches(path: &HierarchyPath, wanted: &str) -> bool {
    let s = &path.system;
    eq_ci(&s.key, wanted)
        || eq_ci(&s.label, wanted)
        || s.str_prop("host").is_some_and(|h| eq_ci(h, wanted))
}

fn category_matches(path: &HierarchyPath, leaf: &NodeView, wanted: &str) -> bool {
    let category_hit = path
        .category
        .as_ref()
        .is_some_and(|c| eq_ci(&c.key, wanted) || eq_ci(&c.label, wanted));
    category_hit
        || eq_ci(&leaf.key, wanted)
        || ["data_category", "dpdpa_category"]
            .iter()
            .any(|p| leaf.str_prop(p).is_some_and(|v| eq_ci(v, wanted)))
}

fn path_matches(path: &HierarchyPath, filters: &HierarchyFilters) -> bool {
    if let Some(system) = &filters.system {
        if !system_matches(path, system) {
            return false;
        }
    }
    if !filters.filters_leaves() {
        return true;
    }
    let Some(leaf) = &path.leaf else {
        return false;
    };
    if let Some(risk) = filters.risk {
        if leaf.max_risk() != Some(risk) {
            return false;
        }
    }
    if let Some(category) = &filters.category {
        if !category_matches(path, leaf, category) {
            return false;
        }
    }
    true
}

/// Fold traversal paths into a node/edge graph.
pub fn build_hierarchy(
    paths: &[HierarchyPath],
    shape: HierarchyShape,
    filters: &HierarchyFilters,
) -> HierarchyGraph {
    let mut b = GraphBuilder::default();

    for path in paths.iter().filter(|p| path_matches(p, filters)) {
        b.node(&path.system);
        let Some(asset) = &path.asset else { continue };
        b.node(asset);
        b.edge(HierarchyEdge::Contains, &path.system, asset);

        match shape {
            HierarchyShape::ThreeLevel => {
                if let Some(leaf) = &path.leaf {
                    b.node(leaf);
                    b.edge(HierarchyEdge::AssetContainsPii, asset, leaf);
                }
            }
            HierarchyShape::FourLevel => {
                let Some(category) = &path.category else { continue };
                b.node(category);
                b.edge(HierarchyEdge::HasCategory, asset, category);
                if let Some(leaf) = &path.leaf {
                    b.node(leaf);
                    b.edge(HierarchyEdge::Includes, category, leaf);
                }
            }
        }
    }

    b.graph
}
