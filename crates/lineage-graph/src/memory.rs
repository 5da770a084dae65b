//! In-process lineage store with the same merge and interval semantics as the
//! Neo4j store. Used by tests and `--dry-run` passes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use lineage_core::{
    CategoryNode, ExposureKey, ExposureObservation, ExposureRecord, GraphScope, HierarchyEdge,
    HierarchyLink, HierarchyPath, HierarchyShape, LineageNode, NodeKind, NodeRef, NodeView, PassId,
    TenantId,
};

use crate::client::GraphError;
use crate::store::{plan_migration, LineageStore, MigrationReport, MigrationStep};
use crate::time::format_ts;

const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone)]
struct StoredNode {
    node: LineageNode,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

type LinkKey = (HierarchyEdge, NodeRef, NodeRef);

#[derive(Debug, Default)]
struct TenantGraph {
    shape: Option<HierarchyShape>,
    nodes: BTreeMap<NodeRef, StoredNode>,
    links: BTreeSet<LinkKey>,
    /// Intervals tagged with the leaf label they hang off.
    exposures: Vec<(NodeKind, ExposureRecord)>,
}

impl TenantGraph {
    fn has(&self, node: &NodeRef) -> bool {
        self.nodes.contains_key(node)
    }

    fn open_mut(&mut self, leaf: NodeKind, key: &ExposureKey) -> Option<&mut ExposureRecord> {
        self.exposures
            .iter_mut()
            .find(|(kind, rec)| *kind == leaf && rec.key == *key && rec.is_open())
            .map(|(_, rec)| rec)
    }

    /// Whether any interval, open or closed, links the asset to the leaf.
    fn exposes(&self, asset: &NodeRef, leaf: &NodeRef) -> bool {
        self.exposures.iter().any(|(kind, rec)| {
            *kind == leaf.kind && rec.key.asset_id == asset.key && rec.key.pii_type == leaf.key
        })
    }

    fn children(&self, edge: HierarchyEdge, parent: &NodeRef) -> Vec<NodeRef> {
        self.links
            .iter()
            .filter(|(e, p, c)| *e == edge && p == parent && self.has(c))
            .map(|(_, _, c)| c.clone())
            .collect()
    }

    fn view(&self, node: &NodeRef, shape: HierarchyShape) -> Option<NodeView> {
        let stored = self.nodes.get(node)?;
        let mut view = NodeView::from_node(&stored.node, shape);
        view.kind = node.kind;
        view.properties.retain(|_, v| !v.is_null());
        view.properties
            .insert("created_at".to_string(), format_ts(stored.created_at).into());
        view.properties
            .insert("updated_at".to_string(), format_ts(stored.updated_at).into());
        Some(view)
    }

    fn relabel_leaves(&mut self, from: NodeKind, to: NodeKind) -> i64 {
        let old: Vec<NodeRef> = self
            .nodes
            .keys()
            .filter(|r| r.kind == from)
            .cloned()
            .collect();
        for r in &old {
            if let Some(stored) = self.nodes.remove(r) {
                self.nodes.insert(NodeRef::new(to, r.key.clone()), stored);
            }
        }
        old.len() as i64
    }

    fn repoint_exposures(&mut self, from: NodeKind, to: NodeKind) -> i64 {
        let mut moved = 0;
        for (kind, _) in self.exposures.iter_mut().filter(|(k, _)| *k == from) {
            *kind = to;
            moved += 1;
        }
        moved
    }

    fn drop_kind(&mut self, kind: NodeKind) {
        self.nodes.retain(|r, _| r.kind != kind);
        self.links.retain(|(_, p, c)| p.kind != kind && c.kind != kind);
    }

    fn three_to_four(&mut self, now: DateTime<Utc>) -> MigrationReport {
        let old_links: Vec<(NodeRef, NodeRef)> = self
            .links
            .iter()
            .filter(|(e, _, _)| *e == HierarchyEdge::AssetContainsPii)
            .map(|(_, a, l)| (a.clone(), l.clone()))
            .collect();

        let leaves_migrated = self.relabel_leaves(NodeKind::PiiCategory, NodeKind::PiiType);
        let exposures_repointed = self.repoint_exposures(NodeKind::PiiCategory, NodeKind::PiiType);

        let mut category_of: HashMap<String, NodeRef> = HashMap::new();
        let leaves: Vec<(NodeRef, LineageNode)> = self
            .nodes
            .iter()
            .filter(|(r, _)| r.kind == NodeKind::PiiType)
            .map(|(r, s)| (r.clone(), s.node.clone()))
            .collect();
        for (leaf_ref, node) in leaves {
            let LineageNode::Leaf(leaf) = node else {
                continue;
            };
            let id = if leaf.data_category.trim().is_empty() {
                if let Some(StoredNode {
                    node: LineageNode::Leaf(stored),
                    ..
                }) = self.nodes.get_mut(&leaf_ref)
                {
                    stored.data_category = UNCATEGORIZED.to_string();
                }
                UNCATEGORIZED.to_string()
            } else {
                leaf.data_category.clone()
            };
            let cat_ref = NodeRef::new(NodeKind::DataCategory, id.clone());
            self.nodes.entry(cat_ref.clone()).or_insert_with(|| StoredNode {
                node: LineageNode::Category(CategoryNode {
                    id: id.clone(),
                    label: id.clone(),
                    dpdpa_category: leaf.dpdpa_category.clone(),
                    requires_consent: leaf.requires_consent,
                    finding_count: 0,
                    avg_confidence: 0.0,
                    risk_level: None,
                }),
                created_at: now,
                updated_at: now,
            });
            self.links
                .insert((HierarchyEdge::Includes, cat_ref.clone(), leaf_ref.clone()));
            category_of.insert(leaf_ref.key.clone(), cat_ref);
        }

        for (asset, old_leaf) in old_links {
            if let Some(cat_ref) = category_of.get(&old_leaf.key) {
                self.links
                    .insert((HierarchyEdge::HasCategory, asset, cat_ref.clone()));
            }
        }
        self.links
            .retain(|(e, _, _)| *e != HierarchyEdge::AssetContainsPii);

        MigrationReport {
            from: Some(HierarchyShape::ThreeLevel),
            to: Some(HierarchyShape::FourLevel),
            leaves_migrated,
            exposures_repointed,
        }
    }

    fn four_to_three(&mut self) -> MigrationReport {
        let leaves_migrated = self.relabel_leaves(NodeKind::PiiType, NodeKind::PiiCategory);
        let exposures_repointed = self.repoint_exposures(NodeKind::PiiType, NodeKind::PiiCategory);

        self.drop_kind(NodeKind::DataCategory);
        self.links.retain(|(e, _, _)| {
            *e != HierarchyEdge::HasCategory && *e != HierarchyEdge::Includes
        });

        let exposed: Vec<LinkKey> = self
            .exposures
            .iter()
            .filter(|(k, _)| *k == NodeKind::PiiCategory)
            .map(|(_, rec)| {
                (
                    HierarchyEdge::AssetContainsPii,
                    NodeRef::new(NodeKind::Asset, rec.key.asset_id.clone()),
                    NodeRef::new(NodeKind::PiiCategory, rec.key.pii_type.clone()),
                )
            })
            .collect();
        self.links.extend(exposed);

        MigrationReport {
            from: Some(HierarchyShape::FourLevel),
            to: Some(HierarchyShape::ThreeLevel),
            leaves_migrated,
            exposures_repointed,
        }
    }
}

/// Which store operation an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    UpsertNode,
    LinkHierarchy,
    OpenExposure,
    RefreshExposure,
    CloseExposure,
}

/// A lineage graph kept in process memory, partitioned by tenant.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tenants: Mutex<HashMap<TenantId, TenantGraph>>,
    fail_on: Mutex<Option<StoreOp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with a connection error.
    pub async fn fail_next(&self, op: StoreOp) {
        *self.fail_on.lock().await = Some(op);
    }

    async fn check_fail(&self, op: StoreOp) -> Result<(), GraphError> {
        let mut fail_on = self.fail_on.lock().await;
        if *fail_on == Some(op) {
            *fail_on = None;
            return Err(GraphError::Connection(format!("injected failure on {op:?}")));
        }
        Ok(())
    }

    /// Stored node by label and key.
    pub async fn node(&self, tenant_id: &TenantId, kind: NodeKind, key: &str) -> Option<LineageNode> {
        let tenants = self.tenants.lock().await;
        tenants
            .get(tenant_id)?
            .nodes
            .get(&NodeRef::new(kind, key))
            .map(|s| s.node.clone())
    }

    pub async fn node_count(&self, tenant_id: &TenantId, kind: NodeKind) -> usize {
        let tenants = self.tenants.lock().await;
        tenants
            .get(tenant_id)
            .map(|g| g.nodes.keys().filter(|r| r.kind == kind).count())
            .unwrap_or(0)
    }

    pub async fn link_count(&self, tenant_id: &TenantId, edge: HierarchyEdge) -> usize {
        let tenants = self.tenants.lock().await;
        tenants
            .get(tenant_id)
            .map(|g| g.links.iter().filter(|(e, _, _)| *e == edge).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LineageStore for MemoryStore {
    async fn stored_shape(&self, tenant_id: &TenantId) -> Result<Option<HierarchyShape>, GraphError> {
        let tenants = self.tenants.lock().await;
        Ok(tenants.get(tenant_id).and_then(|g| g.shape))
    }

    async fn record_shape(&self, scope: &GraphScope) -> Result<(), GraphError> {
        let mut tenants = self.tenants.lock().await;
        tenants.entry(scope.tenant_id).or_default().shape = Some(scope.shape);
        Ok(())
    }

    async fn upsert_node(
        &self,
        scope: &GraphScope,
        node: &LineageNode,
        at: DateTime<Utc>,
    ) -> Result<(), GraphError> {
        self.check_fail(StoreOp::UpsertNode).await?;
        node.validate(scope.shape)?;

        let mut tenants = self.tenants.lock().await;
        let graph = tenants.entry(scope.tenant_id).or_default();
        let node_ref = node.node_ref(scope.shape);

        match graph.nodes.get_mut(&node_ref) {
            Some(stored) => {
                match (&mut stored.node, node) {
                    (LineageNode::Leaf(existing), LineageNode::Leaf(incoming)) => {
                        existing.merge(incoming)
                    }
                    (existing, incoming) => *existing = incoming.clone(),
                }
                stored.updated_at = at;
            }
            None => {
                graph.nodes.insert(
                    node_ref,
                    StoredNode {
                        node: node.clone(),
                        created_at: at,
                        updated_at: at,
                    },
                );
            }
        }
        Ok(())
    }

    async fn link_hierarchy(&self, scope: &GraphScope, link: &HierarchyLink) -> Result<(), GraphError> {
        self.check_fail(StoreOp::LinkHierarchy).await?;
        link.validate(scope.shape)?;

        let mut tenants = self.tenants.lock().await;
        let graph = tenants.entry(scope.tenant_id).or_default();
        let parent_found = graph.has(&link.parent);
        if !parent_found || !graph.has(&link.child) {
            return Err(GraphError::missing_endpoint(
                link.edge.rel_type(),
                &link.parent,
                &link.child,
                parent_found,
            ));
        }
        graph
            .links
            .insert((link.edge, link.parent.clone(), link.child.clone()));
        Ok(())
    }

    async fn open_exposures(&self, scope: &GraphScope) -> Result<Vec<ExposureRecord>, GraphError> {
        let leaf = scope.leaf_kind();
        let tenants = self.tenants.lock().await;
        let mut open: Vec<ExposureRecord> = tenants
            .get(&scope.tenant_id)
            .map(|g| {
                g.exposures
                    .iter()
                    .filter(|(k, rec)| *k == leaf && rec.is_open())
                    .map(|(_, rec)| rec.clone())
                    .collect()
            })
            .unwrap_or_default();
        open.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(open)
    }

    async fn exposures(
        &self,
        scope: &GraphScope,
        asset_id: Option<&str>,
    ) -> Result<Vec<ExposureRecord>, GraphError> {
        let leaf = scope.leaf_kind();
        let tenants = self.tenants.lock().await;
        let mut all: Vec<ExposureRecord> = tenants
            .get(&scope.tenant_id)
            .map(|g| {
                g.exposures
                    .iter()
                    .filter(|(k, rec)| {
                        *k == leaf && asset_id.map_or(true, |a| rec.key.asset_id == a)
                    })
                    .map(|(_, rec)| rec.clone())
                    .collect()
            })
            .unwrap_or_default();
        all.sort_by(|a, b| b.since.cmp(&a.since).then_with(|| a.key.cmp(&b.key)));
        Ok(all)
    }

    async fn open_exposure(
        &self,
        scope: &GraphScope,
        obs: &ExposureObservation,
        at: DateTime<Utc>,
        pass_id: PassId,
    ) -> Result<bool, GraphError> {
        self.check_fail(StoreOp::OpenExposure).await?;
        obs.validate()?;

        let leaf = scope.leaf_kind();
        let asset_ref = NodeRef::new(NodeKind::Asset, obs.key.asset_id.clone());
        let leaf_ref = NodeRef::new(leaf, obs.key.pii_type.clone());

        let mut tenants = self.tenants.lock().await;
        let graph = tenants.entry(scope.tenant_id).or_default();
        let asset_found = graph.has(&asset_ref);
        if !asset_found || !graph.has(&leaf_ref) {
            return Err(GraphError::missing_endpoint(
                "EXPOSES",
                &asset_ref,
                &leaf_ref,
                asset_found,
            ));
        }
        if graph.open_mut(leaf, &obs.key).is_some() {
            return Ok(false);
        }
        graph
            .exposures
            .push((leaf, ExposureRecord::open(obs, at, pass_id)));
        Ok(true)
    }

    async fn refresh_exposure(
        &self,
        scope: &GraphScope,
        obs: &ExposureObservation,
        at: DateTime<Utc>,
        pass_id: PassId,
    ) -> Result<bool, GraphError> {
        self.check_fail(StoreOp::RefreshExposure).await?;
        obs.validate()?;

        let mut tenants = self.tenants.lock().await;
        let graph = tenants.entry(scope.tenant_id).or_default();
        match graph.open_mut(scope.leaf_kind(), &obs.key) {
            Some(rec) => {
                rec.refresh(obs, at, pass_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close_exposure(
        &self,
        scope: &GraphScope,
        key: &ExposureKey,
        at: DateTime<Utc>,
    ) -> Result<bool, GraphError> {
        self.check_fail(StoreOp::CloseExposure).await?;

        let mut tenants = self.tenants.lock().await;
        let graph = tenants.entry(scope.tenant_id).or_default();
        Ok(graph
            .open_mut(scope.leaf_kind(), key)
            .map_or(false, |rec| rec.close(at)))
    }

    async fn hierarchy_paths(&self, scope: &GraphScope) -> Result<Vec<HierarchyPath>, GraphError> {
        let tenants = self.tenants.lock().await;
        let Some(graph) = tenants.get(&scope.tenant_id) else {
            return Ok(Vec::new());
        };
        let shape = scope.shape;
        let view = |r: &NodeRef| graph.view(r, shape);

        let mut paths = Vec::new();
        let systems = graph.nodes.keys().filter(|r| r.kind == NodeKind::System);
        for sys in systems {
            let Some(system) = view(sys) else { continue };
            let assets = graph.children(HierarchyEdge::Contains, sys);
            if assets.is_empty() {
                paths.push(HierarchyPath {
                    system,
                    asset: None,
                    category: None,
                    leaf: None,
                });
                continue;
            }

            for asset in &assets {
                let asset_view = view(asset);
                match shape {
                    HierarchyShape::ThreeLevel => {
                        let leaves = graph.children(HierarchyEdge::AssetContainsPii, asset);
                        if leaves.is_empty() {
                            paths.push(HierarchyPath {
                                system: system.clone(),
                                asset: asset_view.clone(),
                                category: None,
                                leaf: None,
                            });
                        }
                        for leaf in &leaves {
                            paths.push(HierarchyPath {
                                system: system.clone(),
                                asset: asset_view.clone(),
                                category: None,
                                leaf: view(leaf),
                            });
                        }
                    }
                    HierarchyShape::FourLevel => {
                        let categories = graph.children(HierarchyEdge::HasCategory, asset);
                        if categories.is_empty() {
                            paths.push(HierarchyPath {
                                system: system.clone(),
                                asset: asset_view.clone(),
                                category: None,
                                leaf: None,
                            });
                        }
                        for cat in &categories {
                            let cat_view = view(cat);
                            let leaves: Vec<NodeRef> = graph
                                .children(HierarchyEdge::Includes, cat)
                                .into_iter()
                                .filter(|leaf| graph.exposes(asset, leaf))
                                .collect();
                            if leaves.is_empty() {
                                paths.push(HierarchyPath {
                                    system: system.clone(),
                                    asset: asset_view.clone(),
                                    category: cat_view.clone(),
                                    leaf: None,
                                });
                            }
                            for leaf in &leaves {
                                paths.push(HierarchyPath {
                                    system: system.clone(),
                                    asset: asset_view.clone(),
                                    category: cat_view.clone(),
                                    leaf: view(leaf),
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(paths)
    }

    async fn migrate_shape(
        &self,
        tenant_id: &TenantId,
        from: HierarchyShape,
        to: HierarchyShape,
    ) -> Result<MigrationReport, GraphError> {
        let mut tenants = self.tenants.lock().await;
        let graph = tenants.entry(*tenant_id).or_default();

        let report = match plan_migration(graph.shape, from, to)? {
            MigrationStep::Noop => MigrationReport {
                from: graph.shape,
                to: Some(to),
                ..Default::default()
            },
            MigrationStep::RecordOnly => MigrationReport {
                from: None,
                to: Some(to),
                ..Default::default()
            },
            MigrationStep::Rewrite => match from {
                HierarchyShape::ThreeLevel => graph.three_to_four(Utc::now()),
                HierarchyShape::FourLevel => graph.four_to_three(),
            },
        };
        graph.shape = Some(to);

        tracing::info!(
            tenant_id = %tenant_id,
            from = %from,
            to = %to,
            leaves_migrated = report.leaves_migrated,
            exposures_repointed = report.exposures_repointed,
            "Hierarchy shape migrated (memory store)"
        );
        Ok(report)
    }
}
