//! Read operations for the lineage graph.

use neo4rs::query;
use serde_json::{Map, Value};
use uuid::Uuid;

use lineage_core::{
    ExposureKey, ExposureRecord, GraphScope, HierarchyPath, HierarchyShape, NodeKind, NodeView,
    TenantId,
};

use crate::client::{GraphClient, GraphError};
use crate::mutations::tenant;
use crate::time::{parse_opt_ts, parse_ts};

/// Columns every exposure read returns, in the order `row_to_exposure` expects.
const EXPOSURE_COLUMNS: &str = "a.stable_id AS asset_id, p.{key} AS pii_type,
       e.id AS id, e.since AS since, coalesce(e.until, '') AS until,
       coalesce(e.finding_count, 0) AS finding_count,
       coalesce(e.last_finding_count, 0) AS last_finding_count,
       coalesce(e.avg_confidence, 0.0) AS avg_confidence,
       coalesce(e.max_confidence, 0.0) AS max_confidence,
       coalesce(e.observations, 0) AS observations,
       coalesce(e.last_seen, e.since) AS last_seen,
       coalesce(e.first_pass_id, '') AS first_pass_id,
       coalesce(e.last_pass_id, '') AS last_pass_id";

impl GraphClient {
    /// The shape recorded on the tenant's `LineageMeta` node.
    pub async fn stored_shape(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<HierarchyShape>, GraphError> {
        let q = query(
            "MATCH (m:LineageMeta {tenant_id: $tenant_id})
             RETURN m.shape AS shape LIMIT 1",
        )
        .param("tenant_id", tenant(tenant_id));

        let Some(row) = self.query_one(q).await? else {
            return Ok(None);
        };
        let raw: String = row.get("shape").unwrap_or_default();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<HierarchyShape>()
            .map(Some)
            .map_err(|e| GraphError::Serialization(e.to_string()))
    }

    // ── Exposure reads ───────────────────────────────────────────

    /// Every open interval for the tenant under the scope's leaf label.
    pub async fn open_exposures(&self, scope: &GraphScope) -> Result<Vec<ExposureRecord>, GraphError> {
        let leaf = scope.leaf_kind();
        let cypher = format!(
            "MATCH (a:Asset {{tenant_id: $tenant_id}})-[e:EXPOSES]->(p:{label} {{tenant_id: $tenant_id}})
             WHERE e.until IS NULL
             RETURN {columns}
             ORDER BY asset_id, pii_type",
            label = leaf.label(),
            columns = EXPOSURE_COLUMNS.replace("{key}", leaf.key_property()),
        );

        let q = query(&cypher).param("tenant_id", tenant(&scope.tenant_id));
        self.query_rows(q)
            .await?
            .iter()
            .map(row_to_exposure)
            .collect()
    }

    /// Every interval, open or closed, newest `since` first.
    pub async fn exposures(
        &self,
        scope: &GraphScope,
        asset_id: Option<&str>,
    ) -> Result<Vec<ExposureRecord>, GraphError> {
        let leaf = scope.leaf_kind();
        let cypher = format!(
            "MATCH (a:Asset {{tenant_id: $tenant_id}})-[e:EXPOSES]->(p:{label} {{tenant_id: $tenant_id}})
             WHERE $asset_id = '' OR a.stable_id = $asset_id
             RETURN {columns}
             ORDER BY since DESC, asset_id, pii_type",
            label = leaf.label(),
            columns = EXPOSURE_COLUMNS.replace("{key}", leaf.key_property()),
        );

        let q = query(&cypher)
            .param("tenant_id", tenant(&scope.tenant_id))
            .param("asset_id", asset_id.unwrap_or_default().to_string());
        self.query_rows(q)
            .await?
            .iter()
            .map(row_to_exposure)
            .collect()
    }

    // ── Hierarchy traversal ──────────────────────────────────────

    /// One row per System → Asset → (DataCategory) → leaf path.
    ///
    /// Lower levels are optional, so a system with no assets still yields one row.
    /// DataCategory nodes are shared by every asset in the tenant, so in the
    /// four-level shape a leaf only hangs under an asset that exposes it.
    pub async fn hierarchy_paths(&self, scope: &GraphScope) -> Result<Vec<HierarchyPath>, GraphError> {
        let cypher = match scope.shape {
            HierarchyShape::ThreeLevel => {
                "MATCH (sys:System {tenant_id: $tenant_id})
                 OPTIONAL MATCH (sys)-[:CONTAINS]->(asset:Asset {tenant_id: $tenant_id})
                 OPTIONAL MATCH (asset)-[:ASSET_CONTAINS_PII]->(leaf:PII_Category {tenant_id: $tenant_id})
                 RETURN sys, asset, null AS cat, leaf
                 ORDER BY sys.id, asset.stable_id, leaf.pii_type"
            }
            HierarchyShape::FourLevel => {
                "MATCH (sys:System {tenant_id: $tenant_id})
                 OPTIONAL MATCH (sys)-[:CONTAINS]->(asset:Asset {tenant_id: $tenant_id})
                 OPTIONAL MATCH (asset)-[:HAS_CATEGORY]->(cat:DataCategory {tenant_id: $tenant_id})
                 OPTIONAL MATCH (cat)-[:INCLUDES]->(leaf:PIIType {tenant_id: $tenant_id})
                 WHERE (asset)-[:EXPOSES]->(leaf)
                 RETURN sys, asset, cat, leaf
                 ORDER BY sys.id, asset.stable_id, cat.id, leaf.type"
            }
        };

        let q = query(cypher).param("tenant_id", tenant(&scope.tenant_id));
        let rows = self.query_rows(q).await?;
        let mut paths = Vec::with_capacity(rows.len());
        for row in rows {
            let sys: neo4rs::Node = row.get("sys").map_err(|e| {
                GraphError::Serialization(format!("Failed to deserialize system node: {e}"))
            })?;
            paths.push(HierarchyPath {
                system: node_view(&sys, NodeKind::System),
                asset: row
                    .get::<neo4rs::Node>("asset")
                    .ok()
                    .map(|n| node_view(&n, NodeKind::Asset)),
                category: row
                    .get::<neo4rs::Node>("cat")
                    .ok()
                    .map(|n| node_view(&n, NodeKind::DataCategory)),
                leaf: row
                    .get::<neo4rs::Node>("leaf")
                    .ok()
                    .map(|n| node_view(&n, scope.leaf_kind())),
            });
        }
        Ok(paths)
    }
}

// ── Row decoding ─────────────────────────────────────────────────

fn row_to_exposure(row: &neo4rs::Row) -> Result<ExposureRecord, GraphError> {
    let raw_id: String = row.get("id").unwrap_or_default();
    let id = Uuid::parse_str(&raw_id)
        .map_err(|e| GraphError::Serialization(format!("Bad exposure id {raw_id:?}: {e}")))?;
    let since: String = row.get("since").unwrap_or_default();
    let until: String = row.get("until").unwrap_or_default();
    let last_seen: String = row.get("last_seen").unwrap_or_default();

    Ok(ExposureRecord {
        id,
        key: ExposureKey::new(
            row.get::<String>("asset_id").unwrap_or_default(),
            row.get::<String>("pii_type").unwrap_or_default(),
        ),
        since: parse_ts(&since, "since")?,
        until: parse_opt_ts(&until, "until")?,
        finding_count: row.get("finding_count").unwrap_or(0),
        last_finding_count: row.get("last_finding_count").unwrap_or(0),
        avg_confidence: row.get("avg_confidence").unwrap_or(0.0),
        max_confidence: row.get("max_confidence").unwrap_or(0.0),
        observations: row.get("observations").unwrap_or(0),
        last_seen: parse_ts(&last_seen, "last_seen")?,
        first_pass_id: row.get("first_pass_id").unwrap_or_default(),
        last_pass_id: row.get("last_pass_id").unwrap_or_default(),
    })
}

#[derive(Clone, Copy)]
enum Prop {
    Str,
    Int,
    Float,
    Bool,
}

/// Stored properties per label, beyond the natural key.
fn properties_of(kind: NodeKind) -> &'static [(&'static str, Prop)] {
    use Prop::*;
    match kind {
        NodeKind::System => &[
            ("label", Str),
            ("host", Str),
            ("source_system", Str),
            ("created_at", Str),
            ("updated_at", Str),
        ],
        NodeKind::Asset => &[
            ("name", Str),
            ("path", Str),
            ("asset_type", Str),
            ("environment", Str),
            ("owner", Str),
            ("risk_score", Int),
            ("total_findings", Int),
            ("system_id", Str),
            ("created_at", Str),
            ("updated_at", Str),
        ],
        NodeKind::DataCategory => &[
            ("label", Str),
            ("dpdpa_category", Str),
            ("requires_consent", Bool),
            ("finding_count", Int),
            ("avg_confidence", Float),
            ("risk_level", Str),
            ("created_at", Str),
            ("updated_at", Str),
        ],
        NodeKind::PiiCategory | NodeKind::PiiType => &[
            ("data_category", Str),
            ("dpdpa_category", Str),
            ("requires_consent", Bool),
            ("count", Int),
            ("max_risk", Str),
            ("max_risk_rank", Int),
            ("max_confidence", Float),
            ("first_detected", Str),
            ("last_detected", Str),
            ("created_at", Str),
            ("updated_at", Str),
        ],
    }
}

/// Name of the natural key in the typed node, which differs from the stored
/// property for the `PIIType.type` leaf.
fn key_field(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::System | NodeKind::DataCategory => "id",
        NodeKind::Asset => "stable_id",
        NodeKind::PiiCategory | NodeKind::PiiType => "pii_type",
    }
}

/// Convert a neo4rs::Node into a NodeView with the same property names the
/// typed nodes serialize to.
fn node_view(node: &neo4rs::Node, kind: NodeKind) -> NodeView {
    let key: String = node.get(kind.key_property()).unwrap_or_default();

    let mut properties = Map::new();
    properties.insert(key_field(kind).to_string(), Value::String(key.clone()));
    for (name, prop) in properties_of(kind) {
        let value = match prop {
            Prop::Str => node.get::<String>(name).ok().map(Value::from),
            Prop::Int => node.get::<i64>(name).ok().map(Value::from),
            Prop::Float => node.get::<f64>(name).ok().map(Value::from),
            Prop::Bool => node.get::<bool>(name).ok().map(Value::from),
        };
        if let Some(v) = value {
            properties.insert((*name).to_string(), v);
        }
    }

    let label = match kind {
        NodeKind::System | NodeKind::DataCategory => node.get::<String>("label").unwrap_or_default(),
        NodeKind::Asset => node
            .get::<String>("name")
            .ok()
            .filter(|n| !n.is_empty())
            .or_else(|| node.get::<String>("path").ok())
            .unwrap_or_default(),
        NodeKind::PiiCategory | NodeKind::PiiType => key.clone(),
    };

    NodeView {
        kind,
        key,
        label,
        properties,
    }
}
