//! Write operations for the lineage graph.
//!
//! Nodes are merged on (tenant_id, natural key), so re-running a pass never
//! duplicates anything. Hierarchy edges are append-only; exposure edges carry
//! the temporal intervals and are the only edges ever updated.

use chrono::{DateTime, Utc};
use neo4rs::query;

use lineage_core::{
    AssetNode, CategoryNode, ExposureKey, ExposureObservation, ExposureRecord, GraphScope,
    HierarchyLink, LineageNode, NodeKind, NodeRef, PassId, PiiTypeNode, SystemNode, TenantId,
};

use crate::client::{GraphClient, GraphError};
use crate::time::format_ts;

impl GraphClient {
    // ── Shape marker ─────────────────────────────────────────────

    /// Record the tenant's canonical hierarchy shape on its `LineageMeta` node.
    pub async fn record_shape(&self, scope: &GraphScope) -> Result<(), GraphError> {
        let q = query(
            "MERGE (m:LineageMeta {tenant_id: $tenant_id})
             ON CREATE SET m.created_at = $now
             SET m.shape = $shape, m.updated_at = $now",
        )
        .param("tenant_id", tenant(&scope.tenant_id))
        .param("shape", scope.shape.as_str())
        .param("now", format_ts(Utc::now()));

        self.run(q).await
    }

    // ── Node upserts ─────────────────────────────────────────────

    /// Upsert any lineage node under the label the scope's shape assigns it.
    pub async fn upsert_node(
        &self,
        scope: &GraphScope,
        node: &LineageNode,
        at: DateTime<Utc>,
    ) -> Result<(), GraphError> {
        node.validate(scope.shape)?;
        match node {
            LineageNode::System(s) => self.upsert_system(scope, s, at).await,
            LineageNode::Asset(a) => self.upsert_asset(scope, a, at).await,
            LineageNode::Category(c) => self.upsert_category(scope, c, at).await,
            LineageNode::Leaf(l) => self.upsert_leaf(scope, l, at).await,
        }
    }

    async fn upsert_system(
        &self,
        scope: &GraphScope,
        system: &SystemNode,
        at: DateTime<Utc>,
    ) -> Result<(), GraphError> {
        let q = query(
            "MERGE (n:System {tenant_id: $tenant_id, id: $key})
             ON CREATE SET n.created_at = $now
             SET n.label = $label, n.host = $host,
                 n.source_system = $source_system, n.updated_at = $now",
        )
        .param("tenant_id", tenant(&scope.tenant_id))
        .param("key", system.id.clone())
        .param("label", system.label.clone())
        .param("host", system.host.clone())
        .param("source_system", system.source_system.clone())
        .param("now", format_ts(at));

        self.run(q).await
    }

    async fn upsert_asset(
        &self,
        scope: &GraphScope,
        asset: &AssetNode,
        at: DateTime<Utc>,
    ) -> Result<(), GraphError> {
        let q = query(
            "MERGE (n:Asset {tenant_id: $tenant_id, stable_id: $key})
             ON CREATE SET n.created_at = $now
             SET n.name = $name, n.path = $path, n.asset_type = $asset_type,
                 n.environment = $environment, n.owner = $owner,
                 n.risk_score = $risk_score, n.total_findings = $total_findings,
                 n.system_id = $system_id, n.updated_at = $now",
        )
        .param("tenant_id", tenant(&scope.tenant_id))
        .param("key", asset.stable_id.clone())
        .param("name", asset.name.clone())
        .param("path", asset.path.clone())
        .param("asset_type", asset.asset_type.clone())
        .param("environment", asset.environment.clone())
        .param("owner", asset.owner.clone())
        .param("risk_score", asset.risk_score)
        .param("total_findings", asset.total_findings)
        .param("system_id", asset.system_id.clone())
        .param("now", format_ts(at));

        self.run(q).await
    }

    async fn upsert_category(
        &self,
        scope: &GraphScope,
        category: &CategoryNode,
        at: DateTime<Utc>,
    ) -> Result<(), GraphError> {
        let q = query(
            "MERGE (n:DataCategory {tenant_id: $tenant_id, id: $key})
             ON CREATE SET n.created_at = $now
             SET n.label = $label, n.dpdpa_category = $dpdpa_category,
                 n.requires_consent = $requires_consent,
                 n.finding_count = $finding_count, n.avg_confidence = $avg_confidence,
                 n.risk_level = CASE WHEN $risk_level = '' THEN null ELSE $risk_level END,
                 n.updated_at = $now",
        )
        .param("tenant_id", tenant(&scope.tenant_id))
        .param("key", category.id.clone())
        .param("label", category.label.clone())
        .param("dpdpa_category", category.dpdpa_category.clone())
        .param("requires_consent", category.requires_consent)
        .param("finding_count", category.finding_count)
        .param("avg_confidence", category.avg_confidence)
        .param(
            "risk_level",
            category.risk_level.map(|r| r.as_str()).unwrap_or_default(),
        )
        .param("now", format_ts(at));

        self.run(q).await
    }

    /// Leaf aggregates merge rather than overwrite: counts add up, risk and
    /// confidence keep their maximum, `first_detected` is set once.
    async fn upsert_leaf(
        &self,
        scope: &GraphScope,
        leaf: &PiiTypeNode,
        at: DateTime<Utc>,
    ) -> Result<(), GraphError> {
        let kind = scope.leaf_kind();
        let cypher = format!(
            "MERGE (n:{label} {{tenant_id: $tenant_id, {key}: $key}})
             ON CREATE SET
               n.created_at = $now, n.count = $count,
               n.max_risk = $max_risk, n.max_risk_rank = $max_risk_rank,
               n.max_confidence = $max_confidence,
               n.first_detected = $first_detected, n.last_detected = $last_detected
             ON MATCH SET
               n.count = coalesce(n.count, 0) + $count,
               n.max_risk = CASE WHEN $max_risk_rank > coalesce(n.max_risk_rank, 0)
                                 THEN $max_risk ELSE n.max_risk END,
               n.max_risk_rank = CASE WHEN $max_risk_rank > coalesce(n.max_risk_rank, 0)
                                      THEN $max_risk_rank ELSE n.max_risk_rank END,
               n.max_confidence = CASE WHEN $max_confidence > coalesce(n.max_confidence, 0.0)
                                       THEN $max_confidence ELSE n.max_confidence END,
               n.last_detected = $last_detected
             SET n.data_category = $data_category, n.dpdpa_category = $dpdpa_category,
                 n.requires_consent = $requires_consent, n.updated_at = $now",
            label = kind.label(),
            key = kind.key_property(),
        );

        let q = query(&cypher)
            .param("tenant_id", tenant(&scope.tenant_id))
            .param("key", leaf.pii_type.clone())
            .param("count", leaf.count)
            .param("max_risk", leaf.max_risk.as_str())
            .param("max_risk_rank", leaf.max_risk.rank())
            .param("max_confidence", leaf.max_confidence)
            .param("first_detected", format_ts(leaf.first_detected))
            .param("last_detected", format_ts(leaf.last_detected))
            .param("data_category", leaf.data_category.clone())
            .param("dpdpa_category", leaf.dpdpa_category.clone())
            .param("requires_consent", leaf.requires_consent)
            .param("now", format_ts(at));

        self.run(q).await
    }

    // ── Hierarchy links ──────────────────────────────────────────

    /// Merge a containment edge between two existing nodes.
    ///
    /// Both endpoints are looked up first; when either is absent nothing is
    /// written and `MissingEndpoint` names the absent side.
    pub async fn link_hierarchy(
        &self,
        scope: &GraphScope,
        link: &HierarchyLink,
    ) -> Result<(), GraphError> {
        link.validate(scope.shape)?;

        let cypher = format!(
            "OPTIONAL MATCH (p:{plabel} {{tenant_id: $tenant_id, {pkey}: $parent}})
             OPTIONAL MATCH (c:{clabel} {{tenant_id: $tenant_id, {ckey}: $child}})
             FOREACH (_ IN CASE WHEN p IS NOT NULL AND c IS NOT NULL THEN [1] ELSE [] END |
               MERGE (p)-[r:{rel}]->(c)
               ON CREATE SET r.tenant_id = $tenant_id, r.created_at = $now)
             RETURN p IS NOT NULL AS parent_found, c IS NOT NULL AS child_found",
            plabel = link.parent.kind.label(),
            pkey = link.parent.kind.key_property(),
            clabel = link.child.kind.label(),
            ckey = link.child.kind.key_property(),
            rel = link.edge.rel_type(),
        );

        let q = query(&cypher)
            .param("tenant_id", tenant(&scope.tenant_id))
            .param("parent", link.parent.key.clone())
            .param("child", link.child.key.clone())
            .param("now", format_ts(Utc::now()));

        let (parent_found, child_found) = match self.query_one(q).await? {
            Some(row) => endpoint_flags(&row)?,
            None => (false, false),
        };

        if parent_found && child_found {
            Ok(())
        } else {
            Err(GraphError::missing_endpoint(
                link.edge.rel_type(),
                &link.parent,
                &link.child,
                parent_found,
            ))
        }
    }

    // ── Exposure intervals ───────────────────────────────────────

    /// Create a new open EXPOSES interval unless one is already open for the pair.
    pub async fn open_exposure(
        &self,
        scope: &GraphScope,
        obs: &ExposureObservation,
        at: DateTime<Utc>,
        pass_id: PassId,
    ) -> Result<bool, GraphError> {
        obs.validate()?;
        let rec = ExposureRecord::open(obs, at, pass_id);
        let leaf = scope.leaf_kind();

        let cypher = format!(
            "OPTIONAL MATCH (a:Asset {{tenant_id: $tenant_id, stable_id: $asset_id}})
             OPTIONAL MATCH (p:{label} {{tenant_id: $tenant_id, {key}: $pii_type}})
             OPTIONAL MATCH (a)-[open:EXPOSES]->(p) WHERE open.until IS NULL
             WITH a, p, count(open) AS open_count
             FOREACH (_ IN CASE WHEN a IS NOT NULL AND p IS NOT NULL AND open_count = 0
                               THEN [1] ELSE [] END |
               CREATE (a)-[:EXPOSES {{
                 id: $id, tenant_id: $tenant_id, since: $since,
                 finding_count: $finding_count, last_finding_count: $finding_count,
                 avg_confidence: $avg_confidence, max_confidence: $max_confidence,
                 observations: 1, last_seen: $since,
                 first_pass_id: $pass_id, last_pass_id: $pass_id
               }}]->(p))
             RETURN a IS NOT NULL AS asset_found, p IS NOT NULL AS leaf_found, open_count",
            label = leaf.label(),
            key = leaf.key_property(),
        );

        let q = query(&cypher)
            .param("tenant_id", tenant(&scope.tenant_id))
            .param("asset_id", rec.key.asset_id.clone())
            .param("pii_type", rec.key.pii_type.clone())
            .param("id", rec.id.to_string())
            .param("since", format_ts(rec.since))
            .param("finding_count", rec.finding_count)
            .param("avg_confidence", rec.avg_confidence)
            .param("max_confidence", rec.max_confidence)
            .param("pass_id", rec.first_pass_id.clone());

        let Some(row) = self.query_one(q).await? else {
            return Ok(false);
        };
        let asset_found = row.get::<bool>("asset_found").unwrap_or(false);
        let leaf_found = row.get::<bool>("leaf_found").unwrap_or(false);
        if !(asset_found && leaf_found) {
            return Err(GraphError::missing_endpoint(
                "EXPOSES",
                &NodeRef::new(NodeKind::Asset, &rec.key.asset_id),
                &NodeRef::new(leaf, &rec.key.pii_type),
                asset_found,
            ));
        }
        Ok(row.get::<i64>("open_count").unwrap_or(0) == 0)
    }

    /// Fold an observation into the pair's open interval. `since` and `until` are untouched.
    pub async fn refresh_exposure(
        &self,
        scope: &GraphScope,
        obs: &ExposureObservation,
        at: DateTime<Utc>,
        pass_id: PassId,
    ) -> Result<bool, GraphError> {
        obs.validate()?;
        let leaf = scope.leaf_kind();

        let cypher = format!(
            "MATCH (a:Asset {{tenant_id: $tenant_id, stable_id: $asset_id}})
                   -[e:EXPOSES]->(p:{label} {{tenant_id: $tenant_id, {key}: $pii_type}})
             WHERE e.until IS NULL
             WITH e, coalesce(e.observations, 0) AS n
             SET e.avg_confidence =
                   (coalesce(e.avg_confidence, 0.0) * n + $avg_confidence) / (n + 1),
                 e.max_confidence = CASE WHEN $max_confidence > coalesce(e.max_confidence, 0.0)
                                         THEN $max_confidence ELSE e.max_confidence END,
                 e.finding_count = coalesce(e.finding_count, 0) + $finding_count,
                 e.last_finding_count = $finding_count,
                 e.observations = n + 1,
                 e.last_seen = $now,
                 e.last_pass_id = $pass_id
             RETURN count(e) AS refreshed",
            label = leaf.label(),
            key = leaf.key_property(),
        );

        let q = query(&cypher)
            .param("tenant_id", tenant(&scope.tenant_id))
            .param("asset_id", obs.key.asset_id.clone())
            .param("pii_type", obs.key.pii_type.clone())
            .param("finding_count", obs.finding_count)
            .param("avg_confidence", obs.avg_confidence)
            .param("max_confidence", obs.max_confidence)
            .param("now", format_ts(at))
            .param("pass_id", pass_id.to_string());

        Ok(count_of(self.query_one(q).await?, "refreshed") > 0)
    }

    /// Set `until` on the pair's open interval. Closing an already-closed pair is a no-op.
    pub async fn close_exposure(
        &self,
        scope: &GraphScope,
        key: &ExposureKey,
        at: DateTime<Utc>,
    ) -> Result<bool, GraphError> {
        let leaf = scope.leaf_kind();
        let cypher = format!(
            "MATCH (a:Asset {{tenant_id: $tenant_id, stable_id: $asset_id}})
                   -[e:EXPOSES]->(p:{label} {{tenant_id: $tenant_id, {key}: $pii_type}})
             WHERE e.until IS NULL
             SET e.until = $now
             RETURN count(e) AS closed",
            label = leaf.label(),
            key = leaf.key_property(),
        );

        let q = query(&cypher)
            .param("tenant_id", tenant(&scope.tenant_id))
            .param("asset_id", key.asset_id.clone())
            .param("pii_type", key.pii_type.clone())
            .param("now", format_ts(at));

        Ok(count_of(self.query_one(q).await?, "closed") > 0)
    }
}

// ── Helpers ──────────────────────────────────────────────────────

pub(crate) fn tenant(tenant_id: &TenantId) -> String {
    tenant_id.0.to_string()
}

pub(crate) fn count_of(row: Option<neo4rs::Row>, column: &str) -> i64 {
    row.and_then(|r| r.get::<i64>(column).ok()).unwrap_or(0)
}

/// Decode the endpoint probe columns returned by `link_hierarchy`.
fn endpoint_flags(row: &neo4rs::Row) -> Result<(bool, bool), GraphError> {
    let flag = |column: &str| {
        row.get::<bool>(column).map_err(|e| {
            GraphError::Serialization(format!("Failed to decode {column}: {e}"))
        })
    };
    Ok((flag("parent_found")?, flag("child_found")?))
}
