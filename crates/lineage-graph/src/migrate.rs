//! One-time rewrite of a tenant's graph between the 3-level and 4-level shapes.
//!
//! Leaf aggregates and exposure intervals carry over unchanged; only the label
//! they hang off and the containment edges around them are rebuilt.

use chrono::Utc;
use neo4rs::query;

use lineage_core::{GraphScope, HierarchyShape, NodeKind, TenantId};

use crate::client::{GraphClient, GraphError};
use crate::mutations::{count_of, tenant};
use crate::store::{plan_migration, MigrationReport, MigrationStep};
use crate::time::format_ts;

/// PII_Category leaves become PIIType leaves under a DataCategory named after
/// their `data_category`.
const THREE_TO_FOUR: &[&str] = &[
    "MATCH (old:PII_Category {tenant_id: $tenant_id})
     MERGE (t:PIIType {tenant_id: $tenant_id, type: old.pii_type})
     ON CREATE SET
       t.created_at = coalesce(old.created_at, $now), t.count = coalesce(old.count, 0),
       t.max_risk = old.max_risk, t.max_risk_rank = coalesce(old.max_risk_rank, 1),
       t.max_confidence = coalesce(old.max_confidence, 0.0),
       t.first_detected = old.first_detected, t.last_detected = old.last_detected
     SET t.data_category = CASE WHEN coalesce(old.data_category, '') = ''
                                THEN 'Uncategorized' ELSE old.data_category END,
         t.dpdpa_category = old.dpdpa_category,
         t.requires_consent = coalesce(old.requires_consent, false),
         t.updated_at = $now
     WITH t
     MERGE (dc:DataCategory {tenant_id: $tenant_id, id: t.data_category})
     ON CREATE SET
       dc.created_at = $now, dc.updated_at = $now, dc.label = t.data_category,
       dc.dpdpa_category = t.dpdpa_category, dc.requires_consent = t.requires_consent,
       dc.finding_count = 0, dc.avg_confidence = 0.0
     MERGE (dc)-[r:INCLUDES]->(t)
     ON CREATE SET r.tenant_id = $tenant_id, r.created_at = $now",
    "MATCH (a:Asset {tenant_id: $tenant_id})-[:ASSET_CONTAINS_PII]->(old:PII_Category {tenant_id: $tenant_id})
     MATCH (dc:DataCategory {tenant_id: $tenant_id})-[:INCLUDES]->(t:PIIType {tenant_id: $tenant_id, type: old.pii_type})
     MERGE (a)-[r:HAS_CATEGORY]->(dc)
     ON CREATE SET r.tenant_id = $tenant_id, r.created_at = $now",
    "MATCH (a:Asset {tenant_id: $tenant_id})-[e:EXPOSES]->(old:PII_Category {tenant_id: $tenant_id})
     MATCH (t:PIIType {tenant_id: $tenant_id, type: old.pii_type})
     CREATE (a)-[moved:EXPOSES]->(t)
     SET moved = properties(e)
     DELETE e",
    "MATCH (old:PII_Category {tenant_id: $tenant_id}) DETACH DELETE old",
];

/// PIIType leaves fold back into PII_Category; DataCategory nodes are dropped.
/// Assets are linked to every leaf they have an exposure interval on.
const FOUR_TO_THREE: &[&str] = &[
    "MATCH (t:PIIType {tenant_id: $tenant_id})
     MERGE (p:PII_Category {tenant_id: $tenant_id, pii_type: t.type})
     ON CREATE SET
       p.created_at = coalesce(t.created_at, $now), p.count = coalesce(t.count, 0),
       p.max_risk = t.max_risk, p.max_risk_rank = coalesce(t.max_risk_rank, 1),
       p.max_confidence = coalesce(t.max_confidence, 0.0),
       p.first_detected = t.first_detected, p.last_detected = t.last_detected
     SET p.data_category = t.data_category, p.dpdpa_category = t.dpdpa_category,
         p.requires_consent = coalesce(t.requires_consent, false), p.updated_at = $now",
    "MATCH (a:Asset {tenant_id: $tenant_id})-[:EXPOSES]->(t:PIIType {tenant_id: $tenant_id})
     MATCH (p:PII_Category {tenant_id: $tenant_id, pii_type: t.type})
     MERGE (a)-[r:ASSET_CONTAINS_PII]->(p)
     ON CREATE SET r.tenant_id = $tenant_id, r.created_at = $now",
    "MATCH (a:Asset {tenant_id: $tenant_id})-[e:EXPOSES]->(t:PIIType {tenant_id: $tenant_id})
     MATCH (p:PII_Category {tenant_id: $tenant_id, pii_type: t.type})
     CREATE (a)-[moved:EXPOSES]->(p)
     SET moved = properties(e)
     DELETE e",
    "MATCH (t:PIIType {tenant_id: $tenant_id}) DETACH DELETE t",
    "MATCH (dc:DataCategory {tenant_id: $tenant_id}) DETACH DELETE dc",
];

fn statements(from: HierarchyShape) -> &'static [&'static str] {
    match from {
        HierarchyShape::ThreeLevel => THREE_TO_FOUR,
        HierarchyShape::FourLevel => FOUR_TO_THREE,
    }
}

impl GraphClient {
    /// Rewrite the tenant's graph from `from` to `to` in a single transaction,
    /// then record `to` as the canonical shape.
    pub async fn migrate_shape(
        &self,
        tenant_id: &TenantId,
        from: HierarchyShape,
        to: HierarchyShape,
    ) -> Result<MigrationReport, GraphError> {
        let stored = self.stored_shape(tenant_id).await?;
        let step = plan_migration(stored, from, to)?;
        let scope = GraphScope::new(*tenant_id, to);

        match step {
            MigrationStep::Noop => {
                tracing::info!(tenant_id = %tenant_id, shape = %to, "Graph already in target shape");
                return Ok(MigrationReport {
                    from: stored,
                    to: Some(to),
                    ..Default::default()
                });
            }
            MigrationStep::RecordOnly => {
                self.record_shape(&scope).await?;
                tracing::info!(tenant_id = %tenant_id, shape = %to, "Recorded shape for empty graph");
                return Ok(MigrationReport {
                    from: None,
                    to: Some(to),
                    ..Default::default()
                });
            }
            MigrationStep::Rewrite => {}
        }

        let old_leaf = from.leaf_kind();
        let leaves_migrated = self.count_label(tenant_id, old_leaf).await?;
        let exposures_repointed = self.count_exposures(tenant_id, old_leaf).await?;

        let now = format_ts(Utc::now());
        let mut txn = self.start_txn().await?;
        for statement in statements(from) {
            let q = query(statement)
                .param("tenant_id", tenant(tenant_id))
                .param("now", now.clone());
            txn.run(q).await?;
        }
        let meta = query(
            "MERGE (m:LineageMeta {tenant_id: $tenant_id})
             ON CREATE SET m.created_at = $now
             SET m.shape = $shape, m.updated_at = $now",
        )
        .param("tenant_id", tenant(tenant_id))
        .param("shape", to.as_str())
        .param("now", now.clone());
        txn.run(meta).await?;
        txn.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            from = %from,
            to = %to,
            leaves_migrated,
            exposures_repointed,
            "Hierarchy shape migrated"
        );

        Ok(MigrationReport {
            from: Some(from),
            to: Some(to),
            leaves_migrated,
            exposures_repointed,
        })
    }

    async fn count_label(&self, tenant_id: &TenantId, kind: NodeKind) -> Result<i64, GraphError> {
        let cypher = format!(
            "MATCH (n:{label} {{tenant_id: $tenant_id}}) RETURN count(n) AS cnt",
            label = kind.label()
        );
        let q = query(&cypher).param("tenant_id", tenant(tenant_id));
        Ok(count_of(self.query_one(q).await?, "cnt"))
    }

    async fn count_exposures(&self, tenant_id: &TenantId, leaf: NodeKind) -> Result<i64, GraphError> {
        let cypher = format!(
            "MATCH (:Asset {{tenant_id: $tenant_id}})-[e:EXPOSES]->(:{label} {{tenant_id: $tenant_id}})
             RETURN count(e) AS cnt",
            label = leaf.label()
        );
        let q = query(&cypher).param("tenant_id", tenant(tenant_id));
        Ok(count_of(self.query_one(q).await?, "cnt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_direction_removes_the_old_leaf_label() {
        assert!(statements(HierarchyShape::ThreeLevel)
            .iter()
            .any(|s| s.contains("(old:PII_Category {tenant_id: $tenant_id}) DETACH DELETE")));
        assert!(statements(HierarchyShape::FourLevel)
            .iter()
            .any(|s| s.contains("(t:PIIType {tenant_id: $tenant_id}) DETACH DELETE")));
    }

    #[test]
    fn exposures_are_repointed_before_leaves_are_deleted() {
        for from in [HierarchyShape::ThreeLevel, HierarchyShape::FourLevel] {
            let stmts = statements(from);
            let repoint = stmts.iter().position(|s| s.contains("SET moved = properties(e)"));
            let delete = stmts.iter().position(|s| s.contains("DETACH DELETE"));
            assert!(repoint.unwrap() < delete.unwrap());
        }
    }
}
