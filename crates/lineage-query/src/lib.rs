//! lineage-query: reads over the PII lineage graph for the visualization UI
//! and reporting.
//!
//! Everything is computed live from the store on each call. Reads are not
//! coordinated with sync passes and may see a partially-updated graph.

pub mod aggregate;
pub mod error;
pub mod hierarchy;
pub mod temporal;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use lineage_core::{ExposureRecord, GraphScope};
use lineage_graph::LineageStore;

pub use aggregate::PiiTypeAggregation;
pub use error::{QueryError, Result};
pub use hierarchy::{HierarchyEdgeView, HierarchyFilters, HierarchyGraph};
pub use temporal::{ComplianceEvent, ComplianceEventKind};

pub struct LineageQuery<S> {
    store: Arc<S>,
    scope: GraphScope,
}

impl<S: LineageStore> LineageQuery<S> {
    pub fn new(store: Arc<S>, scope: GraphScope) -> Self {
        Self { store, scope }
    }

    pub fn scope(&self) -> &GraphScope {
        &self.scope
    }

    /// Nodes and edges of the hierarchy, narrowed by `filters`.
    pub async fn get_hierarchy(&self, filters: &HierarchyFilters) -> Result<HierarchyGraph> {
        if filters.system.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(QueryError::InvalidFilter("system filter is blank".to_string()));
        }
        if filters.category.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(QueryError::InvalidFilter("category filter is blank".to_string()));
        }
        let paths = self.store.hierarchy_paths(&self.scope).await?;
        let graph = hierarchy::build_hierarchy(&paths, self.scope.shape, filters);
        tracing::debug!(
            paths = paths.len(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Hierarchy built"
        );
        Ok(graph)
    }

    pub async fn get_aggregations_by_pii_type(&self) -> Result<Vec<PiiTypeAggregation>> {
        let paths = self.store.hierarchy_paths(&self.scope).await?;
        let exposures = self.store.exposures(&self.scope, None).await?;
        Ok(aggregate::aggregate_by_pii_type(
            &paths,
            &exposures,
            self.scope.shape,
        ))
    }

    /// Every interval for the asset, newest first.
    pub async fn exposure_history(&self, asset_id: &str) -> Result<Vec<ExposureRecord>> {
        Ok(self.store.exposures(&self.scope, Some(asset_id)).await?)
    }

    pub async fn active_exposures(&self, asset_id: &str) -> Result<Vec<ExposureRecord>> {
        Ok(temporal::active(self.exposure_history(asset_id).await?))
    }

    /// Intervals covering `t` (since ≤ t < until).
    pub async fn exposure_at(&self, asset_id: &str, t: DateTime<Utc>) -> Result<Vec<ExposureRecord>> {
        Ok(temporal::at(self.exposure_history(asset_id).await?, t))
    }

    pub async fn exposure_duration(
        &self,
        asset_id: &str,
        pii_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Duration> {
        let history = self.exposure_history(asset_id).await?;
        Ok(temporal::duration(&history, pii_type, now))
    }

    pub async fn was_compliant_at(&self, asset_id: &str, t: DateTime<Utc>) -> Result<bool> {
        let history = self.exposure_history(asset_id).await?;
        Ok(temporal::compliant_at(&history, t))
    }

    pub async fn compliance_timeline(&self, asset_id: &str) -> Result<Vec<ComplianceEvent>> {
        let history = self.exposure_history(asset_id).await?;
        Ok(temporal::timeline(&history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lineage_core::{
        AssetNode, CategoryNode, ExposureKey, ExposureObservation, HierarchyEdge, HierarchyLink,
        HierarchyShape, LineageNode, PassId, PiiTypeNode, Severity, SystemNode, TenantId,
    };
    use lineage_graph::MemoryStore;

    fn t(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, d, 0, 0, 0).unwrap()
    }

    async fn seeded() -> LineageQuery<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let scope = GraphScope::new(TenantId::new(), HierarchyShape::FourLevel);
        let nodes = vec![
            LineageNode::System(SystemNode {
                id: "system-files01".to_string(),
                label: "files01".to_string(),
                host: "files01".to_string(),
                source_system: "smb".to_string(),
            }),
            LineageNode::Asset(AssetNode {
                stable_id: "a1".to_string(),
                name: "hr.xlsx".to_string(),
                path: "/hr.xlsx".to_string(),
                asset_type: "file".to_string(),
                environment: "prod".to_string(),
                owner: "hr".to_string(),
                risk_score: 50,
                total_findings: 3,
                system_id: "system-files01".to_string(),
            }),
            LineageNode::Category(CategoryNode {
                id: "Identity".to_string(),
                label: "Identity".to_string(),
                dpdpa_category: "Sensitive".to_string(),
                requires_consent: true,
                finding_count: 3,
                avg_confidence: 0.8,
                risk_level: Some(Severity::Critical),
            }),
            LineageNode::Leaf(PiiTypeNode {
                pii_type: "IN_AADHAAR".to_string(),
                data_category: "Identity".to_string(),
                dpdpa_category: "Sensitive".to_string(),
                requires_consent: true,
                count: 3,
                max_risk: Severity::Critical,
                max_confidence: 0.9,
                first_detected: t(1),
                last_detected: t(1),
            }),
        ];
        for n in &nodes {
            store.upsert_node(&scope, n, t(1)).await.unwrap();
        }
        for link in [
            HierarchyLink::new(HierarchyEdge::Contains, "system-files01", "a1"),
            HierarchyLink::new(HierarchyEdge::HasCategory, "a1", "Identity"),
            HierarchyLink::new(HierarchyEdge::Includes, "Identity", "IN_AADHAAR"),
        ] {
            store.link_hierarchy(&scope, &link).await.unwrap();
        }
        let obs = ExposureObservation {
            key: ExposureKey::new("a1", "IN_AADHAAR"),
            finding_count: 3,
            avg_confidence: 0.8,
            max_confidence: 0.9,
        };
        store.open_exposure(&scope, &obs, t(1), PassId::new()).await.unwrap();
        store
            .close_exposure(&scope, &obs.key, t(4))
            .await
            .unwrap();
        store.open_exposure(&scope, &obs, t(6), PassId::new()).await.unwrap();

        LineageQuery::new(store, scope)
    }

    #[tokio::test]
    async fn hierarchy_and_aggregations_from_store() {
        let q = seeded().await;
        let g = q.get_hierarchy(&HierarchyFilters::default()).await.unwrap();
        assert_eq!(g.nodes.len(), 4);
        assert_eq!(g.edges.len(), 3);

        let rows = q.get_aggregations_by_pii_type().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_findings, 6);
        assert_eq!(rows[0].open_exposures, 1);
        assert_eq!(rows[0].affected_assets, 1);
    }

    #[tokio::test]
    async fn temporal_queries_from_store() {
        let q = seeded().await;
        let history = q.exposure_history("a1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].since, t(6));

        assert_eq!(q.active_exposures("a1").await.unwrap().len(), 1);
        assert_eq!(q.exposure_at("a1", t(2)).await.unwrap().len(), 1);
        assert!(q.was_compliant_at("a1", t(5)).await.unwrap());
        assert!(!q.was_compliant_at("a1", t(4) - Duration::seconds(1)).await.unwrap());
        assert_eq!(
            q.exposure_duration("a1", "IN_AADHAAR", t(8)).await.unwrap(),
            Duration::days(3 + 2)
        );
        assert_eq!(q.compliance_timeline("a1").await.unwrap().len(), 3);
        assert!(q.exposure_history("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_filters_are_rejected() {
        let q = seeded().await;
        let filters = HierarchyFilters {
            system: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            q.get_hierarchy(&filters).await,
            Err(QueryError::InvalidFilter(_))
        ));
    }
}
