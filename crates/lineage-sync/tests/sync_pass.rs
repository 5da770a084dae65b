//! End-to-end sync passes against the in-process store.
//!
//! Run with: cargo test --package lineage-sync --test sync_pass

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Notify;

use lineage_core::{
    GraphScope, HierarchyEdge, HierarchyShape, LineageNode, NodeKind, PiiTypeNode, Severity,
    TenantId,
};
use lineage_graph::{GraphError, LineageStore, MemoryStore, StoreOp};
use lineage_query::{HierarchyFilters, HierarchyGraph, LineageQuery};
use lineage_sync::journal::{PassJournal, PassOutcome};
use lineage_sync::source::{AssetRow, ClassifiedFinding, SourceError};
use lineage_sync::{RelationalSource, SourceSnapshot, StaticSource, SyncEngine, SyncError};

fn t(pass: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap() + Duration::hours(pass)
}

fn snapshot(findings: &[(&str, usize, f64)]) -> SourceSnapshot {
    let assets = vec![AssetRow {
        stable_id: "asset-1".to_string(),
        name: "customers.csv".to_string(),
        path: "/exports/customers.csv".to_string(),
        asset_type: "file".to_string(),
        host: "files01".to_string(),
        source_system: "smb".to_string(),
        ..Default::default()
    }];
    let mut rows = Vec::new();
    for (pii_type, count, confidence) in findings {
        for i in 0..*count {
            rows.push(ClassifiedFinding {
                finding_id: format!("{pii_type}-{i}"),
                asset_id: "asset-1".to_string(),
                classification_type: "Identity".to_string(),
                pii_type: Some(pii_type.to_string()),
                dpdpa_category: "Sensitive".to_string(),
                requires_consent: true,
                confidence: *confidence,
                ..Default::default()
            });
        }
    }
    SourceSnapshot {
        assets,
        findings: rows,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    source: Arc<StaticSource>,
    engine: SyncEngine<MemoryStore, StaticSource>,
}

impl Harness {
    fn new(shape: HierarchyShape) -> Self {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(StaticSource::default());
        let scope = GraphScope::new(TenantId::new(), shape);
        let engine = SyncEngine::new(store.clone(), source.clone(), scope);
        Self {
            store,
            source,
            engine,
        }
    }

    fn scope(&self) -> GraphScope {
        *self.engine.scope()
    }

    async fn leaf(&self, pii_type: &str) -> PiiTypeNode {
        let scope = self.scope();
        match self
            .store
            .node(&scope.tenant_id, scope.leaf_kind(), pii_type)
            .await
        {
            Some(LineageNode::Leaf(leaf)) => leaf,
            other => panic!("expected leaf {pii_type}, got {other:?}"),
        }
    }

    async fn counts(&self) -> Vec<usize> {
        let tid = self.scope().tenant_id;
        let mut out = Vec::new();
        for kind in [
            NodeKind::System,
            NodeKind::Asset,
            NodeKind::DataCategory,
            NodeKind::PiiType,
            NodeKind::PiiCategory,
        ] {
            out.push(self.store.node_count(&tid, kind).await);
        }
        for edge in [
            HierarchyEdge::Contains,
            HierarchyEdge::HasCategory,
            HierarchyEdge::Includes,
            HierarchyEdge::AssetContainsPii,
        ] {
            out.push(self.store.link_count(&tid, edge).await);
        }
        out
    }
}

#[tokio::test]
async fn four_pass_exposure_scenario() {
    let h = Harness::new(HierarchyShape::FourLevel);
    let scope = h.scope();

    // Pass 1: first detection.
    h.source.set(snapshot(&[("NationalID", 3, 0.8)]));
    let r1 = h.engine.sync_lineage_at(t(1)).await.unwrap();
    assert_eq!(r1.exposures_opened, 1);
    let open = h.store.open_exposures(&scope).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].since, t(1));
    assert_eq!(open[0].finding_count, 3);
    assert_eq!(h.leaf("NationalID").await.count, 3);
    let first_id = open[0].id;

    // Pass 2: repeat detection updates in place.
    h.source.set(snapshot(&[("NationalID", 5, 0.85)]));
    let r2 = h.engine.sync_lineage_at(t(2)).await.unwrap();
    assert_eq!(r2.exposures_refreshed, 1);
    assert_eq!(r2.exposures_opened, 0);
    let open = h.store.open_exposures(&scope).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, first_id);
    assert_eq!(open[0].since, t(1));
    assert_eq!(open[0].last_finding_count, 5);
    assert_eq!(open[0].last_seen, t(2));
    let leaf = h.leaf("NationalID").await;
    assert_eq!(leaf.count, 8);
    assert_eq!(leaf.max_confidence, 0.85);
    assert_eq!(leaf.first_detected, t(1));
    assert_eq!(leaf.last_detected, t(2));

    // Pass 3: absent, so the interval closes.
    h.source.set(snapshot(&[]));
    let r3 = h.engine.sync_lineage_at(t(3)).await.unwrap();
    assert_eq!(r3.exposures_closed, 1);
    assert!(h.store.open_exposures(&scope).await.unwrap().is_empty());
    let history = h.store.exposures(&scope, Some("asset-1")).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].until, Some(t(3)));
    assert_eq!(h.leaf("NationalID").await.count, 8);

    // Pass 4: reappears as a brand-new interval.
    h.source.set(snapshot(&[("NationalID", 1, 0.9)]));
    let r4 = h.engine.sync_lineage_at(t(4)).await.unwrap();
    assert_eq!(r4.exposures_opened, 1);
    let history = h.store.exposures(&scope, Some("asset-1")).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].since, t(4));
    assert!(history[0].is_open());
    assert_ne!(history[0].id, first_id);
    assert_eq!(history[1].until, Some(t(3)));
}

#[tokio::test]
async fn identical_input_is_idempotent() {
    let h = Harness::new(HierarchyShape::FourLevel);
    h.source
        .set(snapshot(&[("IN_AADHAAR", 2, 0.9), ("IN_PAN", 1, 0.7)]));

    h.engine.sync_lineage_at(t(1)).await.unwrap();
    let after_one = h.counts().await;
    h.engine.sync_lineage_at(t(2)).await.unwrap();
    h.engine.sync_lineage_at(t(3)).await.unwrap();

    assert_eq!(h.counts().await, after_one);
    // 1 system, 1 asset, 1 category, 2 leaves; CONTAINS, HAS_CATEGORY, 2 INCLUDES.
    assert_eq!(after_one, vec![1, 1, 1, 2, 0, 1, 1, 2, 0]);

    // Counters move only by the merge rule.
    assert_eq!(h.leaf("IN_AADHAAR").await.count, 6);
    let open = h.store.open_exposures(&h.scope()).await.unwrap();
    assert_eq!(open.len(), 2);
    assert!(open.iter().all(|e| e.observations == 3 && e.since == t(1)));
}

#[tokio::test]
async fn closing_an_absent_pair_twice_keeps_first_until() {
    let h = Harness::new(HierarchyShape::FourLevel);
    h.source.set(snapshot(&[("IN_PHONE", 1, 0.7)]));
    h.engine.sync_lineage_at(t(1)).await.unwrap();

    h.source.set(snapshot(&[]));
    assert_eq!(h.engine.sync_lineage_at(t(2)).await.unwrap().exposures_closed, 1);
    assert_eq!(h.engine.sync_lineage_at(t(3)).await.unwrap().exposures_closed, 0);

    let key = lineage_core::ExposureKey::new("asset-1", "IN_PHONE");
    assert!(!h.store.close_exposure(&h.scope(), &key, t(4)).await.unwrap());

    let history = h.store.exposures(&h.scope(), None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].until, Some(t(2)));
}

#[tokio::test]
async fn failure_aborts_remaining_steps_and_next_pass_heals() {
    let h = Harness::new(HierarchyShape::FourLevel);
    let tid = h.scope().tenant_id;
    h.source.set(snapshot(&[("IN_AADHAAR", 2, 0.9)]));

    h.store.fail_next(StoreOp::LinkHierarchy).await;
    let err = h.engine.sync_lineage_at(t(1)).await.unwrap_err();
    assert!(matches!(err, SyncError::Graph(GraphError::Connection(_))));

    // Nodes from step 2 stay; nothing after the failing step ran.
    assert_eq!(h.store.node_count(&tid, NodeKind::PiiType).await, 1);
    assert_eq!(h.store.link_count(&tid, HierarchyEdge::Contains).await, 0);
    assert!(h.store.open_exposures(&h.scope()).await.unwrap().is_empty());

    let report = h.engine.sync_lineage_at(t(2)).await.unwrap();
    assert_eq!(report.exposures_opened, 1);
    assert_eq!(h.store.link_count(&tid, HierarchyEdge::Includes).await, 1);
}

#[tokio::test]
async fn shape_mismatch_fails_before_writing_until_migrated() {
    let four = Harness::new(HierarchyShape::FourLevel);
    let tid = four.scope().tenant_id;
    four.source.set(snapshot(&[("IN_PAN", 2, 0.8)]));
    four.engine.sync_lineage_at(t(1)).await.unwrap();

    let three_scope = GraphScope::new(tid, HierarchyShape::ThreeLevel);
    let three = SyncEngine::new(four.store.clone(), four.source.clone(), three_scope);

    let err = three.sync_lineage_at(t(2)).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::ShapeMismatch {
            configured: HierarchyShape::ThreeLevel,
            recorded: HierarchyShape::FourLevel,
        }
    ));
    assert_eq!(four.store.node_count(&tid, NodeKind::PiiCategory).await, 0);

    let report = four
        .store
        .migrate_shape(&tid, HierarchyShape::FourLevel, HierarchyShape::ThreeLevel)
        .await
        .unwrap();
    assert_eq!(report.leaves_migrated, 1);
    assert_eq!(report.exposures_repointed, 1);

    let after = three.sync_lineage_at(t(3)).await.unwrap();
    assert_eq!(after.exposures_refreshed, 1);
    assert_eq!(after.exposures_opened, 0);
    assert_eq!(four.store.node_count(&tid, NodeKind::PiiType).await, 0);
    assert_eq!(four.store.node_count(&tid, NodeKind::DataCategory).await, 0);
    assert_eq!(
        four.store.link_count(&tid, HierarchyEdge::AssetContainsPii).await,
        1
    );
    assert!(matches!(
        four.engine.sync_lineage_at(t(4)).await,
        Err(SyncError::ShapeMismatch { .. })
    ));
}

#[tokio::test]
async fn low_confidence_and_untyped_rows_are_skipped() {
    let h = Harness::new(HierarchyShape::ThreeLevel);
    let mut snap = snapshot(&[("IN_PAN", 2, 0.9), ("IN_PHONE", 3, 0.2), ("IN_UPI", 1, f64::NAN)]);
    snap.findings[0].pii_type = None;
    h.source.set(snap);

    let report = h.engine.sync_lineage_at(t(1)).await.unwrap();
    assert_eq!(report.skipped.low_confidence, 3);
    assert_eq!(report.skipped.missing_pii_type, 1);
    assert_eq!(report.skipped.invalid_confidence, 1);
    assert_eq!(h.leaf("IN_PAN").await.count, 1);
    assert_eq!(report.findings_read, 6);
    assert_eq!(report.exposures_opened, 1);
}

/// Holds the first snapshot until released.
struct GatedSource {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl RelationalSource for GatedSource {
    async fn snapshot(&self) -> Result<SourceSnapshot, SourceError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(snapshot(&[("IN_PAN", 1, 0.9)]))
    }
}

#[tokio::test]
async fn second_concurrent_pass_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(GatedSource {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let scope = GraphScope::new(TenantId::new(), HierarchyShape::FourLevel);
    let engine = Arc::new(SyncEngine::new(store, source.clone(), scope));

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sync_lineage_at(t(1)).await })
    };
    source.entered.notified().await;

    assert!(matches!(
        engine.sync_lineage_at(t(1)).await,
        Err(SyncError::PassInProgress)
    ));

    source.release.notify_one();
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.exposures_opened, 1);
}

#[tokio::test]
async fn every_pass_is_journaled() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(StaticSource::new(snapshot(&[("IN_PAN", 1, 0.9)])));
    let scope = GraphScope::new(TenantId::new(), HierarchyShape::FourLevel);
    let engine = SyncEngine::new(store.clone(), source, scope)
        .with_journal(PassJournal::new(dir.path()).unwrap());

    let ok = engine.sync_lineage_at(t(1)).await.unwrap();
    store.fail_next(StoreOp::UpsertNode).await;
    engine.sync_lineage_at(t(2)).await.unwrap_err();

    let journal = PassJournal::new(dir.path()).unwrap();
    let records = journal.list(&scope.tenant_id).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records.iter().filter(|r| r.succeeded()).count(), 1);

    let first = journal.get(ok.pass_id.0).unwrap();
    match first.outcome {
        PassOutcome::Succeeded { report } => assert_eq!(report, ok),
        PassOutcome::Failed { error } => panic!("unexpected failure: {error}"),
    }
}

async fn hierarchy_assets(
    query: &LineageQuery<MemoryStore>,
    filters: HierarchyFilters,
) -> (Vec<String>, HierarchyGraph) {
    let graph = query.get_hierarchy(&filters).await.unwrap();
    let mut assets: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Asset)
        .map(|n| n.key.clone())
        .collect();
    assets.sort();
    (assets, graph)
}

#[tokio::test]
async fn shared_category_does_not_leak_types_across_assets() {
    let h = Harness::new(HierarchyShape::FourLevel);
    let asset = |id: &str| AssetRow {
        stable_id: id.to_string(),
        name: format!("{id}.csv"),
        host: "files01".to_string(),
        source_system: "smb".to_string(),
        ..Default::default()
    };
    let finding = |id: &str, asset_id: &str, pii_type: &str, risk: &str| ClassifiedFinding {
        finding_id: id.to_string(),
        asset_id: asset_id.to_string(),
        classification_type: "Identity".to_string(),
        pii_type: Some(pii_type.to_string()),
        dpdpa_category: "Sensitive".to_string(),
        confidence: 0.8,
        risk_level: Some(risk.to_string()),
        ..Default::default()
    };
    h.source.set(SourceSnapshot {
        assets: vec![asset("a1"), asset("a2")],
        findings: vec![
            finding("f1", "a1", "IN_AADHAAR", "Critical"),
            finding("f2", "a2", "IN_PAN", "Medium"),
        ],
    });
    h.engine.sync_lineage_at(t(1)).await.unwrap();
    assert_eq!(h.store.node_count(&h.scope().tenant_id, NodeKind::DataCategory).await, 1);

    let query = LineageQuery::new(h.store.clone(), h.scope());
    let (assets, graph) = hierarchy_assets(&query, HierarchyFilters {
        category: Some("IN_PAN".to_string()),
        ..Default::default()
    })
    .await;
    assert_eq!(assets, vec!["a2"]);
    assert!(graph.edges.iter().all(|e| e.source != "a1"));
    assert!(graph.nodes.iter().all(|n| n.key != "IN_AADHAAR"));

    let (assets, _) = hierarchy_assets(&query, HierarchyFilters {
        risk: Some(Severity::Critical),
        ..Default::default()
    })
    .await;
    assert_eq!(assets, vec!["a1"]);

    let (assets, graph) = hierarchy_assets(&query, HierarchyFilters::default()).await;
    assert_eq!(assets, vec!["a1", "a2"]);
    let includes = graph
        .edges
        .iter()
        .filter(|e| e.edge_type == HierarchyEdge::Includes)
        .count();
    assert_eq!(includes, 2);

    let rows = query.get_aggregations_by_pii_type().await.unwrap();
    assert!(rows.iter().all(|r| r.affected_assets == 1));
}
