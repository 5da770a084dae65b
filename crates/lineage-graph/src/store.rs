//! The storage seam between the sync engine / query layer and the graph.
//!
//! `GraphClient` implements it against Neo4j; `MemoryStore` implements it in
//! process for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use lineage_core::{
    ExposureKey, ExposureObservation, ExposureRecord, GraphScope, HierarchyLink, HierarchyPath,
    HierarchyShape, LineageNode, PassId, TenantId,
};

use crate::client::{GraphClient, GraphError};

/// Outcome of a one-time hierarchy shape migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from: Option<HierarchyShape>,
    pub to: Option<HierarchyShape>,
    pub leaves_migrated: i64,
    pub exposures_repointed: i64,
}

/// Read and write operations over one lineage graph.
#[async_trait]
pub trait LineageStore: Send + Sync {
    /// The shape the tenant's graph was written with, if any pass has recorded one.
    async fn stored_shape(&self, tenant_id: &TenantId) -> Result<Option<HierarchyShape>, GraphError>;

    /// Record `scope.shape` as the tenant's canonical shape.
    async fn record_shape(&self, scope: &GraphScope) -> Result<(), GraphError>;

    /// Idempotent create-or-merge keyed by (tenant, label, natural key).
    async fn upsert_node(
        &self,
        scope: &GraphScope,
        node: &LineageNode,
        at: DateTime<Utc>,
    ) -> Result<(), GraphError>;

    /// Merge a containment edge. Both endpoints must already exist.
    async fn link_hierarchy(&self, scope: &GraphScope, link: &HierarchyLink) -> Result<(), GraphError>;

    /// Every interval with `until = null`.
    async fn open_exposures(&self, scope: &GraphScope) -> Result<Vec<ExposureRecord>, GraphError>;

    /// Every interval, open or closed, newest first. Optionally narrowed to one asset.
    async fn exposures(
        &self,
        scope: &GraphScope,
        asset_id: Option<&str>,
    ) -> Result<Vec<ExposureRecord>, GraphError>;

    /// Open a new interval. Returns false when the pair already has an open one.
    async fn open_exposure(
        &self,
        scope: &GraphScope,
        obs: &ExposureObservation,
        at: DateTime<Utc>,
        pass_id: PassId,
    ) -> Result<bool, GraphError>;

    /// Fold an observation into the open interval. Returns false when none is open.
    async fn refresh_exposure(
        &self,
        scope: &GraphScope,
        obs: &ExposureObservation,
        at: DateTime<Utc>,
        pass_id: PassId,
    ) -> Result<bool, GraphError>;

    /// Close the open interval. Returns false (a no-op) when none is open.
    async fn close_exposure(
        &self,
        scope: &GraphScope,
        key: &ExposureKey,
        at: DateTime<Utc>,
    ) -> Result<bool, GraphError>;

    /// Traversal rows System → Asset → (DataCategory) → leaf, with optional lower levels.
    async fn hierarchy_paths(&self, scope: &GraphScope) -> Result<Vec<HierarchyPath>, GraphError>;

    /// One-time rewrite of the tenant's graph from one shape to the other.
    async fn migrate_shape(
        &self,
        tenant_id: &TenantId,
        from: HierarchyShape,
        to: HierarchyShape,
    ) -> Result<MigrationReport, GraphError>;
}

/// What a migration request amounts to given the recorded shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MigrationStep {
    /// Nothing recorded yet: just record the target shape.
    RecordOnly,
    /// Already in the target shape.
    Noop,
    /// Rewrite the graph.
    Rewrite,
}

pub(crate) fn plan_migration(
    stored: Option<HierarchyShape>,
    from: HierarchyShape,
    to: HierarchyShape,
) -> Result<MigrationStep, GraphError> {
    match stored {
        None => Ok(MigrationStep::RecordOnly),
        Some(current) if current == to => Ok(MigrationStep::Noop),
        Some(current) if current != from => Err(GraphError::Migration {
            from,
            to,
            reason: format!("graph is recorded as {current}"),
        }),
        Some(_) => Ok(MigrationStep::Rewrite),
    }
}

#[async_trait]
impl LineageStore for GraphClient {
    async fn stored_shape(&self, tenant_id: &TenantId) -> Result<Option<HierarchyShape>, GraphError> {
        GraphClient::stored_shape(self, tenant_id).await
    }

    async fn record_shape(&self, scope: &GraphScope) -> Result<(), GraphError> {
        GraphClient::record_shape(self, scope).await
    }

    async fn upsert_node(
        &self,
        scope: &GraphScope,
        node: &LineageNode,
        at: DateTime<Utc>,
    ) -> Result<(), GraphError> {
        GraphClient::upsert_node(self, scope, node, at).await
    }

    async fn link_hierarchy(&self, scope: &GraphScope, link: &HierarchyLink) -> Result<(), GraphError> {
        GraphClient::link_hierarchy(self, scope, link).await
    }

    async fn open_exposures(&self, scope: &GraphScope) -> Result<Vec<ExposureRecord>, GraphError> {
        GraphClient::open_exposures(self, scope).await
    }

    async fn exposures(
        &self,
        scope: &GraphScope,
        asset_id: Option<&str>,
    ) -> Result<Vec<ExposureRecord>, GraphError> {
        GraphClient::exposures(self, scope, asset_id).await
    }

    async fn open_exposure(
        &self,
        scope: &GraphScope,
        obs: &ExposureObservation,
        at: DateTime<Utc>,
        pass_id: PassId,
    ) -> Result<bool, GraphError> {
        GraphClient::open_exposure(self, scope, obs, at, pass_id).await
    }

    async fn refresh_exposure(
        &self,
        scope: &GraphScope,
        obs: &ExposureObservation,
        at: DateTime<Utc>,
        pass_id: PassId,
    ) -> Result<bool, GraphError> {
        GraphClient::refresh_exposure(self, scope, obs, at, pass_id).await
    }

    async fn close_exposure(
        &self,
        scope: &GraphScope,
        key: &ExposureKey,
        at: DateTime<Utc>,
    ) -> Result<bool, GraphError> {
        GraphClient::close_exposure(self, scope, key, at).await
    }

    async fn hierarchy_paths(&self, scope: &GraphScope) -> Result<Vec<HierarchyPath>, GraphError> {
        GraphClient::hierarchy_paths(self, scope).await
    }

    async fn migrate_shape(
        &self,
        tenant_id: &TenantId,
        from: HierarchyShape,
        to: HierarchyShape,
    ) -> Result<MigrationReport, GraphError> {
        GraphClient::migrate_shape(self, tenant_id, from, to).await
    }
}
