//! The sync orchestrator.
//!
//! One pass reads the relational source, writes nodes and hierarchy links
//! top-down, then moves exposure intervals forward. Steps run strictly in
//! order and the first failure aborts the rest. Writes already made stay in
//! place; every step is an idempotent merge, so the next pass picks up where
//! this one stopped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use lineage_core::{GraphScope, HierarchyShape, PassId, TenantId};
use lineage_graph::LineageStore;

use crate::error::{Result, SyncError};
use crate::journal::{PassJournal, PassOutcome, PassRecord};
use crate::plan::{SkipCounts, SyncPlan};
use crate::source::RelationalSource;
use crate::temporal;

/// What one pass did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncReport {
    pub pass_id: PassId,
    pub tenant_id: TenantId,
    pub shape: HierarchyShape,
    /// Timestamp stamped on every write of the pass.
    pub pass_time: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub assets_read: usize,
    pub findings_read: usize,
    pub nodes_upserted: usize,
    pub links_merged: usize,
    pub exposures_opened: usize,
    pub exposures_refreshed: usize,
    pub exposures_closed: usize,
    pub skipped: SkipCounts,
}

impl SyncReport {
    fn start(pass_id: PassId, scope: &GraphScope, pass_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            pass_id,
            tenant_id: scope.tenant_id,
            shape: scope.shape,
            pass_time,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            assets_read: 0,
            findings_read: 0,
            nodes_upserted: 0,
            links_merged: 0,
            exposures_opened: 0,
            exposures_refreshed: 0,
            exposures_closed: 0,
            skipped: SkipCounts::default(),
        }
    }

    fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.duration_ms = (self.finished_at - self.started_at).num_milliseconds();
    }
}

/// Reconciles one tenant's relational state into its lineage graph.
pub struct SyncEngine<S, R> {
    store: Arc<S>,
    source: Arc<R>,
    scope: GraphScope,
    min_confidence: f64,
    journal: Option<PassJournal>,
    in_flight: Mutex<()>,
}

impl<S: LineageStore, R: RelationalSource> SyncEngine<S, R> {
    pub fn new(store: Arc<S>, source: Arc<R>, scope: GraphScope) -> Self {
        Self {
            store,
            source,
            scope,
            min_confidence: 0.45,
            journal: None,
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_journal(mut self, journal: PassJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn scope(&self) -> &GraphScope {
        &self.scope
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run one pass stamped with the current time.
    pub async fn sync_lineage(&self) -> Result<SyncReport> {
        self.sync_lineage_at(Utc::now()).await
    }

    /// Run one pass with an explicit pass time.
    ///
    /// Fails with [`SyncError::PassInProgress`] if another pass on this engine
    /// has not finished.
    pub async fn sync_lineage_at(&self, at: DateTime<Utc>) -> Result<SyncReport> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| SyncError::PassInProgress)?;

        let pass_id = PassId::new();
        let mut report = SyncReport::start(pass_id, &self.scope, at);
        tracing::info!(
            pass_id = %pass_id,
            tenant = %self.scope.tenant_id,
            shape = %self.scope.shape,
            "Sync pass started"
        );

        let result = self.run_pass(&mut report).await;
        report.finish();

        let outcome = match &result {
            Ok(()) => {
                tracing::info!(
                    pass_id = %pass_id,
                    duration_ms = report.duration_ms,
                    nodes = report.nodes_upserted,
                    links = report.links_merged,
                    opened = report.exposures_opened,
                    refreshed = report.exposures_refreshed,
                    closed = report.exposures_closed,
                    "Sync pass complete"
                );
                PassOutcome::Succeeded {
                    report: report.clone(),
                }
            }
            Err(e) => {
                tracing::error!(
                    pass_id = %pass_id,
                    duration_ms = report.duration_ms,
                    nodes = report.nodes_upserted,
                    links = report.links_merged,
                    error = %e,
                    "Sync pass failed"
                );
                PassOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        self.journal_pass(&report, outcome);

        result.map(|()| report)
    }

    async fn run_pass(&self, report: &mut SyncReport) -> Result<()> {
        let scope = &self.scope;
        let at = report.pass_time;

        // 0. Shape guard.
        match self.store.stored_shape(&scope.tenant_id).await? {
            None => {
                self.store.record_shape(scope).await?;
                tracing::info!(tenant = %scope.tenant_id, shape = %scope.shape, "Recorded hierarchy shape");
            }
            Some(recorded) if recorded != scope.shape => {
                return Err(SyncError::ShapeMismatch {
                    configured: scope.shape,
                    recorded,
                });
            }
            Some(_) => {}
        }

        // 1. Read.
        let snapshot = self.source.snapshot().await?;
        report.assets_read = snapshot.assets.len();
        report.findings_read = snapshot.findings.len();
        let plan = SyncPlan::build(&snapshot, scope.shape, self.min_confidence, at);
        report.skipped = plan.skipped;
        if plan.skipped != SkipCounts::default() {
            tracing::info!(
                low_confidence = plan.skipped.low_confidence,
                missing_pii_type = plan.skipped.missing_pii_type,
                unknown_asset = plan.skipped.unknown_asset,
                invalid_confidence = plan.skipped.invalid_confidence,
                "Findings skipped"
            );
        }

        // 2. Nodes, top-down.
        for node in &plan.nodes {
            self.store.upsert_node(scope, node, at).await?;
            report.nodes_upserted += 1;
        }

        // 3. Hierarchy links, top-down.
        for link in &plan.links {
            self.store.link_hierarchy(scope, link).await?;
            report.links_merged += 1;
        }

        // 4 and 5. Exposure intervals.
        let open = self.store.open_exposures(scope).await?;
        let changes = temporal::reconcile(&open, &plan.observations);
        tracing::debug!(
            open = changes.open.len(),
            refresh = changes.refresh.len(),
            close = changes.close.len(),
            "Exposure changes planned"
        );

        for obs in &changes.refresh {
            if self.store.refresh_exposure(scope, obs, at, report.pass_id).await? {
                report.exposures_refreshed += 1;
            } else if self.store.open_exposure(scope, obs, at, report.pass_id).await? {
                report.exposures_opened += 1;
            }
        }
        for obs in &changes.open {
            if self.store.open_exposure(scope, obs, at, report.pass_id).await? {
                report.exposures_opened += 1;
            } else if self.store.refresh_exposure(scope, obs, at, report.pass_id).await? {
                report.exposures_refreshed += 1;
            }
        }
        for key in &changes.close {
            if self.store.close_exposure(scope, key, at).await? {
                report.exposures_closed += 1;
            }
        }

        Ok(())
    }

    fn journal_pass(&self, report: &SyncReport, outcome: PassOutcome) {
        let Some(journal) = &self.journal else {
            return;
        };
        let written = PassRecord::new(
            report.pass_id,
            report.tenant_id,
            report.shape,
            report.started_at,
            report.finished_at,
            outcome,
        )
        .finalize()
        .and_then(|record| journal.append(&record));

        if let Err(e) = written {
            tracing::warn!(pass_id = %report.pass_id, error = %e, "Failed to journal sync pass");
        }
    }
}
