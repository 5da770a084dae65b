//! Periodic sync passes.

use tokio::time::{interval, Duration, MissedTickBehavior};

use lineage_graph::LineageStore;

use crate::engine::SyncEngine;
use crate::source::RelationalSource;

/// Run a pass every `interval_secs`, forever. Failed passes are logged and the
/// loop carries on; ticks missed while a pass runs are skipped.
pub async fn run_daemon<S, R>(engine: &SyncEngine<S, R>, interval_secs: u64)
where
    S: LineageStore,
    R: RelationalSource,
{
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        tenant = %engine.scope().tenant_id,
        interval_secs,
        "Sync scheduler started"
    );

    loop {
        ticker.tick().await;
        tracing::info!(tenant = %engine.scope().tenant_id, "Scheduled sync triggered");

        if let Err(e) = engine.sync_lineage().await {
            tracing::error!(tenant = %engine.scope().tenant_id, error = %e, "Scheduled sync failed");
        }
    }
}
