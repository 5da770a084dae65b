//! Configuration for the lineage sync daemon.

use serde::Deserialize;
use uuid::Uuid;

use lineage_core::{HierarchyShape, TenantId};
use lineage_graph::GraphConfig;

use crate::error::{Result, SyncError};

/// Sync engine configuration.
///
/// Loaded from the `[sync]` section of `lineage.toml` or `LINEAGE__SYNC__*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Tenant whose graph this engine writes.
    #[serde(default)]
    pub tenant_id: String,

    /// Canonical hierarchy shape (`three_level` or `four_level`).
    #[serde(default)]
    pub shape: HierarchyShape,

    /// Path to the SQLite system of record.
    #[serde(default = "default_source_db")]
    pub source_db: String,

    /// Classifications scoring below this are left out of the graph.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Seconds between scheduled passes in daemon mode.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Directory for the pass journal.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: String,
}

fn default_source_db() -> String {
    "lineage.db".to_string()
}

fn default_min_confidence() -> f64 {
    0.45
}

fn default_interval() -> u64 {
    3600
}

fn default_journal_dir() -> String {
    "./journal".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            shape: HierarchyShape::default(),
            source_db: default_source_db(),
            min_confidence: default_min_confidence(),
            interval_secs: default_interval(),
            journal_dir: default_journal_dir(),
        }
    }
}

impl SyncConfig {
    /// Resolve the tenant, preferring an explicit override.
    pub fn resolve_tenant_id(&self, cli_override: Option<&str>) -> Result<TenantId> {
        let raw = cli_override.unwrap_or(&self.tenant_id);
        if raw.trim().is_empty() {
            return Err(SyncError::Config(
                "tenant id required: set --tenant-id or sync.tenant_id in config".to_string(),
            ));
        }
        let uuid = Uuid::parse_str(raw.trim())
            .map_err(|e| SyncError::Config(format!("invalid tenant id {raw:?}: {e}")))?;
        Ok(TenantId(uuid))
    }
}

fn build(file_prefix: &str) -> std::result::Result<config::Config, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("LINEAGE")
                .separator("__")
                .try_parsing(true),
        )
        .build()
}

/// Load `[sync]`, falling back to defaults when the section is absent.
pub fn load_sync_config(file_prefix: &str) -> Result<SyncConfig> {
    let cfg = build(file_prefix).map_err(|e| SyncError::Config(e.to_string()))?;
    match cfg.get::<SyncConfig>("sync") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(SyncConfig::default()),
        Err(e) => Err(SyncError::Config(e.to_string())),
    }
}

/// Load `[neo4j]`, falling back to defaults when the section is absent.
pub fn load_graph_config(file_prefix: &str) -> Result<GraphConfig> {
    let cfg = build(file_prefix).map_err(|e| SyncError::Config(e.to_string()))?;
    match cfg.get::<GraphConfig>("neo4j") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(GraphConfig::default()),
        Err(e) => Err(SyncError::Config(e.to_string())),
    }
}
