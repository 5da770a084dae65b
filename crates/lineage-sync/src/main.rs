//! CLI entry point for the lineage sync daemon.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use lineage_core::{GraphScope, HierarchyShape, Severity};
use lineage_graph::{GraphClient, LineageStore, MemoryStore};
use lineage_query::{HierarchyFilters, LineageQuery};

use lineage_sync::config::{load_graph_config, load_sync_config, SyncConfig};
use lineage_sync::journal::PassJournal;
use lineage_sync::scheduler::run_daemon;
use lineage_sync::{SqliteSource, SyncEngine};

#[derive(Parser)]
#[command(name = "lineage-sync")]
#[command(about = "Reconcile PII findings into the lineage graph")]
struct Cli {
    /// Run a single sync pass and exit.
    #[arg(long)]
    once: bool,

    /// Run as daemon with scheduled passes.
    #[arg(long)]
    daemon: bool,

    /// Run one pass against an in-process graph and print the report. Neo4j is not touched.
    #[arg(long)]
    dry_run: bool,

    /// Migrate the stored graph to this shape (three_level or four_level).
    #[arg(long, value_name = "SHAPE")]
    migrate: Option<String>,

    /// Create constraints and indexes.
    #[arg(long)]
    init_schema: bool,

    /// Print the hierarchy as JSON.
    #[arg(long)]
    hierarchy: bool,

    /// Hierarchy filter: system key or host.
    #[arg(long, requires = "hierarchy")]
    system: Option<String>,

    /// Hierarchy filter: exact leaf risk (low, medium, high, critical).
    #[arg(long, requires = "hierarchy")]
    risk: Option<String>,

    /// Hierarchy filter: data category, PII type, or DPDPA category.
    #[arg(long, requires = "hierarchy")]
    category: Option<String>,

    /// Print per-PII-type aggregations as JSON.
    #[arg(long)]
    aggregations: bool,

    /// Override tenant ID (otherwise read from config).
    #[arg(long)]
    tenant_id: Option<String>,

    /// Config file prefix (default: lineage).
    #[arg(short, long, default_value = "lineage")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let sync_config = load_sync_config(&cli.config)?;
    let tenant_id = sync_config.resolve_tenant_id(cli.tenant_id.as_deref())?;
    let scope = GraphScope::new(tenant_id, sync_config.shape);

    if cli.dry_run {
        let store = Arc::new(MemoryStore::new());
        let report = build_engine(store, scope, &sync_config, false)?.sync_lineage().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if !(cli.once
        || cli.daemon
        || cli.init_schema
        || cli.migrate.is_some()
        || cli.hierarchy
        || cli.aggregations)
    {
        anyhow::bail!(
            "Specify --once, --daemon, --dry-run, --init-schema, --migrate, --hierarchy, or --aggregations"
        );
    }

    let graph_config = load_graph_config(&cli.config)?;
    let graph = Arc::new(GraphClient::connect(&graph_config).await?);
    tracing::info!(uri = %graph_config.uri, "Connected to Neo4j");

    if cli.init_schema {
        graph.initialize_schema().await?;
        tracing::info!("Graph schema initialized");
    }

    if let Some(raw) = &cli.migrate {
        let to: HierarchyShape = raw.parse()?;
        let from = graph.stored_shape(&tenant_id).await?.unwrap_or(to);
        let report = graph.migrate_shape(&tenant_id, from, to).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if to != sync_config.shape {
            tracing::warn!(
                migrated_to = %to,
                configured = %sync_config.shape,
                "Configured shape differs from the migrated graph; passes will fail until sync.shape is updated"
            );
        }
    }

    if cli.once {
        let report = build_engine(graph.clone(), scope, &sync_config, true)?
            .sync_lineage()
            .await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if cli.daemon {
        let engine = build_engine(graph.clone(), scope, &sync_config, true)?;
        run_daemon(&engine, sync_config.interval_secs).await;
    }

    if cli.hierarchy || cli.aggregations {
        let query = LineageQuery::new(graph.clone(), scope);
        if cli.hierarchy {
            let filters = HierarchyFilters {
                system: cli.system.clone(),
                risk: cli.risk.as_deref().map(str::parse::<Severity>).transpose()?,
                category: cli.category.clone(),
            };
            let tree = query.get_hierarchy(&filters).await?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        if cli.aggregations {
            let rows = query.get_aggregations_by_pii_type().await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}

fn build_engine<S: LineageStore>(
    store: Arc<S>,
    scope: GraphScope,
    config: &SyncConfig,
    journaled: bool,
) -> anyhow::Result<SyncEngine<S, SqliteSource>> {
    let source = Arc::new(SqliteSource::open(&config.source_db)?);
    let engine = SyncEngine::new(store, source, scope).with_min_confidence(config.min_confidence);
    if !journaled {
        return Ok(engine);
    }

    match PassJournal::new(&config.journal_dir) {
        Ok(journal) => Ok(engine.with_journal(journal)),
        Err(e) => {
            tracing::warn!(dir = %config.journal_dir, error = %e, "Pass journal unavailable");
            Ok(engine)
        }
    }
}
