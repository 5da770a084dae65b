//! Error types for the lineage-sync crate.

use thiserror::Error;

use lineage_core::HierarchyShape;

use crate::journal::JournalError;
use crate::source::SourceError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Graph error: {0}")]
    Graph(#[from] lineage_graph::GraphError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error(
        "Graph is recorded as {recorded} but this pass is configured for {configured}; \
         migrate the graph before syncing"
    )]
    ShapeMismatch {
        configured: HierarchyShape,
        recorded: HierarchyShape,
    },

    #[error("A sync pass is already running for this engine")]
    PassInProgress,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
