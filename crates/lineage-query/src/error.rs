use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Graph error: {0}")]
    Graph(#[from] lineage_graph::GraphError),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
}

pub type Result<T> = std::result::Result<T, QueryError>;
