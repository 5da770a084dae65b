//! lineage-graph: storage for the PII lineage graph.
//!
//! This crate is the single mutation point for the lineage graph. Every read
//! and write is scoped by tenant and hierarchy shape, and goes through the
//! [`LineageStore`] trait, implemented for Neo4j ([`GraphClient`]) and in
//! process ([`MemoryStore`]).

pub mod client;
pub mod memory;
pub mod migrate;
pub mod mutations;
pub mod queries;
pub mod schema;
pub mod store;
mod time;

pub use client::{GraphClient, GraphConfig, GraphError};
pub use memory::{MemoryStore, StoreOp};
pub use store::{LineageStore, MigrationReport};
