//! lineage-sync: reconciles the relational system of record into the PII
//! lineage graph.
//!
//! A pass reads active assets and classified findings, upserts the hierarchy
//! top-down, links it, and moves exposure intervals forward. Passes run once
//! from the CLI or on a schedule, and each one is journaled.

pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod plan;
pub mod scheduler;
pub mod source;
pub mod temporal;

pub use engine::{SyncEngine, SyncReport};
pub use error::{Result, SyncError};
pub use source::{RelationalSource, SourceSnapshot, SqliteSource, StaticSource};
