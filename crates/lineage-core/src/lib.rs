//! lineage-core: Shared types for the PII lineage graph.
//!
//! This crate provides the foundational types used by the sync engine and the
//! query layer:
//! - Identifiers, severities, and the hierarchy shape variant
//! - Node types (System, Asset, DataCategory, PII leaf) and hierarchy links
//! - Exposure interval records for the temporal EXPOSES edges
//! - Validation errors raised at the upsert boundary

pub mod error;
pub mod exposure;
pub mod nodes;
pub mod types;

pub use error::ValidationError;
pub use exposure::{ExposureKey, ExposureObservation, ExposureRecord};
pub use nodes::{
    AssetNode, CategoryNode, HierarchyLink, HierarchyPath, LineageNode, NodeRef, NodeView,
    PiiTypeNode, SystemNode,
};
pub use types::{GraphScope, HierarchyEdge, HierarchyShape, NodeKind, PassId, Severity, TenantId};
