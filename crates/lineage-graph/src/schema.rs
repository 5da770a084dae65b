//! Neo4j schema initialization (constraints and indexes).

use neo4rs::query;

use crate::client::{GraphClient, GraphError};

/// Cypher statements for schema initialization.
const SCHEMA_STATEMENTS: &[&str] = &[
    // Natural keys are unique per tenant
    "CREATE CONSTRAINT lineage_meta_tenant IF NOT EXISTS FOR (m:LineageMeta) REQUIRE m.tenant_id IS UNIQUE",
    "CREATE CONSTRAINT system_key IF NOT EXISTS FOR (n:System) REQUIRE (n.tenant_id, n.id) IS UNIQUE",
    "CREATE CONSTRAINT asset_key IF NOT EXISTS FOR (n:Asset) REQUIRE (n.tenant_id, n.stable_id) IS UNIQUE",
    "CREATE CONSTRAINT data_category_key IF NOT EXISTS FOR (n:DataCategory) REQUIRE (n.tenant_id, n.id) IS UNIQUE",
    "CREATE CONSTRAINT pii_category_key IF NOT EXISTS FOR (n:PII_Category) REQUIRE (n.tenant_id, n.pii_type) IS UNIQUE",
    "CREATE CONSTRAINT pii_type_key IF NOT EXISTS FOR (n:PIIType) REQUIRE (n.tenant_id, n.type) IS UNIQUE",
    // Temporal lookups on exposure intervals
    "CREATE INDEX exposes_since IF NOT EXISTS FOR ()-[e:EXPOSES]-() ON (e.since)",
    "CREATE INDEX exposes_until IF NOT EXISTS FOR ()-[e:EXPOSES]-() ON (e.until)",
    "CREATE INDEX asset_system IF NOT EXISTS FOR (n:Asset) ON (n.system_id)",
];

impl GraphClient {
    /// Create constraints and indexes.
    ///
    /// Safe to run multiple times: every statement uses IF NOT EXISTS.
    pub async fn initialize_schema(&self) -> Result<(), GraphError> {
        tracing::info!("Initializing lineage graph schema");

        for statement in SCHEMA_STATEMENTS {
            self.run(query(statement)).await?;
        }

        tracing::info!(statements = SCHEMA_STATEMENTS.len(), "Lineage graph schema initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_statement_is_idempotent() {
        for statement in SCHEMA_STATEMENTS {
            assert!(statement.contains("IF NOT EXISTS"), "{statement}");
        }
    }

    #[test]
    fn every_label_has_a_key_constraint() {
        for label in ["System", "Asset", "DataCategory", "PII_Category", "PIIType"] {
            let needle = format!(":{label})");
            assert!(
                SCHEMA_STATEMENTS
                    .iter()
                    .any(|s| s.contains("CONSTRAINT") && s.contains(&needle)),
                "no constraint for {label}"
            );
        }
    }
}
