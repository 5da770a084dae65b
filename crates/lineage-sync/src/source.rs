//! Read side of the sync: the relational system of record.
//!
//! The engine only needs a consistent snapshot of active assets and their
//! classified findings. [`SqliteSource`] reads them from SQLite; other
//! backends implement [`RelationalSource`].

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Source worker failed: {0}")]
    Worker(String),
}

/// An active asset row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssetRow {
    pub stable_id: String,
    pub name: String,
    pub path: String,
    pub asset_type: String,
    pub environment: String,
    pub owner: String,
    pub host: String,
    pub source_system: String,
    pub risk_score: i64,
    pub total_findings: i64,
}

/// An active finding joined with its first classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedFinding {
    pub finding_id: String,
    pub asset_id: String,
    pub pattern_name: String,
    pub severity: String,
    pub classification_type: String,
    pub pii_type: Option<String>,
    pub dpdpa_category: String,
    pub requires_consent: bool,
    pub confidence: f64,
    pub risk_level: Option<String>,
}

/// Everything one pass reads from the source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceSnapshot {
    pub assets: Vec<AssetRow>,
    pub findings: Vec<ClassifiedFinding>,
}

#[async_trait]
pub trait RelationalSource: Send + Sync {
    async fn snapshot(&self) -> Result<SourceSnapshot, SourceError>;
}

/// Tables the SQLite reader expects.
pub const SOURCE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS assets (
    stable_id      TEXT PRIMARY KEY,
    name           TEXT NOT NULL DEFAULT '',
    path           TEXT NOT NULL DEFAULT '',
    asset_type     TEXT NOT NULL DEFAULT '',
    environment    TEXT NOT NULL DEFAULT '',
    owner          TEXT NOT NULL DEFAULT '',
    host           TEXT NOT NULL DEFAULT '',
    source_system  TEXT NOT NULL DEFAULT '',
    risk_score     INTEGER NOT NULL DEFAULT 0,
    total_findings INTEGER NOT NULL DEFAULT 0,
    active         INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS findings (
    id           TEXT PRIMARY KEY,
    asset_id     TEXT NOT NULL REFERENCES assets(stable_id),
    pattern_name TEXT NOT NULL DEFAULT '',
    severity     TEXT NOT NULL DEFAULT '',
    status       TEXT NOT NULL DEFAULT 'active'
);
CREATE TABLE IF NOT EXISTS classifications (
    finding_id          TEXT NOT NULL REFERENCES findings(id),
    classification_type TEXT NOT NULL DEFAULT '',
    pii_type            TEXT,
    dpdpa_category      TEXT NOT NULL DEFAULT '',
    requires_consent    INTEGER NOT NULL DEFAULT 0,
    confidence_score    REAL NOT NULL DEFAULT 0,
    risk_level          TEXT
);
";

const ASSETS_SQL: &str = "
SELECT stable_id, name, path, asset_type, environment, owner, host,
       source_system, risk_score, total_findings
FROM assets
WHERE active = 1
ORDER BY stable_id";

const FINDINGS_SQL: &str = "
SELECT f.id, f.asset_id, f.pattern_name, f.severity,
       c.classification_type, c.pii_type, c.dpdpa_category,
       c.requires_consent, c.confidence_score, c.risk_level
FROM findings f
JOIN classifications c ON c.finding_id = f.id
JOIN assets a ON a.stable_id = f.asset_id AND a.active = 1
WHERE f.status = 'active'
ORDER BY f.asset_id, f.id, c.rowid";

/// SQLite-backed source. Queries run on the blocking pool.
#[derive(Clone)]
pub struct SqliteSource {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSource {
    /// Open the database read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }
}

#[async_trait]
impl RelationalSource for SqliteSource {
    async fn snapshot(&self) -> Result<SourceSnapshot, SourceError> {
        let conn = self.conn.clone();
        let snapshot = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| SourceError::Worker(format!("connection lock poisoned: {e}")))?;
            read_snapshot(&conn)
        })
        .await
        .map_err(|e| SourceError::Worker(e.to_string()))??;

        tracing::debug!(
            assets = snapshot.assets.len(),
            findings = snapshot.findings.len(),
            "Source snapshot read"
        );
        Ok(snapshot)
    }
}

fn read_snapshot(conn: &Connection) -> Result<SourceSnapshot, SourceError> {
    let mut assets = Vec::new();
    let mut stmt = conn.prepare(ASSETS_SQL)?;
    let mut rows = stmt.query(params![])?;
    while let Some(row) = rows.next()? {
        assets.push(AssetRow {
            stable_id: row.get(0)?,
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            path: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            asset_type: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            environment: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            owner: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            host: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            source_system: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            risk_score: row.get::<_, Option<i64>>(8)?.unwrap_or_default(),
            total_findings: row.get::<_, Option<i64>>(9)?.unwrap_or_default(),
        });
    }

    let mut findings: Vec<ClassifiedFinding> = Vec::new();
    let mut stmt = conn.prepare(FINDINGS_SQL)?;
    let mut rows = stmt.query(params![])?;
    while let Some(row) = rows.next()? {
        let finding_id: String = row.get(0)?;
        // Rows arrive grouped by finding; only the first classification counts.
        if findings.last().is_some_and(|f| f.finding_id == finding_id) {
            continue;
        }
        findings.push(ClassifiedFinding {
            finding_id,
            asset_id: row.get(1)?,
            pattern_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            severity: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            classification_type: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            pii_type: row.get(5)?,
            dpdpa_category: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            requires_consent: row.get::<_, Option<bool>>(7)?.unwrap_or_default(),
            confidence: row.get::<_, Option<f64>>(8)?.unwrap_or_default(),
            risk_level: row.get(9)?,
        });
    }

    Ok(SourceSnapshot { assets, findings })
}

/// A fixed snapshot that can be swapped between passes. Used for replay and tests.
#[derive(Default)]
pub struct StaticSource {
    snapshot: Mutex<SourceSnapshot>,
}

impl StaticSource {
    pub fn new(snapshot: SourceSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn set(&self, snapshot: SourceSnapshot) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

#[async_trait]
impl RelationalSource for StaticSource {
    async fn snapshot(&self) -> Result<SourceSnapshot, SourceError> {
        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
