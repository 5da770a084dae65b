//! Tamper-evident journal of sync passes.
//!
//! Each pass is written as one JSON file under `{root}/YYYY/MM/DD/{id}.json`,
//! sealed with a BLAKE3 hash over every field except the hash itself.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lineage_core::{HierarchyShape, PassId, TenantId};

use crate::engine::SyncReport;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Pass record not found: {0}")]
    NotFound(Uuid),

    #[error("Integrity check failed for pass {0}: stored hash does not match content")]
    IntegrityViolation(Uuid),

    #[error("Pass record has no content hash (not finalized)")]
    NotFinalized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PassOutcome {
    Succeeded { report: SyncReport },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub shape: HierarchyShape,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: PassOutcome,
    pub content_hash: Option<String>,
}

#[derive(Serialize)]
struct HashablePass<'a> {
    id: &'a Uuid,
    tenant_id: &'a TenantId,
    shape: &'a HierarchyShape,
    started_at: &'a DateTime<Utc>,
    finished_at: &'a DateTime<Utc>,
    outcome: &'a PassOutcome,
}

impl PassRecord {
    pub fn new(
        pass_id: PassId,
        tenant_id: TenantId,
        shape: HierarchyShape,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: PassOutcome,
    ) -> Self {
        Self {
            id: pass_id.0,
            tenant_id,
            shape,
            started_at,
            finished_at,
            outcome,
            content_hash: None,
        }
    }

    pub fn compute_hash(&self) -> Result<String, JournalError> {
        let hashable = HashablePass {
            id: &self.id,
            tenant_id: &self.tenant_id,
            shape: &self.shape,
            started_at: &self.started_at,
            finished_at: &self.finished_at,
            outcome: &self.outcome,
        };
        let json = serde_json::to_vec(&hashable)?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }

    /// Seal the record with its content hash.
    pub fn finalize(mut self) -> Result<Self, JournalError> {
        self.content_hash = Some(self.compute_hash()?);
        Ok(self)
    }

    pub fn verify_integrity(&self) -> Result<bool, JournalError> {
        match &self.content_hash {
            Some(stored) => Ok(*stored == self.compute_hash()?),
            None => Ok(false),
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, PassOutcome::Succeeded { .. })
    }
}

/// File-system pass journal.
pub struct PassJournal {
    root: PathBuf,
}

impl PassJournal {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn record_path(&self, record: &PassRecord) -> PathBuf {
        let date = record.started_at.format("%Y/%m/%d");
        self.root.join(format!("{}/{}.json", date, record.id))
    }

    pub fn append(&self, record: &PassRecord) -> Result<PathBuf, JournalError> {
        if record.content_hash.is_none() {
            return Err(JournalError::NotFinalized);
        }
        let path = self.record_path(record);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(record)?)?;

        tracing::debug!(pass_id = %record.id, path = %path.display(), "Pass journaled");
        Ok(path)
    }

    /// Load a record by pass id, verifying its hash.
    pub fn get(&self, id: Uuid) -> Result<PassRecord, JournalError> {
        let filename = format!("{id}.json");
        let path = find_file(&self.root, &filename).ok_or(JournalError::NotFound(id))?;
        let record: PassRecord = serde_json::from_str(&fs::read_to_string(path)?)?;
        if !record.verify_integrity()? {
            return Err(JournalError::IntegrityViolation(id));
        }
        Ok(record)
    }

    /// Every record for a tenant, newest first. Files that cannot be read or
    /// parsed are skipped; tampered records are errors.
    pub fn list(&self, tenant_id: &TenantId) -> Result<Vec<PassRecord>, JournalError> {
        let mut records = Vec::new();
        collect(&self.root, &mut records)?;
        records.retain(|r| &r.tenant_id == tenant_id);
        for r in &records {
            if !r.verify_integrity()? {
                return Err(JournalError::IntegrityViolation(r.id));
            }
        }
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }
}

fn find_file(dir: &Path, filename: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file(&path, filename) {
                return Some(found);
            }
        } else if path.file_name().and_then(|n| n.to_str()) == Some(filename) {
            return Some(path);
        }
    }
    None
}

fn read_record(path: &Path) -> Result<PassRecord, JournalError> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn collect(dir: &Path, out: &mut Vec<PassRecord>) -> Result<(), JournalError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            match read_record(&path) {
                Ok(record) => out.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable journal entry");
                }
            }
        }
    }
    Ok(())
}
