//! File activation table
//!
//! Decides which uploaded files are eligible as question-answering context
//! when a question does not name a file explicitly.
//!
//! ## States
//!
//! A file id with no record is active. `deactivate` and `reactivate` upsert a
//! record; nothing ever removes one, so records for files deleted upstream
//! stay behind (see [`ActivationStore::orphans`]).
//!
//! ## Persistence
//!
//! The whole table is rewritten as a JSON array on every mutation and read
//! once when the store is opened. Read and write failures are logged and
//! swallowed: the in-memory table stays authoritative for the life of the
//! process. The write lock is held across snapshot and write, so concurrent
//! mutations are persisted one at a time. Mutations do blocking file I/O;
//! async callers should run them on the blocking pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Persisted activation flag for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRecord {
    pub file_id: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactivated_at: Option<DateTime<Utc>>,
}

impl ActivationRecord {
    /// The implicit record of a file that was never toggled
    pub fn untouched(file_id: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            active: true,
            deactivated_at: None,
            reactivated_at: None,
        }
    }
}

/// Activation flags keyed by file id, optionally backed by a JSON file.
#[derive(Debug)]
pub struct ActivationStore {
    path: Option<PathBuf>,
    records: RwLock<BTreeMap<String, ActivationRecord>>,
}

impl ActivationStore {
    /// Open the table at `path`, loading any existing records.
    ///
    /// A missing file yields an empty table. An unreadable or malformed file
    /// is logged and also yields an empty table.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path);
        tracing::info!(
            path = %path.display(),
            records = records.len(),
            "Activation table loaded"
        );
        Self {
            path: Some(path),
            records: RwLock::new(records),
        }
    }

    /// A table that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// True unless the file has been deactivated.
    pub fn is_active(&self, file_id: &str) -> bool {
        self.read()
            .get(file_id)
            .map(|record| record.active)
            .unwrap_or(true)
    }

    /// Mark a file inactive and persist the table.
    pub fn deactivate(&self, file_id: &str) -> ActivationRecord {
        self.upsert(file_id, |record| {
            record.active = false;
            record.deactivated_at = Some(Utc::now());
        })
    }

    /// Mark a file active and persist the table.
    pub fn reactivate(&self, file_id: &str) -> ActivationRecord {
        self.upsert(file_id, |record| {
            record.active = true;
            record.reactivated_at = Some(Utc::now());
        })
    }

    /// The stored record, or `None` if the file was never toggled.
    pub fn status(&self, file_id: &str) -> Option<ActivationRecord> {
        self.read().get(file_id).cloned()
    }

    /// The active subset of `file_ids`, in input order.
    pub fn filter_active<I, S>(&self, file_ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let records = self.read();
        file_ids
            .into_iter()
            .filter(|id| {
                records
                    .get(id.as_ref())
                    .map(|record| record.active)
                    .unwrap_or(true)
            })
            .map(|id| id.as_ref().to_string())
            .collect()
    }

    /// Snapshot of every record, ordered by file id.
    pub fn records(&self) -> Vec<ActivationRecord> {
        self.read().values().cloned().collect()
    }

    /// Records whose file id is not in `known_ids`.
    ///
    /// Reports stale entries left behind by upstream deletes; nothing is removed.
    pub fn orphans<S: AsRef<str>>(&self, known_ids: &[S]) -> Vec<ActivationRecord> {
        let known: HashSet<&str> = known_ids.iter().map(|id| id.as_ref()).collect();
        self.read()
            .values()
            .filter(|record| !known.contains(record.file_id.as_str()))
            .cloned()
            .collect()
    }

    fn upsert(&self, file_id: &str, apply: impl FnOnce(&mut ActivationRecord)) -> ActivationRecord {
        let mut records = self.write();
        let record = records
            .entry(file_id.to_string())
            .or_insert_with(|| ActivationRecord::untouched(file_id));
        apply(record);
        let updated = record.clone();

        tracing::info!(file_id, active = updated.active, "Activation changed");
        self.persist(&records);
        updated
    }

    fn persist(&self, records: &BTreeMap<String, ActivationRecord>) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_records(path, records) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to save activation table, keeping in-memory state"
            );
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ActivationRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ActivationRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_records(path: &Path) -> BTreeMap<String, ActivationRecord> {
    if !path.exists() {
        return BTreeMap::new();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read activation table");
            return BTreeMap::new();
        }
    };

    match serde_json::from_str::<Vec<ActivationRecord>>(&content) {
        Ok(list) => list
            .into_iter()
            .map(|record| (record.file_id.clone(), record))
            .collect(),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Malformed activation table, starting empty"
            );
            BTreeMap::new()
        }
    }
}

fn write_records(
    path: &Path,
    records: &BTreeMap<String, ActivationRecord>,
) -> crate::error::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let list: Vec<&ActivationRecord> = records.values().collect();
    let json = serde_json::to_string_pretty(&list)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
