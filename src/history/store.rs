//! Run history store.
//!
//! Completion state lives in memory behind an async lock and is persisted as
//! JSON Lines at run boundaries. Loading is fail-open: a missing, unreadable
//! or partially corrupt file only means that some units are processed again.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::record::{HistoryRecord, HistoryStatus};
use crate::catalog::UnitKey;
use crate::error::HistoryError;

/// File extension of persisted history files.
pub const HISTORY_EXTENSION: &str = "history.jsonl";

type RecordKey = (UnitKey, String);

/// Completion state of (unit, stage) pairs.
pub struct HistoryStore {
    /// Backing file; `None` when history is disabled for the run.
    path: Option<PathBuf>,
    records: RwLock<HashMap<RecordKey, HistoryRecord>>,
}

impl HistoryStore {
    /// Creates an in-memory store that never persists and never reports a
    /// unit as complete.
    pub fn disabled() -> Self {
        Self {
            path: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store backed by `path`. Call [`HistoryStore::load`] to read
    /// prior state.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Path of the history file for a use case inside `dir`.
    pub fn path_for(dir: &Path, usecase: &str) -> PathBuf {
        dir.join(format!("{}.{}", usecase, HISTORY_EXTENSION))
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Loads persisted records, returning how many were accepted.
    ///
    /// Never fails: IO errors and corrupt lines are logged and skipped.
    pub async fn load(&self) -> usize {
        let Some(path) = &self.path else {
            return 0;
        };

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No history file yet");
                return 0;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "History unreadable, starting without prior history");
                return 0;
            }
        };

        let (parsed, errors) = parse_lines(&content);
        for err in &errors {
            warn!(path = %path.display(), error = %err, "Ignoring corrupt history record");
        }

        let accepted = parsed.len();
        let mut records = self.records.write().await;
        for record in parsed {
            records.insert((record.unit_key(), record.stage.clone()), record);
        }

        info!(
            path = %path.display(),
            records = accepted,
            corrupt = errors.len(),
            "Loaded run history"
        );
        accepted
    }

    /// Writes a full snapshot to the backing file atomically.
    pub async fn flush(&self) -> Result<(), HistoryError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let snapshot = self.records().await;
        let count = snapshot.len();
        tokio::task::spawn_blocking(move || write_snapshot(&path, &snapshot))
            .await
            .map_err(|e| HistoryError::Io(std::io::Error::other(e)))??;

        debug!(records = count, "Flushed run history");
        Ok(())
    }

    /// Returns true if the unit completed the stage in this or a prior run.
    pub async fn is_complete(&self, key: &UnitKey, stage: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.status(key, stage).await == Some(HistoryStatus::Completed)
    }

    /// Latest status of a unit for a stage.
    pub async fn status(&self, key: &UnitKey, stage: &str) -> Option<HistoryStatus> {
        self.records
            .read()
            .await
            .get(&(key.clone(), stage.to_string()))
            .map(|r| r.status)
    }

    pub async fn mark_pending(&self, key: &UnitKey, stage: &str) {
        self.put(HistoryRecord::new(key, stage, HistoryStatus::Pending))
            .await;
    }

    pub async fn mark_completed(&self, key: &UnitKey, stage: &str) {
        self.put(HistoryRecord::new(key, stage, HistoryStatus::Completed))
            .await;
    }

    pub async fn mark_failed(&self, key: &UnitKey, stage: &str, reason: impl Into<String>) {
        self.put(HistoryRecord::new(key, stage, HistoryStatus::Failed).with_reason(reason))
            .await;
    }

    /// Snapshot of all records, ordered by unit then stage.
    pub async fn records(&self) -> Vec<HistoryRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            (&a.sensor, &a.month, &a.stage).cmp(&(&b.sensor, &b.month, &b.stage))
        });
        records
    }

    async fn put(&self, record: HistoryRecord) {
        let key = (record.unit_key(), record.stage.clone());
        self.records.write().await.insert(key, record);
    }
}

/// Parses JSON Lines content. Later lines win for the same key.
fn parse_lines(content: &str) -> (Vec<HistoryRecord>, Vec<HistoryError>) {
    let mut records = Vec::new();
    let mut errors = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => errors.push(HistoryError::Corrupt {
                line: index + 1,
                reason: e.to_string(),
            }),
        }
    }

    (records, errors)
}

fn write_snapshot(path: &Path, records: &[HistoryRecord]) -> Result<(), HistoryError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut file = tempfile::NamedTempFile::new_in(&dir)?;
    for record in records {
        serde_json::to_writer(&mut file, record)?;
        file.write_all(b"\n")?;
    }
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}
