//! Run summaries.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::workflow::WorkflowState;
use crate::scheduler::DispatchReport;

/// Summary of one `Workflow::run` call, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub usecase: String,
    /// Terminal state: `completed` or `failed`.
    pub state: WorkflowState,
    pub period: String,
    pub output_format: String,
    pub with_history: bool,
    /// Units produced by the catalog for the period.
    pub unit_count: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
    pub dispatch: DispatchReport,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.state == WorkflowState::Completed
    }

    /// Writes `<dir>/<run_id>.json`, creating `dir` if needed.
    pub fn save(&self, dir: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.run_id));
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(&path, json)?;
        debug!(path = %path.display(), "Saved run summary");
        Ok(path)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}
