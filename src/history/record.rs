//! History record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::UnitKey;

/// Processing status of a unit for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    /// Scheduled but no terminal status reported yet.
    Pending,
    /// Stage program exited successfully.
    Completed,
    /// Stage program failed, timed out, or its host was unreachable.
    Failed,
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryStatus::Pending => write!(f, "pending"),
            HistoryStatus::Completed => write!(f, "completed"),
            HistoryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One line of the persisted history file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Sensor name of the unit.
    pub sensor: String,
    /// Month key of the unit (`YYYY-MM`).
    pub month: String,
    /// Script name of the stage.
    pub stage: String,
    /// Status after the latest transition.
    pub status: HistoryStatus,
    /// Failure reason, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the status was last changed.
    pub updated_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(key: &UnitKey, stage: &str, status: HistoryStatus) -> Self {
        Self {
            sensor: key.sensor.clone(),
            month: key.month.clone(),
            stage: stage.to_string(),
            status,
            reason: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn unit_key(&self) -> UnitKey {
        UnitKey::new(&self.sensor, &self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(HistoryStatus::Pending.to_string(), "pending");
        assert_eq!(HistoryStatus::Completed.to_string(), "completed");
        assert_eq!(HistoryStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_record_line_format() {
        let key = UnitKey::new("amsr2", "2012-07");
        let record = HistoryRecord::new(&key, "sampling-start.sh", HistoryStatus::Failed)
            .with_reason("exit code 2");

        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains("\"status\":\"failed\""));
        assert!(line.contains("\"reason\":\"exit code 2\""));

        let parsed: HistoryRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.unit_key(), key);
        assert_eq!(parsed.stage, "sampling-start.sh");
    }

    #[test]
    fn test_reason_is_omitted_when_absent() {
        let key = UnitKey::new("amsr2", "2012-07");
        let record = HistoryRecord::new(&key, "sub-start.sh", HistoryStatus::Completed);
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains("reason"));
    }
}
