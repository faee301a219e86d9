//! Campaign files.
//!
//! A campaign file declares everything a run needs: the period, the primary
//! sensors, the sampling density, the stage calls and the worker hosts. Both
//! YAML and JSON are accepted; the format is picked from the file extension.
//!
//! ```yaml
//! usecase: mms6b
//! output_format: mmd6
//! period: { start: 2012-07-02, end: 2015-01-01 }
//! sensors:
//!   - { name: amsr2, valid_from: 2012-07-02, valid_to: 2015-04-01 }
//! samples_per_month: 3000000
//! hosts:
//!   - { hostname: localhost, slots: 48 }
//! calls:
//!   - { script: sampling-start.sh, parallelism: 1 }
//!   - { script: coincidence-start.sh, parallelism: 1 }
//!   - { script: sub-start.sh, parallelism: 12 }
//!   - { script: mmd-start.sh, parallelism: 6 }
//! with_history: true
//! without_arc: true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::workflow::{RunOptions, SensorDeclaration, Workflow, WorkflowRun};
use crate::error::ConfigurationError;
use crate::runner::StageSpec;
use crate::scheduler::HostSpec;

/// Campaign period as declared in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodConfig {
    pub start: String,
    pub end: String,
}

/// Complete declarative description of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub usecase: String,

    /// Output format tag handed to the stage programs.
    #[serde(default = "default_output_format")]
    pub output_format: String,

    pub period: PeriodConfig,

    #[serde(default)]
    pub sensors: Vec<SensorDeclaration>,

    /// Samples per sensor and month; `0` processes everything.
    #[serde(default)]
    pub samples_per_month: i64,

    /// Worker hosts; defaults to one local slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<HostSpec>>,

    /// Stage calls in execution order; defaults to the standard stage list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calls: Option<Vec<StageSpec>>,

    #[serde(default)]
    pub with_history: bool,

    #[serde(default)]
    pub without_arc: bool,

    #[serde(default = "default_archive_root")]
    pub archive_root: PathBuf,

    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Directory of the history file; defaults to `<output_root>/history`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<PathBuf>,

    /// Directory prepended to bare stage script names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_dir: Option<PathBuf>,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Failed units a stage may have before the run halts.
    #[serde(default)]
    pub failure_tolerance: usize,

    /// Watchdog for a single stage invocation. Unset waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_timeout_secs: Option<u64>,

    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

fn default_output_format() -> String {
    "mmd".to_string()
}

fn default_archive_root() -> PathBuf {
    PathBuf::from("./archive")
}

fn default_output_root() -> PathBuf {
    PathBuf::from("./output")
}

fn default_max_attempts() -> u32 {
    1
}

fn default_progress_interval_secs() -> u64 {
    60
}

impl CampaignConfig {
    /// Creates a campaign with no sensors and default settings.
    pub fn new(usecase: impl Into<String>, start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            usecase: usecase.into(),
            output_format: default_output_format(),
            period: PeriodConfig {
                start: start.into(),
                end: end.into(),
            },
            sensors: Vec::new(),
            samples_per_month: 0,
            hosts: None,
            calls: None,
            with_history: false,
            without_arc: false,
            archive_root: default_archive_root(),
            output_root: default_output_root(),
            history_dir: None,
            script_dir: None,
            max_attempts: default_max_attempts(),
            failure_tolerance: 0,
            unit_timeout_secs: None,
            progress_interval_secs: default_progress_interval_secs(),
        }
    }

    /// Loads a campaign from a YAML or JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext {
            "json" => Self::from_json(&contents),
            // YAML also accepts JSON documents
            _ => Self::from_yaml(&contents),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigurationError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Applies `MMS_*` environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `MMS_ARCHIVE_ROOT`: Root of the input archive
    /// - `MMS_OUTPUT_ROOT`: Root of the output tree
    /// - `MMS_HISTORY_DIR`: Directory of the history file
    /// - `MMS_SCRIPT_DIR`: Directory of the stage scripts
    /// - `MMS_WITH_HISTORY`: Enable run history (`true`/`false`)
    /// - `MMS_MAX_ATTEMPTS`: Attempts per unit and stage
    /// - `MMS_FAILURE_TOLERANCE`: Failed units a stage may have
    /// - `MMS_UNIT_TIMEOUT_SECS`: Watchdog per invocation
    pub fn apply_env_overrides(self) -> Result<Self, ConfigurationError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("MMS_ARCHIVE_ROOT") {
            self.archive_root = PathBuf::from(val);
        }

        if let Some(val) = lookup("MMS_OUTPUT_ROOT") {
            self.output_root = PathBuf::from(val);
        }

        if let Some(val) = lookup("MMS_HISTORY_DIR") {
            self.history_dir = Some(PathBuf::from(val));
        }

        if let Some(val) = lookup("MMS_SCRIPT_DIR") {
            self.script_dir = Some(PathBuf::from(val));
        }

        if let Some(val) = lookup("MMS_WITH_HISTORY") {
            self.with_history = parse_env_bool(&val, "MMS_WITH_HISTORY")?;
        }

        if let Some(val) = lookup("MMS_MAX_ATTEMPTS") {
            self.max_attempts = parse_env_value(&val, "MMS_MAX_ATTEMPTS")?;
        }

        if let Some(val) = lookup("MMS_FAILURE_TOLERANCE") {
            self.failure_tolerance = parse_env_value(&val, "MMS_FAILURE_TOLERANCE")?;
        }

        if let Some(val) = lookup("MMS_UNIT_TIMEOUT_SECS") {
            self.unit_timeout_secs = Some(parse_env_value(&val, "MMS_UNIT_TIMEOUT_SECS")?);
        }

        Ok(self)
    }

    /// Builder method to add a primary sensor.
    pub fn with_sensor(
        mut self,
        name: impl Into<String>,
        valid_from: impl Into<String>,
        valid_to: impl Into<String>,
    ) -> Self {
        self.sensors.push(SensorDeclaration::new(name, valid_from, valid_to));
        self
    }

    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = format.into();
        self
    }

    pub fn with_samples_per_month(mut self, samples: i64) -> Self {
        self.samples_per_month = samples;
        self
    }

    pub fn with_hosts(mut self, hosts: Vec<HostSpec>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    pub fn with_calls(mut self, calls: Vec<StageSpec>) -> Self {
        self.calls = Some(calls);
        self
    }

    pub fn with_history(mut self, enabled: bool) -> Self {
        self.with_history = enabled;
        self
    }

    pub fn without_arc(mut self, enabled: bool) -> Self {
        self.without_arc = enabled;
        self
    }

    pub fn with_archive_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive_root = path.into();
        self
    }

    pub fn with_output_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_root = path.into();
        self
    }

    pub fn with_history_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_dir = Some(path.into());
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_failure_tolerance(mut self, tolerance: usize) -> Self {
        self.failure_tolerance = tolerance;
        self
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_secs.map(Duration::from_secs)
    }

    /// Builds the workflow this file describes.
    pub fn to_workflow(&self) -> Workflow {
        let mut workflow = Workflow::new(&self.usecase, &self.period.start, &self.period.end);
        for sensor in &self.sensors {
            workflow.add_primary_sensor(&sensor.name, &sensor.valid_from, &sensor.valid_to);
        }
        workflow
            .set_samples_per_month(self.samples_per_month)
            .set_archive_root(&self.archive_root)
            .set_output_root(&self.output_root)
            .set_max_attempts(self.max_attempts)
            .set_failure_tolerance(self.failure_tolerance)
            .set_progress_interval(Duration::from_secs(self.progress_interval_secs));
        if let Some(dir) = &self.history_dir {
            workflow.set_history_dir(dir);
        }
        workflow
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            output_format: self.output_format.clone(),
            hosts: self.hosts.clone(),
            calls: self.calls.clone(),
            with_history: self.with_history,
            without_arc: self.without_arc,
        }
    }

    /// Validates the campaign as a run would, without invoking anything.
    pub fn validate(&self) -> Result<WorkflowRun, ConfigurationError> {
        if self.usecase.trim().is_empty() {
            return Err(ConfigurationError::InvalidValue {
                key: "usecase".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.unit_timeout_secs == Some(0) {
            return Err(ConfigurationError::InvalidValue {
                key: "unit_timeout_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        self.to_workflow().validate(&self.run_options())
    }

    /// A complete example campaign, used by `generate-config`.
    pub fn example() -> Self {
        CampaignConfig::new("mms6b", "2012-07-02", "2015-01-01")
            .with_sensor("amsr2", "2012-07-02", "2015-04-01")
            .with_samples_per_month(3_000_000)
            .with_output_format("mmd6")
            .with_hosts(vec![HostSpec::localhost(48)])
            .with_calls(vec![
                StageSpec::new("sampling-start.sh", 1),
                StageSpec::new("coincidence-start.sh", 1),
                StageSpec::new("sub-start.sh", 12),
                StageSpec::new("mmd-start.sh", 6),
            ])
            .with_history(true)
            .without_arc(true)
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigurationError> {
    value.parse().map_err(|_| ConfigurationError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigurationError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigurationError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MMS4: &str = r#"
usecase: mms4
output_format: mmd4
period: { start: "1991-01-01", end: "1992-01-01" }
sensors:
  - { name: avhrr.n10, valid_from: "1986-11-17", valid_to: "1991-09-17" }
  - { name: avhrr.n11, valid_from: "1988-11-08", valid_to: "1995-01-01" }
  - { name: avhrr.n12, valid_from: "1991-09-16", valid_to: "1998-12-15" }
with_history: true
"#;

    #[test]
    fn test_yaml_defaults() {
        let config = CampaignConfig::from_yaml(MMS4).unwrap();
        assert_eq!(config.samples_per_month, 0);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.failure_tolerance, 0);
        assert_eq!(config.progress_interval_secs, 60);
        assert!(config.hosts.is_none());
        assert!(config.calls.is_none());
        assert!(config.unit_timeout().is_none());

        let run = config.validate().unwrap();
        assert_eq!(run.units().len(), 25);
        assert_eq!(run.stages.len(), 5);
    }

    #[test]
    fn test_from_file_detects_json() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("campaign.json");
        let json = serde_json::to_string(&CampaignConfig::example()).unwrap();
        std::fs::write(&path, json).unwrap();

        let config = CampaignConfig::from_file(&path).unwrap();
        assert_eq!(config, CampaignConfig::example());
    }

    #[test]
    fn test_example_is_valid_mms6b() {
        let run = CampaignConfig::example().validate().unwrap();
        assert_eq!(run.units().len(), 30);
        let parallelism: Vec<usize> = run.stages.iter().map(|s| s.parallelism).collect();
        assert_eq!(parallelism, [1, 1, 12, 6]);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("MMS_ARCHIVE_ROOT", "/neodc/archive"),
            ("MMS_MAX_ATTEMPTS", "3"),
            ("MMS_WITH_HISTORY", "off"),
            ("MMS_UNIT_TIMEOUT_SECS", "7200"),
        ]
        .into_iter()
        .collect();

        let config = CampaignConfig::from_yaml(MMS4)
            .unwrap()
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.archive_root, PathBuf::from("/neodc/archive"));
        assert_eq!(config.max_attempts, 3);
        assert!(!config.with_history);
        assert_eq!(config.unit_timeout(), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let result = CampaignConfig::example()
            .apply_overrides(|k| (k == "MMS_FAILURE_TOLERANCE").then(|| "many".to_string()));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("MMS_FAILURE_TOLERANCE"));
    }

    #[test]
    fn test_validation_errors() {
        assert!(CampaignConfig::example()
            .with_max_attempts(0)
            .validate()
            .unwrap_err()
            .to_string()
            .contains("max_attempts"));

        let mut config = CampaignConfig::example();
        config.unit_timeout_secs = Some(0);
        assert!(config.validate().is_err());

        let config = CampaignConfig::new("", "2012-07-02", "2015-01-01");
        assert!(config.validate().unwrap_err().to_string().contains("usecase"));
    }

    #[test]
    fn test_to_yaml_roundtrip_keeps_calls() {
        let yaml = CampaignConfig::example().to_yaml().unwrap();
        assert!(yaml.contains("sub-start.sh"));
        assert_eq!(CampaignConfig::from_yaml(&yaml).unwrap(), CampaignConfig::example());
    }
}
