//! Campaign workflow: configuration surface, validation and run entry point.
//!
//! A [`Workflow`] collects raw campaign values without checking them. Every
//! structural check happens when a run starts, so a misconfigured campaign
//! fails before any stage program is invoked.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::result::RunResult;
use crate::catalog::{PrimarySensor, ProcessingUnit, SamplingConfig, SensorCatalog};
use crate::error::ConfigurationError;
use crate::history::HistoryStore;
use crate::period::Period;
use crate::runner::{default_stages, InvocationContext, StageInvoker, StageSpec};
use crate::scheduler::{Dispatcher, HostSpec, DEFAULT_PROGRESS_INTERVAL};

/// Lifecycle of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Configuring,
    Validated,
    Running,
    Completed,
    Failed,
}

/// A primary sensor as declared, before its dates are parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDeclaration {
    pub name: String,
    pub valid_from: String,
    pub valid_to: String,
}

impl SensorDeclaration {
    pub fn new(name: impl Into<String>, valid_from: impl Into<String>, valid_to: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            valid_from: valid_from.into(),
            valid_to: valid_to.into(),
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Output format tag passed to the stage programs (e.g. `mmd6`).
    pub output_format: String,
    /// Worker hosts; `None` runs on `localhost` with one slot.
    pub hosts: Option<Vec<HostSpec>>,
    /// Stage calls; `None` uses the default stage list.
    pub calls: Option<Vec<StageSpec>>,
    /// Skip units recorded as complete and persist progress.
    pub with_history: bool,
    /// Drop every stage whose name starts with `arc`.
    pub without_arc: bool,
}

impl RunOptions {
    pub fn new(output_format: impl Into<String>) -> Self {
        Self {
            output_format: output_format.into(),
            ..Default::default()
        }
    }

    pub fn with_hosts<I, H>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = H>,
        H: Into<HostSpec>,
    {
        self.hosts = Some(hosts.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_calls<I, S>(mut self, calls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StageSpec>,
    {
        self.calls = Some(calls.into_iter().map(Into::into).collect());
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
}

/// A fully validated run: everything needed to dispatch.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub usecase: String,
    pub output_format: String,
    pub period: Period,
    pub catalog: SensorCatalog,
    pub sampling: SamplingConfig,
    pub stages: Vec<StageSpec>,
    pub hosts: Vec<HostSpec>,
    pub with_history: bool,
}

impl WorkflowRun {
    pub fn units(&self) -> Vec<ProcessingUnit> {
        self.catalog.units_for(&self.period, &self.sampling).collect()
    }
}

/// A matchup campaign.
#[derive(Debug, Clone)]
pub struct Workflow {
    usecase: String,
    start: String,
    end: String,
    sensors: Vec<SensorDeclaration>,
    samples_per_month: i64,
    archive_root: PathBuf,
    output_root: PathBuf,
    history_dir: Option<PathBuf>,
    max_attempts: u32,
    failure_tolerance: usize,
    progress_interval: Duration,
    state: WorkflowState,
}

impl Workflow {
    pub fn new(usecase: impl Into<String>, start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            usecase: usecase.into(),
            start: start.into(),
            end: end.into(),
            sensors: Vec::new(),
            samples_per_month: 0,
            archive_root: PathBuf::from("./archive"),
            output_root: PathBuf::from("./output"),
            history_dir: None,
            max_attempts: 1,
            failure_tolerance: 0,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            state: WorkflowState::Configuring,
        }
    }

    pub fn usecase(&self) -> &str {
        &self.usecase
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn output_root(&self) -> &PathBuf {
        &self.output_root
    }

    /// Registers a primary sensor. Order of registration is the order in
    /// which its units are scheduled.
    pub fn add_primary_sensor(
        &mut self,
        name: impl Into<String>,
        valid_from: impl Into<String>,
        valid_to: impl Into<String>,
    ) -> &mut Self {
        self.sensors.push(SensorDeclaration::new(name, valid_from, valid_to));
        self.reconfigure()
    }

    /// Samples per sensor and month; `0` processes everything.
    pub fn set_samples_per_month(&mut self, samples: i64) -> &mut Self {
        self.samples_per_month = samples;
        self.reconfigure()
    }

    pub fn set_archive_root(&mut self, root: impl Into<PathBuf>) -> &mut Self {
        self.archive_root = root.into();
        self.reconfigure()
    }

    pub fn set_output_root(&mut self, root: impl Into<PathBuf>) -> &mut Self {
        self.output_root = root.into();
        self.reconfigure()
    }

    /// Directory of the history file; defaults to `<output_root>/history`.
    pub fn set_history_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.history_dir = Some(dir.into());
        self.reconfigure()
    }

    pub fn set_max_attempts(&mut self, attempts: u32) -> &mut Self {
        self.max_attempts = attempts;
        self.reconfigure()
    }

    pub fn set_failure_tolerance(&mut self, tolerance: usize) -> &mut Self {
        self.failure_tolerance = tolerance;
        self.reconfigure()
    }

    pub fn set_progress_interval(&mut self, interval: Duration) -> &mut Self {
        self.progress_interval = interval;
        self.reconfigure()
    }

    fn reconfigure(&mut self) -> &mut Self {
        if self.state != WorkflowState::Running {
            self.state = WorkflowState::Configuring;
        }
        self
    }

    /// Path of the history file used by runs with history enabled.
    pub fn history_path(&self) -> PathBuf {
        let dir = self
            .history_dir
            .clone()
            .unwrap_or_else(|| self.output_root.join("history"));
        HistoryStore::path_for(&dir, &self.usecase)
    }

    /// Parses the period and sensors into a catalog.
    pub fn catalog(&self) -> Result<(Period, SensorCatalog), ConfigurationError> {
        let period = Period::parse(&self.start, &self.end)?;

        if self.sensors.is_empty() {
            return Err(ConfigurationError::NoSensors);
        }

        let catalog = self
            .sensors
            .iter()
            .map(|s| {
                PrimarySensor::parse(&s.name, &s.valid_from, &s.valid_to).map_err(|e| {
                    ConfigurationError::InvalidSensor {
                        name: s.name.clone(),
                        reason: e.to_string(),
                    }
                })
            })
            .collect::<Result<SensorCatalog, _>>()?;

        Ok((period, catalog))
    }

    /// Checks every structural constraint of a run without invoking anything.
    pub fn validate(&self, options: &RunOptions) -> Result<WorkflowRun, ConfigurationError> {
        let (period, catalog) = self.catalog()?;

        if self.samples_per_month < 0 {
            return Err(ConfigurationError::NegativeSampling(self.samples_per_month));
        }
        let sampling = SamplingConfig::new(self.samples_per_month as u64);

        let hosts = options
            .hosts
            .clone()
            .unwrap_or_else(|| vec![HostSpec::localhost(1)]);
        if hosts.is_empty() {
            return Err(ConfigurationError::NoHosts);
        }
        if let Some(host) = hosts.iter().find(|h| h.slots == 0) {
            return Err(ConfigurationError::NoSlots(host.hostname.clone()));
        }

        let mut stages = options.calls.clone().unwrap_or_else(default_stages);
        if options.without_arc {
            stages.retain(|s| !s.is_arc());
        }
        if stages.is_empty() {
            return Err(ConfigurationError::NoStages);
        }
        if let Some(stage) = stages.iter().find(|s| s.parallelism == 0) {
            return Err(ConfigurationError::ZeroParallelism(stage.name().to_string()));
        }

        if self.max_attempts == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.progress_interval.is_zero() {
            return Err(ConfigurationError::InvalidValue {
                key: "progress_interval".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(WorkflowRun {
            usecase: self.usecase.clone(),
            output_format: options.output_format.clone(),
            period,
            catalog,
            sampling,
            stages,
            hosts,
            with_history: options.with_history,
        })
    }

    /// Invocation context shared by every stage of a run.
    pub fn invocation_context(&self, run: &WorkflowRun) -> InvocationContext {
        InvocationContext::new(&self.usecase, &run.output_format)
            .with_archive_root(&self.archive_root)
            .with_output_root(&self.output_root)
            .with_sampling(run.sampling)
    }

    /// Validates, then executes every stage over every unit.
    ///
    /// Configuration errors are returned before anything runs. Stage failures
    /// do not produce an `Err`; they are reported through the result, whose
    /// state is then [`WorkflowState::Failed`].
    pub async fn run(
        &mut self,
        options: RunOptions,
        invoker: Arc<dyn StageInvoker>,
    ) -> Result<RunResult, ConfigurationError> {
        let run = self.validate(&options)?;
        self.state = WorkflowState::Validated;

        let run_id = Uuid::new_v4().to_string();
        let units = run.units();
        info!(
            run_id = %run_id,
            usecase = %self.usecase,
            period = %run.period,
            sensors = run.catalog.len(),
            units = units.len(),
            stages = run.stages.len(),
            hosts = run.hosts.len(),
            with_history = run.with_history,
            "Starting campaign run"
        );

        let history = if run.with_history {
            let store = HistoryStore::persistent(self.history_path());
            store.load().await;
            store
        } else {
            HistoryStore::disabled()
        };

        self.state = WorkflowState::Running;
        let started_at = Utc::now();
        let clock = Instant::now();

        let dispatcher = Dispatcher::new(invoker, Arc::new(history), self.invocation_context(&run))
            .with_max_attempts(self.max_attempts)
            .with_failure_tolerance(self.failure_tolerance)
            .with_progress_interval(self.progress_interval);
        let dispatch = dispatcher.run(&units, &run.stages, &run.hosts).await;

        self.state = if dispatch.is_success() {
            WorkflowState::Completed
        } else {
            WorkflowState::Failed
        };

        let result = RunResult {
            run_id,
            usecase: self.usecase.clone(),
            state: self.state,
            period: run.period.to_string(),
            output_format: run.output_format,
            with_history: run.with_history,
            unit_count: units.len(),
            started_at,
            completed_at: Utc::now(),
            duration: clock.elapsed(),
            dispatch,
        };

        match result.save(&self.output_root.join("runs")) {
            Ok(path) => info!(path = %path.display(), state = ?self.state, "Campaign run finished"),
            Err(e) => warn!(error = %e, state = ?self.state, "Campaign run finished, summary not saved"),
        }

        Ok(result)
    }
}
