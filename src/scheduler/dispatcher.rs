//! Stage-sequenced, slot-bounded dispatch of processing units.
//!
//! Stages run strictly one after another. Within a stage every unit that is
//! not already complete is invoked once per attempt, with at most
//! `min(stage.parallelism, total host slots)` invocations in flight, each
//! bound to a concrete host slot.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::hosts::{total_slots, HostSpec, SlotPool};
use super::progress::{ProgressCounters, ProgressMonitor};
use crate::catalog::{ProcessingUnit, UnitKey};
use crate::history::HistoryStore;
use crate::runner::{InvocationContext, StageInvoker, StageSpec};

/// Default interval of the progress monitor.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// Terminal status of one unit within one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    Completed { host: String, attempts: u32 },
    Failed { reason: String, attempts: u32 },
}

impl UnitOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, UnitOutcome::Completed { .. })
    }
}

/// Outcome of one unit, keyed for the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit: UnitKey,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
    pub duration: Duration,
}

/// What happened to every unit within one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    /// Concurrency actually used: `min(parallelism, total slots)`.
    pub concurrency: usize,
    /// Units found complete in the history.
    pub skipped_complete: usize,
    /// Units not attempted because an earlier stage failed them in this run.
    pub skipped_blocked: usize,
    pub results: Vec<UnitResult>,
}

impl StageReport {
    pub fn invoked(&self) -> usize {
        self.results.len()
    }

    pub fn completed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.invoked() - self.completed()
    }
}

/// Result of dispatching every stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub stages: Vec<StageReport>,
    /// Stage after which the run stopped because failures exceeded the
    /// tolerance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_after: Option<String>,
}

impl DispatchReport {
    pub fn total_invoked(&self) -> usize {
        self.stages.iter().map(StageReport::invoked).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.stages.iter().map(StageReport::failed).sum()
    }

    /// True when nothing failed and no stage was cut off.
    pub fn is_success(&self) -> bool {
        self.halted_after.is_none() && self.total_failed() == 0
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

/// Drives stage programs over processing units.
pub struct Dispatcher {
    invoker: Arc<dyn StageInvoker>,
    history: Arc<HistoryStore>,
    ctx: Arc<InvocationContext>,
    max_attempts: u32,
    failure_tolerance: usize,
    progress_interval: Duration,
}

impl Dispatcher {
    pub fn new(invoker: Arc<dyn StageInvoker>, history: Arc<HistoryStore>, ctx: InvocationContext) -> Self {
        Self {
            invoker,
            history,
            ctx: Arc::new(ctx),
            max_attempts: 1,
            failure_tolerance: 0,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Attempts per unit and stage, at least one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Failed units a stage may have before the run halts.
    pub fn with_failure_tolerance(mut self, tolerance: usize) -> Self {
        self.failure_tolerance = tolerance;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Runs every stage in order over `units`.
    pub async fn run(
        &self,
        units: &[ProcessingUnit],
        stages: &[StageSpec],
        hosts: &[HostSpec],
    ) -> DispatchReport {
        let counters = ProgressCounters::new();
        let monitor = ProgressMonitor::start(
            counters.clone(),
            units.len() * stages.len(),
            self.progress_interval,
        );

        let mut report = DispatchReport::default();
        let mut blocked: HashSet<UnitKey> = HashSet::new();

        for stage in stages {
            let stage_report = self
                .run_stage(stage, units, hosts, &mut blocked, &counters)
                .await;

            if let Err(e) = self.history.flush().await {
                warn!(stage = stage.name(), error = %e, "Failed to flush run history");
            }

            let failed = stage_report.failed();
            info!(
                stage = stage.name(),
                invoked = stage_report.invoked(),
                completed = stage_report.completed(),
                failed,
                skipped_complete = stage_report.skipped_complete,
                skipped_blocked = stage_report.skipped_blocked,
                "Stage drained"
            );
            report.stages.push(stage_report);

            if failed > self.failure_tolerance {
                error!(
                    stage = stage.name(),
                    failed,
                    tolerance = self.failure_tolerance,
                    "Failure tolerance exceeded, halting run"
                );
                report.halted_after = Some(stage.name().to_string());
                break;
            }
        }

        monitor.stop().await;
        report
    }

    async fn run_stage(
        &self,
        stage: &StageSpec,
        units: &[ProcessingUnit],
        hosts: &[HostSpec],
        blocked: &mut HashSet<UnitKey>,
        counters: &ProgressCounters,
    ) -> StageReport {
        let name = stage.name();
        let concurrency = stage.parallelism.min(total_slots(hosts));
        let mut report = StageReport {
            stage: name.to_string(),
            concurrency,
            ..Default::default()
        };

        let mut pending = Vec::new();
        for unit in units {
            let key = unit.key();
            if blocked.contains(&key) {
                report.skipped_blocked += 1;
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            } else if self.history.is_complete(&key, name).await {
                debug!(stage = name, unit = %key, "Already complete, skipping");
                report.skipped_complete += 1;
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            } else {
                self.history.mark_pending(&key, name).await;
                pending.push(unit);
            }
        }

        if pending.is_empty() {
            return report;
        }
        if concurrency == 0 {
            warn!(stage = name, units = pending.len(), "No host slots for stage, failing its units");
        }

        info!(stage = name, units = pending.len(), concurrency, "Starting stage");
        counters.scheduled.fetch_add(pending.len(), Ordering::Relaxed);

        let pool = SlotPool::new(hosts, concurrency);
        let futures = pending
            .iter()
            .map(|unit| self.run_unit(stage, unit, &pool, counters));
        report.results = futures::future::join_all(futures).await;

        for result in &report.results {
            if !result.outcome.is_completed() {
                blocked.insert(result.unit.clone());
            }
        }
        report
    }

    async fn run_unit(
        &self,
        stage: &StageSpec,
        unit: &ProcessingUnit,
        pool: &SlotPool,
        counters: &ProgressCounters,
    ) -> UnitResult {
        let key = unit.key();
        let name = stage.name();
        let start = Instant::now();

        let outcome = match pool.acquire().await {
            Some(guard) => {
                counters.running.fetch_add(1, Ordering::Relaxed);
                let outcome = self.attempt(stage, unit, guard.host()).await;
                counters.running.fetch_sub(1, Ordering::Relaxed);
                outcome
            }
            None => UnitOutcome::Failed {
                reason: "no host slot available".to_string(),
                attempts: 0,
            },
        };

        match &outcome {
            UnitOutcome::Completed { .. } => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                self.history.mark_completed(&key, name).await;
            }
            UnitOutcome::Failed { reason, .. } => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                self.history.mark_failed(&key, name, reason.clone()).await;
            }
        }

        UnitResult {
            unit: key,
            outcome,
            duration: start.elapsed(),
        }
    }

    async fn attempt(&self, stage: &StageSpec, unit: &ProcessingUnit, host: &HostSpec) -> UnitOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let reason = match self.invoker.invoke(stage, unit, host, &self.ctx).await {
                Ok(outcome) if outcome.is_success() => {
                    return UnitOutcome::Completed {
                        host: host.hostname.clone(),
                        attempts,
                    };
                }
                Ok(outcome) => format!("exit code {}", outcome.exit_code),
                Err(e) => e.to_string(),
            };

            if attempts >= self.max_attempts {
                warn!(stage = stage.name(), unit = %unit, host = %host.hostname, attempts, reason = %reason, "Unit failed");
                return UnitOutcome::Failed { reason, attempts };
            }
            debug!(stage = stage.name(), unit = %unit, attempts, reason = %reason, "Retrying unit");
        }
    }
}
