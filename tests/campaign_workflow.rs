//! End-to-end campaign runs against a recording invoker.
//!
//! No stage program is executed except in the unix-only script test, which
//! runs small shell scripts from a temporary directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mms_workflow::catalog::{ProcessingUnit, UnitKey};
use mms_workflow::error::{ConfigurationError, InvokeError};
use mms_workflow::history::HistoryStore;
use mms_workflow::pipeline::{CampaignConfig, RunOptions, Workflow, WorkflowState};
use mms_workflow::runner::{InvocationContext, InvocationOutcome, StageInvoker, StageSpec};
use mms_workflow::scheduler::HostSpec;
use tempfile::TempDir;

/// One recorded invocation: stage name, unit, host and rendered arguments.
#[derive(Debug, Clone)]
struct Call {
    stage: String,
    unit: String,
    args: Vec<String>,
}

#[derive(Default)]
struct RecordingInvoker {
    calls: Mutex<Vec<Call>>,
    failing: HashSet<(String, String)>,
}

impl RecordingInvoker {
    fn failing(stage: &str, unit: &str) -> Self {
        Self {
            failing: [(stage.to_string(), unit.to_string())].into_iter().collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageInvoker for RecordingInvoker {
    async fn invoke(
        &self,
        stage: &StageSpec,
        unit: &ProcessingUnit,
        _host: &HostSpec,
        ctx: &InvocationContext,
    ) -> Result<InvocationOutcome, InvokeError> {
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().push(Call {
            stage: stage.name().to_string(),
            unit: unit.to_string(),
            args: stage.arguments(unit, ctx),
        });

        let exit_code = if self.failing.contains(&(stage.name().to_string(), unit.to_string())) {
            1
        } else {
            0
        };
        Ok(InvocationOutcome::new(stage.name(), exit_code, Default::default()))
    }
}

fn campaign(name: &str, root: &Path) -> CampaignConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("campaigns")
        .join(name);
    CampaignConfig::from_file(&path)
        .unwrap()
        .with_archive_root(root.join("archive"))
        .with_output_root(root.join("output"))
}

fn stage_sequence(calls: &[Call]) -> Vec<String> {
    let mut sequence: Vec<String> = Vec::new();
    for call in calls {
        if sequence.last() != Some(&call.stage) {
            sequence.push(call.stage.clone());
        }
    }
    sequence
}

#[tokio::test]
async fn test_mms6b_runs_every_unit_through_every_stage() {
    let temp = TempDir::new().unwrap();
    let config = campaign("mms6b.yaml", temp.path());
    let invoker = Arc::new(RecordingInvoker::default());

    let mut workflow = config.to_workflow();
    let result = workflow
        .run(config.run_options(), invoker.clone())
        .await
        .unwrap();

    assert_eq!(result.state, WorkflowState::Completed);
    assert_eq!(workflow.state(), WorkflowState::Completed);
    assert_eq!(result.unit_count, 30);

    let calls = invoker.calls();
    assert_eq!(calls.len(), 120);
    assert_eq!(
        stage_sequence(&calls),
        [
            "sampling-start.sh",
            "coincidence-start.sh",
            "sub-start.sh",
            "mmd-start.sh"
        ]
    );

    let concurrency: Vec<usize> = result.dispatch.stages.iter().map(|s| s.concurrency).collect();
    assert_eq!(concurrency, [1, 1, 12, 6]);

    let first_sampling = &calls[0];
    assert_eq!(first_sampling.unit, "amsr2/2012-07");
    assert_eq!(first_sampling.args[2..], ["amsr2", "2012", "07", "3000000"]);

    let summary = temp
        .path()
        .join("output")
        .join("runs")
        .join(format!("{}.json", result.run_id));
    assert!(summary.exists());
}

#[tokio::test]
async fn test_second_run_with_history_invokes_nothing() {
    let temp = TempDir::new().unwrap();
    let config = campaign("mms4.yaml", temp.path());

    let first = Arc::new(RecordingInvoker::default());
    let result = config
        .to_workflow()
        .run(config.run_options(), first.clone())
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(first.calls().len(), 25 * 5);

    let second = Arc::new(RecordingInvoker::default());
    let result = config
        .to_workflow()
        .run(config.run_options(), second.clone())
        .await
        .unwrap();

    assert!(result.is_success());
    assert!(second.calls().is_empty());
    assert!(result
        .dispatch
        .stages
        .iter()
        .all(|s| s.skipped_complete == 25 && s.invoked() == 0));
}

#[tokio::test]
async fn test_resumed_run_starts_after_completed_stage() {
    let temp = TempDir::new().unwrap();
    let config = campaign("mms6b.yaml", temp.path());
    let workflow = config.to_workflow();

    let store = HistoryStore::persistent(workflow.history_path());
    let key = UnitKey::new("amsr2", "2013-03");
    store.mark_completed(&key, "sampling-start.sh").await;
    store.flush().await.unwrap();

    let invoker = Arc::new(RecordingInvoker::default());
    let options = config.run_options().with_calls([
        ("sampling-start.sh", 1usize),
        ("coincidence-start.sh", 1),
    ]);
    let mut workflow = config.to_workflow();
    let result = workflow.run(options, invoker.clone()).await.unwrap();

    let unit_stages: Vec<String> = invoker
        .calls()
        .into_iter()
        .filter(|c| c.unit == "amsr2/2013-03")
        .map(|c| c.stage)
        .collect();
    assert_eq!(unit_stages, ["coincidence-start.sh"]);
    assert_eq!(result.dispatch.stages[0].skipped_complete, 1);
    assert_eq!(result.dispatch.stages[0].invoked(), 29);
}

#[tokio::test]
async fn test_failed_unit_is_retried_on_next_run() {
    let temp = TempDir::new().unwrap();
    let config = campaign("mms4.yaml", temp.path()).with_failure_tolerance(5);

    let failing = Arc::new(RecordingInvoker::failing("sub-start.sh", "avhrr.n11/1991-06"));
    let result = config
        .to_workflow()
        .run(config.run_options(), failing.clone())
        .await
        .unwrap();

    assert_eq!(result.state, WorkflowState::Failed);
    assert_eq!(result.dispatch.total_failed(), 1);
    assert!(result.dispatch.halted_after.is_none());
    let mmd = result.dispatch.stage("mmd-start.sh").unwrap();
    assert_eq!(mmd.skipped_blocked, 1);

    let retry = Arc::new(RecordingInvoker::default());
    let result = config
        .to_workflow()
        .run(config.run_options(), retry.clone())
        .await
        .unwrap();

    assert!(result.is_success());
    let stages: Vec<String> = retry.calls().into_iter().map(|c| c.stage).collect();
    assert_eq!(stages, ["sub-start.sh", "arc-start.sh", "mmd-start.sh"]);
    assert!(retry.calls().iter().all(|c| c.unit == "avhrr.n11/1991-06"));
}

#[tokio::test]
async fn test_invalid_configuration_invokes_nothing() {
    let invoker = Arc::new(RecordingInvoker::default());

    let mut no_sensors = Workflow::new("empty", "2012-07-02", "2015-01-01");
    let err = no_sensors
        .run(RunOptions::new("mmd6"), invoker.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::NoSensors));
    assert_eq!(no_sensors.state(), WorkflowState::Configuring);

    let mut negative = Workflow::new("neg", "2012-07-02", "2015-01-01");
    negative
        .add_primary_sensor("amsr2", "2012-07-02", "2015-04-01")
        .set_samples_per_month(-5);
    assert!(negative
        .run(RunOptions::new("mmd6"), invoker.clone())
        .await
        .is_err());

    let mut bad_date = Workflow::new("bad", "2012-13-01", "2015-01-01");
    bad_date.add_primary_sensor("amsr2", "2012-07-02", "2015-04-01");
    assert!(bad_date
        .run(RunOptions::new("mmd6"), invoker.clone())
        .await
        .is_err());

    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_sensor_outside_period_yields_empty_completed_run() {
    let temp = TempDir::new().unwrap();
    let mut workflow = Workflow::new("atsr", "2012-07-02", "2015-01-01");
    workflow
        .add_primary_sensor("atsr.1", "1991-08-01", "1996-01-01")
        .set_output_root(temp.path());

    let invoker = Arc::new(RecordingInvoker::default());
    let result = workflow
        .run(RunOptions::new("mmd6"), invoker.clone())
        .await
        .unwrap();

    assert_eq!(result.unit_count, 0);
    assert!(result.is_success());
    assert!(invoker.calls().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_process_invoker_runs_scripts_once_with_history() {
    use mms_workflow::runner::ProcessInvoker;
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let bin = temp.path().join("bin");
    let out = temp.path().join("output");
    std::fs::create_dir_all(&bin).unwrap();

    // Each script appends "<stage> <sensor> <year>-<month>" to a log under the output root.
    for script in ["sampling-start.sh", "mmd-start.sh"] {
        let path = bin.join(script);
        let body = format!("#!/bin/sh\necho \"{} $3 $4-$5\" >> \"$2/calls.log\"\n", script);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    std::fs::create_dir_all(&out).unwrap();

    let config = CampaignConfig::new("local", "2013-01-15", "2013-03-01")
        .with_sensor("amsr2", "2012-07-02", "2015-04-01")
        .with_output_root(&out)
        .with_calls(vec![
            StageSpec::new("sampling-start.sh", 1),
            StageSpec::new("mmd-start.sh", 2),
        ])
        .with_history(true);

    for _ in 0..2 {
        let invoker = ProcessInvoker::new().with_script_dir(&bin);
        let result = config
            .to_workflow()
            .run(config.run_options(), Arc::new(invoker))
            .await
            .unwrap();
        assert!(result.is_success());
    }

    let log = std::fs::read_to_string(out.join("calls.log")).unwrap();
    let mut lines: Vec<&str> = log.lines().collect();
    lines.sort();
    assert_eq!(
        lines,
        [
            "mmd-start.sh amsr2 2013-01",
            "mmd-start.sh amsr2 2013-02",
            "sampling-start.sh amsr2 2013-01",
            "sampling-start.sh amsr2 2013-02",
        ]
    );
}
