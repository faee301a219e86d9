//! Stage invocation: builds and executes one stage program for one unit.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::command::CommandLine;
use super::contract::InvocationContext;
use super::stage::StageSpec;
use crate::catalog::ProcessingUnit;
use crate::error::InvokeError;
use crate::scheduler::HostSpec;

/// Exit code ssh reserves for connection failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Bytes of stdout/stderr kept for the run summary.
const OUTPUT_TAIL_BYTES: usize = 4096;

/// Outcome of a stage program that ran to termination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationOutcome {
    /// Command as rendered for the shell.
    pub command: String,
    /// Process exit code, `-1` when terminated by a signal.
    pub exit_code: i32,
    /// Wall clock duration.
    pub duration: Duration,
    /// Tail of standard output.
    pub stdout_tail: String,
    /// Tail of standard error.
    pub stderr_tail: String,
}

impl InvocationOutcome {
    pub fn new(command: impl Into<String>, exit_code: i32, duration: Duration) -> Self {
        Self {
            command: command.into(),
            exit_code,
            duration,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes one stage program for one unit on one host.
///
/// A non-zero exit is reported through [`InvocationOutcome::exit_code`]; an
/// `Err` means the program could not be run to termination at all.
#[async_trait]
pub trait StageInvoker: Send + Sync {
    async fn invoke(
        &self,
        stage: &StageSpec,
        unit: &ProcessingUnit,
        host: &HostSpec,
        ctx: &InvocationContext,
    ) -> Result<InvocationOutcome, InvokeError>;
}

/// Runs stage programs as child processes, locally or through ssh.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    /// Directory prepended to bare script names.
    script_dir: Option<PathBuf>,
    /// Remote shell program.
    ssh_program: String,
    /// Watchdog for a single invocation; `None` waits for termination.
    timeout: Option<Duration>,
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self {
            script_dir: None,
            ssh_program: "ssh".to_string(),
            timeout: None,
        }
    }

    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = Some(dir.into());
        self
    }

    pub fn with_ssh_program(mut self, program: impl Into<String>) -> Self {
        self.ssh_program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the command line for a unit without running it.
    pub fn build_command(
        &self,
        stage: &StageSpec,
        unit: &ProcessingUnit,
        host: &HostSpec,
        ctx: &InvocationContext,
    ) -> CommandLine {
        let stage_cmd = CommandLine::new(self.resolve_script(&stage.script))
            .args(stage.arguments(unit, ctx));

        if host.is_local() {
            stage_cmd
        } else {
            CommandLine::new(&self.ssh_program)
                .args(["-o", "BatchMode=yes"])
                .arg(&host.hostname)
                .arg(stage_cmd.to_shell_string())
        }
    }

    fn resolve_script(&self, script: &str) -> String {
        match &self.script_dir {
            Some(dir) if !script.contains('/') => dir.join(script).display().to_string(),
            _ => script.to_string(),
        }
    }
}

#[async_trait]
impl StageInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        stage: &StageSpec,
        unit: &ProcessingUnit,
        host: &HostSpec,
        ctx: &InvocationContext,
    ) -> Result<InvocationOutcome, InvokeError> {
        let command = self.build_command(stage, unit, host, ctx);
        let rendered = command.to_shell_string();
        debug!(host = %host.hostname, command = %rendered, "Spawning stage program");

        let start = Instant::now();
        let child = command.to_tokio_command().spawn().map_err(|e| InvokeError::Spawn {
            program: command.program().to_string(),
            reason: e.to_string(),
        })?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(stage = stage.name(), unit = %unit, "Stage program exceeded watchdog");
                    return Err(InvokeError::Timeout(limit));
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|e| InvokeError::Process(e.to_string()))?;

        let duration = start.elapsed();
        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !host.is_local() && exit_code == SSH_CONNECTION_FAILURE {
            return Err(InvokeError::HostUnreachable {
                host: host.hostname.clone(),
                reason: tail(&stderr, 512),
            });
        }

        info!(
            stage = stage.name(),
            unit = %unit,
            host = %host.hostname,
            exit_code,
            duration_ms = duration.as_millis() as u64,
            "Stage program finished"
        );

        let mut outcome = InvocationOutcome::new(rendered, exit_code, duration);
        outcome.stdout_tail = tail(&String::from_utf8_lossy(&output.stdout), OUTPUT_TAIL_BYTES);
        outcome.stderr_tail = tail(&stderr, OUTPUT_TAIL_BYTES);
        Ok(outcome)
    }
}

/// Keeps at most the last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PrimarySensor;
    use crate::period::Period;

    fn unit() -> ProcessingUnit {
        let sensor = PrimarySensor::parse("avhrr.n11", "1988-11-08", "1995-01-01").unwrap();
        let month = Period::parse("1991-05-01", "1991-06-01")
            .unwrap()
            .months()
            .next()
            .unwrap();
        ProcessingUnit { sensor, month }
    }

    fn ctx() -> InvocationContext {
        InvocationContext::new("mms4", "mmd4")
            .with_archive_root("/archive")
            .with_output_root("/out")
    }

    #[test]
    fn test_local_command() {
        let invoker = ProcessInvoker::new().with_script_dir("/opt/mms/bin");
        let stage = StageSpec::new("coincidence-start.sh", 1);
        let cmd = invoker.build_command(&stage, &unit(), &HostSpec::localhost(4), &ctx());

        assert_eq!(
            cmd.to_shell_string(),
            "/opt/mms/bin/coincidence-start.sh /archive /out avhrr.n11 1991 05"
        );
    }

    #[test]
    fn test_remote_command_wraps_in_ssh() {
        let invoker = ProcessInvoker::new();
        let stage = StageSpec::new("mmd-start.sh", 6);
        let cmd = invoker.build_command(&stage, &unit(), &HostSpec::new("node7", 24), &ctx());

        assert_eq!(cmd.program(), "ssh");
        assert_eq!(
            cmd.arguments(),
            [
                "-o",
                "BatchMode=yes",
                "node7",
                "mmd-start.sh /archive /out avhrr.n11 1991 05 mmd4"
            ]
        );
    }

    #[test]
    fn test_explicit_paths_are_not_prefixed() {
        let invoker = ProcessInvoker::new().with_script_dir("/opt/mms/bin");
        assert_eq!(invoker.resolve_script("./local.sh"), "./local.sh");
        assert_eq!(invoker.resolve_script("sub-start.sh"), "/opt/mms/bin/sub-start.sh");
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let invoker = ProcessInvoker::new().with_script_dir("/nonexistent/mms/bin");
        let stage = StageSpec::new("sampling-start.sh", 1);
        let result = invoker
            .invoke(&stage, &unit(), &HostSpec::localhost(1), &ctx())
            .await;

        assert!(matches!(result, Err(InvokeError::Spawn { .. })));
    }

    #[cfg(unix)]
    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_local_program_and_reports_exit_code() {
        let temp = tempfile::TempDir::new().unwrap();
        write_script(temp.path(), "sub-start.sh", "echo \"$3 $4-$5\"\nexit 3");

        let invoker = ProcessInvoker::new()
            .with_script_dir(temp.path())
            .with_timeout(Some(Duration::from_secs(30)));
        let stage = StageSpec::new("sub-start.sh", 1);
        let outcome = invoker
            .invoke(&stage, &unit(), &HostSpec::localhost(1), &ctx())
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.is_success());
        assert_eq!(outcome.stdout_tail.trim(), "avhrr.n11 1991-05");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ssh_connection_failure_is_host_unreachable() {
        let temp = tempfile::TempDir::new().unwrap();
        let ssh = write_script(temp.path(), "fake-ssh", "echo \"ssh: connect to host $3: refused\" >&2\nexit 255");

        let invoker = ProcessInvoker::new().with_ssh_program(ssh.display().to_string());
        let stage = StageSpec::new("sub-start.sh", 1);
        let err = invoker
            .invoke(&stage, &unit(), &HostSpec::new("node9", 4), &ctx())
            .await
            .unwrap_err();

        match err {
            InvokeError::HostUnreachable { host, reason } => {
                assert_eq!(host, "node9");
                assert!(reason.contains("refused"), "{reason}");
            }
            other => panic!("expected HostUnreachable, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_255_on_localhost_is_a_plain_failure() {
        let temp = tempfile::TempDir::new().unwrap();
        write_script(temp.path(), "sub-start.sh", "exit 255");

        let invoker = ProcessInvoker::new().with_script_dir(temp.path());
        let outcome = invoker
            .invoke(&StageSpec::new("sub-start.sh", 1), &unit(), &HostSpec::localhost(1), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 255);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_watchdog_stops_slow_program() {
        let temp = tempfile::TempDir::new().unwrap();
        write_script(temp.path(), "mmd-start.sh", "exec sleep 5");

        let limit = Duration::from_millis(300);
        let invoker = ProcessInvoker::new()
            .with_script_dir(temp.path())
            .with_timeout(Some(limit));
        let start = Instant::now();
        let err = invoker
            .invoke(&StageSpec::new("mmd-start.sh", 1), &unit(), &HostSpec::localhost(1), &ctx())
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Timeout(d) if d == limit), "{err:?}");
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
