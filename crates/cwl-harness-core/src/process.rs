//! External-process runner invocation.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult, SignalKind};
use crate::invoker::{Invocation, RunInvoker, RunnerArgs};
use crate::obs;

/// Output markers that identify a runner's distinguished failure signals.
///
/// An external runner can only report failures through its exit code and
/// diagnostics, so the signal kind is recovered by scanning the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMarkers {
    pub jobs_failed: Vec<String>,
    pub no_such_job_store: Vec<String>,
}

impl Default for SignalMarkers {
    fn default() -> Self {
        Self {
            jobs_failed: vec!["FailedJobsException".to_string()],
            no_such_job_store: vec!["NoSuchJobStoreException".to_string()],
        }
    }
}

impl SignalMarkers {
    /// Detect the signal carried by a failed run's output.
    ///
    /// The job-store marker is checked first: it is the more specific one.
    pub fn detect(&self, output: &str) -> Option<SignalKind> {
        if self.no_such_job_store.iter().any(|m| output.contains(m.as_str())) {
            Some(SignalKind::NoSuchJobStore)
        } else if self.jobs_failed.iter().any(|m| output.contains(m.as_str())) {
            Some(SignalKind::JobsFailed)
        } else {
            None
        }
    }
}

/// Runs the CWL runner as a child process.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    program: String,
    timeout: Option<Duration>,
    markers: SignalMarkers,
}

impl ProcessInvoker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            markers: SignalMarkers::default(),
        }
    }

    /// Wall-clock limit per invocation; exceeding it is a hard failure.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_markers(mut self, markers: SignalMarkers) -> Self {
        self.markers = markers;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn failure(&self, args: &RunnerArgs, invocation: Invocation) -> HarnessError {
        let combined = format!("{}\n{}", invocation.stdout, invocation.stderr);
        match self.markers.detect(&combined) {
            Some(SignalKind::JobsFailed) => HarnessError::JobsFailed { output: combined },
            Some(SignalKind::NoSuchJobStore) => HarnessError::NoSuchJobStore {
                location: args
                    .job_store
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            },
            None => HarnessError::RunnerFailed {
                exit_code: invocation.exit_code,
                stdout: invocation.stdout,
                stderr: invocation.stderr,
            },
        }
    }
}

#[async_trait]
impl RunInvoker for ProcessInvoker {
    async fn invoke(&self, args: &RunnerArgs) -> HarnessResult<Invocation> {
        let start = Instant::now();
        let argv = args.to_argv();
        debug!(program = %self.program, ?argv, "Invoking runner");

        let mut command = Command::new(&self.program);
        command
            .args(&argv)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = command.spawn()?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    obs::emit_invocation_finished(&self.program, -1, elapsed_ms);
                    return Err(HarnessError::Timeout {
                        elapsed_ms,
                        limit_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        let invocation = Invocation {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        obs::emit_invocation_finished(&self.program, invocation.exit_code, invocation.duration_ms);

        if output.status.success() {
            Ok(invocation)
        } else {
            Err(self.failure(args, invocation))
        }
    }
}
