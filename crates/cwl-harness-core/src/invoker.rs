//! Runner invocation contract.
//!
//! The harness never executes workflows itself. It hands an argument set to
//! a [`RunInvoker`] and judges what comes back: a JSON payload on success,
//! or one of the distinguished failure signals.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarnessResult;
use crate::record::decode_result_set;

pub const OUTDIR_FLAG: &str = "--outdir";
pub const JOB_STORE_FLAG: &str = "--jobStore";
pub const RESTART_FLAG: &str = "--restart";
pub const DEBUG_WORKER_FLAG: &str = "--debugWorker";
pub const NO_CONTAINER_FLAG: &str = "--no-container";

/// Arguments for one runner invocation.
///
/// Pass-through flags are opaque: the harness forwards them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerArgs {
    pub out_dir: PathBuf,
    pub job_store: Option<PathBuf>,
    pub workflow: PathBuf,
    pub job: PathBuf,
    pub restart: bool,
    pub debug_worker: bool,
    pub extra: Vec<String>,
}

impl RunnerArgs {
    pub fn new(out_dir: impl Into<PathBuf>, workflow: impl Into<PathBuf>, job: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            job_store: None,
            workflow: workflow.into(),
            job: job.into(),
            restart: false,
            debug_worker: false,
            extra: Vec::new(),
        }
    }

    pub fn with_job_store(mut self, job_store: impl Into<PathBuf>) -> Self {
        self.job_store = Some(job_store.into());
        self
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_debug_worker(mut self, debug_worker: bool) -> Self {
        self.debug_worker = debug_worker;
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.extra.push(flag.into());
        self
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Command line in runner order: switches, pass-through flags, then
    /// `--outdir`, `--jobStore`, workflow and job documents.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.extra.len() + 8);
        if self.restart {
            argv.push(RESTART_FLAG.to_string());
        }
        if self.debug_worker {
            argv.push(DEBUG_WORKER_FLAG.to_string());
        }
        argv.extend(self.extra.iter().cloned());
        argv.push(OUTDIR_FLAG.to_string());
        argv.push(path_arg(&self.out_dir));
        if let Some(job_store) = &self.job_store {
            argv.push(JOB_STORE_FLAG.to_string());
            argv.push(path_arg(job_store));
        }
        argv.push(path_arg(&self.workflow));
        argv.push(path_arg(&self.job));
        argv
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Captured result of a successful invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout (the result payload).
    pub stdout: String,

    /// Captured stderr (runner logging).
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl Invocation {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Decode stdout as a result mapping.
    pub fn decode_payload(&self) -> HarnessResult<Value> {
        decode_result_set(&self.stdout)
    }
}

/// Executes a CWL runner.
///
/// Implementations return `Ok` only for a zero exit. Failures map to
/// `HarnessError::JobsFailed`, `HarnessError::NoSuchJobStore`,
/// `HarnessError::Timeout`, or `HarnessError::RunnerFailed` for anything else.
/// Each call blocks until the runner finishes; callers never issue two
/// concurrent calls against one job store.
#[async_trait]
pub trait RunInvoker: Send + Sync {
    async fn invoke(&self, args: &RunnerArgs) -> HarnessResult<Invocation>;
}
