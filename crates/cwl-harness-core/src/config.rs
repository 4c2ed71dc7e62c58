//! Harness configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::process::{ProcessInvoker, SignalMarkers};

pub const RUNNER_ENV: &str = "CWL_HARNESS_RUNNER";
pub const CWLTEST_ENV: &str = "CWL_HARNESS_CWLTEST";
pub const TIMEOUT_ENV: &str = "CWL_HARNESS_TIMEOUT_SECS";
pub const WORK_ROOT_ENV: &str = "CWL_HARNESS_WORK_ROOT";
pub const JOBS_FAILED_MARKERS_ENV: &str = "CWL_HARNESS_JOBS_FAILED_MARKERS";
pub const NO_SUCH_JOB_STORE_MARKERS_ENV: &str = "CWL_HARNESS_NO_SUCH_JOB_STORE_MARKERS";

pub const DEFAULT_RUNNER: &str = "toil-cwl-runner";
pub const DEFAULT_CWLTEST: &str = "cwltest";
pub const DEFAULT_TIMEOUT_SECS: u64 = 2400;

/// Where the runner and conformance driver live and how long they may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Runner executable.
    pub runner: String,
    /// Conformance batch driver executable.
    pub cwltest: String,
    /// Per-invocation wall-clock limit.
    pub timeout_secs: u64,
    /// Parent directory for trial workspaces.
    pub work_root: PathBuf,
    /// Output markers mapped to the runner's failure signals.
    #[serde(default)]
    pub markers: SignalMarkers,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            runner: DEFAULT_RUNNER.to_string(),
            cwltest: DEFAULT_CWLTEST.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            work_root: std::env::temp_dir(),
            markers: SignalMarkers::default(),
        }
    }
}

impl HarnessConfig {
    /// Load from the process environment.
    ///
    /// Reads:
    /// - CWL_HARNESS_RUNNER (optional, default: "toil-cwl-runner")
    /// - CWL_HARNESS_CWLTEST (optional, default: "cwltest")
    /// - CWL_HARNESS_TIMEOUT_SECS (optional, default: 2400)
    /// - CWL_HARNESS_WORK_ROOT (optional, default: system temp dir)
    /// - CWL_HARNESS_JOBS_FAILED_MARKERS (optional, comma-separated,
    ///   default: "FailedJobsException")
    /// - CWL_HARNESS_NO_SUCH_JOB_STORE_MARKERS (optional, comma-separated,
    ///   default: "NoSuchJobStoreException")
    pub fn from_env() -> HarnessResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset or empty keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> HarnessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(runner) = get(RUNNER_ENV) {
            config.runner = runner;
        }
        if let Some(cwltest) = get(CWLTEST_ENV) {
            config.cwltest = cwltest;
        }
        if let Some(raw) = get(TIMEOUT_ENV) {
            config.timeout_secs = raw.trim().parse().map_err(|_| {
                HarnessError::InvalidConfig(format!("{TIMEOUT_ENV} must be whole seconds, got '{raw}'"))
            })?;
        }
        if let Some(root) = get(WORK_ROOT_ENV) {
            config.work_root = PathBuf::from(root);
        }
        if let Some(raw) = get(JOBS_FAILED_MARKERS_ENV) {
            config.markers.jobs_failed = split_markers(&raw);
        }
        if let Some(raw) = get(NO_SUCH_JOB_STORE_MARKERS_ENV) {
            config.markers.no_such_job_store = split_markers(&raw);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.timeout_secs == 0 {
            return Err(HarnessError::InvalidConfig(
                "timeout must be at least one second".to_string(),
            ));
        }
        if self.runner.is_empty() {
            return Err(HarnessError::InvalidConfig("runner must be set".to_string()));
        }
        if self.markers.jobs_failed.is_empty() || self.markers.no_such_job_store.is_empty() {
            return Err(HarnessError::InvalidConfig(
                "each runner signal needs at least one output marker".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// External-process invoker for the configured runner.
    pub fn process_invoker(&self) -> ProcessInvoker {
        ProcessInvoker::new(&self.runner)
            .with_timeout(self.timeout())
            .with_markers(self.markers.clone())
    }
}

fn split_markers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = HarnessConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(c.runner, "toil-cwl-runner");
        assert_eq!(c.cwltest, "cwltest");
        assert_eq!(c.timeout(), Duration::from_secs(2400));
    }

    #[test]
    fn test_overrides() {
        let c = HarnessConfig::from_lookup(lookup(&[
            (RUNNER_ENV, "cwltool"),
            (TIMEOUT_ENV, " 60 "),
            (WORK_ROOT_ENV, "/scratch"),
        ]))
        .unwrap();
        assert_eq!(c.runner, "cwltool");
        assert_eq!(c.timeout_secs, 60);
        assert_eq!(c.work_root, PathBuf::from("/scratch"));
        assert_eq!(c.process_invoker().program(), "cwltool");
    }

    #[test]
    fn test_bad_timeout_rejected() {
        for bad in ["soon", "-5", "0"] {
            let err = HarnessConfig::from_lookup(lookup(&[(TIMEOUT_ENV, bad)])).unwrap_err();
            assert!(matches!(err, HarnessError::InvalidConfig(_)), "{bad}");
        }
    }

    #[test]
    fn test_marker_overrides() {
        let c = HarnessConfig::from_lookup(lookup(&[
            (JOBS_FAILED_MARKERS_ENV, "WorkflowException, FailedJobsException ,"),
            (NO_SUCH_JOB_STORE_MARKERS_ENV, "job store does not exist"),
        ]))
        .unwrap();
        assert_eq!(
            c.markers.jobs_failed,
            vec!["WorkflowException".to_string(), "FailedJobsException".to_string()]
        );
        assert_eq!(c.markers.no_such_job_store, vec!["job store does not exist".to_string()]);

        let err = HarnessConfig::from_lookup(lookup(&[(JOBS_FAILED_MARKERS_ENV, " , ")]))
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig(_)));
    }

    #[test]
    fn test_empty_value_keeps_default() {
        let c = HarnessConfig::from_lookup(lookup(&[(RUNNER_ENV, "")])).unwrap();
        assert_eq!(c.runner, DEFAULT_RUNNER);
    }
}
