//! Conformance suite definitions and `cwltest` command assembly.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use cwl_harness_core::HarnessConfig;
use serde::{Deserialize, Serialize};

/// Suite configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    #[error("unknown conformance suite '{0}' (expected v1.0, v1.1 or v1.2)")]
    UnknownSuite(String),

    #[error("unknown batch system '{0}'")]
    UnknownBatchSystem(String),
}

/// Published CWL conformance suites.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinSuite {
    V1_0,
    V1_1,
    V1_2,
}

impl BuiltinSuite {
    pub fn all() -> [BuiltinSuite; 3] {
        [BuiltinSuite::V1_0, BuiltinSuite::V1_1, BuiltinSuite::V1_2]
    }

    /// Get the suite name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinSuite::V1_0 => "cwl_v1.0",
            BuiltinSuite::V1_1 => "cwl_v1.1",
            BuiltinSuite::V1_2 => "cwl_v1.2",
        }
    }

    /// Repository the suite is checked out from.
    pub fn source_repo(&self) -> &'static str {
        match self {
            BuiltinSuite::V1_0 => "https://github.com/common-workflow-language/common-workflow-language",
            BuiltinSuite::V1_1 => "https://github.com/common-workflow-language/cwl-v1.1.git",
            BuiltinSuite::V1_2 => "https://github.com/common-workflow-language/cwl-v1.2.git",
        }
    }

    /// Pinned commit of `source_repo` the selections below were made against.
    pub fn commit(&self) -> &'static str {
        match self {
            BuiltinSuite::V1_0 => "40fcfc01812046f012acf5153cc955ee848e69e3",
            BuiltinSuite::V1_1 => "a22b7580c6b50e77c0a181ca59d3828dd5c69143",
            BuiltinSuite::V1_2 => "fca122ef126d03da8c8091111ef5d0cf75763382",
        }
    }

    /// Base directory of the tests, relative to the checkout.
    pub fn basedir(&self) -> &'static str {
        match self {
            BuiltinSuite::V1_0 => "v1.0",
            BuiltinSuite::V1_1 | BuiltinSuite::V1_2 => "",
        }
    }

    /// Test index file, relative to the base directory.
    pub fn test_file(&self) -> &'static str {
        match self {
            BuiltinSuite::V1_0 => "conformance_test_v1.0.yaml",
            BuiltinSuite::V1_1 | BuiltinSuite::V1_2 => "conformance_tests.yaml",
        }
    }

    /// Test numbers to run; tests 213, 236, 242-246 and 249 are known to fail.
    pub fn selected_tests(&self) -> Option<&'static str> {
        match self {
            BuiltinSuite::V1_0 => None,
            BuiltinSuite::V1_1 => Some("1-212,214-235,237-241,247-248,250-253"),
            BuiltinSuite::V1_2 => Some("1-212,214-235,237-241,247-248,250-276"),
        }
    }

    /// Arguments handed straight to the runner after `--`.
    pub fn direct_args(&self) -> Vec<String> {
        match self {
            BuiltinSuite::V1_2 => vec!["--enable-dev".to_string()],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for BuiltinSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinSuite {
    type Err = SuiteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches("cwl_").trim_start_matches('v') {
            "1.0" => Ok(BuiltinSuite::V1_0),
            "1.1" => Ok(BuiltinSuite::V1_1),
            "1.2" => Ok(BuiltinSuite::V1_2),
            _ => Err(SuiteError::UnknownSuite(s.to_string())),
        }
    }
}

/// Batch system the runner dispatches conformance jobs to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchSystem {
    #[default]
    SingleMachine,
    Lsf,
    Slurm,
    Torque,
    GridEngine,
    Mesos,
    Parasol,
}

impl BatchSystem {
    /// Value passed as `--batchSystem`; the default system passes no flag.
    pub fn flag_value(&self) -> Option<&'static str> {
        match self {
            BatchSystem::SingleMachine => None,
            BatchSystem::Lsf => Some("LSF"),
            BatchSystem::Slurm => Some("Slurm"),
            BatchSystem::Torque => Some("Torque"),
            BatchSystem::GridEngine => Some("gridEngine"),
            BatchSystem::Mesos => Some("mesos"),
            BatchSystem::Parasol => Some("parasol"),
        }
    }
}

impl FromStr for BatchSystem {
    type Err = SuiteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single_machine" | "singlemachine" | "local" => Ok(BatchSystem::SingleMachine),
            "lsf" => Ok(BatchSystem::Lsf),
            "slurm" => Ok(BatchSystem::Slurm),
            "torque" => Ok(BatchSystem::Torque),
            "gridengine" | "grid_engine" => Ok(BatchSystem::GridEngine),
            "mesos" => Ok(BatchSystem::Mesos),
            "parasol" => Ok(BatchSystem::Parasol),
            _ => Err(SuiteError::UnknownBatchSystem(s.to_string())),
        }
    }
}

/// Re-enables the runner's job cache, which conformance runs disable by default.
pub const CACHING_FLAG: &str = "--disableCaching=False";

/// Configuration for one conformance suite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Human-readable suite name.
    pub name: String,

    /// Batch driver executable.
    pub cwltest: String,

    /// Runner under test, passed as `--tool`.
    pub runner: String,

    /// Test index file.
    pub test_file: PathBuf,

    /// Base directory of the tests; also the working directory.
    pub basedir: PathBuf,

    /// Per-test limit handed to the driver, and the wall-clock limit of the
    /// whole run (0 = unlimited).
    pub timeout_secs: u64,

    /// `-n` selection, e.g. `1-212,214-235`.
    pub selected_tests: Option<String>,

    pub batch_system: BatchSystem,

    /// Arguments passed to the runner after `--`.
    pub direct_args: Vec<String>,

    /// Whether the runner's job cache is enabled.
    pub caching: bool,

    /// Whether this suite is enabled.
    pub enabled: bool,
}

impl SuiteConfig {
    /// A builtin suite checked out at `checkout`.
    pub fn from_builtin(suite: BuiltinSuite, checkout: &Path, config: &HarnessConfig) -> Self {
        let basedir = checkout.join(suite.basedir());
        Self {
            name: suite.name().to_string(),
            cwltest: config.cwltest.clone(),
            runner: config.runner.clone(),
            test_file: basedir.join(suite.test_file()),
            basedir,
            timeout_secs: config.timeout_secs,
            selected_tests: suite.selected_tests().map(str::to_string),
            batch_system: BatchSystem::default(),
            direct_args: suite.direct_args(),
            caching: false,
            enabled: true,
        }
    }

    /// A suite outside the builtin set.
    pub fn custom(
        name: impl Into<String>,
        test_file: impl Into<PathBuf>,
        basedir: impl Into<PathBuf>,
        config: &HarnessConfig,
    ) -> Self {
        Self {
            name: name.into(),
            cwltest: config.cwltest.clone(),
            runner: config.runner.clone(),
            test_file: test_file.into(),
            basedir: basedir.into(),
            timeout_secs: config.timeout_secs,
            selected_tests: None,
            batch_system: BatchSystem::default(),
            direct_args: Vec::new(),
            caching: false,
            enabled: true,
        }
    }

    pub fn with_batch_system(mut self, batch_system: BatchSystem) -> Self {
        self.batch_system = batch_system;
        self
    }

    pub fn with_caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }

    pub fn with_selected_tests(mut self, selection: impl Into<String>) -> Self {
        self.selected_tests = Some(selection.into());
        self
    }

    /// Disable this suite.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Full command line; the first element is the executable.
    pub fn command(&self) -> Vec<String> {
        let mut cmd = vec![
            self.cwltest.clone(),
            format!("--tool={}", self.runner),
            format!("--test={}", self.test_file.display()),
            format!("--timeout={}", self.timeout_secs),
            format!("--basedir={}", self.basedir.display()),
        ];
        if let Some(selection) = &self.selected_tests {
            cmd.push(format!("-n={selection}"));
        }
        if let Some(bs) = self.batch_system.flag_value() {
            cmd.push("--batchSystem".to_string());
            cmd.push(bs.to_string());
        }

        let mut direct = self.direct_args.clone();
        if self.caching {
            direct.push(CACHING_FLAG.to_string());
        }
        if !direct.is_empty() {
            cmd.push("--".to_string());
            cmd.extend(direct);
        }
        cmd
    }
}
