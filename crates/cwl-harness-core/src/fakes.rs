//! In-process runner fake (testing only)
//!
//! `MemoryCwlRunner` honours the runner invocation contract without a
//! workflow engine: it keeps per-job-store progress in memory, resolves each
//! step's tool through the live `PATH`, and finalizes (deletes) the job store
//! once every step has completed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::{HarnessError, HarnessResult};
use crate::fault::resolve_tool;
use crate::invoker::{Invocation, RunInvoker, RunnerArgs};
use crate::record::{Checksum, ResultRecord, GENERATION_KEY, NAMEEXT_KEY, NAMEROOT_KEY};

/// One workflow step, optionally backed by an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeStep {
    pub name: String,
    pub tool: Option<String>,
}

impl FakeStep {
    pub fn internal(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tool: None,
        }
    }

    pub fn tool(name: &str, tool: &str) -> Self {
        Self {
            name: name.to_string(),
            tool: Some(tool.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    completed: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct RunnerState {
    stores: HashMap<PathBuf, StoreState>,
    executions: BTreeMap<String, u32>,
    calls: Vec<RunnerArgs>,
}

/// In-memory CWL runner.
#[derive(Debug)]
pub struct MemoryCwlRunner {
    steps: Vec<FakeStep>,
    /// What each tool resolved to when the runner was built.
    baseline: BTreeMap<String, Option<PathBuf>>,
    output_key: String,
    basename: String,
    size: u64,
    checksum: Checksum,
    state: Mutex<RunnerState>,
}

impl MemoryCwlRunner {
    /// A runner for `steps`, producing one `File` output.
    ///
    /// Tool resolutions are captured now; a step fails when its tool later
    /// resolves to a different binary.
    pub fn new(
        steps: Vec<FakeStep>,
        output_key: &str,
        basename: &str,
        size: u64,
        checksum: Checksum,
    ) -> Self {
        let baseline = steps
            .iter()
            .filter_map(|s| s.tool.clone())
            .map(|tool| {
                let resolved = canonical_tool(&tool);
                (tool, resolved)
            })
            .collect();

        Self {
            steps,
            baseline,
            output_key: output_key.to_string(),
            basename: basename.to_string(),
            size,
            checksum,
            state: Mutex::new(RunnerState::default()),
        }
    }

    /// The revsort workflow: stage the input, `rev` it, then `sort` it.
    pub fn revsort() -> HarnessResult<Self> {
        Ok(Self::new(
            vec![
                FakeStep::internal("stage"),
                FakeStep::tool("rev", "rev"),
                FakeStep::tool("sorted", "sort"),
            ],
            "output",
            "output.txt",
            1111,
            Checksum::sha1("b9214658cc453331b62c2282b772a5c063dbd284")?,
        ))
    }

    /// How many times each step has actually executed.
    pub fn executions(&self, step: &str) -> u32 {
        let state = self.state.lock().unwrap();
        state.executions.get(step).copied().unwrap_or(0)
    }

    /// Every invocation received, in order.
    pub fn calls(&self) -> Vec<RunnerArgs> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Whether a job store is live (created and not yet finalized).
    pub fn has_store(&self, job_store: &Path) -> bool {
        self.state.lock().unwrap().stores.contains_key(job_store)
    }

    fn tool_is_broken(&self, tool: &str) -> bool {
        let baseline = self.baseline.get(tool).cloned().flatten();
        canonical_tool(tool) != baseline
    }

    fn payload(&self, out_dir: &Path) -> Value {
        let record = ResultRecord::file(out_dir, &self.basename, self.size, self.checksum.clone());
        let mut value = record.to_value();
        if let Value::Object(map) = &mut value {
            let (root, ext) = match self.basename.rsplit_once('.') {
                Some((root, ext)) => (root.to_string(), format!(".{ext}")),
                None => (self.basename.clone(), String::new()),
            };
            map.insert(NAMEROOT_KEY.to_string(), json!(root));
            map.insert(NAMEEXT_KEY.to_string(), json!(ext));
            map.insert(GENERATION_KEY.to_string(), json!(0));
        }
        let mut result = Map::new();
        result.insert(self.output_key.clone(), value);
        Value::Object(result)
    }
}

fn canonical_tool(tool: &str) -> Option<PathBuf> {
    resolve_tool(tool).and_then(|p| std::fs::canonicalize(p).ok())
}

fn failure(exit_code: i32, stderr: &str) -> HarnessError {
    HarnessError::RunnerFailed {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl RunInvoker for MemoryCwlRunner {
    async fn invoke(&self, args: &RunnerArgs) -> HarnessResult<Invocation> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(args.clone());

        if !args.workflow.as_os_str().is_empty() && args.workflow.extension().is_none() {
            return Err(failure(2, "workflow document has no extension"));
        }

        // Without a job store the run is ephemeral.
        let store_key = args.job_store.clone().unwrap_or_default();
        let persistent = args.job_store.is_some();

        if args.restart {
            if !persistent || !state.stores.contains_key(&store_key) {
                return Err(HarnessError::NoSuchJobStore {
                    location: store_key.display().to_string(),
                });
            }
        } else {
            if persistent && (state.stores.contains_key(&store_key) || store_key.exists()) {
                return Err(failure(1, "JobStoreExistsException: job store already exists"));
            }
            if persistent {
                std::fs::create_dir_all(&store_key)?;
            }
            state.stores.insert(store_key.clone(), StoreState::default());
        }

        for step in &self.steps {
            let done = state
                .stores
                .get(&store_key)
                .is_some_and(|s| s.completed.contains(&step.name));
            if done {
                continue;
            }

            if let Some(tool) = &step.tool {
                if self.tool_is_broken(tool) {
                    if !persistent {
                        state.stores.remove(&store_key);
                    }
                    return Err(HarnessError::JobsFailed {
                        output: format!(
                            "FailedJobsException: step '{}' failed: '{tool}' is not the expected program",
                            step.name
                        ),
                    });
                }
            }

            *state.executions.entry(step.name.clone()).or_insert(0) += 1;
            if let Some(store) = state.stores.get_mut(&store_key) {
                store.completed.insert(step.name.clone());
            }
        }

        state.stores.remove(&store_key);
        if persistent && store_key.exists() {
            std::fs::remove_dir_all(&store_key)?;
        }

        Ok(Invocation {
            exit_code: 0,
            stdout: self.payload(&args.out_dir).to_string(),
            stderr: "INFO: workflow completed".to_string(),
            duration_ms: 0,
        })
    }
}
