//! Restart/recovery trials against a persistent job store.
//!
//! One trial drives a single job store through:
//!
//! ```text
//! Idle -> Running(Broken) -> Failed -> Running(Repaired) -> Succeeded
//!      -> RestartedAfterSuccess -> Rejected
//! ```
//!
//! The first run is broken on purpose by redirecting a required tool to an
//! unrelated binary, and must raise the jobs-failed signal. With the tool
//! repaired, a restart must complete. A further restart against the now
//! finalized store must raise the no-such-job-store signal.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, Instrument};

use crate::error::{HarnessError, HarnessResult, SignalKind};
use crate::fault::{hold_path, FaultInjector, ToolSubstitution};
use crate::invoker::{Invocation, RunInvoker, RunnerArgs};
use crate::obs;
use crate::workspace::TrialWorkspace;

/// Whether the injected fault is in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyState {
    Broken,
    Repaired,
}

/// Which runner invocation of the trial is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialPhase {
    InitialRun,
    Restart,
    SecondRestart,
}

impl fmt::Display for TrialPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialPhase::InitialRun => write!(f, "initial run"),
            TrialPhase::Restart => write!(f, "restart"),
            TrialPhase::SecondRestart => write!(f, "second restart"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialState {
    Idle,
    Running(DependencyState),
    Failed,
    Succeeded,
    RestartedAfterSuccess,
    Rejected,
}

impl TrialState {
    /// The single legal successor of each state.
    pub fn next(&self) -> Option<TrialState> {
        match self {
            TrialState::Idle => Some(TrialState::Running(DependencyState::Broken)),
            TrialState::Running(DependencyState::Broken) => Some(TrialState::Failed),
            TrialState::Failed => Some(TrialState::Running(DependencyState::Repaired)),
            TrialState::Running(DependencyState::Repaired) => Some(TrialState::Succeeded),
            TrialState::Succeeded => Some(TrialState::RestartedAfterSuccess),
            TrialState::RestartedAfterSuccess => Some(TrialState::Rejected),
            TrialState::Rejected => None,
        }
    }
}

impl fmt::Display for TrialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialState::Idle => write!(f, "idle"),
            TrialState::Running(DependencyState::Broken) => write!(f, "running(broken)"),
            TrialState::Running(DependencyState::Repaired) => write!(f, "running(repaired)"),
            TrialState::Failed => write!(f, "failed"),
            TrialState::Succeeded => write!(f, "succeeded"),
            TrialState::RestartedAfterSuccess => write!(f, "restarted_after_success"),
            TrialState::Rejected => write!(f, "rejected"),
        }
    }
}

/// One recovery trial over one job-store location.
#[derive(Debug, Clone)]
pub struct RestartScenario {
    job_store_location: PathBuf,
    dependency_state: DependencyState,
    phase: TrialPhase,
    state: TrialState,
    history: Vec<TrialState>,
}

impl RestartScenario {
    pub fn new(job_store_location: impl Into<PathBuf>) -> Self {
        Self {
            job_store_location: job_store_location.into(),
            dependency_state: DependencyState::Broken,
            phase: TrialPhase::InitialRun,
            state: TrialState::Idle,
            history: vec![TrialState::Idle],
        }
    }

    pub fn job_store_location(&self) -> &Path {
        &self.job_store_location
    }

    pub fn dependency_state(&self) -> DependencyState {
        self.dependency_state
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    pub fn state(&self) -> TrialState {
        self.state
    }

    /// Every state visited, starting with `Idle`.
    pub fn history(&self) -> &[TrialState] {
        &self.history
    }

    /// Move to `to`, which must be the legal successor of the current state.
    pub fn advance(&mut self, to: TrialState) -> HarnessResult<()> {
        if self.state.next() != Some(to) {
            return Err(HarnessError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        match to {
            TrialState::Running(dep) => {
                self.dependency_state = dep;
                if dep == DependencyState::Repaired {
                    self.phase = TrialPhase::Restart;
                }
            }
            TrialState::RestartedAfterSuccess => self.phase = TrialPhase::SecondRestart,
            _ => {}
        }

        obs::emit_trial_transition(&self.state.to_string(), &to.to_string());
        self.state = to;
        self.history.push(to);
        Ok(())
    }
}

/// Inputs for one restart trial.
#[derive(Debug, Clone)]
pub struct RestartPlan {
    /// Standard runner arguments, job store included, restart flag off.
    pub args: RunnerArgs,

    /// Where fault-injection shims are placed.
    pub shim_dir: PathBuf,

    /// Tools redirected during the broken run.
    pub substitutions: Vec<ToolSubstitution>,
}

impl RestartPlan {
    /// Plan a trial in `workspace` for one workflow and job document.
    pub fn new(
        workspace: &TrialWorkspace,
        workflow: impl Into<PathBuf>,
        job: impl Into<PathBuf>,
    ) -> Self {
        Self {
            args: RunnerArgs::new(workspace.out_dir(), workflow, job)
                .with_job_store(workspace.job_store()),
            shim_dir: workspace.shim_dir(),
            substitutions: Vec::new(),
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.args = self.args.with_flag(flag);
        self
    }

    pub fn with_substitution(mut self, substitution: ToolSubstitution) -> Self {
        self.substitutions.push(substitution);
        self
    }

    fn validate(&self) -> HarnessResult<PathBuf> {
        let job_store = self.args.job_store.clone().ok_or_else(|| {
            HarnessError::InvalidConfig("restart trial needs a job store location".to_string())
        })?;
        if self.args.restart {
            return Err(HarnessError::InvalidConfig(
                "the initial run of a restart trial must not pass --restart".to_string(),
            ));
        }
        if self.substitutions.is_empty() {
            return Err(HarnessError::InvalidConfig(
                "restart trial needs at least one tool substitution".to_string(),
            ));
        }
        Ok(job_store)
    }
}

/// Outcome of a completed trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartReport {
    pub job_store: PathBuf,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub transitions: Vec<TrialState>,
}

impl RestartReport {
    pub fn final_state(&self) -> Option<TrialState> {
        self.transitions.last().copied()
    }
}

/// Drives restart trials through a runner.
pub struct RestartOrchestrator {
    invoker: Arc<dyn RunInvoker>,
}

impl RestartOrchestrator {
    pub fn new(invoker: Arc<dyn RunInvoker>) -> Self {
        Self { invoker }
    }

    /// Run one full trial. Every unexpected outcome is returned as an error.
    pub async fn run(&self, plan: RestartPlan) -> HarnessResult<RestartReport> {
        let job_store = plan.validate()?;
        let job_store_str = job_store.display().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        obs::emit_trial_started(&job_store_str);

        let mut scenario = RestartScenario::new(&job_store);
        let result = self
            .drive(&plan, &mut scenario)
            .instrument(obs::trial_span(&job_store_str))
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_trial_finished(&job_store_str, duration_ms, result.is_ok());

        match result {
            Ok(()) => Ok(RestartReport {
                job_store,
                started_at,
                duration_ms,
                transitions: scenario.history().to_vec(),
            }),
            Err(e) => {
                error!(state = %scenario.state(), error = %e, "Restart trial failed");
                Err(e)
            }
        }
    }

    async fn drive(&self, plan: &RestartPlan, scenario: &mut RestartScenario) -> HarnessResult<()> {
        let injector = plan
            .substitutions
            .iter()
            .cloned()
            .fold(FaultInjector::new(&plan.shim_dir), FaultInjector::substitute);

        // Broken run: the fault is held only for this invocation and dropped
        // on every path out of this block.
        let first = {
            let guard = injector.acquire().await?;
            scenario.advance(TrialState::Running(DependencyState::Broken))?;
            info!(phase = %scenario.phase(), "Running with broken dependency");
            let result = self.invoker.invoke(&plan.args).await;
            guard.release();
            result
        };
        expect_signal(scenario.phase(), first, SignalKind::JobsFailed)?;
        scenario.advance(TrialState::Failed)?;

        let restart_args = plan.args.clone().with_restart(true);

        // Both restarts need the tool resolving as it did before the fault,
        // so no other trial may inject one until they finish.
        let _hold = hold_path().await;

        scenario.advance(TrialState::Running(DependencyState::Repaired))?;
        info!(phase = %scenario.phase(), "Restarting with repaired dependency");
        let phase = scenario.phase();
        self.invoker
            .invoke(&restart_args)
            .await
            .map_err(|e| HarnessError::RestartFailed {
                phase,
                source: Box::new(e),
            })?;
        scenario.advance(TrialState::Succeeded)?;

        scenario.advance(TrialState::RestartedAfterSuccess)?;
        info!(phase = %scenario.phase(), "Restarting a completed job store");
        let third = self.invoker.invoke(&restart_args).await;
        expect_signal(scenario.phase(), third, SignalKind::NoSuchJobStore)?;
        scenario.advance(TrialState::Rejected)?;

        Ok(())
    }
}

/// Require that `result` is exactly the `expected` runner signal.
fn expect_signal(
    phase: TrialPhase,
    result: HarnessResult<Invocation>,
    expected: SignalKind,
) -> HarnessResult<()> {
    match result {
        Ok(_) => Err(HarnessError::UnexpectedSuccess { phase, expected }),
        Err(e) if e.signal_kind() == Some(expected) => Ok(()),
        Err(e) => Err(HarnessError::UnexpectedSignal {
            phase,
            expected,
            actual: Box::new(e),
        }),
    }
}
