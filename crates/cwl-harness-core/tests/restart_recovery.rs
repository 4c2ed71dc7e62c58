//! Restart/recovery trials driven end to end through the in-process runner
//! with a real `PATH` fault.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use cwl_harness_core::fakes::{FakeStep, MemoryCwlRunner};
use cwl_harness_core::{
    resolve_tool, Checksum, DependencyState, HarnessError, HarnessResult, Invocation,
    RestartOrchestrator, RestartPlan, RunInvoker, RunnerArgs, SignalKind, ToolSubstitution,
    TrialPhase, TrialState, TrialWorkspace,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// `MemoryCwlRunner` captures its baseline tool resolutions when built, so
/// no other test's fault may be installed at that moment.
async fn serial() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    LOCK.get_or_init(|| Arc::new(Mutex::new(())))
        .clone()
        .lock_owned()
        .await
}

fn substitute(dir: &Path) -> PathBuf {
    let p = dir.join("not-rev");
    std::fs::write(&p, "#!/bin/sh\nexit 0\n").unwrap();
    p
}

fn canonical(tool: &str) -> Option<PathBuf> {
    resolve_tool(tool).and_then(|p| std::fs::canonicalize(p).ok())
}

fn revsort_plan(ws: &TrialWorkspace, substitute: &Path) -> RestartPlan {
    RestartPlan::new(ws, "revsort.cwl", "revsort-job.json")
        .with_flag("--no-container")
        .with_substitution(ToolSubstitution::new("rev", substitute))
}

fn full_cycle() -> Vec<TrialState> {
    vec![
        TrialState::Idle,
        TrialState::Running(DependencyState::Broken),
        TrialState::Failed,
        TrialState::Running(DependencyState::Repaired),
        TrialState::Succeeded,
        TrialState::RestartedAfterSuccess,
        TrialState::Rejected,
    ]
}

#[tokio::test]
async fn full_restart_cycle_reaches_rejected() {
    let _serial = serial().await;
    let base = tempfile::tempdir().unwrap();
    let ws = TrialWorkspace::create(base.path()).unwrap();
    let sub = substitute(base.path());
    let rev_before = canonical("rev");

    let runner = Arc::new(MemoryCwlRunner::revsort().unwrap());
    let report = RestartOrchestrator::new(runner.clone())
        .run(revsort_plan(&ws, &sub))
        .await
        .unwrap();

    assert_eq!(report.transitions, full_cycle());
    assert_eq!(report.final_state(), Some(TrialState::Rejected));
    assert_eq!(report.job_store, ws.job_store());

    // The completed store was finalized by the successful restart.
    assert!(!ws.job_store().exists());
    assert!(!runner.has_store(ws.job_store()));

    // Resolution is back to what it was before the trial.
    assert_eq!(canonical("rev"), rev_before);
    assert!(!ws.shim_dir().join("rev").exists());
}

#[tokio::test]
async fn restart_does_not_rerun_completed_steps() {
    let _serial = serial().await;
    let base = tempfile::tempdir().unwrap();
    let ws = TrialWorkspace::create(base.path()).unwrap();
    let sub = substitute(base.path());

    let runner = Arc::new(MemoryCwlRunner::revsort().unwrap());
    RestartOrchestrator::new(runner.clone())
        .run(revsort_plan(&ws, &sub))
        .await
        .unwrap();

    // `stage` completed before `rev` failed and must not run again.
    assert_eq!(runner.executions("stage"), 1);
    assert_eq!(runner.executions("rev"), 1);
    assert_eq!(runner.executions("sorted"), 1);

    let calls = runner.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(
        calls.iter().map(|c| c.restart).collect::<Vec<_>>(),
        vec![false, true, true]
    );
}

#[tokio::test]
async fn repeated_trials_are_deterministic() {
    let _serial = serial().await;
    let base = tempfile::tempdir().unwrap();
    let sub = substitute(base.path());

    let mut job_stores = Vec::new();
    for _ in 0..3 {
        let ws = TrialWorkspace::create(base.path()).unwrap();
        let runner = Arc::new(MemoryCwlRunner::revsort().unwrap());
        let report = RestartOrchestrator::new(runner)
            .run(revsort_plan(&ws, &sub))
            .await
            .unwrap();
        assert_eq!(report.transitions, full_cycle());
        job_stores.push(report.job_store);
    }

    job_stores.sort();
    job_stores.dedup();
    assert_eq!(job_stores.len(), 3, "job stores must never be reused");
}

#[tokio::test]
async fn fault_that_misses_every_step_is_unexpected_success() {
    let _serial = serial().await;
    let base = tempfile::tempdir().unwrap();
    let ws = TrialWorkspace::create(base.path()).unwrap();
    let sub = substitute(base.path());

    // The workflow never calls `rev`, so redirecting it breaks nothing.
    let runner = Arc::new(MemoryCwlRunner::new(
        vec![FakeStep::internal("stage"), FakeStep::tool("sorted", "sort")],
        "output",
        "output.txt",
        1111,
        Checksum::sha1("b9214658cc453331b62c2282b772a5c063dbd284").unwrap(),
    ));
    let err = RestartOrchestrator::new(runner)
        .run(revsort_plan(&ws, &sub))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HarnessError::UnexpectedSuccess {
            phase: TrialPhase::InitialRun,
            expected: SignalKind::JobsFailed
        }
    ));
}

#[tokio::test]
async fn missing_substitute_aborts_before_any_run() {
    let _serial = serial().await;
    let base = tempfile::tempdir().unwrap();
    let ws = TrialWorkspace::create(base.path()).unwrap();

    let runner = Arc::new(MemoryCwlRunner::revsort().unwrap());
    let err = RestartOrchestrator::new(runner.clone())
        .run(revsort_plan(&ws, &base.path().join("nowhere")))
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::FaultInjection(_)));
    assert!(runner.calls().is_empty());
}

/// Slows each call down so two trials overlap: broken runs stay in flight
/// long enough for a sibling's restart to start.
struct Slow {
    inner: MemoryCwlRunner,
    broken_run: Duration,
    restart: Duration,
}

#[async_trait]
impl RunInvoker for Slow {
    async fn invoke(&self, args: &RunnerArgs) -> HarnessResult<Invocation> {
        let delay = if args.restart { self.restart } else { self.broken_run };
        tokio::time::sleep(delay).await;
        self.inner.invoke(args).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_trials_do_not_see_each_others_fault() {
    let _serial = serial().await;
    let base = tempfile::tempdir().unwrap();
    let sub = substitute(base.path());
    let ws_a = TrialWorkspace::create(base.path()).unwrap();
    let ws_b = TrialWorkspace::create(base.path()).unwrap();

    let slow = || Slow {
        inner: MemoryCwlRunner::revsort().unwrap(),
        broken_run: Duration::from_millis(150),
        restart: Duration::from_millis(30),
    };
    let a = RestartOrchestrator::new(Arc::new(slow()));
    let b = RestartOrchestrator::new(Arc::new(slow()));

    let (ra, rb) = tokio::join!(
        a.run(revsort_plan(&ws_a, &sub)),
        b.run(revsort_plan(&ws_b, &sub)),
    );

    let ra = ra.unwrap();
    let rb = rb.unwrap();
    assert_eq!(ra.transitions, full_cycle());
    assert_eq!(rb.transitions, full_cycle());
    assert_ne!(ra.job_store, rb.job_store);
}
