//! Structured observability hooks for harness trials.
//!
//! This module provides:
//! - Trial-scoped tracing spans via [`trial_span`]
//! - Emission functions for lifecycle events: trial phases, runner
//!   invocations, comparisons and conformance classification
//!
//! Events are emitted at `info!` level (filter with `CWL_HARNESS_LOG`).

use tracing::{info, warn};

use crate::classify::ConformanceOutcome;

/// Trial-scoped span; attach it to the trial future with
/// `tracing::Instrument::instrument`.
///
/// # Example
///
/// ```ignore
/// trial_future.instrument(obs::trial_span("/tmp/cwl-harness-1234/jobStore")).await
/// // every log line now carries job_store = "/tmp/cwl-harness-1234/jobStore"
/// ```
pub fn trial_span(job_store: &str) -> tracing::Span {
    tracing::info_span!("cwl_harness.trial", job_store = %job_store)
}

pub fn emit_trial_started(job_store: &str) {
    info!(event = "trial.started", job_store = %job_store);
}

/// Emit event: the trial state machine moved to a new state.
pub fn emit_trial_transition(from: &str, to: &str) {
    info!(event = "trial.transition", from = %from, to = %to);
}

pub fn emit_trial_finished(job_store: &str, duration_ms: u64, success: bool) {
    info!(
        event = "trial.finished",
        job_store = %job_store,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: a runner invocation finished (exit code -1 on timeout or signal).
pub fn emit_invocation_finished(program: &str, exit_code: i32, duration_ms: u64) {
    info!(
        event = "invocation.finished",
        program = %program,
        exit_code = exit_code,
        duration_ms = duration_ms,
    );
}

pub fn emit_compare_finished(case: &str, output_key: &str, differences: usize) {
    info!(
        event = "compare.finished",
        case = %case,
        output_key = %output_key,
        differences = differences,
        matched = differences == 0,
    );
}

/// Emit event: a conformance transcript was classified.
pub fn emit_conformance_classified(suite: &str, outcome: &ConformanceOutcome) {
    info!(
        event = "conformance.classified",
        suite = %suite,
        failures = outcome.failure_count,
        unsupported = outcome.unsupported_count,
        summary_found = outcome.summary_found,
        passed = outcome.treated_as_success,
    );
}

/// Emit event: restoring the executable resolution failed (warning level).
pub fn emit_fault_restore_error(error: &dyn std::fmt::Display) {
    warn!(event = "fault.restore_error", error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_span_create() {
        let _entered = trial_span("/tmp/js").entered();
    }
}
