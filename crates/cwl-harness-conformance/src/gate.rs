//! Conformance gate evaluation for pass/fail criteria.

use cwl_harness_core::{classify, obs, should_fail, ConformanceOutcome, HarnessResult};
use serde::{Deserialize, Serialize};

use crate::runner::Transcript;

/// Gate evaluation verdict for one suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConformanceVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Classifier output the decision was based on.
    pub outcome: ConformanceOutcome,

    /// Summary message.
    pub message: String,
}

/// Conformance gate rules.
pub struct ConformanceGate;

impl ConformanceGate {
    /// Evaluate one finished conformance run.
    ///
    /// Gate rule:
    /// - A zero exit passes without looking at the transcript
    /// - A non-zero exit passes only if the first summary line reports zero
    ///   failures and at least one unsupported feature
    /// - A non-zero exit without a summary line fails
    pub fn evaluate(transcript: &Transcript) -> ConformanceVerdict {
        let outcome = classify(&transcript.output, transcript.exited_non_zero());
        obs::emit_conformance_classified(&transcript.suite_name, &outcome);

        let passed = !should_fail(&outcome);
        let message = if !outcome.exited_non_zero {
            "All selected tests passed".to_string()
        } else if passed {
            format!(
                "Only unsupported features failed ({} unsupported)",
                outcome.unsupported_count
            )
        } else if outcome.summary_found {
            format!(
                "{} failure(s), {} unsupported feature(s)",
                outcome.failure_count, outcome.unsupported_count
            )
        } else {
            format!(
                "Exited with code {} and no summary line",
                transcript.exit_code
            )
        };

        ConformanceVerdict {
            passed,
            outcome,
            message,
        }
    }

    /// Evaluate and turn a failing verdict into the matching error, which
    /// carries the full transcript.
    pub fn check(transcript: &Transcript) -> HarnessResult<ConformanceOutcome> {
        Self::evaluate(transcript)
            .outcome
            .into_result(&transcript.output)
    }
}
