//! Conformance transcript classification.
//!
//! A conformance run that exits non-zero is still acceptable when every
//! failing test is a known-unsupported feature. The batch tool reports that
//! with a summary line of the form `<n> failures, <n> unsupported features`;
//! the first such line in the transcript decides the outcome.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Summary line pattern emitted by `cwltest`.
pub const SUMMARY_PATTERN: &str =
    r"(?P<failures>\d+) failures, (?P<unsupported>\d+) unsupported features";

fn summary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SUMMARY_PATTERN).expect("summary pattern is a valid regex"))
}

/// Counts parsed from a summary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryLine {
    pub failures: u64,
    pub unsupported: u64,
}

impl SummaryLine {
    /// Every failure is an unsupported feature.
    pub fn only_unsupported(&self) -> bool {
        self.failures == 0 && self.unsupported > 0
    }
}

/// Result of classifying one conformance invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConformanceOutcome {
    pub failure_count: u64,
    pub unsupported_count: u64,
    pub treated_as_success: bool,

    /// Whether the process exited non-zero.
    pub exited_non_zero: bool,

    /// Whether a summary line was found (only searched on non-zero exit).
    pub summary_found: bool,
}

impl ConformanceOutcome {
    /// Turn a failing outcome into the matching error, carrying the transcript.
    pub fn into_result(self, transcript: &[u8]) -> HarnessResult<Self> {
        if !should_fail(&self) {
            return Ok(self);
        }
        let transcript = String::from_utf8_lossy(transcript).into_owned();
        if self.summary_found {
            Err(HarnessError::ConformanceFailed {
                failures: self.failure_count,
                unsupported: self.unsupported_count,
                transcript,
            })
        } else {
            Err(HarnessError::ClassificationAmbiguous { transcript })
        }
    }
}

/// Find the first summary line in a transcript.
pub fn find_summary(transcript: &str) -> Option<SummaryLine> {
    transcript.split('\n').find_map(|line| {
        let caps = summary_regex().captures(line)?;
        // \d+ only fails to parse on overflow; saturate so it still counts as failing.
        let count = |name: &str| caps[name].parse::<u64>().unwrap_or(u64::MAX);
        Some(SummaryLine {
            failures: count("failures"),
            unsupported: count("unsupported"),
        })
    })
}

/// Classify a finished conformance invocation.
///
/// A zero exit is a success without looking at the transcript. Otherwise
/// the transcript is decoded lossily and the first summary line decides;
/// no summary line means failure.
pub fn classify(transcript: &[u8], exited_non_zero: bool) -> ConformanceOutcome {
    if !exited_non_zero {
        return ConformanceOutcome {
            failure_count: 0,
            unsupported_count: 0,
            treated_as_success: true,
            exited_non_zero,
            summary_found: false,
        };
    }

    let text = String::from_utf8_lossy(transcript);
    match find_summary(&text) {
        Some(summary) => ConformanceOutcome {
            failure_count: summary.failures,
            unsupported_count: summary.unsupported,
            treated_as_success: summary.only_unsupported(),
            exited_non_zero,
            summary_found: true,
        },
        None => ConformanceOutcome {
            failure_count: 0,
            unsupported_count: 0,
            treated_as_success: false,
            exited_non_zero,
            summary_found: false,
        },
    }
}

/// Whether the conformance check must be reported as failed.
pub fn should_fail(outcome: &ConformanceOutcome) -> bool {
    !outcome.treated_as_success
}
