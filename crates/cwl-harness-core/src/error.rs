//! Harness error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::compare::MismatchError;
use crate::restart::{TrialPhase, TrialState};

/// Distinguished failure signals a runner can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// One or more workflow steps could not complete.
    JobsFailed,

    /// A restart was requested against a missing or finalized job store.
    NoSuchJobStore,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::JobsFailed => write!(f, "jobs-failed"),
            SignalKind::NoSuchJobStore => write!(f, "no-such-job-store"),
        }
    }
}

/// Errors produced by the harness.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Mismatch(Box<MismatchError>),

    #[error("one or more workflow jobs failed")]
    JobsFailed { output: String },

    #[error("no such job store: {location}")]
    NoSuchJobStore { location: String },

    #[error("conformance transcript has no '<n> failures, <n> unsupported features' summary line")]
    ClassificationAmbiguous { transcript: String },

    #[error("conformance run failed: {failures} failure(s), {unsupported} unsupported feature(s)")]
    ConformanceFailed {
        failures: u64,
        unsupported: u64,
        transcript: String,
    },

    #[error("invocation timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("runner exited with code {exit_code}: {stderr}")]
    RunnerFailed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("{phase}: runner failed: {source}")]
    RestartFailed {
        phase: TrialPhase,
        source: Box<HarnessError>,
    },

    #[error("{phase}: expected the runner to raise {expected}, but it succeeded")]
    UnexpectedSuccess {
        phase: TrialPhase,
        expected: SignalKind,
    },

    #[error("{phase}: expected the runner to raise {expected}, got: {actual}")]
    UnexpectedSignal {
        phase: TrialPhase,
        expected: SignalKind,
        actual: Box<HarnessError>,
    },

    #[error("invalid trial transition: {from:?} -> {to:?}")]
    InvalidTransition { from: TrialState, to: TrialState },

    #[error("invalid runner payload: {0}")]
    InvalidPayload(String),

    #[error("invalid harness configuration: {0}")]
    InvalidConfig(String),

    #[error("fault injection failed: {0}")]
    FaultInjection(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// The distinguished runner signal this error carries, if any.
    pub fn signal_kind(&self) -> Option<SignalKind> {
        match self {
            HarnessError::JobsFailed { .. } => Some(SignalKind::JobsFailed),
            HarnessError::NoSuchJobStore { .. } => Some(SignalKind::NoSuchJobStore),
            _ => None,
        }
    }

    /// Full transcript attached to a conformance failure, for diagnostic printing.
    pub fn transcript(&self) -> Option<&str> {
        match self {
            HarnessError::ClassificationAmbiguous { transcript }
            | HarnessError::ConformanceFailed { transcript, .. } => Some(transcript),
            _ => None,
        }
    }
}

impl From<MismatchError> for HarnessError {
    fn from(err: MismatchError) -> Self {
        HarnessError::Mismatch(Box::new(err))
    }
}

/// Result type for harness operations.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;
