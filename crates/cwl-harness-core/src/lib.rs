//! CWL Harness Core Library
//!
//! Correctness checks for CWL workflow runners: output equivalence against
//! known results, restart/recovery trials against a persistent job store,
//! and classification of conformance-suite transcripts.

pub mod classify;
pub mod compare;
pub mod config;
pub mod error;
pub mod expected;
pub mod fakes;
pub mod fault;
pub mod invoker;
pub mod obs;
pub mod output_case;
pub mod process;
pub mod record;
pub mod restart;
pub mod telemetry;
pub mod workspace;

pub use classify::{classify, find_summary, should_fail, ConformanceOutcome, SummaryLine};
pub use compare::{compare, diff_values, FieldDelta, MismatchError};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult, SignalKind};
pub use expected::{download_output, revsort_output, seqtk_output, Fixture};
pub use fault::{
    hold_path, last_on_path, resolve_tool, FaultGuard, FaultInjector, PathHold, ToolSubstitution,
};
pub use invoker::{Invocation, RunInvoker, RunnerArgs};
pub use output_case::OutputCase;
pub use process::{ProcessInvoker, SignalMarkers};
pub use record::{
    decode_result_set, normalize, strip_volatile, Checksum, ResultRecord, DEFAULT_OUTPUT_KEY,
    VOLATILE_FIELDS,
};
pub use restart::{
    DependencyState, RestartOrchestrator, RestartPlan, RestartReport, RestartScenario, TrialPhase,
    TrialState,
};
pub use telemetry::init_tracing;
pub use workspace::TrialWorkspace;

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
