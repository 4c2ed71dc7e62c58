//! CWL Harness Conformance - conformance suites against a CWL runner
//!
//! Provides a conformance pipeline that:
//! - Assembles `cwltest` command lines for the published CWL suites
//! - Runs each suite through a pluggable backend
//! - Classifies every transcript, tolerating unsupported-feature-only failures

pub mod gate;
pub mod pipeline;
pub mod runner;
pub mod spec;
pub mod suite;

// Re-export key types
pub use gate::{ConformanceGate, ConformanceVerdict};
pub use pipeline::{ConformancePipeline, ConformanceReport, SuiteResult};
pub use runner::{ConformanceBackend, CwltestBackend, Transcript};
pub use spec::SuiteSpec;
pub use suite::{BatchSystem, BuiltinSuite, SuiteConfig, SuiteError};
