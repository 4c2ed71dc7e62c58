//! Conformance pipeline orchestration and reporting.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::gate::{ConformanceGate, ConformanceVerdict};
use crate::runner::{ConformanceBackend, Transcript};
use crate::spec::SuiteSpec;
use crate::suite::SuiteConfig;
use cwl_harness_core::ConformanceOutcome;

/// Result of one suite within a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    /// Suite name.
    pub suite_name: String,

    /// Digest of the suite's command line.
    pub spec_digest: String,

    /// Exit code (-1 when the driver could not run to completion).
    pub exit_code: i32,

    pub verdict: ConformanceVerdict,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Full combined output, kept for diagnostics.
    pub transcript: String,
}

impl SuiteResult {
    pub fn passed(&self) -> bool {
        self.verdict.passed
    }
}

/// Result of a complete conformance pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConformanceReport {
    /// Identifier of this pipeline run.
    pub run_id: String,

    pub started_at: DateTime<Utc>,

    /// Whether every enabled suite passed.
    pub success: bool,

    /// Results of individual suites.
    pub suites: Vec<SuiteResult>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl ConformanceReport {
    /// Number of suites that passed.
    pub fn passed_count(&self) -> usize {
        self.suites.iter().filter(|s| s.passed()).count()
    }

    /// Number of suites that failed.
    pub fn failed_count(&self) -> usize {
        self.suites.iter().filter(|s| !s.passed()).count()
    }

    /// Suites that failed, in run order.
    pub fn failures(&self) -> impl Iterator<Item = &SuiteResult> {
        self.suites.iter().filter(|s| !s.passed())
    }
}

/// Conformance pipeline orchestrator.
pub struct ConformancePipeline;

impl ConformancePipeline {
    /// Run every enabled suite in order and classify each transcript.
    ///
    /// A suite whose driver cannot be launched or times out is recorded as a
    /// failure with the error as its transcript; the remaining suites still run.
    pub async fn run(
        backend: Arc<dyn ConformanceBackend>,
        suites: Vec<SuiteConfig>,
    ) -> anyhow::Result<ConformanceReport> {
        let start = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();

        info!(run_id = %run_id, suites = suites.len(), "Starting conformance pipeline");

        let mut results = Vec::new();
        let mut all_passed = true;

        for config in suites {
            if !config.enabled {
                info!(suite = %config.name, "Skipping disabled suite");
                continue;
            }

            let spec = SuiteSpec::new(&config);
            info!(suite = %config.name, digest = %spec.short_digest(), "Executing suite");
            let suite_start = Instant::now();

            let result = match backend.execute(&config).await {
                Ok(transcript) => Self::judge(&spec, transcript),
                Err(e) => {
                    // Launch failure or timeout: nothing to classify.
                    warn!(suite = %config.name, error = %e, "Suite execution error");
                    let message = format!("Suite '{}' execution error: {e}", config.name);
                    SuiteResult {
                        suite_name: config.name.clone(),
                        spec_digest: spec.command_digest.clone(),
                        exit_code: -1,
                        verdict: ConformanceVerdict {
                            passed: false,
                            outcome: ConformanceOutcome {
                                failure_count: 0,
                                unsupported_count: 0,
                                treated_as_success: false,
                                exited_non_zero: true,
                                summary_found: false,
                            },
                            message: message.clone(),
                        },
                        duration_ms: suite_start.elapsed().as_millis() as u64,
                        transcript: message,
                    }
                }
            };

            if !result.passed() {
                all_passed = false;
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        if all_passed {
            info!(run_id = %run_id, "Conformance pipeline completed successfully");
        } else {
            info!(run_id = %run_id, "Conformance pipeline failed");
        }

        Ok(ConformanceReport {
            run_id,
            started_at,
            success: all_passed,
            suites: results,
            duration_ms,
        })
    }

    fn judge(spec: &SuiteSpec, transcript: Transcript) -> SuiteResult {
        let verdict = ConformanceGate::evaluate(&transcript);
        SuiteResult {
            suite_name: transcript.suite_name.clone(),
            spec_digest: spec.command_digest.clone(),
            exit_code: transcript.exit_code,
            verdict,
            duration_ms: transcript.duration_ms,
            transcript: transcript.text(),
        }
    }
}
