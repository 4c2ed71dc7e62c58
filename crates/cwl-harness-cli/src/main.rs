//! CWL Harness - correctness checks for CWL workflow runners
//!
//! The `cwl-harness` command judges a runner from the outside.
//!
//! ## Commands
//!
//! - `compare`: Compare a recorded result payload with an expected one
//! - `check-output`: Run a reference workflow and compare its result
//! - `restart`: Drive a restart/recovery trial against a fresh job store
//! - `conformance`: Run CWL conformance suites and classify their transcripts
//! - `classify`: Classify an existing conformance transcript

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, Level};

use cwl_harness_conformance::{
    BatchSystem, BuiltinSuite, ConformancePipeline, CwltestBackend, SuiteConfig,
};
use cwl_harness_core::invoker::NO_CONTAINER_FLAG;
use cwl_harness_core::{
    classify, compare, last_on_path, should_fail, Fixture, HarnessConfig, HarnessError,
    OutputCase, RestartOrchestrator, RestartPlan, ToolSubstitution, TrialWorkspace,
    DEFAULT_OUTPUT_KEY,
};

#[derive(Parser)]
#[command(name = "cwl-harness")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Correctness harness for CWL workflow runners", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Runner executable (overrides CWL_HARNESS_RUNNER)
    #[arg(long, global = true)]
    runner: Option<String>,

    /// Per-invocation timeout in seconds (overrides CWL_HARNESS_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Parent directory for trial workspaces (overrides CWL_HARNESS_WORK_ROOT)
    #[arg(long, global = true)]
    work_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a recorded result payload with an expected one
    Compare {
        /// Runner stdout payload (JSON)
        actual: PathBuf,

        /// Expected result mapping (JSON)
        expected: PathBuf,

        /// Output whose volatile fields are ignored
        #[arg(short, long, default_value = DEFAULT_OUTPUT_KEY)]
        output_key: String,
    },

    /// Run a reference workflow and compare its result with the known output
    CheckOutput {
        /// Reference fixture: revsort, download or seqtk
        #[arg(short, long)]
        fixture: Fixture,

        /// Workflow document
        #[arg(short, long)]
        workflow: PathBuf,

        /// Job (input) document
        #[arg(short, long)]
        job: PathBuf,

        /// Run workers in the leader process
        #[arg(long)]
        debug_worker: bool,

        /// Extra flag passed to the runner (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Break a tool, fail, repair, restart, then confirm the finished job store is gone
    Restart {
        /// Workflow document
        #[arg(short, long)]
        workflow: PathBuf,

        /// Job (input) document
        #[arg(short, long)]
        job: PathBuf,

        /// Tool to break during the first run
        #[arg(long, default_value = "rev")]
        tool: String,

        /// Binary the tool resolves to while broken (default: last `date` on PATH)
        #[arg(long)]
        substitute: Option<PathBuf>,

        /// Extra flag passed to the runner (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Let the runner use containers (otherwise `--no-container` is passed)
        #[arg(long)]
        containers: bool,

        /// Keep the trial workspace on disk
        #[arg(long)]
        keep: bool,
    },

    /// Run CWL conformance suites
    Conformance {
        /// Suite version: v1.0, v1.1 or v1.2 (repeatable)
        #[arg(short, long = "suite", required = true)]
        suites: Vec<String>,

        /// Checkout of the suite repository
        #[arg(short, long)]
        checkout: PathBuf,

        /// Batch system: lsf, slurm, torque, gridengine, mesos, parasol
        #[arg(short, long)]
        batch_system: Option<String>,

        /// Enable the runner's job cache
        #[arg(long)]
        caching: bool,

        /// Override the `-n` test selection
        #[arg(long)]
        tests: Option<String>,

        /// Conformance driver executable (overrides CWL_HARNESS_CWLTEST)
        #[arg(long)]
        cwltest: Option<String>,

        /// Write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Classify a conformance transcript (stdin when no file is given)
    Classify {
        /// Transcript file
        transcript: Option<PathBuf>,

        /// Exit code of the run that produced the transcript
        #[arg(long, default_value = "1")]
        exit_code: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    cwl_harness_core::init_tracing(cli.json, level);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Compare {
            actual,
            expected,
            output_key,
        } => cmd_compare(&actual, &expected, &output_key),
        Commands::CheckOutput {
            fixture,
            workflow,
            job,
            debug_worker,
            args,
        } => cmd_check_output(&config, fixture, &workflow, &job, debug_worker, &args).await,
        Commands::Restart {
            workflow,
            job,
            tool,
            substitute,
            args,
            containers,
            keep,
        } => {
            cmd_restart(
                &config,
                &workflow,
                &job,
                &tool,
                substitute.as_deref(),
                &args,
                containers,
                keep,
            )
            .await
        }
        Commands::Conformance {
            suites,
            checkout,
            batch_system,
            caching,
            tests,
            cwltest,
            report,
        } => {
            let mut config = config;
            if let Some(cwltest) = cwltest {
                config.cwltest = cwltest;
            }
            let suites = build_suites(
                &config,
                &suites,
                &checkout,
                batch_system.as_deref(),
                caching,
                tests.as_deref(),
            )?;
            cmd_conformance(suites, report.as_deref()).await
        }
        Commands::Classify {
            transcript,
            exit_code,
        } => cmd_classify(transcript.as_deref(), exit_code),
    }
}

/// Environment first, then command-line overrides.
fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::from_env().context("Invalid harness environment")?;
    if let Some(runner) = &cli.runner {
        config.runner = runner.clone();
    }
    if let Some(timeout) = cli.timeout_secs {
        config.timeout_secs = timeout;
    }
    if let Some(root) = &cli.work_root {
        config.work_root = root.clone();
    }
    config.validate()?;
    Ok(config)
}

fn read_json_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

/// Compare two result payloads on disk
fn cmd_compare(actual: &Path, expected: &Path, output_key: &str) -> Result<()> {
    let actual = read_json_file(actual)?;
    let expected = read_json_file(expected)?;

    match compare(&actual, &expected, output_key) {
        Ok(()) => {
            println!("✓ Results match (output '{}')", output_key);
            Ok(())
        }
        Err(mismatch) => {
            println!("✗ {}", mismatch.report());
            Err(HarnessError::from(mismatch).into())
        }
    }
}

async fn cmd_check_output(
    config: &HarnessConfig,
    fixture: Fixture,
    workflow: &Path,
    job: &Path,
    debug_worker: bool,
    args: &[String],
) -> Result<()> {
    let invoker = config.process_invoker();
    let ws = TrialWorkspace::create(&config.work_root)?;

    let case = args
        .iter()
        .fold(OutputCase::for_fixture(fixture, workflow, job), |case, arg| {
            case.with_arg(arg.clone())
        })
        .with_debug_worker(debug_worker);
    let expected = fixture.expected(ws.out_dir())?;

    println!("Running {} with {}", fixture, config.runner);
    println!("Output directory: {:?}", ws.out_dir());

    match case.run(&invoker, ws.out_dir(), &expected).await {
        Ok(_) => {
            println!("✓ Output matches {}", fixture);
            Ok(())
        }
        Err(HarnessError::Mismatch(mismatch)) => {
            println!("✗ {}", mismatch.report());
            anyhow::bail!("Output check failed for {}", fixture)
        }
        Err(e) => Err(e).with_context(|| format!("Runner failed on {}", fixture)),
    }
}

async fn cmd_restart(
    config: &HarnessConfig,
    workflow: &Path,
    job: &Path,
    tool: &str,
    substitute: Option<&Path>,
    args: &[String],
    containers: bool,
    keep: bool,
) -> Result<()> {
    let substitute = match substitute {
        Some(path) => path.to_path_buf(),
        None => last_on_path("date").context("No `date` on PATH to stand in for the broken tool")?,
    };

    let ws = TrialWorkspace::create(&config.work_root)?;
    let plan = restart_plan(
        RestartPlan::new(&ws, workflow, job),
        ToolSubstitution::new(tool, &substitute),
        args,
        containers,
    );

    println!("Restart trial for {:?}", workflow);
    println!("Job store: {:?}", ws.job_store());
    println!("Breaking '{}' with {:?}", tool, substitute);
    println!();

    let orchestrator = RestartOrchestrator::new(Arc::new(config.process_invoker()));
    let result = orchestrator.run(plan).await;

    if keep {
        let kept = ws.persist();
        info!(path = %kept.display(), "Kept trial workspace");
    }

    let report = result.context("Restart trial failed")?;
    for state in &report.transitions {
        println!("  ✓ {}", state);
    }
    println!();
    println!("✓ Restart trial passed ({}ms)", report.duration_ms);
    Ok(())
}

/// Runner flags for a restart trial: `--no-container` unless containers are
/// allowed, then the pass-through flags in order.
fn restart_plan(
    plan: RestartPlan,
    substitution: ToolSubstitution,
    args: &[String],
    containers: bool,
) -> RestartPlan {
    let mut plan = plan.with_substitution(substitution);
    if !containers {
        plan = plan.with_flag(NO_CONTAINER_FLAG);
    }
    args.iter().fold(plan, |plan, arg| plan.with_flag(arg.clone()))
}

fn build_suites(
    config: &HarnessConfig,
    names: &[String],
    checkout: &Path,
    batch_system: Option<&str>,
    caching: bool,
    tests: Option<&str>,
) -> Result<Vec<SuiteConfig>> {
    let batch_system: BatchSystem = match batch_system {
        Some(name) => name.parse()?,
        None => BatchSystem::default(),
    };

    names
        .iter()
        .map(|name| -> Result<SuiteConfig> {
            let suite: BuiltinSuite = name.parse()?;
            println!("  {} pinned at {}@{}", suite, suite.source_repo(), suite.commit());
            let mut config = SuiteConfig::from_builtin(suite, checkout, config)
                .with_batch_system(batch_system)
                .with_caching(caching);
            if let Some(selection) = tests {
                config = config.with_selected_tests(selection);
            }
            Ok(config)
        })
        .collect()
}

async fn cmd_conformance(suites: Vec<SuiteConfig>, report_path: Option<&Path>) -> Result<()> {
    let names: Vec<&str> = suites.iter().map(|s| s.name.as_str()).collect();
    println!("Running conformance suites: {}", names.join(", "));
    println!();

    let report = ConformancePipeline::run(Arc::new(CwltestBackend), suites)
        .await
        .context("Conformance pipeline failed to run")?;

    println!("Run ID: {}", report.run_id);
    println!("Status: {}", if report.success { "✓ PASSED" } else { "✗ FAILED" });
    println!("Duration: {}ms", report.duration_ms);
    println!();

    for suite in &report.suites {
        let status = if suite.passed() { "✓" } else { "✗" };
        println!(
            "  {} {} ({}ms, exit code: {}) {}",
            status, suite.suite_name, suite.duration_ms, suite.exit_code, suite.verdict.message
        );
    }

    if let Some(path) = report_path {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write report: {:?}", path))?;
    }

    if report.success {
        println!("\n✓ All suites passed!");
        return Ok(());
    }

    for failed in report.failures() {
        println!("\n--- {} transcript ---", failed.suite_name);
        println!("{}", failed.transcript);
    }
    anyhow::bail!("{} conformance suite(s) failed", report.failed_count())
}

fn cmd_classify(transcript: Option<&Path>, exit_code: i32) -> Result<()> {
    let bytes = match transcript {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("Failed to read transcript: {:?}", path))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read transcript from stdin")?;
            buf
        }
    };

    let outcome = classify(&bytes, exit_code != 0);
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if should_fail(&outcome) {
        println!("{}", String::from_utf8_lossy(&bytes));
    }
    outcome.into_result(&bytes)?;
    Ok(())
}
