//! One output-equivalence check: run a workflow, compare its result.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::compare::compare;
use crate::error::HarnessResult;
use crate::expected::Fixture;
use crate::invoker::{RunInvoker, RunnerArgs};
use crate::obs;
use crate::record::DEFAULT_OUTPUT_KEY;

/// Backend flag enabling conda-resolved software requirements.
pub const CONDA_FLAG: &str = "--beta-conda-dependencies";

/// Backend flag enabling biocontainer-resolved software requirements.
pub const BIOCONTAINERS_FLAG: &str = "--beta-use-biocontainers";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputCase {
    pub name: String,
    pub workflow: PathBuf,
    pub job: PathBuf,
    pub output_key: String,
    pub extra_args: Vec<String>,
    pub debug_worker: bool,
}

impl OutputCase {
    pub fn new(name: impl Into<String>, workflow: impl Into<PathBuf>, job: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            workflow: workflow.into(),
            job: job.into(),
            output_key: DEFAULT_OUTPUT_KEY.to_string(),
            extra_args: Vec::new(),
            debug_worker: false,
        }
    }

    /// A case named and keyed after a reference fixture.
    pub fn for_fixture(fixture: Fixture, workflow: impl Into<PathBuf>, job: impl Into<PathBuf>) -> Self {
        Self::new(fixture.name(), workflow, job).with_output_key(fixture.output_key())
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn with_debug_worker(mut self, debug_worker: bool) -> Self {
        self.debug_worker = debug_worker;
        self
    }

    pub fn args(&self, out_dir: &Path) -> RunnerArgs {
        RunnerArgs::new(out_dir, &self.workflow, &self.job)
            .with_debug_worker(self.debug_worker)
            .with_flags(self.extra_args.iter().cloned())
    }

    /// Run the workflow into `out_dir` and compare its result with `expected`.
    ///
    /// Returns the decoded (un-normalized) result on a match.
    pub async fn run(
        &self,
        invoker: &dyn RunInvoker,
        out_dir: &Path,
        expected: &Value,
    ) -> HarnessResult<Value> {
        let args = self.args(out_dir);
        debug!(case = %self.name, argv = ?args.to_argv(), "Running output case");

        let invocation = invoker.invoke(&args).await?;
        let actual = invocation.decode_payload()?;

        match compare(&actual, expected, &self.output_key) {
            Ok(()) => {
                obs::emit_compare_finished(&self.name, &self.output_key, 0);
                Ok(actual)
            }
            Err(mismatch) => {
                obs::emit_compare_finished(&self.name, &self.output_key, mismatch.differences.len());
                warn!(case = %self.name, "{mismatch}");
                Err(mismatch.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::expected::revsort_output;
    use crate::invoker::Invocation;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct Canned {
        stdout: String,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl Canned {
        fn new(stdout: Value) -> Self {
            Self {
                stdout: stdout.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RunInvoker for Canned {
        async fn invoke(&self, args: &RunnerArgs) -> HarnessResult<Invocation> {
            self.seen.lock().unwrap().push(args.to_argv());
            Ok(Invocation {
                exit_code: 0,
                stdout: self.stdout.clone(),
                stderr: String::new(),
                duration_ms: 0,
            })
        }
    }

    fn revsort_actual(out: &str, checksum: &str) -> Value {
        json!({
            "output": {
                "location": format!("file://{out}/output.txt"),
                "basename": "output.txt",
                "size": 1111,
                "class": "File",
                "checksum": checksum,
                "nameroot": "output",
                "nameext": ".txt",
                "http://commonwl.org/cwltool#generation": 0
            }
        })
    }

    #[tokio::test]
    async fn test_volatile_fields_ignored() {
        let out = PathBuf::from("/tmp/o");
        let invoker = Canned::new(revsort_actual(
            "/tmp/o",
            "sha1$b9214658cc453331b62c2282b772a5c063dbd284",
        ));
        let case = OutputCase::for_fixture(Fixture::Revsort, "revsort.cwl", "revsort-job.json");
        let expected = revsort_output(&out).unwrap();
        case.run(&invoker, &out, &expected).await.unwrap();
    }

    #[tokio::test]
    async fn test_checksum_difference_is_mismatch() {
        let out = PathBuf::from("/tmp/o");
        let invoker = Canned::new(revsort_actual("/tmp/o", "sha1$0000"));
        let case = OutputCase::for_fixture(Fixture::Revsort, "revsort.cwl", "revsort-job.json");
        let expected = revsort_output(&out).unwrap();

        match case.run(&invoker, &out, &expected).await.unwrap_err() {
            HarnessError::Mismatch(m) => {
                assert_eq!(m.differences.len(), 1);
                assert_eq!(m.differences[0].pointer, "/output/checksum");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_args_carry_debug_worker_and_backend_flags() {
        let out = PathBuf::from("/tmp/o");
        let invoker = Canned::new(json!({}));
        let case = OutputCase::new("seqtk", "seqtk_seq.cwl", "seqtk_seq_job.json")
            .with_output_key("output1")
            .with_arg(CONDA_FLAG)
            .with_debug_worker(true);

        let _ = case.run(&invoker, &out, &json!({})).await;
        let seen = invoker.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            vec![
                "--debugWorker",
                CONDA_FLAG,
                "--outdir",
                "/tmp/o",
                "seqtk_seq.cwl",
                "seqtk_seq_job.json"
            ]
        );
    }

    #[tokio::test]
    async fn test_non_json_stdout_is_invalid_payload() {
        struct Chatty;

        #[async_trait]
        impl RunInvoker for Chatty {
            async fn invoke(&self, _args: &RunnerArgs) -> HarnessResult<Invocation> {
                Ok(Invocation {
                    exit_code: 0,
                    stdout: "INFO: workflow finished".to_string(),
                    stderr: String::new(),
                    duration_ms: 0,
                })
            }
        }

        let out = PathBuf::from("/tmp/o");
        let case = OutputCase::new("revsort", "revsort.cwl", "revsort-job.json");
        let err = case.run(&Chatty, &out, &json!({})).await.unwrap_err();
        assert!(matches!(err, HarnessError::InvalidPayload(_)));
    }
}
