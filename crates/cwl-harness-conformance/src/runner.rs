//! Conformance suite execution.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cwl_harness_core::HarnessError;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::suite::SuiteConfig;

/// Combined output of one conformance run.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Suite name.
    pub suite_name: String,

    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    /// Stdout and stderr lines interleaved in arrival order.
    pub output: Vec<u8>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl Transcript {
    pub fn exited_non_zero(&self) -> bool {
        self.exit_code != 0
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Executes a conformance suite and captures its transcript.
#[async_trait]
pub trait ConformanceBackend: Send + Sync {
    async fn execute(&self, config: &SuiteConfig) -> anyhow::Result<Transcript>;
}

/// Runs the `cwltest` batch driver as a child process.
pub struct CwltestBackend;

#[async_trait]
impl ConformanceBackend for CwltestBackend {
    async fn execute(&self, config: &SuiteConfig) -> anyhow::Result<Transcript> {
        let start = Instant::now();
        let command = config.command();

        let Some((exe, args)) = command.split_first() else {
            anyhow::bail!("Suite {} has empty command", config.name);
        };
        debug!(suite = %config.name, ?command, "Launching conformance driver");

        let mut cmd = Command::new(exe);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if config.basedir.is_dir() {
            cmd.current_dir(&config.basedir);
        }
        let mut child = cmd.spawn()?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            anyhow::bail!("Suite {} driver has no output pipes", config.name);
        };
        let run = async {
            let output = merge_lines(stdout, stderr).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, output))
        };

        let (status, output) = if config.timeout_secs > 0 {
            let limit = Duration::from_secs(config.timeout_secs);
            match tokio::time::timeout(limit, run).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(HarnessError::Timeout {
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        limit_ms: limit.as_millis() as u64,
                    }
                    .into())
                }
            }
        } else {
            run.await?
        };

        Ok(Transcript {
            suite_name: config.name.clone(),
            exit_code: status.code().unwrap_or(-1),
            output,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Read both streams to EOF, appending each line as it completes.
///
/// Every line ends with `\n` in the result, so an unterminated last line on
/// one stream never runs into the next line from the other.
async fn merge_lines<O, E>(stdout: O, stderr: E) -> std::io::Result<Vec<u8>>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out = BufReader::new(stdout);
    let mut err = BufReader::new(stderr);
    let (mut out_line, mut err_line) = (Vec::new(), Vec::new());
    let (mut out_open, mut err_open) = (true, true);
    let mut merged = Vec::new();

    // `read_until` keeps partial reads in the line buffer, so losing a race
    // in `select!` drops nothing.
    while out_open || err_open {
        tokio::select! {
            n = out.read_until(b'\n', &mut out_line), if out_open => {
                out_open = n? > 0;
                push_line(&mut merged, &mut out_line);
            }
            n = err.read_until(b'\n', &mut err_line), if err_open => {
                err_open = n? > 0;
                push_line(&mut merged, &mut err_line);
            }
        }
    }
    Ok(merged)
}

fn push_line(merged: &mut Vec<u8>, line: &mut Vec<u8>) {
    if line.is_empty() {
        return;
    }
    merged.append(line);
    if merged.last() != Some(&b'\n') {
        merged.push(b'\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwl_harness_core::{classify, should_fail, HarnessConfig};
    use std::path::{Path, PathBuf};

    fn suite_with_driver(driver: &str, timeout_secs: u64) -> SuiteConfig {
        let mut config = HarnessConfig::default();
        config.cwltest = driver.to_string();
        config.timeout_secs = timeout_secs;
        SuiteConfig::custom("custom", "tests.yaml", "/nonexistent", &config)
    }

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("driver.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[test]
    fn test_transcript_exit() {
        let t = Transcript {
            suite_name: "cwl_v1.0".to_string(),
            exit_code: 1,
            output: b"0 failures, 3 unsupported features".to_vec(),
            duration_ms: 10,
        };
        assert!(t.exited_non_zero());
        assert!(t.text().contains("unsupported"));
    }

    #[tokio::test]
    async fn test_execute_captures_output() {
        let suite = suite_with_driver("echo", 60);
        let t = CwltestBackend.execute(&suite).await.expect("execute failed");
        assert_eq!(t.exit_code, 0);
        assert!(t.text().contains("--test=tests.yaml"));
        assert!(t.text().contains("--timeout=60"));
    }

    #[tokio::test]
    async fn test_execute_non_zero_exit() {
        let suite = suite_with_driver("false", 60);
        let t = CwltestBackend.execute(&suite).await.expect("execute failed");
        assert!(t.exited_non_zero());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_is_part_of_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let driver = script(
            dir.path(),
            "echo 'Test [1/3] passed'\necho '0 failures, 2 unsupported features' >&2\nexit 1",
        );
        let suite = suite_with_driver(&driver.to_string_lossy(), 60);
        let t = CwltestBackend.execute(&suite).await.expect("execute failed");
        assert_eq!(t.exit_code, 1);
        let text = t.text();
        assert!(text.contains("passed"));
        assert!(text.contains("0 failures, 2 unsupported features"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unterminated_stdout_does_not_join_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let driver = script(
            dir.path(),
            "printf 'Ran 5'\nsleep 0.2\nprintf '0 failures, 2 unsupported features\\n' >&2\nexit 1",
        );
        let suite = suite_with_driver(&driver.to_string_lossy(), 60);
        let t = CwltestBackend.execute(&suite).await.expect("execute failed");

        assert_eq!(t.text(), "Ran 5\n0 failures, 2 unsupported features\n");
        let outcome = classify(&t.output, t.exited_non_zero());
        assert_eq!((outcome.failure_count, outcome.unsupported_count), (0, 2));
        assert!(!should_fail(&outcome));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_summary_follows_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let driver = script(
            dir.path(),
            "echo '0 failures, 1 unsupported features' >&2\nsleep 0.2\necho '3 failures, 0 unsupported features'\nexit 1",
        );
        let suite = suite_with_driver(&driver.to_string_lossy(), 60);
        let t = CwltestBackend.execute(&suite).await.expect("execute failed");

        let outcome = classify(&t.output, true);
        assert_eq!(outcome.failure_count, 0);
        assert!(outcome.treated_as_success);
    }

    #[tokio::test]
    async fn test_merge_lines_terminates_every_line() {
        let merged = merge_lines(&b"a\nb"[..], &b""[..]).await.unwrap();
        assert_eq!(merged, b"a\nb\n");

        let merged = merge_lines(&b""[..], &b"\xff\xfe"[..]).await.unwrap();
        assert_eq!(merged, b"\xff\xfe\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let driver = script(dir.path(), "sleep 10");
        let suite = suite_with_driver(&driver.to_string_lossy(), 1);
        let err = CwltestBackend.execute(&suite).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Timeout { limit_ms: 1000, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_driver_is_error() {
        let suite = suite_with_driver("cwl-harness-no-such-driver", 60);
        assert!(CwltestBackend.execute(&suite).await.is_err());
    }
}
