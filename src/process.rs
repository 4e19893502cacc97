//! External process runner: spawn, capture, enforce a hard timeout.
//!
//! Every external tool (speedtest CLI, ping, dump) goes through the
//! [`CommandRunner`] trait so the orchestration code can be exercised with
//! scripted outputs in tests.

use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with code {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("empty command line")]
    EmptyCommand,
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::Timeout { .. })
    }
}

/// Captured output of a process that exited with status 0.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed: Duration,
}

#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` to completion, killing it once `timeout` elapses.
    ///
    /// A non-zero exit is reported as [`ProcessError::NonZeroExit`] with the
    /// captured streams attached. Callers that treat a failing exit as data
    /// (ping reports 100% loss with exit code 1) use [`run_lenient`].
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<ProcessOutput, ProcessError>;
}

/// Runs real processes through `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait::async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<ProcessOutput, ProcessError> {
        let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;
        let start = Instant::now();

        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(ProcessError::Timeout {
                    program: program.clone(),
                    timeout,
                })
            }
        };

        let elapsed = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        // Killed by a signal: no code available.
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(%program, exit_code, elapsed_ms = elapsed.as_millis() as u64, "process finished");

        if !output.status.success() {
            return Err(ProcessError::NonZeroExit {
                program: program.clone(),
                code: exit_code,
                stdout,
                stderr,
            });
        }

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code,
            elapsed,
        })
    }
}

/// Like [`CommandRunner::run`] but a non-zero exit still yields the captured
/// output. Spawn failures and timeouts remain errors.
pub async fn run_lenient(
    runner: &dyn CommandRunner,
    argv: &[String],
    timeout: Duration,
) -> Result<ProcessOutput, ProcessError> {
    match runner.run(argv, timeout).await {
        Ok(out) => Ok(out),
        Err(ProcessError::NonZeroExit {
            code, stdout, stderr, ..
        }) => Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code: code,
            elapsed: Duration::ZERO,
        }),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let out = SystemRunner
            .run(&argv(&["sh", "-c", "echo hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_distinct_error() {
        let err = SystemRunner
            .run(&argv(&["sh", "-c", "echo oops >&2; exit 3"]), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ProcessError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_error() {
        let err = SystemRunner
            .run(&argv(&["sleep", "5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let err = SystemRunner
            .run(&argv(&["definitely-not-a-real-binary-xyz"]), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_lenient_keeps_output_of_failing_exit() {
        let out = run_lenient(
            &SystemRunner,
            &argv(&["sh", "-c", "echo partial; exit 1"]),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, 1);
        assert_eq!(out.stdout.trim(), "partial");
    }

    #[tokio::test]
    async fn test_empty_command() {
        let err = SystemRunner.run(&[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProcessError::EmptyCommand));
    }
}
