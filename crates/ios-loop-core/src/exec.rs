//! External process invocation.
//!
//! Every simulator, idb and Maestro call goes through a [`CommandRunner`].
//! The production [`SystemRunner`] spawns one child per call, captures
//! stdout/stderr, and classifies failures into [`CommandError`] variants.
//! There are no retries here; callers own retry policy.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::process::Command;

use crate::error::CommandError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A fully described process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `program arg1 arg2` for logs and error text.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured output of a process that exited with status 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Seam between tool handlers and the operating system.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
    ) -> BoxFuture<'a, Result<CommandOutput, CommandError>>;
}

/// Runs invocations as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
    ) -> BoxFuture<'a, Result<CommandOutput, CommandError>> {
        Box::pin(run_process(invocation))
    }
}

async fn run_process(inv: &Invocation) -> Result<CommandOutput, CommandError> {
    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &inv.cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CommandError::NotFound {
                program: inv.program.clone(),
                args: inv.args.clone(),
            }
        } else {
            CommandError::Spawn {
                program: inv.program.clone(),
                args: inv.args.clone(),
                source: e,
            }
        }
    })?;

    let start = Instant::now();
    tracing::debug!(command = %inv.display(), "spawned");

    // Dropping the wait future on timeout drops the child, and kill_on_drop
    // sends SIGKILL.
    let output = match tokio::time::timeout(inv.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(CommandError::Spawn {
                program: inv.program.clone(),
                args: inv.args.clone(),
                source: e,
            })
        }
        Err(_) => {
            tracing::warn!(
                command = %inv.display(),
                timeout_ms = inv.timeout.as_millis() as u64,
                "command timed out; killed"
            );
            return Err(CommandError::TimedOut {
                program: inv.program.clone(),
                args: inv.args.clone(),
                timeout: inv.timeout,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    tracing::debug!(
        command = %inv.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        code = ?output.status.code(),
        "exited"
    );

    if !output.status.success() {
        return Err(CommandError::NonZeroExit {
            program: inv.program.clone(),
            args: inv.args.clone(),
            code: output.status.code(),
            stdout,
            stderr,
        });
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code: output.status.code().unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_exit_returns_stdout() {
        let inv = Invocation::new("sh").args(["-c", "echo hello"]);
        let out = SystemRunner.run(&inv).await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn stderr_is_captured_on_success() {
        let inv = Invocation::new("sh").args(["-c", "echo warn >&2"]);
        let out = SystemRunner.run(&inv).await.unwrap();
        assert_eq!(out.stderr.trim(), "warn");
    }

    #[tokio::test]
    async fn non_zero_exit_is_command_failure() {
        let inv = Invocation::new("sh").args(["-c", "echo boom >&2; exit 4"]);
        let err = SystemRunner.run(&inv).await.unwrap_err();
        match &err {
            CommandError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(*code, Some(4));
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
        assert!(err.to_string().contains("boom"));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let inv = Invocation::new("definitely-not-a-real-binary-4f1c").arg("--version");
        let err = SystemRunner.run(&inv).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn timeout_kills_process() {
        let inv = Invocation::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));
        let start = Instant::now();
        let err = SystemRunner.run(&inv).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn cwd_is_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let inv = Invocation::new("pwd").cwd(dir.path());
        let out = SystemRunner.run(&inv).await.unwrap();
        let reported = std::path::PathBuf::from(out.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn display_joins_args() {
        let inv = Invocation::new("idb").args(["ui", "tap", "10", "20"]);
        assert_eq!(inv.display(), "idb ui tap 10 20");
        assert_eq!(Invocation::new("maestro").display(), "maestro");
    }
}
