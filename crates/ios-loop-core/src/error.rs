use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Longest stderr excerpt carried into a failure message.
const STDERR_LIMIT: usize = 2000;

#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("invalid config at {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("no booted simulator found (wanted '{device}'); boot one with `xcrun simctl boot <udid>`")]
    NoBootedSimulator { device: String },

    #[error("unparseable output from {tool}: {detail}")]
    UnparseableOutput { tool: String, detail: String },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LoopError>;

/// Failure of a single external process invocation.
///
/// Every variant carries the program and its arguments so the failing
/// invocation can be reproduced from the message alone.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command not found: `{program}` is not installed or not on PATH (args: {})", join_args(.args))]
    NotFound { program: String, args: Vec<String> },

    #[error(
        "`{program} {}` exited with {}{}",
        join_args(.args),
        describe_code(.code),
        stderr_suffix(.stderr)
    )]
    NonZeroExit {
        program: String,
        args: Vec<String>,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("`{program} {}` timed out after {}ms and was killed", join_args(.args), millis(.timeout))]
    TimedOut {
        program: String,
        args: Vec<String>,
        timeout: Duration,
    },

    #[error("failed to spawn `{program} {}`: {source}", join_args(.args))]
    Spawn {
        program: String,
        args: Vec<String>,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CommandError::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::TimedOut { .. })
    }

    pub fn program(&self) -> &str {
        match self {
            CommandError::NotFound { program, .. }
            | CommandError::NonZeroExit { program, .. }
            | CommandError::TimedOut { program, .. }
            | CommandError::Spawn { program, .. } => program,
        }
    }

    /// Exit status as text: the numeric code, or a symbolic name when the
    /// process never produced one.
    pub fn exit_status(&self) -> String {
        match self {
            CommandError::NotFound { .. } => "not-found".to_string(),
            CommandError::NonZeroExit { code: Some(c), .. } => c.to_string(),
            CommandError::NonZeroExit { code: None, .. } => "signal".to_string(),
            CommandError::TimedOut { .. } => "timeout".to_string(),
            CommandError::Spawn { .. } => "spawn-failed".to_string(),
        }
    }

    /// Captured output of a process that ran to a non-zero exit.
    /// Test runners report failing suites this way, so callers parse it.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            CommandError::NonZeroExit { stdout, stderr, .. } => Some((stdout, stderr)),
            _ => None,
        }
    }
}

fn join_args(args: &[String]) -> String {
    args.join(" ")
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "a signal".to_string(),
    }
}

fn millis(timeout: &Duration) -> u128 {
    timeout.as_millis()
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("\nstderr: {}", truncate(trimmed, STDERR_LIMIT))
}

/// Truncate to at most `limit` characters, marking the cut.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("… [truncated]");
    out
}
