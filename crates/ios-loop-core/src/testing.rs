//! A [`CommandRunner`] that answers from a script instead of spawning
//! processes. Used by unit tests here and by the tool handler tests in the
//! CLI crate.

use std::sync::Mutex;

use futures::future::BoxFuture;

use crate::error::CommandError;
use crate::exec::{CommandOutput, CommandRunner, Invocation};

#[derive(Debug, Clone)]
pub enum Reply {
    Ok { stdout: String, stderr: String },
    Exit { code: i32, stdout: String, stderr: String },
    NotFound,
    TimedOut,
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Reply::Ok {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        Reply::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn exit_with_stdout(code: i32, stdout: impl Into<String>) -> Self {
        Reply::Exit {
            code,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

struct Rule {
    prefix: Vec<String>,
    reply: Reply,
    once: bool,
}

/// Matches each invocation (`program` followed by `args`) against rule
/// prefixes in insertion order. Unmatched invocations succeed with empty
/// output. Every invocation is recorded.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<I, S>(self, prefix: I, reply: Reply) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(prefix, reply, false)
    }

    /// Like [`ScriptedRunner::on`] but the rule is consumed by its first match.
    pub fn once<I, S>(self, prefix: I, reply: Reply) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(prefix, reply, true)
    }

    fn push<I, S>(self, prefix: I, reply: Reply, once: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                prefix: prefix.into_iter().map(Into::into).collect(),
                reply,
                once,
            });
        }
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Invocations rendered as `program arg1 arg2`.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::display).collect()
    }

    fn answer(&self, inv: &Invocation) -> Reply {
        let tokens: Vec<&str> = std::iter::once(inv.program.as_str())
            .chain(inv.args.iter().map(String::as_str))
            .collect();
        let Ok(mut rules) = self.rules.lock() else {
            return Reply::ok("");
        };
        let hit = rules.iter().position(|r| {
            r.prefix.len() <= tokens.len()
                && r.prefix.iter().zip(&tokens).all(|(p, t)| p == t)
        });
        match hit {
            Some(i) if rules[i].once => rules.remove(i).reply,
            Some(i) => rules[i].reply.clone(),
            None => Reply::ok(""),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
    ) -> BoxFuture<'a, Result<CommandOutput, CommandError>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
        let reply = self.answer(invocation);
        let program = invocation.program.clone();
        let args = invocation.args.clone();
        let timeout = invocation.timeout;
        Box::pin(async move {
            match reply {
                Reply::Ok { stdout, stderr } => Ok(CommandOutput {
                    stdout,
                    stderr,
                    exit_code: 0,
                }),
                Reply::Exit {
                    code,
                    stdout,
                    stderr,
                } => Err(CommandError::NonZeroExit {
                    program,
                    args,
                    code: Some(code),
                    stdout,
                    stderr,
                }),
                Reply::NotFound => Err(CommandError::NotFound { program, args }),
                Reply::TimedOut => Err(CommandError::TimedOut {
                    program,
                    args,
                    timeout,
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_matching_prefix_wins() {
        let runner = ScriptedRunner::new()
            .on(["idb", "ui", "tap"], Reply::ok("tapped"))
            .on(["idb"], Reply::ok("generic"));
        let out = runner
            .run(&Invocation::new("idb").args(["ui", "tap", "1", "2"]))
            .await
            .unwrap();
        assert_eq!(out.stdout, "tapped");
        let out = runner
            .run(&Invocation::new("idb").args(["screenshot"]))
            .await
            .unwrap();
        assert_eq!(out.stdout, "generic");
        assert_eq!(runner.call_count(), 2);
    }

    #[tokio::test]
    async fn once_rules_are_consumed() {
        let runner = ScriptedRunner::new()
            .once(["idb"], Reply::exit(1, "busy"))
            .on(["idb"], Reply::ok("ok"));
        let inv = Invocation::new("idb").arg("ui");
        assert!(runner.run(&inv).await.is_err());
        assert_eq!(runner.run(&inv).await.unwrap().stdout, "ok");
    }
}
