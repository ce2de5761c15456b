//! Install, launch, terminate, build and reset the app under test.

use super::{check_run, optional_bool, optional_str, record, required_str, with_budget, LoopTool};
use crate::context::ServerContext;
use futures::future::BoxFuture;
use ios_loop_core::error::truncate;
use ios_loop_core::exec::Invocation;
use ios_loop_core::paths;
use ios_loop_core::run::Action;
use ios_loop_core::simctl;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

const BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const BUILD_TAIL_LINES: usize = 40;

pub fn tools() -> Vec<Box<dyn LoopTool>> {
    vec![
        Box::new(LaunchTool),
        Box::new(TerminateTool),
        Box::new(InstallTool),
        Box::new(BuildTool),
        Box::new(ResetStateTool),
    ]
}

fn bundle_id<'a>(args: &'a Value, ctx: &'a ServerContext) -> &'a str {
    optional_str(args, "bundle_id").unwrap_or(&ctx.config.app.bundle_id)
}

// ---------------------------------------------------------------------------
// app_launch
// ---------------------------------------------------------------------------

pub struct LaunchTool;

impl LoopTool for LaunchTool {
    fn name(&self) -> &str {
        "app_launch"
    }

    fn description(&self) -> &str {
        "Launch the app on the simulator (defaults to app.bundle_id)"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "bundle_id": { "type": "string" },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Launch arguments passed to the app"
                },
                "run_id": { "type": "string" }
            }
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let run_id = optional_str(&args, "run_id");
            check_run(ctx, run_id)?;
            let bundle = bundle_id(&args, ctx).to_string();
            let launch_args: Vec<String> = match args["args"].as_array() {
                Some(items) => items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
                None => Vec::new(),
            };

            let out = ctx
                .run(&simctl::launch(&ctx.device_id, &bundle, &launch_args))
                .await
                .map_err(|e| e.to_string())?;
            let pid = simctl::parse_launch_pid(&out.stdout);
            ctx.settle().await;

            let budget = record(ctx, run_id, Action::Launch { bundle_id: bundle.clone() })?;
            Ok(with_budget(json!({ "bundle_id": bundle, "pid": pid }), budget))
        })
    }
}

// ---------------------------------------------------------------------------
// app_terminate
// ---------------------------------------------------------------------------

pub struct TerminateTool;

impl LoopTool for TerminateTool {
    fn name(&self) -> &str {
        "app_terminate"
    }

    fn description(&self) -> &str {
        "Terminate the app if it is running"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "bundle_id": { "type": "string" } }
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let bundle = bundle_id(&args, ctx);
            ctx.run(&simctl::terminate(&ctx.device_id, bundle))
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!({ "bundle_id": bundle, "terminated": true }))
        })
    }
}

// ---------------------------------------------------------------------------
// app_install
// ---------------------------------------------------------------------------

pub struct InstallTool;

impl LoopTool for InstallTool {
    fn name(&self) -> &str {
        "app_install"
    }

    fn description(&self) -> &str {
        "Install a built .app bundle onto the simulator"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "app_path": {
                    "type": "string",
                    "description": "Path to the .app bundle (relative paths resolve against the project root)"
                }
            },
            "required": ["app_path"]
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let app_path = paths::resolve(&ctx.root, required_str(&args, "app_path")?);
            if !app_path.exists() {
                return Err(format!("app bundle not found: {}", app_path.display()));
            }
            ctx.run(&simctl::install(&ctx.device_id, &app_path))
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!({ "installed": app_path.to_string_lossy() }))
        })
    }
}

// ---------------------------------------------------------------------------
// app_build
// ---------------------------------------------------------------------------

pub struct BuildTool;

impl LoopTool for BuildTool {
    fn name(&self) -> &str {
        "app_build"
    }

    fn description(&self) -> &str {
        "Run app.build_command in the project root and return the tail of its output"
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn call<'a>(&'a self, _args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let command = ctx.config.app.build_command.trim();
            if command.is_empty() {
                return Err("app.build_command is empty".to_string());
            }
            let inv = Invocation::new("sh")
                .args(["-c", command])
                .cwd(&ctx.root)
                .timeout(BUILD_TIMEOUT);
            tracing::info!(command, "building app");
            // xcodebuild reports compile errors on stdout.
            let out = match ctx.run(&inv).await {
                Ok(out) => out,
                Err(e) => {
                    return Err(match e.captured_output() {
                        Some((stdout, stderr)) => format!(
                            "{e}\n{}",
                            tail(&format!("{stdout}\n{stderr}"), BUILD_TAIL_LINES)
                        ),
                        None => e.to_string(),
                    })
                }
            };
            Ok(json!({
                "command": command,
                "exit_code": out.exit_code,
                "output_tail": tail(&format!("{}\n{}", out.stdout, out.stderr), BUILD_TAIL_LINES),
            }))
        })
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

// ---------------------------------------------------------------------------
// app_reset_state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum StepStatus {
    Ok,
    Failed,
    Skipped,
}

#[derive(Debug, Serialize)]
struct ResetStep {
    step: &'static str,
    status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ResetStep {
    fn skipped(step: &'static str, why: &str) -> Self {
        Self {
            step,
            status: StepStatus::Skipped,
            detail: Some(why.to_string()),
        }
    }
}

pub struct ResetStateTool;

impl ResetStateTool {
    /// Best effort: a failing step is reported and the next one still runs.
    async fn attempt(ctx: &ServerContext, step: &'static str, inv: Invocation) -> ResetStep {
        match ctx.run(&inv).await {
            Ok(_) => ResetStep {
                step,
                status: StepStatus::Ok,
                detail: None,
            },
            Err(e) => {
                tracing::warn!(step, error = %e, "reset step failed");
                ResetStep {
                    step,
                    status: StepStatus::Failed,
                    detail: Some(truncate(&e.to_string(), 500)),
                }
            }
        }
    }
}

impl LoopTool for ResetStateTool {
    fn name(&self) -> &str {
        "app_reset_state"
    }

    fn description(&self) -> &str {
        "Terminate the app and clear its UserDefaults, optionally its app-group store and the simulator keychain"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "include_app_group": { "type": "boolean", "default": true },
                "include_keychain": { "type": "boolean", "default": false }
            }
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let udid = ctx.device_id.as_str();
            let bundle = ctx.config.app.bundle_id.as_str();
            let include_group = optional_bool(&args, "include_app_group").unwrap_or(true);
            let include_keychain = optional_bool(&args, "include_keychain").unwrap_or(false);

            let mut steps = vec![
                Self::attempt(ctx, "terminate", simctl::terminate(udid, bundle)).await,
                Self::attempt(ctx, "user_defaults", simctl::defaults_delete(udid, bundle)).await,
            ];

            steps.push(match ctx.config.app.app_group() {
                _ if !include_group => ResetStep::skipped("app_group", "not requested"),
                None => ResetStep::skipped("app_group", "app.app_group_id is not configured"),
                Some(group) => {
                    Self::attempt(ctx, "app_group", simctl::defaults_delete(udid, group)).await
                }
            });

            steps.push(if include_keychain {
                Self::attempt(ctx, "keychain", simctl::keychain_reset(udid)).await
            } else {
                ResetStep::skipped("keychain", "not requested")
            });

            let complete = steps.iter().all(|s| s.status != StepStatus::Failed);
            Ok(json!({ "bundle_id": bundle, "complete": complete, "steps": steps }))
        })
    }
}
