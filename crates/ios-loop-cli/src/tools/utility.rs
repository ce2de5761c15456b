//! Logs, artifact retention, prerequisite checks and run bookkeeping.

use super::{optional_str, optional_u64, record, required_str, to_json, with_budget, LoopTool};
use crate::context::ServerContext;
use futures::future::BoxFuture;
use ios_loop_core::run::{self, Action};
use ios_loop_core::{artifacts, paths, prereq, simctl};
use serde_json::{json, Value};

const DEFAULT_LOG_WINDOW: &str = "5m";
const DEFAULT_LOG_LINES: usize = 200;

pub fn tools() -> Vec<Box<dyn LoopTool>> {
    vec![
        Box::new(GetLogsTool),
        Box::new(CleanupArtifactsTool),
        Box::new(CheckPrerequisitesTool),
        Box::new(StartRunTool),
        Box::new(RecordVerificationTool),
        Box::new(GetConfigTool),
    ]
}

// ---------------------------------------------------------------------------
// loop_get_logs
// ---------------------------------------------------------------------------

pub struct GetLogsTool;

impl LoopTool for GetLogsTool {
    fn name(&self) -> &str {
        "loop_get_logs"
    }

    fn description(&self) -> &str {
        "Fetch recent unified-log lines from the simulator, filtered to the app's subsystems by default"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "last": { "type": "string", "description": "Window such as 30s, 5m, 1h (default 5m)" },
                "predicate": { "type": "string", "description": "NSPredicate filter (default: app subsystem)" },
                "max_lines": { "type": "integer", "minimum": 1 }
            }
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let last = optional_str(&args, "last").unwrap_or(DEFAULT_LOG_WINDOW);
            if !simctl::is_valid_log_window(last) {
                return Err(format!("invalid log window '{last}' (expected e.g. 30s, 5m, 1h)"));
            }
            let predicate = optional_str(&args, "predicate")
                .map(str::to_string)
                .unwrap_or_else(|| simctl::default_log_predicate(&ctx.config.app.bundle_id));
            let max_lines = optional_u64(&args, "max_lines")
                .map(|n| n.max(1) as usize)
                .unwrap_or(DEFAULT_LOG_LINES);

            let out = ctx
                .run(&simctl::log_show(&ctx.device_id, last, &predicate))
                .await
                .map_err(|e| e.to_string())?;
            let all: Vec<&str> = out.stdout.lines().filter(|l| !l.trim().is_empty()).collect();
            let start = all.len().saturating_sub(max_lines);
            Ok(json!({
                "last": last,
                "predicate": predicate,
                "total_lines": all.len(),
                "truncated": start > 0,
                "lines": &all[start..],
            }))
        })
    }
}

// ---------------------------------------------------------------------------
// loop_cleanup_artifacts
// ---------------------------------------------------------------------------

pub struct CleanupArtifactsTool;

impl LoopTool for CleanupArtifactsTool {
    fn name(&self) -> &str {
        "loop_cleanup_artifacts"
    }

    fn description(&self) -> &str {
        "Delete all but the newest N run directories (default artifacts.keep_last_n_runs)"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "keep_last_n": { "type": "integer", "minimum": 0 } }
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let keep = optional_u64(&args, "keep_last_n")
                .map(|n| n as usize)
                .unwrap_or(ctx.config.artifacts.keep_last_n_runs);
            let report = artifacts::enforce_retention(&ctx.results_dir(), keep)
                .map_err(|e| e.to_string())?;
            to_json(&report)
        })
    }
}

// ---------------------------------------------------------------------------
// loop_check_prerequisites
// ---------------------------------------------------------------------------

pub struct CheckPrerequisitesTool;

impl LoopTool for CheckPrerequisitesTool {
    fn name(&self) -> &str {
        "loop_check_prerequisites"
    }

    fn description(&self) -> &str {
        "Check that xcrun, idb, idb_companion and maestro are installed"
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn call<'a>(&'a self, _args: Value, _ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move { to_json(&prereq::check_all()) })
    }
}

// ---------------------------------------------------------------------------
// loop_start_run
// ---------------------------------------------------------------------------

pub struct StartRunTool;

impl LoopTool for StartRunTool {
    fn name(&self) -> &str {
        "loop_start_run"
    }

    fn description(&self) -> &str {
        "Start a run: creates a results directory that records every action taken with its run_id"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "goal": { "type": "string", "description": "What this run is trying to achieve" }
            }
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let results = ctx.results_dir();
            let meta = run::start_run(
                &results,
                optional_str(&args, "goal").map(str::to_string),
                &ctx.device_id,
                ctx.config.agent_loop.max_steps_per_goal,
                chrono::Utc::now(),
            )
            .map_err(|e| e.to_string())?;
            let path = paths::run_dir(&results, &meta.run_id);
            Ok(json!({
                "run_id": meta.run_id,
                "path": path.to_string_lossy(),
                "max_steps": meta.max_steps,
                "device_id": meta.device_id,
            }))
        })
    }
}

// ---------------------------------------------------------------------------
// loop_record_verification
// ---------------------------------------------------------------------------

pub struct RecordVerificationTool;

impl LoopTool for RecordVerificationTool {
    fn name(&self) -> &str {
        "loop_record_verification"
    }

    fn description(&self) -> &str {
        "Record the outcome of checking an expectation; passed checks become assertions on export"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "run_id": { "type": "string" },
                "expectation": { "type": "string" },
                "label": {
                    "type": "string",
                    "description": "Element label that proves the expectation, if any"
                },
                "passed": { "type": "boolean" }
            },
            "required": ["run_id", "expectation", "passed"]
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let run_id = required_str(&args, "run_id")?;
            let expectation = required_str(&args, "expectation")?.to_string();
            let passed = args["passed"]
                .as_bool()
                .ok_or_else(|| "missing required argument: passed".to_string())?;
            let label = optional_str(&args, "label").map(str::to_string);
            let budget = record(
                ctx,
                Some(run_id),
                Action::Verify {
                    expectation,
                    label,
                    passed,
                },
            )?;
            Ok(with_budget(json!({ "recorded": true, "passed": passed }), budget))
        })
    }
}

// ---------------------------------------------------------------------------
// loop_get_config
// ---------------------------------------------------------------------------

pub struct GetConfigTool;

impl LoopTool for GetConfigTool {
    fn name(&self) -> &str {
        "loop_get_config"
    }

    fn description(&self) -> &str {
        "Show the effective configuration, target simulator and plugin root"
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn call<'a>(&'a self, _args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            Ok(json!({
                "config": to_json(&ctx.config)?,
                "device_id": ctx.device_id,
                "plugin_root": ctx.plugin_root.to_string_lossy(),
                "project_root": ctx.root.to_string_lossy(),
                "results_dir": ctx.results_dir().to_string_lossy(),
            }))
        })
    }
}
