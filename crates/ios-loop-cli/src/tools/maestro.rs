//! Running Maestro flows and exporting recorded runs as new flows.

use super::{optional_str, required_str, to_json, LoopTool};
use crate::context::ServerContext;
use futures::future::BoxFuture;
use ios_loop_core::flow::{self, ExportOptions};
use ios_loop_core::io::atomic_write;
use ios_loop_core::maestro::{self, parse_report};
use ios_loop_core::paths;
use ios_loop_core::run;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Lines of raw output included when a report cannot be parsed.
const RAW_TAIL_LINES: usize = 30;

pub fn tools() -> Vec<Box<dyn LoopTool>> {
    vec![Box::new(RunFlowTool), Box::new(ExportFlowTool)]
}

/// Absolute paths are used as given. Relative paths are tried against the
/// project root first, then the plugin's bundled `flows/` directory.
fn resolve_flow(ctx: &ServerContext, flow: &str) -> Result<PathBuf, String> {
    let given = Path::new(flow);
    if given.is_absolute() {
        return if given.exists() {
            Ok(given.to_path_buf())
        } else {
            Err(format!("flow not found: {flow}"))
        };
    }
    let candidates = [
        ctx.root.join(given),
        ctx.plugin_root.join(paths::BUNDLED_FLOWS_DIR).join(given),
    ];
    candidates
        .iter()
        .find(|p| p.exists())
        .cloned()
        .ok_or_else(|| {
            format!(
                "flow not found: {flow} (looked in {} and {})",
                candidates[0].display(),
                candidates[1].display()
            )
        })
}

fn env_vars(args: &Value) -> BTreeMap<String, String> {
    args["env"]
        .as_object()
        .map(|m| {
            m.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn raw_tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(RAW_TAIL_LINES)..].join("\n")
}

// ---------------------------------------------------------------------------
// maestro_run
// ---------------------------------------------------------------------------

pub struct RunFlowTool;

impl LoopTool for RunFlowTool {
    fn name(&self) -> &str {
        "maestro_run"
    }

    fn description(&self) -> &str {
        "Run a Maestro flow file or directory against the simulator and return pass/fail per flow"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "flow": {
                    "type": "string",
                    "description": "Flow file or directory (project-relative, or under the plugin's flows/)"
                },
                "env": {
                    "type": "object",
                    "additionalProperties": { "type": "string" },
                    "description": "Variables passed with -e KEY=VALUE"
                },
                "run_id": {
                    "type": "string",
                    "description": "Save the raw report into this run's directory"
                }
            },
            "required": ["flow"]
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let run_dir = match optional_str(&args, "run_id") {
                Some(id) => Some(run::existing_run(&ctx.results_dir(), id).map_err(|e| e.to_string())?),
                None => None,
            };
            let flow = resolve_flow(ctx, required_str(&args, "flow")?)?;
            let inv = maestro::test_invocation(&ctx.device_id, &flow, &env_vars(&args));

            // A failing suite exits non-zero but still prints a report.
            let report = match ctx.run(&inv).await {
                Ok(out) => format!("{}\n{}", out.stdout, out.stderr),
                Err(e) => match e.captured_output() {
                    Some((stdout, stderr)) => format!("{stdout}\n{stderr}"),
                    None => return Err(e.to_string()),
                },
            };

            let report_path = match &run_dir {
                Some(dir) => {
                    let p = dir.join(paths::MAESTRO_REPORT_FILE);
                    atomic_write(&p, report.as_bytes()).map_err(|e| e.to_string())?;
                    Some(p.to_string_lossy().into_owned())
                }
                None => None,
            };

            let result = parse_report(&report)
                .map_err(|e| format!("{e}\n--- maestro output (tail) ---\n{}", raw_tail(&report)))?;
            tracing::info!(
                flow = %flow.display(),
                passed = result.passed,
                failed = result.failed,
                "maestro run finished"
            );

            let mut value = to_json(&result)?;
            value["flow"] = json!(flow.to_string_lossy());
            if let Some(p) = report_path {
                value["report_path"] = json!(p);
            }
            Ok(value)
        })
    }
}

// ---------------------------------------------------------------------------
// maestro_export_flow
// ---------------------------------------------------------------------------

pub struct ExportFlowTool;

impl LoopTool for ExportFlowTool {
    fn name(&self) -> &str {
        "maestro_export_flow"
    }

    fn description(&self) -> &str {
        "Convert a run's recorded actions into a replayable Maestro flow under maestro.output_dir"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "run_id": { "type": "string" },
                "name": {
                    "type": "string",
                    "description": "Flow file stem (default: the run's goal, else the run id)"
                }
            },
            "required": ["run_id"]
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let run_id = required_str(&args, "run_id")?;
            let results = ctx.results_dir();
            let meta = run::load_meta(&results, run_id).map_err(|e| e.to_string())?;
            let actions = run::read_actions(&results, run_id).map_err(|e| e.to_string())?;
            if actions.is_empty() {
                return Err(format!("run {run_id} has no recorded actions"));
            }

            let name = optional_str(&args, "name")
                .map(str::to_string)
                .or(meta.goal)
                .unwrap_or_else(|| run_id.to_string());
            let contents = flow::render_flow(&actions, &ExportOptions::from_config(&ctx.config))
                .map_err(|e| e.to_string())?;
            let path = flow::write_flow(&ctx.flow_output_dir(), &name, &contents)
                .map_err(|e| e.to_string())?;
            tracing::info!(run_id, path = %path.display(), "exported flow");

            Ok(json!({
                "path": path.to_string_lossy(),
                "actions": actions.len(),
                "flow": contents,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, start_run, UDID};
    use ios_loop_core::run::Action;
    use ios_loop_core::testing::{Reply, ScriptedRunner};
    use std::sync::Arc;
    use tempfile::TempDir;

    const PASSING: &str = "✅ flows/onboarding.yaml\n✅ flows/login.yaml\nPassed: 2, Failed: 0\n";
    const FAILING: &str =
        "✅ flows/onboarding.yaml\n❌ flows/login.yaml - Element not found: \"Sign In\"\nPassed: 1, Failed: 1\n";

    fn write_flow_file(root: &Path, rel: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, "appId: com.acme.shop\n---\n- launchApp\n").unwrap();
    }

    #[tokio::test]
    async fn passing_run_is_parsed() {
        let dir = TempDir::new().unwrap();
        write_flow_file(dir.path(), "flows/smoke.yaml");
        let runner = Arc::new(ScriptedRunner::new().on(["maestro"], Reply::ok(PASSING)));
        let ctx = context(dir.path(), runner.clone());
        let result = RunFlowTool
            .call(json!({"flow": "flows/smoke.yaml", "env": {"USER": "jane"}}), &ctx)
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["passed"], 2);
        let line = &runner.command_lines()[0];
        assert!(line.starts_with(&format!("maestro --udid {UDID} test -e USER=jane ")), "{line}");
        assert!(line.ends_with("flows/smoke.yaml"));
    }

    #[tokio::test]
    async fn failing_run_exit_code_still_yields_report() {
        let dir = TempDir::new().unwrap();
        write_flow_file(dir.path(), "flows/login.yaml");
        let runner = Arc::new(ScriptedRunner::new().on(["maestro"], Reply::exit_with_stdout(1, FAILING)));
        let ctx = context(dir.path(), runner);
        let run_id = start_run(&ctx);
        let result = RunFlowTool
            .call(json!({"flow": "flows/login.yaml", "run_id": run_id}), &ctx)
            .await
            .unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["failures"][0]["flow"], "login");
        let saved = std::fs::read_to_string(result["report_path"].as_str().unwrap()).unwrap();
        assert!(saved.contains("Passed: 1, Failed: 1"));
    }

    #[tokio::test]
    async fn bundled_flows_are_found_under_plugin_root() {
        let dir = TempDir::new().unwrap();
        write_flow_file(&dir.path().join("plugin"), "flows/smoke.yaml");
        let runner = Arc::new(ScriptedRunner::new().on(["maestro"], Reply::ok(PASSING)));
        let ctx = context(dir.path(), runner.clone());
        RunFlowTool.call(json!({"flow": "smoke.yaml"}), &ctx).await.unwrap();
        assert!(runner.command_lines()[0].ends_with("plugin/flows/smoke.yaml"));
    }

    #[tokio::test]
    async fn missing_flow_is_error() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(dir.path(), runner.clone());
        let err = RunFlowTool.call(json!({"flow": "nope.yaml"}), &ctx).await.unwrap_err();
        assert!(err.contains("flow not found"));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn unparseable_output_is_error_with_tail() {
        let dir = TempDir::new().unwrap();
        write_flow_file(dir.path(), "smoke.yaml");
        let runner = Arc::new(ScriptedRunner::new().on(["maestro"], Reply::ok("Java exception: boom\n")));
        let ctx = context(dir.path(), runner);
        let err = RunFlowTool.call(json!({"flow": "smoke.yaml"}), &ctx).await.unwrap_err();
        assert!(err.contains("unparseable output from maestro"));
        assert!(err.contains("Java exception: boom"));
    }

    #[tokio::test]
    async fn missing_maestro_binary_is_error() {
        let dir = TempDir::new().unwrap();
        write_flow_file(dir.path(), "smoke.yaml");
        let runner = Arc::new(ScriptedRunner::new().on(["maestro"], Reply::NotFound));
        let ctx = context(dir.path(), runner);
        let err = RunFlowTool.call(json!({"flow": "smoke.yaml"}), &ctx).await.unwrap_err();
        assert!(err.contains("command not found"));
    }

    #[tokio::test]
    async fn export_writes_flow_named_after_goal() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), Arc::new(ScriptedRunner::new()));
        let run_id = start_run(&ctx);
        run::record(
            &ctx.results_dir(),
            &run_id,
            Action::Tap {
                x: 10.0,
                y: 20.0,
                label: Some("Sign In".into()),
            },
        )
        .unwrap();

        let result = ExportFlowTool.call(json!({"run_id": run_id}), &ctx).await.unwrap();
        let path = result["path"].as_str().unwrap();
        assert!(path.ends_with(".maestro/generated/test-goal.yaml"), "{path}");
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.starts_with("appId: com.acme.shop\n---\n"));
        assert!(written.contains("Sign In"));
        assert_eq!(result["actions"], 1);
    }

    #[tokio::test]
    async fn export_of_empty_run_is_error() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), Arc::new(ScriptedRunner::new()));
        let run_id = start_run(&ctx);
        let err = ExportFlowTool
            .call(json!({"run_id": run_id, "name": "x"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.contains("no recorded actions"));
    }
}
