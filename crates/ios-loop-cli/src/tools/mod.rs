use crate::context::ServerContext;
use futures::future::BoxFuture;
use ios_loop_core::run::{self, Action, StepBudget};
use serde::Serialize;
use serde_json::Value;

pub mod idb;
pub mod lifecycle;
pub mod maestro;
pub mod utility;

pub trait LoopTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext)
        -> BoxFuture<'a, Result<Value, String>>;
}

pub fn all_tools() -> Vec<Box<dyn LoopTool>> {
    let mut tools = idb::tools();
    tools.extend(lifecycle::tools());
    tools.extend(maestro::tools());
    tools.extend(utility::tools());
    tools
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args[key]
        .as_str()
        .ok_or_else(|| format!("missing required argument: {key}"))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args[key].as_str().filter(|s| !s.is_empty())
}

pub(crate) fn required_f64(args: &Value, key: &str) -> Result<f64, String> {
    args[key]
        .as_f64()
        .ok_or_else(|| format!("missing required argument: {key} (number)"))
}

pub(crate) fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    args[key].as_u64()
}

pub(crate) fn optional_bool(args: &Value, key: &str) -> Option<bool> {
    args[key].as_bool()
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Action log
// ---------------------------------------------------------------------------

/// Fail early on an unknown `run_id`, before the action touches the device.
pub(crate) fn check_run(ctx: &ServerContext, run_id: Option<&str>) -> Result<(), String> {
    if let Some(id) = run_id {
        run::existing_run(&ctx.results_dir(), id).map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Append `action` to the run's log when a run is active.
pub(crate) fn record(
    ctx: &ServerContext,
    run_id: Option<&str>,
    action: Action,
) -> Result<Option<StepBudget>, String> {
    let Some(id) = run_id else {
        return Ok(None);
    };
    let step = run::record(&ctx.results_dir(), id, action).map_err(|e| e.to_string())?;
    let budget = StepBudget::new(step, ctx.config.agent_loop.max_steps_per_goal);
    if budget.budget_exhausted {
        tracing::warn!(run_id = %id, step, "step budget exhausted");
    }
    Ok(Some(budget))
}

/// Merge step accounting into an object result.
pub(crate) fn with_budget(mut value: Value, budget: Option<StepBudget>) -> Value {
    if let (Some(b), Some(obj)) = (budget, value.as_object_mut()) {
        obj.insert("step".into(), b.step.into());
        obj.insert("steps_remaining".into(), b.steps_remaining.into());
        obj.insert("budget_exhausted".into(), b.budget_exhausted.into());
    }
    value
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use ios_loop_core::config::Config;
    use ios_loop_core::testing::ScriptedRunner;
    use std::path::Path;
    use std::sync::Arc;

    pub const UDID: &str = "SIM-UDID-1";
    pub const BUNDLE: &str = "com.acme.shop";

    /// Context rooted at `root` with no settle delay and a known bundle id.
    pub fn context(root: &Path, runner: Arc<ScriptedRunner>) -> ServerContext {
        let mut config = Config::default();
        config.app.bundle_id = BUNDLE.to_string();
        config.idb.action_delay_ms = 0;
        ServerContext::new(root, config, UDID.to_string(), root.join("plugin"), runner)
    }

    pub fn start_run(ctx: &ServerContext) -> String {
        run::start_run(
            &ctx.results_dir(),
            Some("test goal".into()),
            &ctx.device_id,
            ctx.config.agent_loop.max_steps_per_goal,
            chrono::Utc::now(),
        )
        .unwrap()
        .run_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tool_names_are_unique_and_prefixed() {
        let tools = all_tools();
        assert_eq!(tools.len(), 22);
        let names: HashSet<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), tools.len());
        for name in &names {
            assert!(
                ["idb_", "app_", "maestro_", "loop_"]
                    .iter()
                    .any(|p| name.starts_with(p)),
                "{name}"
            );
        }
    }

    #[test]
    fn schemas_are_objects() {
        for tool in all_tools() {
            let schema = tool.schema();
            assert_eq!(schema["type"], "object", "{}", tool.name());
            assert!(!tool.description().is_empty());
        }
    }

    #[test]
    fn budget_is_merged_into_objects_only() {
        let v = with_budget(serde_json::json!({"ok": true}), Some(StepBudget::new(2, 3)));
        assert_eq!(v["step"], 2);
        assert_eq!(v["steps_remaining"], 1);
        let arr = with_budget(serde_json::json!([1]), Some(StepBudget::new(1, 3)));
        assert_eq!(arr, serde_json::json!([1]));
    }

    #[test]
    fn arg_helpers() {
        let args = serde_json::json!({"a": "x", "n": 3, "f": 1.5, "b": true, "e": ""});
        assert_eq!(required_str(&args, "a").unwrap(), "x");
        assert!(required_str(&args, "z").unwrap_err().contains("missing required argument: z"));
        assert_eq!(optional_str(&args, "e"), None);
        assert_eq!(optional_u64(&args, "n"), Some(3));
        assert_eq!(required_f64(&args, "f").unwrap(), 1.5);
        assert_eq!(required_f64(&args, "n").unwrap(), 3.0);
        assert_eq!(optional_bool(&args, "b"), Some(true));
    }
}
