//! UI automation through `idb`: screenshots, accessibility tree, and
//! touch/keyboard actions against the resolved simulator.

use super::{
    check_run, optional_str, optional_u64, record, required_f64, required_str, with_budget,
    LoopTool,
};
use crate::context::ServerContext;
use futures::future::BoxFuture;
use ios_loop_core::exec::Invocation;
use ios_loop_core::idb;
use ios_loop_core::paths;
use ios_loop_core::run::Action;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

pub fn tools() -> Vec<Box<dyn LoopTool>> {
    vec![
        Box::new(ScreenshotTool),
        Box::new(DescribeAllTool),
        Box::new(DescribePointTool),
        Box::new(TapTool),
        Box::new(SwipeTool),
        Box::new(InputTextTool),
        Box::new(PressKeyTool),
        Box::new(PressButtonTool),
        Box::new(WaitForElementTool),
    ]
}

fn run_id_schema() -> Value {
    json!({
        "type": "string",
        "description": "Active run (from loop_start_run); the action is appended to its log"
    })
}

/// Issue a UI action with retries, then wait for the UI to settle.
async fn act(ctx: &ServerContext, inv: Invocation) -> Result<(), String> {
    ctx.run_with_retry(&inv).await.map_err(|e| e.to_string())?;
    ctx.settle().await;
    Ok(())
}

async fn describe_all(ctx: &ServerContext) -> Result<Vec<Value>, String> {
    let inv = idb::describe_all(&ctx.device_id, ctx.describe_timeout());
    let out = ctx.run(&inv).await.map_err(|e| e.to_string())?;
    idb::parse_tree(&out.stdout).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// idb_screenshot
// ---------------------------------------------------------------------------

pub struct ScreenshotTool;

impl LoopTool for ScreenshotTool {
    fn name(&self) -> &str {
        "idb_screenshot"
    }

    fn description(&self) -> &str {
        "Capture a PNG screenshot of the simulator and return its path"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "run_id": run_id_schema(),
                "name": {
                    "type": "string",
                    "description": "File name stem (default: timestamp)"
                }
            }
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let run_id = optional_str(&args, "run_id");
            check_run(ctx, run_id)?;

            let dir = paths::screenshots_dir(&ctx.results_dir(), run_id);
            std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
            let stem = match optional_str(&args, "name") {
                Some(n) => paths::sanitize_file_stem(n, "screenshot"),
                None => chrono::Utc::now().format("screenshot-%Y%m%d-%H%M%S%3f").to_string(),
            };
            let path = dir.join(format!("{stem}.png"));

            ctx.run_with_retry(&idb::screenshot(&ctx.device_id, &path))
                .await
                .map_err(|e| e.to_string())?;

            let path = path.to_string_lossy().into_owned();
            let budget = record(ctx, run_id, Action::Screenshot { path: path.clone() })?;
            Ok(with_budget(json!({ "path": path }), budget))
        })
    }
}

// ---------------------------------------------------------------------------
// idb_describe_all
// ---------------------------------------------------------------------------

pub struct DescribeAllTool;

impl LoopTool for DescribeAllTool {
    fn name(&self) -> &str {
        "idb_describe_all"
    }

    fn description(&self) -> &str {
        "Dump the accessibility tree of the current screen as JSON elements"
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn call<'a>(&'a self, _args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move { Ok(Value::Array(describe_all(ctx).await?)) })
    }
}

// ---------------------------------------------------------------------------
// idb_describe_point
// ---------------------------------------------------------------------------

pub struct DescribePointTool;

impl LoopTool for DescribePointTool {
    fn name(&self) -> &str {
        "idb_describe_point"
    }

    fn description(&self) -> &str {
        "Describe the accessibility element at a screen coordinate"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "x": { "type": "number" },
                "y": { "type": "number" }
            },
            "required": ["x", "y"]
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let x = required_f64(&args, "x")?;
            let y = required_f64(&args, "y")?;
            let inv = idb::describe_point(&ctx.device_id, x, y, ctx.describe_timeout());
            let out = ctx.run(&inv).await.map_err(|e| e.to_string())?;
            let tree = idb::parse_tree(&out.stdout).map_err(|e| e.to_string())?;
            tree.into_iter()
                .next()
                .ok_or_else(|| format!("no accessibility element at ({x}, {y})"))
        })
    }
}

// ---------------------------------------------------------------------------
// idb_tap
// ---------------------------------------------------------------------------

pub struct TapTool;

impl LoopTool for TapTool {
    fn name(&self) -> &str {
        "idb_tap"
    }

    fn description(&self) -> &str {
        "Tap a coordinate, or the centre of the element whose accessibility label or identifier matches `label`"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "x": { "type": "number" },
                "y": { "type": "number" },
                "label": {
                    "type": "string",
                    "description": "AXLabel or AXUniqueId to tap instead of a coordinate"
                },
                "run_id": run_id_schema()
            }
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let run_id = optional_str(&args, "run_id");
            check_run(ctx, run_id)?;

            let label = optional_str(&args, "label").map(str::to_string);
            let (x, y) = match &label {
                Some(l) => {
                    let tree = describe_all(ctx).await?;
                    let element = idb::find_element(&tree, l)
                        .ok_or_else(|| format!("element not found: {l}"))?;
                    match element.frame {
                        Some(frame) => frame.center(),
                        None => return Err(format!("element '{l}' has no frame")),
                    }
                }
                None => (required_f64(&args, "x")?, required_f64(&args, "y")?),
            };

            act(ctx, idb::tap(&ctx.device_id, x, y)).await?;
            let mut result = json!({ "x": x, "y": y });
            if let Some(l) = &label {
                result["label"] = json!(l);
            }
            let budget = record(ctx, run_id, Action::Tap { x, y, label })?;
            Ok(with_budget(result, budget))
        })
    }
}

// ---------------------------------------------------------------------------
// idb_swipe
// ---------------------------------------------------------------------------

pub struct SwipeTool;

impl LoopTool for SwipeTool {
    fn name(&self) -> &str {
        "idb_swipe"
    }

    fn description(&self) -> &str {
        "Swipe from one coordinate to another"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "x_start": { "type": "number" },
                "y_start": { "type": "number" },
                "x_end": { "type": "number" },
                "y_end": { "type": "number" },
                "duration": { "type": "number", "description": "Seconds" },
                "run_id": run_id_schema()
            },
            "required": ["x_start", "y_start", "x_end", "y_end"]
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let run_id = optional_str(&args, "run_id");
            check_run(ctx, run_id)?;
            let x_start = required_f64(&args, "x_start")?;
            let y_start = required_f64(&args, "y_start")?;
            let x_end = required_f64(&args, "x_end")?;
            let y_end = required_f64(&args, "y_end")?;
            let duration = args["duration"].as_f64();

            let inv = idb::swipe(&ctx.device_id, (x_start, y_start), (x_end, y_end), duration);
            act(ctx, inv).await?;
            let budget = record(
                ctx,
                run_id,
                Action::Swipe {
                    x_start,
                    y_start,
                    x_end,
                    y_end,
                    duration,
                },
            )?;
            Ok(with_budget(json!({ "swiped": true }), budget))
        })
    }
}

// ---------------------------------------------------------------------------
// idb_input_text
// ---------------------------------------------------------------------------

pub struct InputTextTool;

impl LoopTool for InputTextTool {
    fn name(&self) -> &str {
        "idb_input_text"
    }

    fn description(&self) -> &str {
        "Type text into the focused field"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "run_id": run_id_schema()
            },
            "required": ["text"]
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let run_id = optional_str(&args, "run_id");
            check_run(ctx, run_id)?;
            let text = required_str(&args, "text")?;
            act(ctx, idb::input_text(&ctx.device_id, text)).await?;
            let budget = record(ctx, run_id, Action::InputText { text: text.to_string() })?;
            Ok(with_budget(json!({ "typed": text.chars().count() }), budget))
        })
    }
}

// ---------------------------------------------------------------------------
// idb_press_key
// ---------------------------------------------------------------------------

pub struct PressKeyTool;

impl LoopTool for PressKeyTool {
    fn name(&self) -> &str {
        "idb_press_key"
    }

    fn description(&self) -> &str {
        "Press a key by HID keycode (40 = Return, 42 = Backspace)"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "integer", "minimum": 0 },
                "run_id": run_id_schema()
            },
            "required": ["key"]
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let run_id = optional_str(&args, "run_id");
            check_run(ctx, run_id)?;
            let key = optional_u64(&args, "key")
                .and_then(|k| u32::try_from(k).ok())
                .ok_or_else(|| "missing required argument: key (keycode)".to_string())?;
            act(ctx, idb::key(&ctx.device_id, key)).await?;
            let budget = record(ctx, run_id, Action::PressKey { key })?;
            Ok(with_budget(json!({ "key": key }), budget))
        })
    }
}

// ---------------------------------------------------------------------------
// idb_press_button
// ---------------------------------------------------------------------------

pub struct PressButtonTool;

impl LoopTool for PressButtonTool {
    fn name(&self) -> &str {
        "idb_press_button"
    }

    fn description(&self) -> &str {
        "Press a hardware button"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "button": { "type": "string", "enum": idb::BUTTONS },
                "run_id": run_id_schema()
            },
            "required": ["button"]
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let run_id = optional_str(&args, "run_id");
            check_run(ctx, run_id)?;
            let button = required_str(&args, "button")?;
            let inv = idb::button(&ctx.device_id, button).map_err(|e| e.to_string())?;
            act(ctx, inv).await?;
            let button = button.to_ascii_uppercase();
            let budget = record(ctx, run_id, Action::PressButton { button: button.clone() })?;
            Ok(with_budget(json!({ "button": button }), budget))
        })
    }
}

// ---------------------------------------------------------------------------
// idb_wait_for_element
// ---------------------------------------------------------------------------

/// Floor for the polling interval when `action_delay_ms` is very small.
const MIN_POLL: Duration = Duration::from_millis(100);

pub struct WaitForElementTool;

impl LoopTool for WaitForElementTool {
    fn name(&self) -> &str {
        "idb_wait_for_element"
    }

    fn description(&self) -> &str {
        "Poll the accessibility tree until an element with the given label or identifier appears"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Default: loop.verification_timeout_ms"
                }
            },
            "required": ["label"]
        })
    }

    fn call<'a>(&'a self, args: Value, ctx: &'a ServerContext) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            let label = required_str(&args, "label")?;
            let timeout = optional_u64(&args, "timeout_ms")
                .map(Duration::from_millis)
                .unwrap_or_else(|| ctx.verification_timeout());
            let interval = ctx.action_delay().max(MIN_POLL);

            let started = Instant::now();
            let mut polls = 0u32;
            loop {
                polls += 1;
                let tree = describe_all(ctx).await?;
                if let Some(element) = idb::find_element(&tree, label) {
                    return Ok(json!({
                        "found": true,
                        "element": element,
                        "polls": polls,
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    }));
                }
                if started.elapsed() + interval > timeout {
                    return Err(format!(
                        "element not found: '{label}' did not appear within {}ms ({polls} polls)",
                        timeout.as_millis()
                    ));
                }
                tokio::time::sleep(interval).await;
            }
        })
    }
}
