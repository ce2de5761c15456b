//! `idb` command construction and accessibility-tree parsing.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LoopError, Result};
use crate::exec::Invocation;

pub const BUTTONS: &[&str] = &["HOME", "LOCK", "SIDE_BUTTON", "SIRI", "APPLE_PAY"];

/// `idb <parts…> --udid <udid>`
fn idb<I, S>(udid: &str, parts: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Invocation::new("idb").args(parts).args(["--udid", udid])
}

pub fn screenshot(udid: &str, path: &Path) -> Invocation {
    idb(udid, ["screenshot".to_string(), path.to_string_lossy().into_owned()])
}

pub fn describe_all(udid: &str, timeout: Duration) -> Invocation {
    idb(udid, ["ui", "describe-all", "--json"]).timeout(timeout)
}

pub fn describe_point(udid: &str, x: f64, y: f64, timeout: Duration) -> Invocation {
    idb(
        udid,
        [
            "ui".to_string(),
            "describe-point".to_string(),
            "--json".to_string(),
            coord(x),
            coord(y),
        ],
    )
    .timeout(timeout)
}

pub fn tap(udid: &str, x: f64, y: f64) -> Invocation {
    idb(udid, ["ui".to_string(), "tap".to_string(), coord(x), coord(y)])
}

pub fn swipe(
    udid: &str,
    from: (f64, f64),
    to: (f64, f64),
    duration: Option<f64>,
) -> Invocation {
    let mut inv = idb(
        udid,
        [
            "ui".to_string(),
            "swipe".to_string(),
            coord(from.0),
            coord(from.1),
            coord(to.0),
            coord(to.1),
        ],
    );
    if let Some(d) = duration {
        inv = inv.args(["--duration".to_string(), d.to_string()]);
    }
    inv
}

pub fn input_text(udid: &str, text: &str) -> Invocation {
    idb(udid, ["ui", "text", text])
}

pub fn key(udid: &str, keycode: u32) -> Invocation {
    idb(udid, ["ui".to_string(), "key".to_string(), keycode.to_string()])
}

pub fn button(udid: &str, button: &str) -> Result<Invocation> {
    let upper = button.to_ascii_uppercase();
    if !BUTTONS.contains(&upper.as_str()) {
        return Err(LoopError::InvalidArgument(format!(
            "unknown button '{button}' (expected one of {})",
            BUTTONS.join(", ")
        )));
    }
    Ok(idb(udid, ["ui".to_string(), "button".to_string(), upper]))
}

/// idb takes integral points.
fn coord(v: f64) -> String {
    (v.round() as i64).to_string()
}

// ---------------------------------------------------------------------------
// Accessibility elements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Frame {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "AXLabel", default)]
    pub label: Option<String>,
    #[serde(rename = "AXUniqueId", default)]
    pub unique_id: Option<String>,
    #[serde(rename = "AXValue", default)]
    pub value: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub frame: Option<Frame>,
}

impl Element {
    pub fn matches(&self, label: &str) -> bool {
        self.label.as_deref() == Some(label) || self.unique_id.as_deref() == Some(label)
    }
}

/// Parse `describe-all`/`describe-point` output: a JSON array, a single
/// object, or one object per line depending on the idb version.
pub fn parse_tree(stdout: &str) -> Result<Vec<Value>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => return Ok(items),
        Ok(obj @ Value::Object(_)) => return Ok(vec![obj]),
        _ => {}
    }
    trimmed
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str::<Value>(l).map_err(|e| LoopError::UnparseableOutput {
                tool: "idb ui describe".to_string(),
                detail: e.to_string(),
            })
        })
        .collect()
}

/// First element whose label or unique id equals `label` and has a frame.
pub fn find_element(tree: &[Value], label: &str) -> Option<Element> {
    tree.iter()
        .filter_map(|v| serde_json::from_value::<Element>(v.clone()).ok())
        .find(|e| e.matches(label) && e.frame.is_some())
}
