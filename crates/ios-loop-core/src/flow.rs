//! Export of a recorded action log as a Maestro flow file.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::config::Config;
use crate::error::Result;
use crate::io::atomic_write;
use crate::paths::sanitize_file_stem;
use crate::run::{Action, ActionRecord};

/// Options derived from the `maestro` and `app` config sections.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub app_id: String,
    pub prefer_selectors: bool,
    pub include_ai_assertions: bool,
}

impl ExportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            app_id: config.app.bundle_id.clone(),
            prefer_selectors: config.maestro.prefer_selectors,
            include_ai_assertions: config.maestro.include_ai_assertions,
        }
    }
}

fn map<const N: usize>(entries: [(&str, Value); N]) -> Value {
    let mut m = Mapping::new();
    for (k, v) in entries {
        m.insert(Value::from(k), v);
    }
    Value::Mapping(m)
}

fn point(x: f64, y: f64) -> Value {
    Value::from(format!("{},{}", x.round() as i64, y.round() as i64))
}

/// Maestro key names for the idb HID keycodes we record.
fn key_name(key: u32) -> Option<&'static str> {
    match key {
        40 => Some("Enter"),
        42 => Some("Backspace"),
        _ => None,
    }
}

fn button_name(button: &str) -> Option<&'static str> {
    match button.to_ascii_uppercase().as_str() {
        "HOME" => Some("Home"),
        "LOCK" | "SIDE_BUTTON" => Some("Lock"),
        _ => None,
    }
}

/// Translate one recorded action into zero or more flow steps.
fn steps_for(action: &Action, opts: &ExportOptions) -> Vec<Value> {
    match action {
        Action::Launch { bundle_id } if *bundle_id == opts.app_id => {
            vec![Value::from("launchApp")]
        }
        Action::Launch { bundle_id } => {
            vec![map([("launchApp", map([("appId", Value::from(bundle_id.as_str()))]))])]
        }
        Action::Tap { x, y, label } => {
            let target = match label {
                Some(l) if opts.prefer_selectors => map([("text", Value::from(l.as_str()))]),
                _ => map([("point", point(*x, *y))]),
            };
            vec![map([("tapOn", target)])]
        }
        Action::Swipe {
            x_start,
            y_start,
            x_end,
            y_end,
            duration,
        } => {
            let mut swipe = Mapping::new();
            swipe.insert("start".into(), point(*x_start, *y_start));
            swipe.insert("end".into(), point(*x_end, *y_end));
            if let Some(d) = duration {
                swipe.insert("duration".into(), Value::from((d * 1000.0).round() as i64));
            }
            vec![map([("swipe", Value::Mapping(swipe))])]
        }
        Action::InputText { text } => vec![map([("inputText", Value::from(text.as_str()))])],
        Action::PressKey { key } => match key_name(*key) {
            Some(name) => vec![map([("pressKey", Value::from(name))])],
            None => Vec::new(),
        },
        Action::PressButton { button } => match button_name(button) {
            Some(name) => vec![map([("pressKey", Value::from(name))])],
            None => Vec::new(),
        },
        Action::Screenshot { path } => {
            let name = Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "screenshot".to_string());
            vec![map([("takeScreenshot", Value::from(name))])]
        }
        Action::Verify {
            expectation,
            label,
            passed,
        } => {
            if !passed {
                return Vec::new();
            }
            if opts.include_ai_assertions {
                vec![map([(
                    "assertWithAI",
                    map([("assertion", Value::from(expectation.as_str()))]),
                )])]
            } else if let Some(l) = label {
                vec![map([("assertVisible", Value::from(l.as_str()))])]
            } else {
                Vec::new()
            }
        }
    }
}

/// Render the flow document: `appId` header, `---`, step list.
pub fn render_flow(actions: &[ActionRecord], opts: &ExportOptions) -> Result<String> {
    let header = map([("appId", Value::from(opts.app_id.as_str()))]);
    let mut steps: Vec<Value> = actions
        .iter()
        .flat_map(|r| steps_for(&r.action, opts))
        .collect();
    let starts_with_launch = matches!(
        actions.first().map(|r| &r.action),
        Some(Action::Launch { .. })
    );
    if !starts_with_launch {
        steps.insert(0, Value::from("launchApp"));
    }

    let mut out = serde_yaml::to_string(&header)?;
    out.push_str("---\n");
    out.push_str(&serde_yaml::to_string(&Value::Sequence(steps))?);
    Ok(out)
}

/// Write `<output_dir>/<name>.yaml` and return its path.
pub fn write_flow(output_dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = output_dir.join(format!("{}.yaml", sanitize_file_stem(name, "recorded-flow")));
    atomic_write(&path, contents.as_bytes())?;
    Ok(path)
}
