//! Run directories and the per-run action log.
//!
//! A run is a directory `run-YYYYMMDD-HHMMSS[-N]` under the results dir.
//! UI actions taken during the run are appended to `actions.jsonl`, one
//! [`ActionRecord`] per line, so a restarted server loses nothing.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoopError, Result};
use crate::io::{append_line, atomic_write};
use crate::paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Launch {
        bundle_id: String,
    },
    Tap {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Swipe {
        x_start: f64,
        y_start: f64,
        x_end: f64,
        y_end: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },
    InputText {
        text: String,
    },
    PressKey {
        key: u32,
    },
    PressButton {
        button: String,
    },
    Screenshot {
        path: String,
    },
    Verify {
        expectation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        passed: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    pub max_steps: u32,
}

/// Step accounting returned after each recorded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepBudget {
    pub step: usize,
    pub steps_remaining: usize,
    pub budget_exhausted: bool,
}

impl StepBudget {
    pub fn new(step: usize, max_steps: u32) -> Self {
        let max = max_steps as usize;
        Self {
            step,
            steps_remaining: max.saturating_sub(step),
            budget_exhausted: step >= max,
        }
    }
}

/// Create a fresh run directory and write its metadata.
pub fn start_run(
    results_dir: &Path,
    goal: Option<String>,
    device_id: &str,
    max_steps: u32,
    now: DateTime<Utc>,
) -> Result<RunMeta> {
    std::fs::create_dir_all(results_dir)?;
    let base = format!("{}{}", paths::RUN_PREFIX, now.format("%Y%m%d-%H%M%S"));
    let mut run_id = base.clone();
    let mut n = 2;
    while paths::run_dir(results_dir, &run_id).exists() {
        run_id = format!("{base}-{n}");
        n += 1;
    }
    std::fs::create_dir_all(paths::run_dir(results_dir, &run_id))?;

    let meta = RunMeta {
        run_id: run_id.clone(),
        goal,
        device_id: device_id.to_string(),
        started_at: now,
        max_steps,
    };
    let yaml = serde_yaml::to_string(&meta)?;
    atomic_write(&paths::run_meta_path(results_dir, &run_id), yaml.as_bytes())?;
    tracing::info!(run_id = %run_id, "started run");
    Ok(meta)
}

/// Path of an existing run directory, validating the id.
pub fn existing_run(results_dir: &Path, run_id: &str) -> Result<PathBuf> {
    if !paths::is_valid_run_id(run_id) {
        return Err(LoopError::InvalidArgument(format!(
            "run_id '{run_id}' is not a run identifier (expected 'run-…')"
        )));
    }
    let dir = paths::run_dir(results_dir, run_id);
    if !dir.is_dir() {
        return Err(LoopError::RunNotFound(run_id.to_string()));
    }
    Ok(dir)
}

pub fn load_meta(results_dir: &Path, run_id: &str) -> Result<RunMeta> {
    existing_run(results_dir, run_id)?;
    let data = std::fs::read_to_string(paths::run_meta_path(results_dir, run_id))?;
    Ok(serde_yaml::from_str(&data)?)
}

/// Append an action and return the 1-based step number it was logged as.
pub fn record(results_dir: &Path, run_id: &str, action: Action) -> Result<usize> {
    existing_run(results_dir, run_id)?;
    let path = paths::action_log_path(results_dir, run_id);
    let line = serde_json::to_string(&ActionRecord {
        timestamp: Utc::now(),
        action,
    })?;
    append_line(&path, &line)?;
    let steps = std::fs::read_to_string(&path)?
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count();
    Ok(steps)
}

/// Read the action log. A run with no actions yet yields an empty list.
pub fn read_actions(results_dir: &Path, run_id: &str) -> Result<Vec<ActionRecord>> {
    existing_run(results_dir, run_id)?;
    let path = paths::action_log_path(results_dir, run_id);
    if !path.exists() {
        return Ok(Vec::new());
    }
    std::fs::read_to_string(&path)?
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(LoopError::from))
        .collect()
}
