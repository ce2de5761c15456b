//! Retention of run directories under the results dir.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub kept: Vec<String>,
    pub removed: Vec<String>,
}

/// Run directory names under `results_dir`, newest first. Run ids embed a
/// sortable timestamp, so name order is age order.
pub fn list_runs(results_dir: &Path) -> Result<Vec<String>> {
    if !results_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut runs = Vec::new();
    for entry in std::fs::read_dir(results_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if paths::is_valid_run_id(&name) {
            runs.push(name);
        }
    }
    runs.sort_by(|a, b| run_sort_key(b).cmp(&run_sort_key(a)));
    Ok(runs)
}

/// `run-20250314-090000-3` sorts after `run-20250314-090000-2` and after
/// the unsuffixed `run-20250314-090000`.
fn run_sort_key(name: &str) -> (String, u32) {
    let stamp_len = paths::RUN_PREFIX.len() + "YYYYMMDD-HHMMSS".len();
    if name.len() > stamp_len && name.is_char_boundary(stamp_len) {
        let (stamp, suffix) = name.split_at(stamp_len);
        if let Some(n) = suffix.strip_prefix('-').and_then(|s| s.parse().ok()) {
            return (stamp.to_string(), n);
        }
    }
    (name.to_string(), 0)
}

/// Keep the newest `keep` runs and delete the rest. Other files and
/// directories in `results_dir` are left alone.
pub fn enforce_retention(results_dir: &Path, keep: usize) -> Result<CleanupReport> {
    let runs = list_runs(results_dir)?;
    let mut report = CleanupReport::default();
    for (i, run) in runs.into_iter().enumerate() {
        if i < keep {
            report.kept.push(run);
            continue;
        }
        let dir = paths::run_dir(results_dir, &run);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => report.removed.push(run),
            Err(e) => {
                tracing::warn!(run = %run, error = %e, "failed to remove run directory");
                return Err(e.into());
            }
        }
    }
    if !report.removed.is_empty() {
        tracing::info!(
            removed = report.removed.len(),
            kept = report.kept.len(),
            "enforced run retention"
        );
    }
    Ok(report)
}
