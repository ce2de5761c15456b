use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File and environment constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "ios-agentic-loop.yaml";
pub const CONFIG_ENV: &str = "IOS_AGENTIC_LOOP_CONFIG";
pub const PLUGIN_ROOT_ENV: &str = "CLAUDE_PLUGIN_ROOT";

pub const RUN_PREFIX: &str = "run-";
pub const RUN_META_FILE: &str = "run.yaml";
pub const ACTION_LOG_FILE: &str = "actions.jsonl";
pub const SCREENSHOTS_DIR: &str = "screenshots";
pub const MAESTRO_REPORT_FILE: &str = "maestro-report.txt";
pub const BUNDLED_FLOWS_DIR: &str = "flows";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Config file location: `$IOS_AGENTIC_LOOP_CONFIG` if set, otherwise
/// `ios-agentic-loop.yaml` under `root`.
pub fn config_path(root: &Path) -> PathBuf {
    config_path_with(root, std::env::var(CONFIG_ENV).ok().as_deref())
}

pub fn config_path_with(root: &Path, env_override: Option<&str>) -> PathBuf {
    match env_override {
        Some(p) if !p.trim().is_empty() => {
            let p = PathBuf::from(p);
            if p.is_absolute() {
                p
            } else {
                root.join(p)
            }
        }
        _ => root.join(CONFIG_FILE),
    }
}

/// Plugin installation root, as exported by the host. Falls back to `root`.
pub fn plugin_root(root: &Path) -> PathBuf {
    std::env::var_os(PLUGIN_ROOT_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| root.to_path_buf())
}

/// Resolve a configured directory against the project root.
pub fn resolve(root: &Path, configured: &str) -> PathBuf {
    let p = Path::new(configured);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

pub fn run_dir(results_dir: &Path, run_id: &str) -> PathBuf {
    results_dir.join(run_id)
}

pub fn action_log_path(results_dir: &Path, run_id: &str) -> PathBuf {
    run_dir(results_dir, run_id).join(ACTION_LOG_FILE)
}

pub fn run_meta_path(results_dir: &Path, run_id: &str) -> PathBuf {
    run_dir(results_dir, run_id).join(RUN_META_FILE)
}

/// Screenshot directory: inside the run when one is given, otherwise a
/// shared `screenshots/` folder next to the runs.
pub fn screenshots_dir(results_dir: &Path, run_id: Option<&str>) -> PathBuf {
    match run_id {
        Some(id) => run_dir(results_dir, id).join(SCREENSHOTS_DIR),
        None => results_dir.join(SCREENSHOTS_DIR),
    }
}

/// Run ids become directory names, so they must be a single plain component.
pub fn is_valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id.starts_with(RUN_PREFIX)
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Reduce a user-supplied name to `[A-Za-z0-9_-]`, falling back when
/// nothing usable remains.
pub fn sanitize_file_stem(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}
