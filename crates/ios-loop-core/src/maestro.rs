//! Parsing of Maestro's human-readable test report.
//!
//! Recognised line shapes (one flow per line):
//!
//! ```text
//! ✅ flows/onboarding.yaml
//! ❌ flows/login.yaml - Element not found: "Sign In"
//! [Failed] flows/checkout.yaml (Assertion is false: "Total" is visible)
//! Passed: 1, Failed: 2
//! ```
//!
//! Glyphs are matched as `char`s, so emoji presentation width and
//! variation selectors do not matter. Each new report format variant gets a
//! fixture in the tests below.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LoopError, Result};
use crate::exec::Invocation;

const PASS_GLYPHS: &[char] = &['✅', '✓', '✔'];
const FAIL_GLYPHS: &[char] = &['❌', '✗', '✘', '✖'];
const PASS_TAG: &str = "[Passed]";
const FAIL_TAG: &str = "[Failed]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowFailure {
    pub flow: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaestroRunResult {
    pub success: bool,
    pub passed: u32,
    pub failed: u32,
    /// Flow names of passing lines, in report order.
    pub passed_flows: Vec<String>,
    pub failures: Vec<FlowFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pass,
    Fail,
}

fn summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Passed:\s*(\d+)\s*,\s*Failed:\s*(\d+)").expect("valid regex"))
}

/// Parse a complete report. A report without a summary line is
/// [`LoopError::UnparseableOutput`], never a silent pass.
pub fn parse_report(text: &str) -> Result<MaestroRunResult> {
    let mut passed_flows = Vec::new();
    let mut failures = Vec::new();
    let mut summary: Option<(u32, u32)> = None;

    for line in text.lines() {
        if let Some(caps) = summary_re().captures_iter(line).last() {
            let passed = caps[1].parse().unwrap_or(u32::MAX);
            let failed = caps[2].parse().unwrap_or(u32::MAX);
            summary = Some((passed, failed));
            continue;
        }
        match classify_line(line) {
            Some((Status::Pass, rest)) => {
                let (path, _) = split_path_reason(rest);
                passed_flows.push(flow_name(path));
            }
            Some((Status::Fail, rest)) => {
                let (path, reason) = split_path_reason(rest);
                failures.push(FlowFailure {
                    flow: flow_name(path),
                    reason,
                });
            }
            None => {}
        }
    }

    let Some((passed, failed)) = summary else {
        return Err(LoopError::UnparseableOutput {
            tool: "maestro".to_string(),
            detail: "no 'Passed: N, Failed: M' summary line in report".to_string(),
        });
    };

    let success = failed == 0 && failures.len() == failed as usize;
    Ok(MaestroRunResult {
        success,
        passed,
        failed,
        passed_flows,
        failures,
    })
}

/// Strip the status marker. Returns the text after it.
fn classify_line(line: &str) -> Option<(Status, &str)> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix(PASS_TAG) {
        return Some((Status::Pass, rest));
    }
    if let Some(rest) = trimmed.strip_prefix(FAIL_TAG) {
        return Some((Status::Fail, rest));
    }
    let first = trimmed.chars().next()?;
    let status = if PASS_GLYPHS.contains(&first) {
        Status::Pass
    } else if FAIL_GLYPHS.contains(&first) {
        Status::Fail
    } else {
        return None;
    };
    let rest = trimmed[first.len_utf8()..].trim_start_matches(is_presentation_char);
    Some((status, rest))
}

/// Variation selectors and zero-width joiners that may trail a glyph.
fn is_presentation_char(c: char) -> bool {
    matches!(c, '\u{FE0E}' | '\u{FE0F}' | '\u{200D}')
}

/// Split `path<sep>reason`. Separators: ` - `, ` — `, ` – `, `: ` or a
/// parenthesised tail. The path is everything before the earliest
/// separator, so it may contain spaces.
fn split_path_reason(rest: &str) -> (&str, String) {
    let rest = rest.trim();
    let mut cut: Option<(usize, usize)> = None;
    for sep in [" - ", " \u{2014} ", " \u{2013} ", ": "] {
        if let Some(at) = rest.find(sep) {
            if cut.map_or(true, |(best, _)| at < best) {
                cut = Some((at, sep.len()));
            }
        }
    }
    if rest.ends_with(')') {
        if let Some(at) = rest.find(" (") {
            if cut.map_or(true, |(best, _)| at < best) {
                cut = Some((at, 1));
            }
        }
    }
    let Some((at, len)) = cut else {
        let path = rest.strip_suffix(':').unwrap_or(rest).trim_end();
        return (path, String::new());
    };
    let path = rest[..at].trim_end();
    let mut reason = rest[at + len..].trim();
    if reason.starts_with('(') && reason.ends_with(')') && reason.len() >= 2 {
        reason = &reason[1..reason.len() - 1];
    }
    (path, reason.trim().to_string())
}

/// Maestro suites can run for a long time; bound them generously.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// `maestro --udid <udid> test [-e KEY=VALUE]… <flow>`
pub fn test_invocation(udid: &str, flow: &Path, env: &BTreeMap<String, String>) -> Invocation {
    let mut inv = Invocation::new("maestro")
        .args(["--udid", udid, "test"])
        .timeout(RUN_TIMEOUT);
    for (k, v) in env {
        inv = inv.arg("-e").arg(format!("{k}={v}"));
    }
    inv.arg(flow.to_string_lossy())
}

/// `flows/auth/login.yaml` → `login`.
pub fn flow_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
