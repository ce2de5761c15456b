//! `xcrun simctl` command construction for app lifecycle and logs.

use std::path::Path;

use crate::exec::Invocation;

fn simctl<I, S>(parts: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Invocation::new("xcrun").arg("simctl").args(parts)
}

pub fn launch(udid: &str, bundle_id: &str, args: &[String]) -> Invocation {
    simctl(["launch", udid, bundle_id]).args(args.iter().cloned())
}

pub fn terminate(udid: &str, bundle_id: &str) -> Invocation {
    simctl(["terminate", udid, bundle_id])
}

pub fn install(udid: &str, app_path: &Path) -> Invocation {
    simctl([
        "install".to_string(),
        udid.to_string(),
        app_path.to_string_lossy().into_owned(),
    ])
}

/// Remove a preferences domain inside the simulator. Works for both the
/// app's own defaults (domain = bundle id) and an app-group suite.
pub fn defaults_delete(udid: &str, domain: &str) -> Invocation {
    simctl(["spawn", udid, "defaults", "delete", domain])
}

pub fn keychain_reset(udid: &str) -> Invocation {
    simctl(["keychain", udid, "reset"])
}

pub fn log_show(udid: &str, last: &str, predicate: &str) -> Invocation {
    simctl([
        "spawn", udid, "log", "show", "--style", "compact", "--last", last, "--predicate",
        predicate,
    ])
}

/// Default unified-log predicate scoped to the app's subsystems.
pub fn default_log_predicate(bundle_id: &str) -> String {
    format!("subsystem BEGINSWITH \"{bundle_id}\"")
}

/// `simctl launch` prints `com.acme.shop: 4242`.
pub fn parse_launch_pid(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .filter_map(|l| l.rsplit_once(':'))
        .find_map(|(_, pid)| pid.trim().parse().ok())
}

/// Accepts `30s`, `5m`, `1h`, `2d` or a bare number of seconds, matching
/// what `log show --last` understands.
pub fn is_valid_log_window(last: &str) -> bool {
    let last = last.trim();
    let digits = last.trim_end_matches(['s', 'm', 'h', 'd']);
    let unit_len = last.len() - digits.len();
    !digits.is_empty() && unit_len <= 1 && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_appends_extra_args() {
        let inv = launch("U1", "com.acme.shop", &["-UITest".into(), "1".into()]);
        assert_eq!(
            inv.display(),
            "xcrun simctl launch U1 com.acme.shop -UITest 1"
        );
    }

    #[test]
    fn pid_is_parsed_from_launch_output() {
        assert_eq!(parse_launch_pid("com.acme.shop: 4242\n"), Some(4242));
        assert_eq!(parse_launch_pid(""), None);
        assert_eq!(parse_launch_pid("launched"), None);
    }

    #[test]
    fn reset_commands() {
        assert_eq!(
            defaults_delete("U1", "group.com.acme").display(),
            "xcrun simctl spawn U1 defaults delete group.com.acme"
        );
        assert_eq!(keychain_reset("U1").display(), "xcrun simctl keychain U1 reset");
    }

    #[test]
    fn log_show_carries_predicate_as_one_arg() {
        let pred = default_log_predicate("com.acme.shop");
        let inv = log_show("U1", "5m", &pred);
        assert_eq!(inv.args.last().unwrap(), "subsystem BEGINSWITH \"com.acme.shop\"");
        assert!(inv.display().starts_with("xcrun simctl spawn U1 log show --style compact --last 5m"));
    }

    #[test]
    fn log_windows() {
        for ok in ["5m", "30s", "1h", "2d", "120"] {
            assert!(is_valid_log_window(ok), "{ok}");
        }
        for bad in ["", "m", "5mm", "5 m", "abc", "-1m"] {
            assert!(!is_valid_log_window(bad), "{bad}");
        }
    }
}
