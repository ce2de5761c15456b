#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use tempfile::TempDir;

fn cli(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ios-agentic-loop").unwrap();
    cmd.current_dir(dir.path())
        .env("IOS_AGENTIC_LOOP_ROOT", dir.path())
        .env_remove("IOS_AGENTIC_LOOP_CONFIG")
        .env_remove("CLAUDE_PLUGIN_ROOT")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &TempDir, yaml: &str) {
    std::fs::write(dir.path().join("ios-agentic-loop.yaml"), yaml).unwrap();
}

const EXPLICIT: &str = "\
simulator:
  udid: 5A1B2C3D-0000-4000-8000-00000000ABCD
app:
  bundle_id: com.acme.shop
";

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn config_show_without_file_prints_defaults() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("device: iPhone 16 Pro"))
        .stdout(predicate::str::contains("action_delay_ms: 500"))
        .stdout(predicate::str::contains("keep_last_n_runs: 10"));
}

#[test]
fn config_show_merges_single_field() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "idb:\n  action_delay_ms: 250\n");
    let out = cli(&dir)
        .args(["--json", "config", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["idb"]["action_delay_ms"], 250);
    assert_eq!(v["idb"]["describe_timeout_ms"], 10000);
    assert_eq!(v["loop"]["max_steps_per_goal"], 30);
    assert_eq!(v["simulator"]["udid"], "auto");
}

#[test]
fn config_env_override_is_honoured() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("custom.yaml"), "app:\n  bundle_id: com.override\n").unwrap();
    cli(&dir)
        .env("IOS_AGENTIC_LOOP_CONFIG", dir.path().join("custom.yaml"))
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bundle_id: com.override"));
}

#[test]
fn config_unparseable_file_fails() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "simulator: [unclosed\n");
    cli(&dir)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("ios-agentic-loop.yaml"));
}

#[test]
fn config_validate_flags_placeholder_bundle_id() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("placeholder"));
}

#[test]
fn config_path_reports_missing_file() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not present"));
}

// ---------------------------------------------------------------------------
// device
// ---------------------------------------------------------------------------

#[test]
fn device_with_explicit_udid_needs_no_simulator() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, EXPLICIT);
    cli(&dir)
        .arg("device")
        .assert()
        .success()
        .stdout("5A1B2C3D-0000-4000-8000-00000000ABCD\n");
}

// ---------------------------------------------------------------------------
// parse-report
// ---------------------------------------------------------------------------

#[test]
fn parse_report_passing_file() {
    let dir = TempDir::new().unwrap();
    let report = dir.path().join("report.txt");
    std::fs::write(&report, "✅ flows/a.yaml\n✅ flows/b.yaml\nPassed: 2, Failed: 0\n").unwrap();
    cli(&dir)
        .args(["--json", "parse-report"])
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"));
}

#[test]
fn parse_report_failure_from_stdin() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["parse-report", "-"])
        .write_stdin("❌ flows/login.yaml - Element not found\nPassed: 0, Failed: 1\n")
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAIL login: Element not found"))
        .stderr(predicate::str::contains("maestro run failed"));
}

#[test]
fn parse_report_without_summary_fails() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["parse-report", "-"])
        .write_stdin("something went wrong\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unparseable output"));
}

// ---------------------------------------------------------------------------
// mcp
// ---------------------------------------------------------------------------

fn responses_by_id(stdout: &[u8]) -> HashMap<i64, Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str::<Value>(l).unwrap())
        .map(|v| (v["id"].as_i64().unwrap_or(-1), v))
        .collect()
}

#[test]
fn mcp_serves_requests_until_stdin_closes() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, EXPLICIT);
    let input = [
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"0"}}}"#,
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"loop_get_config","arguments":{}}}"#,
        r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"loop_start_run","arguments":{"goal":"smoke"}}}"#,
    ]
    .join("\n")
        + "\n";

    let out = cli(&dir)
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let resp = responses_by_id(&out);
    assert_eq!(resp.len(), 4, "notification must not get a response");

    assert_eq!(resp[&1]["result"]["serverInfo"]["name"], "ios-agentic-loop");
    assert_eq!(resp[&2]["result"]["tools"].as_array().unwrap().len(), 22);

    let text = resp[&3]["result"]["content"][0]["text"].as_str().unwrap();
    let config: Value = serde_json::from_str(text).unwrap();
    assert_eq!(config["device_id"], "5A1B2C3D-0000-4000-8000-00000000ABCD");
    assert_eq!(config["config"]["app"]["bundle_id"], "com.acme.shop");

    assert_eq!(resp[&4]["result"]["isError"], false);
    assert!(dir.path().join(".ios-agentic-loop/runs").is_dir());
}

#[test]
fn mcp_reports_protocol_errors_and_keeps_serving() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, EXPLICIT);
    let input = "{not json\n\
                 {\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"bogus\"}\n\
                 {\"jsonrpc\":\"2.0\",\"id\":8,\"method\":\"tools/call\",\"params\":{\"name\":\"maestro_export_flow\",\"arguments\":{\"run_id\":\"run-19990101-000000\"}}}\n";
    let out = cli(&dir)
        .arg("mcp")
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let resp = responses_by_id(&out);
    assert_eq!(resp[&-1]["error"]["code"], -32700);
    assert_eq!(resp[&7]["error"]["code"], -32601);
    assert_eq!(resp[&8]["result"]["isError"], true);
}

#[test]
fn mcp_startup_fails_on_bad_config() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "- just\n- a list\n");
    cli(&dir)
        .arg("mcp")
        .write_stdin("")
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn mcp_invalid_utf8_line_is_a_parse_error_not_a_crash() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, EXPLICIT);
    let mut input = b"\xff\xfe\n".to_vec();
    input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n");
    let out = cli(&dir)
        .arg("mcp")
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let resp = responses_by_id(&out);
    assert_eq!(resp[&-1]["error"]["code"], -32700);
    assert_eq!(resp[&2]["result"], serde_json::json!({}));
}

#[test]
fn mcp_non_object_json_is_an_invalid_request() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, EXPLICIT);
    let out = cli(&dir)
        .arg("mcp")
        .write_stdin("42\n[]\n\"x\"\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines: Vec<Value> = String::from_utf8_lossy(&out)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    for v in lines {
        assert_eq!(v["error"]["code"], -32600);
        assert!(v["id"].is_null());
    }
}
