use crate::output::print_json;
use anyhow::Context;
use ios_loop_core::maestro::parse_report;
use std::io::Read;
use std::path::Path;

/// Parse a saved Maestro report (`-` reads stdin). Exits non-zero when the
/// report records failures.
pub fn run(input: &Path, json: bool) -> anyhow::Result<()> {
    let text = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read report from stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("failed to read {}", input.display()))?
    };

    let result = parse_report(&text)?;

    if json {
        print_json(&result)?;
    } else {
        println!("passed: {}  failed: {}", result.passed, result.failed);
        for f in &result.failures {
            if f.reason.is_empty() {
                println!("  FAIL {}", f.flow);
            } else {
                println!("  FAIL {}: {}", f.flow, f.reason);
            }
        }
    }

    if !result.success {
        anyhow::bail!("maestro run failed ({} of {} flows)", result.failed, result.passed + result.failed);
    }
    Ok(())
}
