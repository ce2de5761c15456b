use crate::output::{print_json, print_table};
use ios_loop_core::prereq;

pub fn run(json: bool) -> anyhow::Result<()> {
    let report = prereq::check_all();
    if json {
        return print_json(&report);
    }

    let rows = report
        .binaries
        .iter()
        .map(|b| {
            let status = if b.found { "ok" } else { "missing" };
            let detail = b
                .path
                .clone()
                .or_else(|| b.install_hint.clone())
                .unwrap_or_default();
            vec![b.name.clone(), status.to_string(), detail]
        })
        .collect();
    print_table(&["BINARY", "STATUS", "PATH / INSTALL"], rows);

    if report.ready {
        println!("\nAll prerequisites found.");
    } else {
        println!("\nSome prerequisites are missing; tools that need them will fail.");
    }
    Ok(())
}
