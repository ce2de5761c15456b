use crate::output::print_json;
use anyhow::Context;
use ios_loop_core::config::Config;
use ios_loop_core::device::DeviceResolver;
use ios_loop_core::exec::SystemRunner;
use std::path::Path;
use std::sync::Arc;

/// Resolve the target simulator the way the MCP server does at startup.
pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let resolver = DeviceResolver::new(Arc::new(SystemRunner));
    let udid = rt
        .block_on(resolver.resolve(&config.simulator))
        .context("failed to resolve target simulator")?;

    if json {
        print_json(&serde_json::json!({
            "udid": udid,
            "explicit": !config.simulator.is_auto(),
            "device": config.simulator.device,
        }))?;
    } else {
        println!("{udid}");
    }
    Ok(())
}
