//! Simulator selection.
//!
//! The target simulator is resolved once per process. An explicit
//! `simulator.udid` is returned untouched; the `auto` sentinel triggers a
//! `simctl` listing and a booted-device pick.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::config::SimulatorConfig;
use crate::error::{LoopError, Result};
use crate::exec::{CommandRunner, Invocation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimDevice {
    pub udid: String,
    pub name: String,
    pub state: String,
    #[serde(rename = "isAvailable", default)]
    pub is_available: Option<bool>,
}

impl SimDevice {
    pub fn is_booted(&self) -> bool {
        self.state.eq_ignore_ascii_case("booted")
    }
}

/// `xcrun simctl list devices --json`, keyed by runtime identifier.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimctlListing {
    #[serde(default)]
    pub devices: BTreeMap<String, Vec<SimDevice>>,
}

impl SimctlListing {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| LoopError::UnparseableOutput {
            tool: "simctl list devices".to_string(),
            detail: e.to_string(),
        })
    }

    /// Devices in listing order (runtimes sorted by identifier).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SimDevice)> {
        self.devices
            .iter()
            .flat_map(|(runtime, list)| list.iter().map(move |d| (runtime.as_str(), d)))
    }

    /// First booted device named `name`, else the first booted device.
    pub fn select(&self, name: &str) -> Option<&SimDevice> {
        self.iter()
            .map(|(_, d)| d)
            .find(|d| d.is_booted() && d.name == name)
            .or_else(|| self.iter().map(|(_, d)| d).find(|d| d.is_booted()))
    }
}

pub fn list_invocation() -> Invocation {
    Invocation::new("xcrun").args(["simctl", "list", "devices", "--json"])
}

/// Resolves and memoizes the target device identifier.
pub struct DeviceResolver {
    runner: Arc<dyn CommandRunner>,
    resolved: OnceCell<String>,
}

impl DeviceResolver {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            resolved: OnceCell::new(),
        }
    }

    pub async fn resolve(&self, sim: &SimulatorConfig) -> Result<String> {
        if !sim.is_auto() {
            return Ok(sim.udid.clone());
        }
        let udid = self
            .resolved
            .get_or_try_init(|| self.query(sim))
            .await?;
        Ok(udid.clone())
    }

    async fn query(&self, sim: &SimulatorConfig) -> Result<String> {
        let out = self.runner.run(&list_invocation()).await?;
        let listing = SimctlListing::parse(&out.stdout)?;
        let device = listing
            .select(&sim.device)
            .ok_or_else(|| LoopError::NoBootedSimulator {
                device: sim.device.clone(),
            })?;
        if device.name != sim.device {
            tracing::warn!(
                wanted = %sim.device,
                using = %device.name,
                udid = %device.udid,
                "configured simulator not booted; falling back to first booted device"
            );
        } else {
            tracing::info!(name = %device.name, udid = %device.udid, "resolved simulator");
        }
        Ok(device.udid.clone())
    }

    /// Forget the memoized identifier. Only tests should need this.
    pub fn reset_for_tests(&mut self) {
        self.resolved.take();
    }
}
