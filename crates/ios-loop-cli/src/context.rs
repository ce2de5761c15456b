use anyhow::Context as _;
use ios_loop_core::config::Config;
use ios_loop_core::device::DeviceResolver;
use ios_loop_core::error::CommandError;
use ios_loop_core::exec::{CommandOutput, CommandRunner, Invocation};
use ios_loop_core::paths;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything a tool handler needs, built once before the server starts
/// reading requests and shared read-only afterwards.
pub struct ServerContext {
    pub root: PathBuf,
    pub config: Config,
    pub device_id: String,
    pub plugin_root: PathBuf,
    pub runner: Arc<dyn CommandRunner>,
}

impl ServerContext {
    pub fn new(
        root: &Path,
        config: Config,
        device_id: String,
        plugin_root: PathBuf,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            device_id,
            plugin_root,
            runner,
        }
    }

    /// Load config and resolve the target simulator. Either failing is fatal.
    pub async fn build(root: &Path, runner: Arc<dyn CommandRunner>) -> anyhow::Result<Self> {
        let config_path = paths::config_path(root);
        let config = Config::load_from(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?;
        let resolver = DeviceResolver::new(runner.clone());
        let device_id = resolver
            .resolve(&config.simulator)
            .await
            .context("failed to resolve target simulator")?;
        Ok(Self::new(
            root,
            config,
            device_id,
            paths::plugin_root(root),
            runner,
        ))
    }

    pub fn results_dir(&self) -> PathBuf {
        paths::resolve(&self.root, &self.config.artifacts.results_dir)
    }

    pub fn flow_output_dir(&self) -> PathBuf {
        paths::resolve(&self.root, &self.config.maestro.output_dir)
    }

    pub fn action_delay(&self) -> Duration {
        Duration::from_millis(self.config.idb.action_delay_ms)
    }

    pub fn describe_timeout(&self) -> Duration {
        Duration::from_millis(self.config.idb.describe_timeout_ms)
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_millis(self.config.agent_loop.verification_timeout_ms)
    }

    /// Let UI animations finish after an action.
    pub async fn settle(&self) {
        let delay = self.action_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn run(&self, inv: &Invocation) -> Result<CommandOutput, CommandError> {
        let started = Instant::now();
        let result = self.runner.run(inv).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::debug!(program = %inv.program, args = ?inv.args, elapsed_ms, "command ok"),
            Err(e) => tracing::warn!(
                program = %inv.program,
                args = ?inv.args,
                elapsed_ms,
                status = %e.exit_status(),
                "command failed"
            ),
        }
        result
    }

    /// Run with up to `loop.max_retries_per_action` retries. A missing
    /// binary or a timeout is returned immediately.
    pub async fn run_with_retry(&self, inv: &Invocation) -> Result<CommandOutput, CommandError> {
        let retries = self.config.agent_loop.max_retries_per_action;
        let mut attempt = 0;
        loop {
            match self.run(inv).await {
                Ok(out) => return Ok(out),
                Err(e) if e.is_not_found() || e.is_timeout() || attempt >= retries => {
                    return Err(e)
                }
                Err(e) => {
                    attempt += 1;
                    tracing::info!(
                        program = %inv.program,
                        attempt,
                        retries,
                        error = %e,
                        "retrying"
                    );
                    self.settle().await;
                }
            }
        }
    }
}
