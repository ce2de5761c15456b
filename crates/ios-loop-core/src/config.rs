use crate::error::{LoopError, Result};
use crate::paths;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use std::sync::OnceLock;

/// Sentinel for `simulator.udid` meaning "pick a booted simulator".
pub const AUTO_UDID: &str = "auto";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// SimulatorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub device: String,
    pub runtime: String,
    pub udid: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            device: "iPhone 16 Pro".to_string(),
            runtime: "iOS 18.2".to_string(),
            udid: AUTO_UDID.to_string(),
        }
    }
}

impl SimulatorConfig {
    pub fn is_auto(&self) -> bool {
        self.udid == AUTO_UDID
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub bundle_id: String,
    pub extension_bundle_ids: Vec<String>,
    pub build_command: String,
    /// Empty means no app group is configured.
    pub app_group_id: String,
}

pub const PLACEHOLDER_BUNDLE_ID: &str = "com.example.app";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bundle_id: PLACEHOLDER_BUNDLE_ID.to_string(),
            extension_bundle_ids: Vec::new(),
            build_command: "xcodebuild -scheme App -destination \
                            'platform=iOS Simulator,name=iPhone 16 Pro' build"
                .to_string(),
            app_group_id: String::new(),
        }
    }
}

impl AppConfig {
    pub fn app_group(&self) -> Option<&str> {
        let g = self.app_group_id.trim();
        (!g.is_empty()).then_some(g)
    }
}

// ---------------------------------------------------------------------------
// IdbConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdbConfig {
    pub action_delay_ms: u64,
    pub describe_timeout_ms: u64,
}

impl Default for IdbConfig {
    fn default() -> Self {
        Self {
            action_delay_ms: 500,
            describe_timeout_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// LoopConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_steps_per_goal: u32,
    pub max_retries_per_action: u32,
    pub verification_timeout_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps_per_goal: 30,
            max_retries_per_action: 2,
            verification_timeout_ms: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// MaestroConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaestroConfig {
    pub output_dir: String,
    pub prefer_selectors: bool,
    pub include_ai_assertions: bool,
}

impl Default for MaestroConfig {
    fn default() -> Self {
        Self {
            output_dir: ".maestro/generated".to_string(),
            prefer_selectors: true,
            include_ai_assertions: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ArtifactsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    pub results_dir: String,
    pub keep_last_n_runs: usize,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            results_dir: ".ios-agentic-loop/runs".to_string(),
            keep_last_n_runs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub simulator: SimulatorConfig,
    pub app: AppConfig,
    pub idb: IdbConfig,
    #[serde(rename = "loop")]
    pub agent_loop: LoopConfig,
    pub maestro: MaestroConfig,
    pub artifacts: ArtifactsConfig,
}

impl Config {
    /// Load the config for `root`, honouring `$IOS_AGENTIC_LOOP_CONFIG`.
    pub fn load(root: &Path) -> Result<Self> {
        Self::load_from(&paths::config_path(root))
    }

    /// A missing file yields the built-in defaults; a present file is
    /// deep-merged over them.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data, path)
    }

    /// Merge a YAML document over the defaults. `origin` is only used in
    /// error messages.
    pub fn parse(data: &str, origin: &Path) -> Result<Self> {
        let config_err = |message: String| LoopError::Config {
            path: origin.to_path_buf(),
            message,
        };

        let loaded: Value = serde_yaml::from_str(data).map_err(|e| config_err(e.to_string()))?;
        if !matches!(loaded, Value::Mapping(_) | Value::Null) {
            return Err(config_err("top level must be a mapping".to_string()));
        }

        let defaults = serde_yaml::to_value(Self::default())?;
        let merged = deep_merge(defaults, loaded);
        serde_yaml::from_value(merged).map_err(|e| config_err(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut warn = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message,
            })
        };

        if self.app.bundle_id == PLACEHOLDER_BUNDLE_ID {
            warn(format!(
                "app.bundle_id is still the placeholder '{PLACEHOLDER_BUNDLE_ID}'"
            ));
        }

        if !self.simulator.is_auto() && !uuid_re().is_match(&self.simulator.udid) {
            warn(format!(
                "simulator.udid '{}' does not look like a simulator UDID (or 'auto')",
                self.simulator.udid
            ));
        }

        if self.artifacts.keep_last_n_runs == 0 {
            warn("artifacts.keep_last_n_runs=0 deletes every run on cleanup".to_string());
        }

        if self.idb.action_delay_ms > 5_000 {
            warn(format!(
                "idb.action_delay_ms={} (>5000 is unusually slow)",
                self.idb.action_delay_ms
            ));
        }

        if self.agent_loop.max_steps_per_goal == 0 {
            warn("loop.max_steps_per_goal=0 leaves no step budget".to_string());
        }

        for ext in &self.app.extension_bundle_ids {
            if !ext.starts_with(&self.app.bundle_id) {
                warn(format!(
                    "extension bundle id '{ext}' is not prefixed by app.bundle_id '{}'",
                    self.app.bundle_id
                ));
            }
        }

        if self.idb.describe_timeout_ms == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "idb.describe_timeout_ms=0 makes every describe call time out"
                    .to_string(),
            });
        }

        warnings
    }
}

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}$")
            .expect("valid regex")
    })
}

// ---------------------------------------------------------------------------
// Deep merge
// ---------------------------------------------------------------------------

/// Merge `overlay` over `base`.
///
/// - mapping over mapping: merge key by key, recursively
/// - `null` in the overlay: keep the base value
/// - anything else (sequence, scalar, type mismatch): overlay replaces
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(yaml: &str) -> Result<Config> {
        Config::parse(yaml, Path::new("test.yaml"))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load_from(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn empty_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ios-agentic-loop.yaml");
        std::fs::write(&path, "").unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
        assert_eq!(parse("# only a comment\n").unwrap(), Config::default());
    }

    #[test]
    fn single_nested_field_keeps_siblings() {
        let cfg = parse("idb:\n  action_delay_ms: 1200\n").unwrap();
        assert_eq!(cfg.idb.action_delay_ms, 1200);
        assert_eq!(cfg.idb.describe_timeout_ms, 10_000);

        let mut expected = Config::default();
        expected.idb.action_delay_ms = 1200;
        assert_eq!(cfg, expected);
    }

    #[test]
    fn arrays_are_replaced_not_concatenated() {
        let mut base = Config::default();
        base.app.extension_bundle_ids = vec!["a".into(), "b".into()];
        let merged = deep_merge(
            serde_yaml::to_value(&base).unwrap(),
            serde_yaml::from_str("app:\n  extension_bundle_ids: [c]\n").unwrap(),
        );
        let cfg: Config = serde_yaml::from_value(merged).unwrap();
        assert_eq!(cfg.app.extension_bundle_ids, vec!["c".to_string()]);
    }

    #[test]
    fn loop_section_uses_yaml_keyword_name() {
        let cfg = parse("loop:\n  max_retries_per_action: 5\n").unwrap();
        assert_eq!(cfg.agent_loop.max_retries_per_action, 5);
        assert_eq!(cfg.agent_loop.max_steps_per_goal, 30);
        let yaml = cfg.to_yaml().unwrap();
        assert!(yaml.contains("loop:"));
    }

    #[test]
    fn null_section_counts_as_unset() {
        let cfg = parse("idb:\nmaestro:\n  prefer_selectors: false\n").unwrap();
        assert_eq!(cfg.idb, IdbConfig::default());
        assert!(!cfg.maestro.prefer_selectors);
        assert_eq!(cfg.maestro.output_dir, ".maestro/generated");
    }

    #[test]
    fn invalid_yaml_is_config_error() {
        let err = parse("simulator: [unclosed\n").unwrap_err();
        assert!(matches!(err, LoopError::Config { .. }));
        assert!(err.to_string().contains("test.yaml"));
    }

    #[test]
    fn wrong_type_is_config_error() {
        let err = parse("idb:\n  action_delay_ms: soon\n").unwrap_err();
        assert!(matches!(err, LoopError::Config { .. }));
    }

    #[test]
    fn scalar_document_is_config_error() {
        let err = parse("just a string\n").unwrap_err();
        assert!(matches!(err, LoopError::Config { .. }));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = parse("extra:\n  thing: 1\nsimulator:\n  device: iPhone 15\n").unwrap();
        assert_eq!(cfg.simulator.device, "iPhone 15");
        assert_eq!(cfg.simulator.udid, AUTO_UDID);
    }

    #[test]
    fn merge_keeps_keys_missing_from_overlay() {
        let base: Value = serde_yaml::from_str("a:\n  b: 1\n  c: 2\nd: 3\n").unwrap();
        let overlay: Value = serde_yaml::from_str("a:\n  b: 9\n").unwrap();
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["a"]["b"], Value::from(9));
        assert_eq!(merged["a"]["c"], Value::from(2));
        assert_eq!(merged["d"], Value::from(3));
    }

    #[test]
    fn merge_type_mismatch_replaces() {
        let base: Value = serde_yaml::from_str("a:\n  b: 1\n").unwrap();
        let overlay: Value = serde_yaml::from_str("a: 5\n").unwrap();
        assert_eq!(deep_merge(base, overlay)["a"], Value::from(5));
    }

    #[test]
    fn validate_defaults_warns_about_placeholder_only() {
        let warnings = Config::default().validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("placeholder"));
    }

    #[test]
    fn validate_flags_malformed_udid() {
        let mut cfg = Config::default();
        cfg.app.bundle_id = "com.acme.shop".into();
        cfg.simulator.udid = "EXPLICIT-UDID".into();
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("does not look like a simulator UDID")));

        cfg.simulator.udid = "8A2F1C3E-1111-4B6E-9D0A-0123456789AB".into();
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn validate_flags_zero_retention_and_foreign_extension() {
        let mut cfg = Config::default();
        cfg.app.bundle_id = "com.acme.shop".into();
        cfg.artifacts.keep_last_n_runs = 0;
        cfg.app.extension_bundle_ids = vec!["com.other.widget".into()];
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.message.contains("keep_last_n_runs=0")));
        assert!(warnings.iter().any(|w| w.message.contains("com.other.widget")));
    }

    #[test]
    fn validate_zero_describe_timeout_is_error_level() {
        let mut cfg = Config::default();
        cfg.idb.describe_timeout_ms = 0;
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("describe_timeout_ms")));
    }

    #[test]
    fn app_group_is_optional() {
        let mut app = AppConfig::default();
        assert!(app.app_group().is_none());
        app.app_group_id = "group.com.acme.shop".into();
        assert_eq!(app.app_group(), Some("group.com.acme.shop"));
    }
}
