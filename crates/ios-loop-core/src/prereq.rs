//! Detection of the external binaries the tools shell out to.

use serde::{Deserialize, Serialize};

/// Binaries every tool group depends on, with a hint for installing each.
pub const REQUIRED_BINARIES: &[(&str, &str)] = &[
    ("xcrun", "install Xcode and run `xcode-select --install`"),
    ("idb", "pip3 install fb-idb"),
    ("idb_companion", "brew install facebook/fb/idb-companion"),
    ("maestro", "curl -Ls \"https://get.maestro.mobile.dev\" | bash"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryStatus {
    pub name: String,
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteReport {
    pub ready: bool,
    pub binaries: Vec<BinaryStatus>,
}

/// Look up each binary on PATH.
pub fn check(binaries: &[(&str, &str)]) -> PrerequisiteReport {
    let statuses: Vec<BinaryStatus> = binaries
        .iter()
        .map(|(name, hint)| match which::which(name) {
            Ok(p) => BinaryStatus {
                name: name.to_string(),
                found: true,
                path: Some(p.to_string_lossy().into_owned()),
                install_hint: None,
            },
            Err(_) => BinaryStatus {
                name: name.to_string(),
                found: false,
                path: None,
                install_hint: Some(hint.to_string()),
            },
        })
        .collect();
    PrerequisiteReport {
        ready: statuses.iter().all(|s| s.found),
        binaries: statuses,
    }
}

pub fn check_all() -> PrerequisiteReport {
    check(REQUIRED_BINARIES)
}
