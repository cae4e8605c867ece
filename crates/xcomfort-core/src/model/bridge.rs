use serde::{Deserialize, Serialize};

/// What the bridge reports about itself after login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeInfo {
    /// Hardware identifier from the handshake.
    pub device_id: String,
    pub home_id: Option<String>,
    pub name: Option<String>,
    pub bridge_type: Option<i64>,
    pub firmware_build: Option<i64>,
    /// Release name for `firmware_build`, or `"Unknown (build N)"`.
    pub firmware_version: Option<String>,
    pub scene_count: usize,
}

/// Firmware build numbers and the releases they shipped in.
// TODO: confirm the build list against Eaton's bridge release notes.
const FIRMWARE_BUILDS: &[(i64, &str)] = &[
    (8, "1.4.0"),
    (10, "1.5.0"),
    (12, "1.6.0"),
    (14, "1.7.0"),
    (16, "1.8.0"),
    (18, "1.9.0"),
];

/// Release name for a firmware build number.
pub fn firmware_version(build: i64) -> String {
    FIRMWARE_BUILDS
        .iter()
        .find(|(known, _)| *known == build)
        .map_or_else(|| format!("Unknown (build {build})"), |(_, version)| (*version).to_owned())
}
