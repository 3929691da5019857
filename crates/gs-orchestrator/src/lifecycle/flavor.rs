//! Per-flavor install pipeline details
//!
//! Which script installs a flavor, which arguments it takes, and the
//! `server.properties` the service starts with.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use gs_core::types::{Flavor, Workload};

/// Install script for `flavor`, relative to the script directory
pub fn script_path(flavor: Flavor) -> &'static str {
    match flavor {
        Flavor::Vanilla => "Minecraft/Vanilla/Java/install-mcjava.sh",
        Flavor::Bedrock => "Minecraft/Vanilla/Bedrock/install-mcbedr.sh",
        Flavor::Paper => "Minecraft/Modded/Paper/install-mcpape.sh",
        Flavor::Fabric => "Minecraft/Modded/Fabric/install-mcfabr.sh",
        Flavor::Forge => "Minecraft/Modded/Forge/install-mcforg.sh",
    }
}

/// Absolute-or-relative local path of the install script
pub fn local_script(script_dir: &Path, flavor: Flavor) -> PathBuf {
    script_dir.join(script_path(flavor))
}

/// Java major version a game version needs.
///
/// Versions look like `1.<minor>[.<patch>]`. Anything else, `latest`
/// included, gets the newest runtime.
pub fn java_major(game_version: &str) -> u8 {
    let mut parts = game_version.trim().split('.');
    let (Some("1"), Some(minor)) = (parts.next(), parts.next()) else {
        return 21;
    };
    let Ok(minor) = minor.parse::<u32>() else {
        return 21;
    };
    let patch = match parts.next() {
        Some(p) => match p.parse::<u32>() {
            Ok(p) => p,
            Err(_) => return 21,
        },
        None => 0,
    };

    if minor < 17 {
        8
    } else if minor == 17 {
        16
    } else if minor < 20 || (minor == 20 && patch < 6) {
        17
    } else {
        21
    }
}

/// Arguments passed to the install script
pub fn install_args(flavor: Flavor, download_url: &str, game_version: &str) -> String {
    let mut args = format!(
        "serverfilelink={} type={}",
        gs_core::shell::quote(download_url),
        flavor.tag()
    );
    if flavor.is_java() {
        let _ = write!(args, " java={}", java_major(game_version));
    }
    args
}

/// Keys always present in `server.properties`, with their defaults
pub const DEFAULT_PROPERTIES: [(&str, &str); 9] = [
    ("motd", "A PGSM Minecraft Server"),
    ("view-distance", "10"),
    ("spawn-protection", "16"),
    ("difficulty", "normal"),
    ("hardcore", "false"),
    ("online-mode", "true"),
    ("max-players", "20"),
    ("enable-rcon", "false"),
    ("white-list", "false"),
];

/// Check a settings map can be written as `key=value` lines
pub fn validate_settings(settings: &BTreeMap<String, String>) -> Result<(), String> {
    for (key, value) in settings {
        if key.is_empty() {
            return Err("setting name must not be empty".to_string());
        }
        if key == "server-port" {
            return Err("server-port follows the workload port and cannot be set".to_string());
        }
        if key.contains(|c: char| matches!(c, '=' | '\n' | '\r')) || key.trim() != key {
            return Err(format!("invalid setting name '{}'", key));
        }
        if value.contains(|c: char| matches!(c, '\n' | '\r')) {
            return Err(format!("value of '{}' must be a single line", key));
        }
    }
    Ok(())
}

/// Render `server.properties` for a workload.
///
/// Output is deterministic: the port first, then the default keys in fixed
/// order (overridden by settings), then any other settings sorted by name.
pub fn render_properties(workload: &Workload) -> String {
    let mut out = format!("server-port={}\n", workload.port);

    for (key, default) in DEFAULT_PROPERTIES {
        let value = workload
            .settings
            .get(key)
            .map(String::as_str)
            .unwrap_or(default);
        let _ = writeln!(out, "{}={}", key, value);
    }

    for (key, value) in &workload.settings {
        if key == "server-port" || DEFAULT_PROPERTIES.iter().any(|(k, _)| k == key) {
            continue;
        }
        let _ = writeln!(out, "{}={}", key, value);
    }
    out
}
