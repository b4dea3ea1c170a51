//! Configuration vault – reads/writes `~/.strikeloop/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use strike_types::HalMode;

/// Persisted installation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket port of the staff console server.
    #[serde(default = "default_staff_port")]
    pub staff_port: u16,

    /// WebSocket port of the passive display server.
    #[serde(default = "default_display_port")]
    pub display_port: u16,

    /// HAL execution mode: simulation, hardware or both.
    #[serde(default)]
    pub hardware_mode: HalMode,

    /// USB vendor id of the target-array controller (lowercase hex).
    #[serde(default = "default_vendor_id")]
    pub serial_vendor_id: String,

    /// Hard ceiling on total session length.
    #[serde(default = "default_session_minutes")]
    pub session_minutes: u64,
}

fn default_staff_port() -> u16 {
    8081
}
fn default_display_port() -> u16 {
    8082
}
fn default_vendor_id() -> String {
    "2341".to_string()
}
fn default_session_minutes() -> u64 {
    15
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staff_port: default_staff_port(),
            display_port: default_display_port(),
            hardware_mode: HalMode::default(),
            serial_vendor_id: default_vendor_id(),
            session_minutes: default_session_minutes(),
        }
    }
}

/// Return the path to `~/.strikeloop/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".strikeloop").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `STRIKE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `STRIKE_STAFF_PORT` | `staff_port` |
/// | `STRIKE_DISPLAY_PORT` | `display_port` |
/// | `STRIKE_HARDWARE_MODE` | `hardware_mode` |
/// | `STRIKE_SERIAL_VENDOR_ID` | `serial_vendor_id` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("STRIKE_STAFF_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.staff_port = port;
    }
    if let Ok(v) = std::env::var("STRIKE_DISPLAY_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.display_port = port;
    }
    if let Ok(v) = std::env::var("STRIKE_HARDWARE_MODE")
        && let Ok(mode) = v.parse::<HalMode>()
    {
        cfg.hardware_mode = mode;
    }
    if let Ok(v) = std::env::var("STRIKE_SERIAL_VENDOR_ID") {
        cfg.serial_vendor_id = v;
    }
}

/// Save the config to disk, creating `~/.strikeloop/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
