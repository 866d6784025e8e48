//! Configuration reading.
//!
//! `syncsound.json` lives in the platform config directory under
//! `syncsound/` unless `SYNCSOUND_CONFIG` points elsewhere. A missing file
//! means defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Upper bound on channels, one sound card each.
pub const MAX_DEVICES: usize = 32;

pub const CONFIG_ENV: &str = "SYNCSOUND_CONFIG";

/// Top-level syncsound.json shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSoundConfig {
    /// Number of logical channels to create.
    pub num_devices: usize,
    pub card: CardInfo,
    /// Tunable overrides by channel index.
    pub channels: Vec<ChannelOverride>,
    pub log_dir: Option<PathBuf>,
    pub simulator: SimulatorConfig,
}

impl Default for SyncSoundConfig {
    fn default() -> Self {
        Self {
            num_devices: 1,
            card: CardInfo::default(),
            channels: Vec::new(),
            log_dir: None,
            simulator: SimulatorConfig::default(),
        }
    }
}

impl SyncSoundConfig {
    /// `num_devices` clamped to `1..=MAX_DEVICES`.
    pub fn device_count(&self) -> usize {
        if self.num_devices > MAX_DEVICES {
            warn!(
                requested = self.num_devices,
                max = MAX_DEVICES,
                "Too many devices requested, clamping"
            );
        }
        self.num_devices.clamp(1, MAX_DEVICES)
    }

    pub fn channel_override(&self, index: usize) -> Option<&ChannelOverride> {
        self.channels.iter().find(|c| c.index == index)
    }
}

/// Identity strings every card reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardInfo {
    pub driver: String,
    pub short_name: String,
    pub long_name: String,
}

impl Default for CardInfo {
    fn default() -> Self {
        Self {
            driver: "MLB_Sync_Driver".to_string(),
            short_name: "MLB_Sync_Audio".to_string(),
            long_name: "Virtual soundcard over MLB synchronous channels".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOverride {
    pub index: usize,
    #[serde(default)]
    pub packets_per_xact: Option<i32>,
    #[serde(default)]
    pub buffer_size: Option<i32>,
}

/// Settings for the virtual bus the simulator drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Interval between bus transfer rounds.
    pub tick_ms: u64,
    pub units_per_channel: u32,
    pub unit_bytes: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 5,
            units_per_channel: 4,
            unit_bytes: 1024,
        }
    }
}

/// Read syncsound.json, falling back to defaults.
pub fn read_config() -> SyncSoundConfig {
    read_config_from(&get_config_path())
}

pub fn read_config_from(path: &Path) -> SyncSoundConfig {
    read_json_file(path).unwrap_or_default()
}

/// `<platform config dir>/syncsound`.
pub fn get_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("syncsound")
}

/// Path to syncsound.json, honouring `SYNCSOUND_CONFIG`.
pub fn get_config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => PathBuf::from(path),
        None => get_data_dir().join("syncsound.json"),
    }
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
