//! Node configuration, loaded from `~/.sparvio/config.toml`.
//!
//! Every section is optional. Missing keys take their defaults, and a
//! missing or broken file yields [`SspConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SspConfig {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub rpc: RpcConfig,
    pub log: LogConfig,
    /// Links to open at startup.
    pub links: Vec<LinkConfig>,
}

/// Identity of the local component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name announced in `cinfo`.
    pub name: String,
    /// Serial number. 0 means "pick a random one at startup".
    pub serial: u32,
    /// If > 0 the node competes to become central.
    pub base_priority: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "ssp-node".to_string(),
            serial: 0,
            base_priority: 0,
        }
    }
}

impl NodeConfig {
    /// Returns the configured serial, or a random nonzero one.
    pub fn resolved_serial(&self) -> u32 {
        if self.serial != 0 {
            return self.serial;
        }
        // u32::MAX is the Uint32 null sentinel
        rand::random::<u32>().clamp(1, u32::MAX - 1)
    }
}

/// Timing of the periodic neighbor probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Delay before the first probe, giving links time to connect. Default: 1000.
    pub first_probe_ms: u64,
    /// Interval between later probes. Default: 5000.
    pub probe_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            first_probe_ms: 1000,
            probe_interval_ms: 5000,
        }
    }
}

/// Timeouts of the remote-call helpers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub get_timeout_ms: u64,
    pub set_timeout_ms: u64,
    pub call_timeout_ms: u64,
    /// Extra attempts after the first call times out.
    pub call_retries: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            get_timeout_ms: 3000,
            set_timeout_ms: 1000,
            call_timeout_ms: 3000,
            call_retries: 0,
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Transport of a configured link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Serial,
    Udp,
}

/// Line discipline of a configured link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Hex,
    Ascii,
}

/// One `[[links]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub kind: LinkKind,
    #[serde(default)]
    pub protocol: FrameFormat,
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Local UDP port to receive on.
    #[serde(default)]
    pub rx_port: Option<u16>,
    /// Remote UDP port to send to.
    #[serde(default)]
    pub tx_port: Option<u16>,
    #[serde(default = "default_true")]
    pub probe_automatically: bool,
}

fn default_baud() -> u32 {
    115_200
}

fn default_true() -> bool {
    true
}

/// Load configuration from disk, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> SspConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<SspConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
    }

    SspConfig::default()
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    sparvio_home().join("config.toml")
}

/// Get the default Sparvio home directory.
pub fn sparvio_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".sparvio")
}
