// Configuration management for the dimy CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/dimy/config.json
// - Linux: ~/.config/dimy/config.json
// - Windows: %APPDATA%\dimy\config.json
//
// `--config <file>` points every command at a different file instead.

use anyhow::{bail, Context, Result};
use dimy_core::{MatchPolicy, ProtocolConfig};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// UDP port a node broadcasts and listens on
    pub location: u16,

    /// Destination address for outgoing shares
    pub broadcast_ip: Ipv4Addr,

    /// Backend a node uploads to and queries, if any
    pub backend_addr: Option<SocketAddr>,

    /// TCP port the backend listens on
    pub backend_port: u16,

    /// Sled directory for the backend; `<data dir>/filters` when unset
    pub storage_path: Option<String>,

    /// Protocol timings and sizes shared by nodes and backend
    pub protocol: ProtocolConfig,

    #[serde(skip)]
    path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: 50_050,
            broadcast_ip: Ipv4Addr::BROADCAST,
            backend_addr: Some(SocketAddr::from((Ipv4Addr::LOCALHOST, 55_000))),
            backend_port: 55_000,
            storage_path: None,
            protocol: ProtocolConfig::default(),
            path: PathBuf::new(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("dimy");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("dimy");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Get the default config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load the override file if given, the platform default otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load_from(&Self::config_file()?),
        }
    }

    /// Load config from `path`, or create a default one there
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let mut config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .protocol
                .validate()
                .context("Config file holds invalid protocol settings")?;
            config.path = path.to_path_buf();
            Ok(config)
        } else {
            let config = Config {
                path: path.to_path_buf(),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to the file it was loaded from
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&self.path, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set a config value; nothing is saved unless the result validates
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        let protocol = &mut updated.protocol;

        match key {
            "location" => updated.location = value.parse().context("Invalid port number")?,
            "broadcast_ip" => {
                updated.broadcast_ip = value.parse().context("Invalid IPv4 address")?
            }
            "backend_addr" => {
                updated.backend_addr = match value {
                    "none" | "" => None,
                    addr => Some(addr.parse().context("Invalid socket address")?),
                }
            }
            "backend_port" => updated.backend_port = value.parse().context("Invalid port number")?,
            "storage_path" => {
                updated.storage_path = match value {
                    "none" | "" => None,
                    path => Some(path.to_string()),
                }
            }
            "epoch_duration_ms" => {
                protocol.epoch_duration_ms = value.parse().context("Invalid duration")?
            }
            "share_threshold" => protocol.share_threshold = value.parse().context("Invalid threshold")?,
            "share_count" => protocol.share_count = value.parse().context("Invalid share count")?,
            "window_epochs" => protocol.window_epochs = value.parse().context("Invalid epoch count")?,
            "retained_windows" => {
                protocol.retained_windows = value.parse().context("Invalid window count")?
            }
            "bloom_size" => protocol.bloom.size_slots = value.parse().context("Invalid bloom size")?,
            "bloom_hashes" => {
                protocol.bloom.hash_count = value.parse().context("Invalid hash count")?
            }
            "peer_buffer_capacity" => {
                protocol.peer_buffer_capacity = value.parse().context("Invalid capacity")?
            }
            "query_interval_ms" => {
                protocol.query_interval_ms = value.parse().context("Invalid duration")?
            }
            "positive_period_ms" => {
                protocol.positive_period_ms = value.parse().context("Invalid duration")?
            }
            "drop_probability" => {
                protocol.broadcast_drop_probability = value.parse().context("Invalid probability")?
            }
            "tick_interval_ms" => {
                protocol.tick_interval_ms = value.parse().context("Invalid duration")?
            }
            "match_policy" => protocol.match_policy = parse_policy(value)?,
            _ => bail!("Unknown config key: {}", key),
        }

        updated
            .protocol
            .validate()
            .with_context(|| format!("Rejected {} = {}", key, value))?;
        updated.save()?;
        *self = updated;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let p = &self.protocol;
        vec![
            ("location".to_string(), self.location.to_string()),
            ("broadcast_ip".to_string(), self.broadcast_ip.to_string()),
            (
                "backend_addr".to_string(),
                self.backend_addr
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            ),
            ("backend_port".to_string(), self.backend_port.to_string()),
            (
                "storage_path".to_string(),
                self.storage_path.clone().unwrap_or_else(|| "none".to_string()),
            ),
            ("epoch_duration_ms".to_string(), p.epoch_duration_ms.to_string()),
            ("share_threshold".to_string(), p.share_threshold.to_string()),
            ("share_count".to_string(), p.share_count.to_string()),
            ("window_epochs".to_string(), p.window_epochs.to_string()),
            ("retained_windows".to_string(), p.retained_windows.to_string()),
            ("bloom_size".to_string(), p.bloom.size_slots.to_string()),
            ("bloom_hashes".to_string(), p.bloom.hash_count.to_string()),
            ("peer_buffer_capacity".to_string(), p.peer_buffer_capacity.to_string()),
            ("query_interval_ms".to_string(), p.query_interval_ms.to_string()),
            ("positive_period_ms".to_string(), p.positive_period_ms.to_string()),
            ("drop_probability".to_string(), p.broadcast_drop_probability.to_string()),
            ("tick_interval_ms".to_string(), p.tick_interval_ms.to_string()),
            ("match_policy".to_string(), format_policy(p.match_policy)),
        ]
    }
}

/// `subset` or `overlap:<min_bits>`
fn parse_policy(value: &str) -> Result<MatchPolicy> {
    match value.split_once(':') {
        None if value == "subset" => Ok(MatchPolicy::Subset),
        Some(("overlap", bits)) => Ok(MatchPolicy::Overlap {
            min_bits: bits.parse().context("Invalid overlap bit count")?,
        }),
        _ => bail!("Match policy must be 'subset' or 'overlap:<min_bits>'"),
    }
}

fn format_policy(policy: MatchPolicy) -> String {
    match policy {
        MatchPolicy::Subset => "subset".to_string(),
        MatchPolicy::Overlap { min_bits } => format!("overlap:{}", min_bits),
    }
}
