//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest payload the 31-bit frame length field can express.
pub const MAX_FRAME_LENGTH: u32 = 0x7FFF_FFFF;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Network/transport settings.
    pub network: NetworkConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Which carrier a session runs over.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportKind {
    /// Reliable framed stream to a remote server.
    #[default]
    Tcp,
    /// Unreliable datagrams to a remote server.
    Udp,
    /// In-process channel to an embedded singleplayer server.
    Loopback,
}

/// Network/transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address for multiplayer.
    pub server_address: String,
    /// Server port.
    pub server_port: u16,
    /// Carrier used for the session.
    pub transport: TransportKind,
    /// TCP connect timeout in milliseconds (0 = wait for the OS).
    pub connect_timeout_ms: u64,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: u32,
    /// Bytes requested from the socket per TCP read.
    pub read_buffer_size: usize,
    /// Growth step of the TCP reassembly buffer in bytes.
    pub ring_growth_step: usize,
    /// UDP receive buffer in bytes.
    pub max_datagram_size: usize,
    /// Disable Nagle's algorithm.
    pub tcp_nodelay: bool,
    /// TCP keepalive idle time in seconds (0 = disabled).
    pub keepalive_secs: u64,
    /// Client tick rate (Hz).
    pub tick_rate: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log a traffic snapshot every this many seconds (0 = never).
    pub stats_interval_secs: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 7777,
            transport: TransportKind::Tcp,
            connect_timeout_ms: 10_000,
            max_frame_size: 16 * 1024 * 1024,
            read_buffer_size: 16 * 1024,
            ring_growth_step: 4 * 1024 * 1024,
            max_datagram_size: 65_507,
            tcp_nodelay: true,
            keepalive_secs: 60,
            tick_rate: 20,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stats_interval_secs: 5,
        }
    }
}

impl NetworkConfig {
    /// Connect timeout, or `None` when disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    /// Keepalive idle time, or `None` when keepalive is off.
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }

    /// Duration of one client tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1)))
    }
}

// --- Validation ---

impl Config {
    /// Reject values the transports cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let net = &self.network;
        if net.tick_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "network.tick_rate",
                reason: "must be at least 1".to_string(),
            });
        }
        if net.max_frame_size > MAX_FRAME_LENGTH {
            return Err(ConfigError::InvalidValue {
                field: "network.max_frame_size",
                reason: format!("must not exceed {MAX_FRAME_LENGTH}"),
            });
        }
        if net.read_buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "network.read_buffer_size",
                reason: "must be non-zero".to_string(),
            });
        }
        if net.ring_growth_step == 0 {
            return Err(ConfigError::InvalidValue {
                field: "network.ring_growth_step",
                reason: "must be non-zero".to_string(),
            });
        }
        if net.max_datagram_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "network.max_datagram_size",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
