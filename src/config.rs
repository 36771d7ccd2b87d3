//! Configuration for NadiIO
//!
//! Loads configuration from a TOML file. Every key has a default, so an
//! empty file (or no file at all) yields a usable configuration pointing at
//! a streaming server on localhost.

use crate::error::{Error, Result};
use crate::protocol::{ChannelKind, SubscriptionSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Streaming server address
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server host (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,

    /// Server TCP port (default: 28000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// TCP connect timeout in milliseconds (default: 5000)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Timing and buffer limits for the line protocol
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    /// Bounded wait for one control response (default: 3000)
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// Socket read timeout; bounds how long a stop request waits (default: 250)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Silence while streaming that counts as a dead stream (default: 3000)
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_ms: u64,

    /// Bytes requested per socket read (default: 4096)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Longest accepted line before the stream is declared broken (default: 8192)
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

/// Wristband selection
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Device id as reported by `device_list`; first listed device if absent
    #[serde(default)]
    pub id: Option<String>,
}

/// Channels to subscribe
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_enabled")]
    pub accel: bool,
    #[serde(default = "default_enabled")]
    pub bvp: bool,
    #[serde(default = "default_enabled")]
    pub gsr: bool,
    #[serde(default = "default_enabled")]
    pub ibi: bool,
    #[serde(default = "default_enabled")]
    pub heart_rate: bool,
    #[serde(default = "default_enabled")]
    pub temperature: bool,
}

/// CSV output location
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Root directory for session folders (default: data)
    #[serde(default = "default_output_dir")]
    pub directory: String,

    /// Session folder name (default: Experiment_1)
    #[serde(default = "default_subject_id")]
    pub subject_id: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    28000
}
fn default_connect_timeout() -> u64 {
    5000
}
fn default_response_timeout() -> u64 {
    3000
}
fn default_read_timeout() -> u64 {
    250
}
fn default_stall_timeout() -> u64 {
    3000
}
fn default_buffer_size() -> usize {
    4096
}
fn default_max_line_len() -> usize {
    crate::protocol::framer::DEFAULT_MAX_LINE_LEN
}
fn default_enabled() -> bool {
    true
}
fn default_output_dir() -> String {
    "data".to_string()
}
fn default_subject_id() -> String {
    "Experiment_1".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout(),
            read_timeout_ms: default_read_timeout(),
            stall_timeout_ms: default_stall_timeout(),
            buffer_size: default_buffer_size(),
            max_line_len: default_max_line_len(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            accel: true,
            bvp: true,
            gsr: true,
            ibi: true,
            heart_rate: true,
            temperature: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            subject_id: default_subject_id(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ProtocolConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Reject values that would make the stream loop misbehave
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::Config("protocol.buffer_size must be > 0".into()));
        }
        if self.max_line_len == 0 {
            return Err(Error::Config("protocol.max_line_len must be > 0".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(Error::Config("protocol.read_timeout_ms must be > 0".into()));
        }
        if self.stall_timeout_ms < self.read_timeout_ms {
            return Err(Error::Config(format!(
                "protocol.stall_timeout_ms ({}) must be >= read_timeout_ms ({})",
                self.stall_timeout_ms, self.read_timeout_ms
            )));
        }
        Ok(())
    }
}

impl ChannelsConfig {
    /// Enabled channels as a subscription set
    pub fn subscriptions(&self) -> SubscriptionSet {
        let mut set = SubscriptionSet::new();
        set.set(ChannelKind::Accel, self.accel);
        set.set(ChannelKind::Bvp, self.bvp);
        set.set(ChannelKind::Gsr, self.gsr);
        set.set(ChannelKind::Ibi, self.ibi);
        set.set(ChannelKind::HeartRate, self.heart_rate);
        set.set(ChannelKind::Temperature, self.temperature);
        set
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use nadi_io::config::Config;
    ///
    /// let config = Config::load("nadi.toml")?;
    /// # Ok::<(), nadi_io::Error>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.protocol.validate()?;
        Ok(config)
    }

    /// Full server address for connection
    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
