//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{BridgeError, Result};
use crate::link::Endpoint;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub custom: CustomConfig,
}

/// Vehicle link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    /// MAVLink connection string (`tcpout:`, `udpin:`, `serial:` ...)
    #[serde(default = "default_address")]
    pub address: String,

    /// Inactivity timeout and reconnect period in seconds, zero never times out
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,

    #[serde(default = "default_source_system")]
    pub source_system: u8,

    #[serde(default = "default_source_component")]
    pub source_component: u8,
}

/// Collection fetching and stream request configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Rate requested for all data streams in Hz, zero does not request
    #[serde(default = "default_stream_rate")]
    pub stream_rate: u16,

    /// Extra message streams as message id -> frequency in Hz
    #[serde(default)]
    pub message_intervals: BTreeMap<String, f64>,

    #[serde(default = "default_true")]
    pub fetch_parameters: bool,

    #[serde(default = "default_true")]
    pub fetch_plan: bool,

    #[serde(default = "default_true")]
    pub fetch_fence: bool,

    #[serde(default = "default_true")]
    pub fetch_rally: bool,

    #[serde(default = "default_true")]
    pub fetch_home: bool,

    /// Reset the vehicle's on-board statistics on every connect
    #[serde(default = "default_true")]
    pub reset_statistics: bool,
}

/// Message and parameter filter configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilterConfig {
    /// Comma separated message white list, empty admits every message
    #[serde(default)]
    pub white_message: String,

    #[serde(default)]
    pub black_message: String,

    /// Comma separated parameter white list, empty admits every parameter
    #[serde(default)]
    pub white_parameter: String,

    #[serde(default)]
    pub black_parameter: String,

    /// Drop messages not received for this many seconds, zero never drops
    #[serde(default)]
    pub drop_s: f64,
}

/// Statistics configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StatisticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// User-defined custom data configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CustomConfig {
    /// JSON object merged over the cached custom data at start
    #[serde(default)]
    pub seed: String,

    #[serde(default = "default_true")]
    pub cache: bool,

    #[serde(default = "default_cache_file")]
    pub cache_file: String,

    #[serde(default = "default_flush_interval_s")]
    pub flush_interval_s: u64,
}

// Default value functions
fn default_address() -> String { "tcpout:127.0.0.1:5760".to_string() }
fn default_timeout_s() -> f64 { 5.0 }
fn default_source_system() -> u8 { 255 }
fn default_source_component() -> u8 { 0 }

fn default_stream_rate() -> u16 { 4 }
fn default_true() -> bool { true }

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 2609 }

fn default_cache_file() -> String { "custom.json".to_string() }
fn default_flush_interval_s() -> u64 { 10 }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            timeout_s: default_timeout_s(),
            source_system: default_source_system(),
            source_component: default_source_component(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stream_rate: default_stream_rate(),
            message_intervals: BTreeMap::new(),
            fetch_parameters: true,
            fetch_plan: true,
            fetch_fence: true,
            fetch_rally: true,
            fetch_home: true,
            reset_statistics: true,
        }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CustomConfig {
    fn default() -> Self {
        Self {
            seed: String::new(),
            cache: true,
            cache_file: default_cache_file(),
            flush_interval_s: default_flush_interval_s(),
        }
    }
}

impl SyncConfig {
    /// Parse the configured message intervals into (message id, Hz) pairs
    ///
    /// Entries with a non-numeric id are skipped; `validate` rejects them
    /// before this is reached for a loaded configuration.
    pub fn intervals(&self) -> Vec<(u32, f64)> {
        self.message_intervals
            .iter()
            .filter_map(|(id, hz)| id.trim().parse::<u32>().ok().map(|id| (id, *hz)))
            .collect()
    }
}

/// Split a comma separated name list, ignoring spaces and empty items
///
/// # Examples
///
/// ```
/// use mav_bridge::config::split_names;
///
/// let names = split_names("ATTITUDE, GPS_RAW_INT,,");
/// assert_eq!(names, vec!["ATTITUDE".to_string(), "GPS_RAW_INT".to_string()]);
/// ```
pub fn split_names(list: &str) -> Vec<String> {
    list.replace(' ', "")
        .split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mav_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.link.address.is_empty() {
            return Err(invalid("link address cannot be empty"));
        }
        if let Err(e) = Endpoint::parse(&self.link.address) {
            return Err(invalid(e));
        }

        if !self.link.timeout_s.is_finite() || self.link.timeout_s < 0.0 {
            return Err(invalid("timeout_s must be a finite number >= 0"));
        }

        if !self.filter.drop_s.is_finite() || self.filter.drop_s < 0.0 {
            return Err(invalid("drop_s must be a finite number >= 0"));
        }

        for (id, hz) in &self.sync.message_intervals {
            if id.trim().parse::<u32>().is_err() {
                return Err(invalid(format!("message_intervals key '{}' is not a message id", id)));
            }
            if !hz.is_finite() || *hz <= 0.0 {
                return Err(invalid(format!("message_intervals rate for '{}' must be > 0", id)));
            }
        }

        if self.http.host.is_empty() {
            return Err(invalid("http host cannot be empty"));
        }

        if self.custom.cache && self.custom.cache_file.is_empty() {
            return Err(invalid("cache_file cannot be empty when cache is enabled"));
        }

        if self.custom.flush_interval_s == 0 || self.custom.flush_interval_s > 3600 {
            return Err(invalid("flush_interval_s must be between 1 and 3600"));
        }

        if !self.custom.seed.trim().is_empty() {
            match serde_json::from_str::<serde_json::Value>(&self.custom.seed) {
                Ok(serde_json::Value::Object(_)) => {}
                _ => return Err(invalid("custom seed must be a JSON object")),
            }
        }

        Ok(())
    }
}

fn invalid(message: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(message))
}
