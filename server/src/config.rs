use backgammon_execution::TurnConfig;
use serde::{Deserialize, Serialize};
use std::{path::Path, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;

/// Server configuration as read from YAML.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub port: u16,
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,

    pub turn_timeout_ms: u64,
    pub disconnect_grace_ms: u64,
    pub sweep_interval_ms: u64,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u64,
    #[serde(default = "default_request_burst")]
    pub request_burst: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
}

pub struct ValidatedConfig {
    pub port: u16,
    pub log_level: Level,
    pub json_logs: bool,

    pub turn: TurnConfig,
    pub sweep_interval: Duration,
    pub broadcast_capacity: usize,

    pub requests_per_second: u64,
    pub request_burst: u32,
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_requests_per_second() -> u64 {
    50
}

fn default_request_burst() -> u32 {
    100
}

fn non_zero(field: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(value)
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let turn_timeout = non_zero("turn_timeout_ms", self.turn_timeout_ms)?;
        let disconnect_grace = non_zero("disconnect_grace_ms", self.disconnect_grace_ms)?;
        let sweep_interval = non_zero("sweep_interval_ms", self.sweep_interval_ms)?;
        let broadcast_capacity =
            non_zero("broadcast_capacity", self.broadcast_capacity as u64)? as usize;
        let requests_per_second = non_zero("requests_per_second", self.requests_per_second)?;
        let request_burst = non_zero("request_burst", self.request_burst as u64)? as u32;

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        Ok(ValidatedConfig {
            port: self.port,
            log_level,
            json_logs: self.json_logs,
            turn: TurnConfig {
                turn_timeout,
                disconnect_grace,
            },
            sweep_interval: Duration::from_millis(sweep_interval),
            broadcast_capacity,
            requests_per_second,
            request_burst,
        })
    }
}
