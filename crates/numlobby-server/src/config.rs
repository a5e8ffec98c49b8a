use std::time::Duration;

use serde::Deserialize;

use numlobby_core::lobby::{NUMBER_MAX, NUMBER_MIN};

use crate::error::ConfigError;

/// Default config file, read from the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "numlobby.toml";

/// Lobby server configuration, loaded from `numlobby.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub bind_addr: String,
    /// First port tried by the listener scan. `0` lets the OS choose.
    pub port_range_start: u16,
    /// Exclusive end of the listener scan.
    pub port_range_end: u16,
    pub backlog: u32,
    /// Seconds in the join window.
    pub countdown_secs: u32,
    pub tick_interval_ms: u64,
    /// Numbers are drawn from `1..=max_number`.
    pub max_number: u8,
    /// Lines that may queue up for one client before it counts as gone.
    pub outbox_capacity: usize,
    /// How long `run` waits for final notices to flush before returning.
    pub linger_ms: u64,
    /// Fixed seed for reproducible number draws.
    pub rng_seed: Option<u64>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port_range_start: 31416,
            port_range_end: 65535,
            backlog: 10,
            countdown_secs: 20,
            tick_interval_ms: 1000,
            max_number: NUMBER_MAX,
            outbox_capacity: 32,
            linger_ms: 2000,
            rng_seed: None,
        }
    }
}

impl LobbyConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load config from `path` if it exists, then apply env var overrides.
    /// A missing or unparsable file falls back to defaults.
    pub fn load(path: &str) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(cfg) => {
                    tracing::info!(path, "Loaded configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(path, error = %e, "Using default configuration");
                    LobbyConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(path, "No config file found, using defaults");
                LobbyConfig::default()
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `NUMLOBBY_*` overrides. Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("NUMLOBBY_BIND_ADDR")
            && !addr.is_empty()
        {
            self.bind_addr = addr;
        }
        if let Some(val) = lookup("NUMLOBBY_PORT_START")
            && let Ok(n) = val.parse::<u16>()
        {
            self.port_range_start = n;
        }
        if let Some(val) = lookup("NUMLOBBY_PORT_END")
            && let Ok(n) = val.parse::<u16>()
        {
            self.port_range_end = n;
        }
        if let Some(val) = lookup("NUMLOBBY_COUNTDOWN_SECS")
            && let Ok(n) = val.parse::<u32>()
        {
            self.countdown_secs = n;
        }
        if let Some(val) = lookup("NUMLOBBY_RNG_SEED")
            && let Ok(n) = val.parse::<u64>()
        {
            self.rng_seed = Some(n);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "bind_addr {:?} is not an IP address",
                self.bind_addr
            )));
        }
        if self.port_range_start != 0 && self.port_range_start >= self.port_range_end {
            return Err(ConfigError::Invalid(format!(
                "port range {}..{} is empty",
                self.port_range_start, self.port_range_end
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".into()));
        }
        if self.outbox_capacity == 0 {
            return Err(ConfigError::Invalid("outbox_capacity must be > 0".into()));
        }
        if !(NUMBER_MIN..=NUMBER_MAX).contains(&self.max_number) {
            return Err(ConfigError::Invalid(format!(
                "max_number must be within {NUMBER_MIN}..={NUMBER_MAX}"
            )));
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be > 0".into()));
        }
        Ok(())
    }
}
