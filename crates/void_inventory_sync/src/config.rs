//! Replication configuration

use serde::{Deserialize, Serialize};
use void_inventory::config::ConfigError;

/// Configuration shared by authorities and mirrors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Frames buffered per direction of a connection
    pub channel_capacity: usize,

    /// Mirrors apply mutations locally before the authority confirms them
    pub speculate: bool,

    /// Unconfirmed requests a mirror may have outstanding
    pub max_in_flight: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            speculate: true,
            max_in_flight: 64,
        }
    }
}

impl SyncConfig {
    /// Mirrors wait for the authority instead of predicting
    pub fn confirmed_only() -> Self {
        Self {
            speculate: false,
            ..Default::default()
        }
    }

    /// Set connection capacity
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Enable or disable speculation
    pub fn with_speculation(mut self, speculate: bool) -> Self {
        self.speculate = speculate;
        self
    }

    /// Set the in-flight limit
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Parse from TOML
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Write as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = SyncConfig::from_toml_str("max_in_flight = 3").unwrap();
        assert_eq!(config.max_in_flight, 3);
        assert_eq!(config.channel_capacity, 256);
        assert!(config.speculate);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SyncConfig::confirmed_only().with_channel_capacity(0);
        assert_eq!(config.channel_capacity, 1);
        let text = config.to_toml_string().unwrap();
        assert_eq!(SyncConfig::from_toml_str(&text).unwrap(), config);
    }
}
