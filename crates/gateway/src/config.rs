//! Gateway configuration
//!
//! Loaded from JSON (file or string) or built in code, validated once and
//! handed to [`Gateway::new`](crate::Gateway::new).
//!
//! ```json
//! {
//!   "url": "wss://gateway.example.com",
//!   "token": "Bot abc",
//!   "shard": [0, 1],
//!   "intents": 513
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::event::registry::DEFAULT_LISTENER_CAPACITY;
use crate::messages::ConnectionProperties;

/// Protocol version appended to the connect URL
pub const DEFAULT_VERSION: u8 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base gateway URL, used whenever there is no session to resume
    pub url: String,

    /// Credentials sent with identify and resume
    pub token: String,

    #[serde(default = "default_version")]
    pub version: u8,

    /// Ask the server for compressed payloads
    #[serde(default)]
    pub compress: bool,

    /// `[shard_index, shard_count]`
    #[serde(default = "default_shard")]
    pub shard: [u32; 2],

    /// Declared capability flags
    #[serde(default)]
    pub intents: u64,

    #[serde(default)]
    pub properties: ConnectionProperties,

    #[serde(default)]
    pub large_threshold: Option<u32>,

    /// Queue length of each subscriber feed
    #[serde(default = "default_listener_capacity")]
    pub listener_capacity: usize,

    /// Bound on each handshake step
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_version() -> u8 {
    DEFAULT_VERSION
}

fn default_shard() -> [u32; 2] {
    [0, 1]
}

fn default_listener_capacity() -> usize {
    DEFAULT_LISTENER_CAPACITY
}

fn default_handshake_timeout_ms() -> u64 {
    30_000
}

impl GatewayConfig {
    /// Config with defaults for everything but the URL and token
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        GatewayConfig {
            url: url.into(),
            token: token.into(),
            version: default_version(),
            compress: false,
            shard: default_shard(),
            intents: 0,
            properties: ConnectionProperties::default(),
            large_threshold: None,
            listener_capacity: default_listener_capacity(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }

    /// Load and validate configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_shard(mut self, index: u32, count: u32) -> Self {
        self.shard = [index, count];
        self
    }

    pub fn with_intents(mut self, intents: u64) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("url must not be empty".to_string()));
        }
        if url::Url::parse(&self.url).is_err() {
            return Err(ConfigError::Invalid(format!("url {:?} is not absolute", self.url)));
        }
        if self.token.is_empty() {
            return Err(ConfigError::Invalid("token must not be empty".to_string()));
        }
        let [index, count] = self.shard;
        if count == 0 || index >= count {
            return Err(ConfigError::Invalid(format!(
                "shard index {} out of range for {} shards",
                index, count
            )));
        }
        if self.listener_capacity == 0 {
            return Err(ConfigError::Invalid(
                "listener_capacity must be positive".to_string(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "handshake_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config =
            GatewayConfig::from_json(r#"{"url":"wss://gw.example.com","token":"t"}"#).unwrap();
        assert_eq!(config.version, 10);
        assert_eq!(config.shard, [0, 1]);
        assert!(!config.compress);
        assert_eq!(config.listener_capacity, DEFAULT_LISTENER_CAPACITY);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(30));
        assert_eq!(config.properties.browser, "herald");
    }

    #[test]
    fn test_shard_out_of_range() {
        let err = GatewayConfig::new("wss://gw.example.com", "t")
            .with_shard(2, 2)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_token_rejected() {
        let result = GatewayConfig::from_json(r#"{"url":"wss://gw.example.com","token":""}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_relative_url_rejected() {
        assert!(GatewayConfig::new("gateway", "t").validate().is_err());
    }

    #[test]
    fn test_oversized_handshake_timeout_saturates() {
        let config = GatewayConfig::new("wss://gw.example.com", "t")
            .with_handshake_timeout(Duration::MAX);
        assert_eq!(config.handshake_timeout_ms, u64::MAX);
    }

    #[test]
    fn test_parse_error() {
        let result = GatewayConfig::from_json("{not json");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
