//! Application configuration loaded from a JSON file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use rust_decimal::Decimal;
use serde::Deserialize;
use tapstake_protocol::Stars;
use tapstake_room::{RoomConfig, RoomPolicy};
use tapstake_store::StoreConfig;
use tapstake_tick::{IntervalConfig, OverrunPolicy};
use tracing::{info, warn};

/// Default location of the configuration file.
const DEFAULT_CONFIG_PATH: &str = "config/tapstake.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TAPSTAKE_CONFIG_PATH";

/// Why a configuration file could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration for the whole engine.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub rooms: RoomConfig,
    pub store: StoreConfig,
    pub sweep: IntervalConfig,
}

impl AppConfig {
    /// Loads the configuration file, falling back to built-in defaults when
    /// it is missing, unreadable or invalid.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match Self::from_path(&path) {
            Ok(config) => {
                info!(
                    path = %path.display(),
                    fee_tiers = config.rooms.fee_tiers.len(),
                    sweep_secs = config.sweep.interval.as_secs(),
                    "loaded configuration"
                );
                config
            }
            Err(ConfigError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "unusable config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Reads and validates the file at `path`.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Parses and validates a JSON document. Any field left out keeps its
    /// default.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let config: Self = raw.into();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rooms.validate().map_err(ConfigError::Invalid)?;
        if self.store.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url must not be empty".into()));
        }
        if self.store.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1".into()));
        }
        if self.store.lock_timeout.is_zero() {
            return Err(ConfigError::Invalid("lock_timeout_secs must be positive".into()));
        }
        if self.sweep.interval.is_zero() {
            return Err(ConfigError::Invalid("sweep interval_secs must be positive".into()));
        }
        Ok(())
    }
}

/// JSON form of the configuration file. Durations are whole seconds except
/// where the name says otherwise.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    public: RawPolicy,
    private: RawPolicy,
    fee_tiers: Vec<Stars>,
    max_tx_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    key_generation_attempts: Option<u32>,
    /// SQLite URL, e.g. `sqlite://tapstake.db`.
    database_url: Option<String>,
    max_connections: Option<u32>,
    lock_timeout_secs: Option<u64>,
    sweep: RawSweep,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPolicy {
    capacity: Option<usize>,
    min_players: Option<usize>,
    /// `0` turns expiry off.
    expiry_window_secs: Option<u64>,
    /// `0` turns the countdown off.
    preparation_window_secs: Option<u64>,
    organizer_share: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSweep {
    interval_secs: Option<u64>,
    initial_jitter_ms: Option<u64>,
    policy: Option<OverrunPolicy>,
}

impl RawPolicy {
    fn apply(self, policy: &mut RoomPolicy) {
        if let Some(capacity) = self.capacity {
            policy.capacity = capacity;
        }
        if let Some(min) = self.min_players {
            policy.min_players = min;
        }
        if let Some(secs) = self.expiry_window_secs {
            policy.expiry_window = optional_secs(secs);
        }
        if let Some(secs) = self.preparation_window_secs {
            policy.preparation_window = optional_secs(secs);
        }
        if let Some(share) = self.organizer_share {
            policy.organizer_share = share;
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let mut config = Self::default();

        let rooms = &mut config.rooms;
        raw.public.apply(&mut rooms.public);
        raw.private.apply(&mut rooms.private);
        rooms.fee_tiers = raw.fee_tiers;
        if let Some(retries) = raw.max_tx_retries {
            rooms.max_tx_retries = retries;
        }
        if let Some(ms) = raw.retry_backoff_ms {
            rooms.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(attempts) = raw.key_generation_attempts {
            rooms.key_generation_attempts = attempts;
        }

        if let Some(url) = raw.database_url {
            config.store.database_url = url;
        }
        if let Some(max) = raw.max_connections {
            config.store.max_connections = max;
        }
        if let Some(secs) = raw.lock_timeout_secs {
            config.store.lock_timeout = Duration::from_secs(secs);
        }

        let sweep = &mut config.sweep;
        if let Some(secs) = raw.sweep.interval_secs {
            sweep.interval = Duration::from_secs(secs);
        }
        if let Some(ms) = raw.sweep.initial_jitter_ms {
            sweep.initial_jitter = Duration::from_millis(ms);
        }
        if let Some(policy) = raw.sweep.policy {
            sweep.policy = policy;
        }
        config
    }
}

fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Resolves the configuration path, honouring the environment override.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.rooms, RoomConfig::default());
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.sweep.interval, Duration::from_secs(60));
    }

    #[test]
    fn test_fields_override_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "public": { "capacity": 4, "preparation_window_secs": 0 },
                "private": { "expiry_window_secs": 120, "organizer_share": "0.10" },
                "fee_tiers": [20, 50, 100],
                "database_url": "sqlite:///var/lib/tapstake/rooms.db",
                "max_connections": 8,
                "lock_timeout_secs": 2,
                "sweep": { "interval_secs": 15, "policy": "drop" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.rooms.public.capacity, 4);
        assert_eq!(config.rooms.public.preparation_window, None);
        assert_eq!(config.rooms.public.min_players, 2);
        assert_eq!(config.rooms.private.expiry_window, Some(Duration::from_secs(120)));
        assert_eq!(config.rooms.private.organizer_share, Decimal::new(10, 2));
        assert_eq!(config.rooms.fee_tiers, vec![Stars::whole(20), Stars::whole(50), Stars::whole(100)]);
        assert_eq!(config.store.database_url, "sqlite:///var/lib/tapstake/rooms.db");
        assert_eq!(config.store.max_connections, 8);
        assert_eq!(config.store.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.sweep.interval, Duration::from_secs(15));
        assert_eq!(config.sweep.policy, OverrunPolicy::Drop);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = AppConfig::from_json(r#"{ "public": { "capacity": 1 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AppConfig::from_json(r#"{ "fee_tiers": [0] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AppConfig::from_json(r#"{ "lock_timeout_secs": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AppConfig::from_json(r#"{ "database_url": " " }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AppConfig::from_json(r#"{ "max_connections": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = AppConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AppConfig::from_path(Path::new("does/not/exist.json")).unwrap_err();
        let ConfigError::Io { source, .. } = err else {
            panic!("expected Io error");
        };
        assert_eq!(source.kind(), ErrorKind::NotFound);
    }
}
