//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::ingest::OnErrorPolicy;

/// Registry daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseSection,
    pub registry: RegistrySection,
    pub ingest: IngestSection,
    pub events: EventsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Path to the SQLite database file; None means the platform default
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    /// Base URL of the external identity registry
    pub base_url: String,
    pub timeout_secs: u64,
    /// Maximum identifiers per lookup request
    pub lookup_batch_max: usize,
    /// How long a resolved identity stays fresh in the cache
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSection {
    /// Records fetched per poll
    pub batch_size: usize,
    /// Delay before resuming after a blocked record
    pub retry_backoff_secs: u64,
    /// What to do with a record that keeps failing
    pub on_error: OnErrorPolicy,
    /// How long a fresh leader waits before consuming
    pub leader_confirmation_secs: u64,
    /// Inbound claim log (one JSON claim per line)
    pub claims_path: PathBuf,
    /// Inbound identity-change log
    pub identity_changes_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsSection {
    /// Derived-event log the engine appends to
    pub log_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            database: DatabaseSection {
                path: None,
                max_connections: 5,
            },
            registry: RegistrySection {
                base_url: "http://localhost:8089".to_string(),
                timeout_secs: 10,
                lookup_batch_max: 100,
                cache_ttl_secs: 300,
            },
            ingest: IngestSection {
                batch_size: 50,
                retry_backoff_secs: 60,
                on_error: OnErrorPolicy::Block,
                leader_confirmation_secs: 10,
                claims_path: data_dir.join("claims.jsonl"),
                identity_changes_path: data_dir.join("identity-changes.jsonl"),
            },
            events: EventsSection {
                log_path: data_dir.join("events.jsonl"),
            },
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nlreg")
}

impl RegistrySection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl IngestSection {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn leader_confirmation(&self) -> Duration {
        Duration::from_secs(self.leader_confirmation_secs)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("NLREG_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("nlreg")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be at least 1"));
        }
        if self.registry.base_url.is_empty() {
            return Err(anyhow!("registry.base_url must not be empty"));
        }
        if self.registry.lookup_batch_max == 0 {
            return Err(anyhow!("registry.lookup_batch_max must be at least 1"));
        }
        if self.ingest.batch_size == 0 {
            return Err(anyhow!("ingest.batch_size must be at least 1"));
        }
        Ok(())
    }
}
