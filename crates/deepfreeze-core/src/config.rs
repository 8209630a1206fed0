//! Configuration management for deepfreeze
//!
//! This module provides a centralized configuration system that supports:
//! - YAML/TOML/JSON configuration files
//! - Environment variable overrides
//! - Reasonable defaults
//! - Configuration validation

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::restore::RetrievalTier;

/// Root configuration structure for deepfreeze
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DeepfreezeConfig {
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,

    #[serde(default)]
    pub s3: S3Settings,

    #[serde(default)]
    pub status_store: StatusStoreConfig,

    #[serde(default)]
    pub thaw: ThawConfig,
}

impl DeepfreezeConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Config file specified by DEEPFREEZE_CONFIG env var
    /// 3. ./config/deepfreeze.{yaml,toml,json}
    /// 4. /etc/deepfreeze/deepfreeze.{yaml,toml,json}
    /// 5. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        builder = builder
            .add_source(File::with_name("/etc/deepfreeze/deepfreeze").required(false))
            .add_source(File::with_name("./config/deepfreeze").required(false));

        if let Ok(config_path) = std::env::var("DEEPFREEZE_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        // Example: DEEPFREEZE__THAW__DEFAULT_DURATION_DAYS=14
        builder = builder.add_source(
            Environment::with_prefix("DEEPFREEZE")
                .separator("__")
                .try_parsing(true),
        );

        let config: DeepfreezeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path (defaults still apply)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let builder = Self::set_defaults(Config::builder())?;
        let config: DeepfreezeConfig = builder
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("elasticsearch.url", "http://localhost:9200")?
            .set_default("elasticsearch.status_index", "deepfreeze-status")?
            .set_default("elasticsearch.request_timeout_secs", 30)?
            .set_default("s3.region", "us-east-1")?
            .set_default("status_store.backend", "elastic")?
            .set_default("status_store.sqlite_url", "sqlite://deepfreeze-status.db")?
            .set_default("thaw.default_duration_days", 7)?
            .set_default("thaw.default_tier", "standard")?
            .set_default("thaw.max_status_workers", 15)?
            .set_default("thaw.sync_deadline_secs", 21_600)?
            .set_default("thaw.poll.initial_interval_secs", 30)?
            .set_default("thaw.poll.max_interval_secs", 900)?
            .set_default("thaw.poll.multiplier", 2.0)?
            .set_default("thaw.poll.jitter_percent", 0.1)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.elasticsearch.url.is_empty() {
            return Err(ConfigError::Message(
                "elasticsearch.url must not be empty".to_string(),
            ));
        }

        if self.elasticsearch.status_index.is_empty() {
            return Err(ConfigError::Message(
                "elasticsearch.status_index must not be empty".to_string(),
            ));
        }

        if self.thaw.default_duration_days == 0 {
            return Err(ConfigError::Message(
                "thaw.default_duration_days must be > 0".to_string(),
            ));
        }

        if self.thaw.max_status_workers == 0 {
            return Err(ConfigError::Message(
                "thaw.max_status_workers must be > 0".to_string(),
            ));
        }

        self.thaw
            .poll
            .validate()
            .map_err(|e| ConfigError::Message(format!("thaw.poll: {e}")))?;

        Ok(())
    }
}

/// Search cluster connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElasticsearchConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Index holding repository and thaw-request documents
    pub status_index: String,
    pub request_timeout_secs: u64,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            status_index: "deepfreeze-status".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ElasticsearchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Object storage connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Settings {
    pub region: String,
    /// Custom endpoint (MinIO, LocalStack); AWS default chain otherwise
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key: None,
            secret_key: None,
        }
    }
}

/// Which status store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusStoreBackend {
    #[default]
    Elastic,
    Sqlite,
    Memory,
}

/// Status store selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusStoreConfig {
    pub backend: StatusStoreBackend,
    pub sqlite_url: String,
}

impl Default for StatusStoreConfig {
    fn default() -> Self {
        Self {
            backend: StatusStoreBackend::Elastic,
            sqlite_url: "sqlite://deepfreeze-status.db".to_string(),
        }
    }
}

/// Thaw defaults and polling behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThawConfig {
    /// Days restored objects stay readable
    pub default_duration_days: u32,

    pub default_tier: RetrievalTier,

    /// Upper bound on concurrent restore-status lookups
    pub max_status_workers: usize,

    /// How long a synchronous thaw polls before handing back control
    pub sync_deadline_secs: u64,

    #[serde(default)]
    pub poll: PollConfig,
}

impl Default for ThawConfig {
    fn default() -> Self {
        Self {
            default_duration_days: 7,
            default_tier: RetrievalTier::Standard,
            max_status_workers: 15,
            sync_deadline_secs: 21_600,
            poll: PollConfig::default(),
        }
    }
}

impl ThawConfig {
    pub fn sync_deadline(&self) -> Duration {
        Duration::from_secs(self.sync_deadline_secs)
    }
}

/// Backoff between status checks in synchronous thaw mode
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollConfig {
    pub initial_interval_secs: u64,
    pub max_interval_secs: u64,
    pub multiplier: f64,
    /// Jitter fraction (0.0 - 1.0) applied to each interval
    pub jitter_percent: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: 30,
            max_interval_secs: 900,
            multiplier: 2.0,
            jitter_percent: 0.1,
        }
    }
}

impl PollConfig {
    /// Validate polling parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_interval_secs == 0 {
            return Err("initial_interval_secs must be > 0".into());
        }
        if self.max_interval_secs < self.initial_interval_secs {
            return Err("max_interval_secs must be >= initial_interval_secs".into());
        }
        if self.multiplier < 1.0 {
            return Err("multiplier must be >= 1.0".into());
        }
        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err("jitter_percent must be between 0.0 and 1.0".into());
        }
        Ok(())
    }

    /// Un-jittered interval before poll number `attempt` (0-based)
    pub fn interval_for_attempt(&self, attempt: u32) -> Duration {
        let secs = (self.initial_interval_secs as f64 * self.multiplier.powi(attempt as i32))
            .min(self.max_interval_secs as f64);
        Duration::from_secs_f64(secs)
    }
}
