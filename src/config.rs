use crate::errors::{RelayError, Result};
use crate::registry::RegistryConfig;
use crate::retry::RetryPolicy;
use crate::transport::DEFAULT_INGEST_URL;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct ConfigManager {
    settings: Settings,
    source: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let source = Self::find_config_file();
        let settings = Self::load_config(source.as_deref())?;
        Ok(Self { settings, source })
    }

    /// Loads `path` instead of searching the usual locations.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = path.as_ref().to_path_buf();
        let settings = Self::load_config(Some(&source))?;
        Ok(Self {
            settings,
            source: Some(source),
        })
    }

    fn find_config_file() -> Option<PathBuf> {
        let possible_paths = [
            std::env::var("XRELAY_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("conf.yaml")),
            Some(PathBuf::from("config/conf.yaml")),
            Some(PathBuf::from("/etc/xrelay/conf.yaml")),
        ];

        for path in possible_paths.iter().flatten() {
            if path.exists() {
                return Some(path.clone());
            }
        }
        None
    }

    // Runs before the logger exists, so nothing here logs.
    fn load_config(source: Option<&Path>) -> Result<Settings> {
        let mut config = Config::builder();

        if let Some(config_path) = source {
            config = config.add_source(File::from(config_path));
        }

        config = config.add_source(
            Environment::with_prefix("XRELAY")
                .separator("__")
                .try_parsing(true),
        );

        config = config
            .set_default("http.port", 3000)?
            .set_default("ingest.url", DEFAULT_INGEST_URL)?
            .set_default("ingest.max_file_size", 2u64 << 30)?
            .set_default("ingest.temp_dir", "data/uploads")?
            .set_default("session.max_concurrent", 5)?
            .set_default("session.retention_secs", 600)?
            .set_default("session.sweep_interval_secs", 30)?
            .set_default("session.grace_period_secs", 5)?
            .set_default("session.watchdog_secs", 30)?
            .set_default("session.connect_timeout_secs", 10)?
            .set_default("retry.max_retries", 3)?
            .set_default("retry.base_delay_ms", 1000)?
            .set_default("retry.factor", 2)?
            .set_default("retry.max_delay_ms", 30000)?
            .set_default("log_level", "info")?;

        let config = config.build().map_err(|e| RelayError::ConfigError {
            message: format!("Failed to build config: {}", e),
        })?;

        config.try_deserialize().map_err(|e| RelayError::ConfigError {
            message: format!("Failed to deserialize config: {}", e),
        })
    }

    pub fn get_settings(&self) -> &Settings {
        &self.settings
    }

    /// The config file that was loaded, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn into_settings(self) -> Settings {
        self.settings
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub http: Http,
    pub ingest: Ingest,
    pub session: SessionSettings,
    pub retry: RetrySettings,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http: Http::default(),
            ingest: Ingest::default(),
            session: SessionSettings::default(),
            retry: RetrySettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            factor: self.retry.factor,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_concurrent: self.session.max_concurrent,
            retention: Duration::from_secs(self.session.retention_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Http {
    pub port: u16,
}

impl Default for Http {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Ingest {
    pub url: String,
    pub max_file_size: u64,
    pub temp_dir: String,
}

impl Default for Ingest {
    fn default() -> Self {
        Self {
            url: DEFAULT_INGEST_URL.to_string(),
            max_file_size: 2 << 30,
            temp_dir: "data/uploads".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionSettings {
    pub max_concurrent: usize,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub grace_period_secs: u64,
    pub watchdog_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            retention_secs: 600,
            sweep_interval_secs: 30,
            grace_period_secs: 5,
            watchdog_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub factor: u32,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            factor: 2,
            max_delay_ms: 30000,
        }
    }
}
