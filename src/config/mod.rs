// src/config/mod.rs

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Process-wide settings, loaded once at startup and handed to each stage.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub credentials: Credentials,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    pub reports: BTreeMap<String, ReportDefinition>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub profile_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    #[serde(default = "default_safety_margin")]
    pub token_safety_margin_secs: i64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_url: default_token_url(),
            timeout_secs: default_timeout_secs(),
            token_path: default_token_path(),
            token_safety_margin_secs: default_safety_margin(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_queue_prefix")]
    pub prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            prefix: default_queue_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// How one record type is requested upstream and where its rows land.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportDefinition {
    /// Creation endpoint, e.g. `/v2/sp/targets/report`.
    pub endpoint: String,
    pub table: String,
    pub metrics: Vec<String>,
}

fn default_base_url() -> String {
    "https://advertising-api.amazon.com".to_string()
}

fn default_token_url() -> String {
    "https://api.amazon.com/auth/o2/token".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_token_path() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_safety_margin() -> i64 {
    10
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_queue_prefix() -> String {
    "targets".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Environment variables win over the file, so secrets can stay out of it.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut String); 7] = [
            ("REDIS_URL", &mut self.queues.redis_url),
            ("DATABASE_URL", &mut self.sink.database_url),
            ("LISTEN_ADDR", &mut self.server.listen_addr),
            ("ADV_CLIENT_ID", &mut self.credentials.client_id),
            ("ADV_CLIENT_SECRET", &mut self.credentials.client_secret),
            ("ADV_REFRESH_TOKEN", &mut self.credentials.refresh_token),
            ("ADV_PROFILE_ID", &mut self.credentials.profile_id),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let creds = &self.credentials;
        for (name, value) in [
            ("client_id", &creds.client_id),
            ("client_secret", &creds.client_secret),
            ("refresh_token", &creds.refresh_token),
            ("profile_id", &creds.profile_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("credentials.{name} is empty")));
            }
        }

        if self.reports.is_empty() {
            return Err(ConfigError::Invalid("no report types configured".into()));
        }
        for (record_type, report) in &self.reports {
            if report.metrics.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "report type {record_type} has no metrics"
                )));
            }
            if !crate::db::is_valid_identifier(&report.table) {
                return Err(ConfigError::Invalid(format!(
                    "report type {record_type} has invalid table name {:?}",
                    report.table
                )));
            }
        }
        if self.api.token_safety_margin_secs < 0 {
            return Err(ConfigError::Invalid("api.token_safety_margin_secs is negative".into()));
        }
        Ok(())
    }

    /// Record type -> sink table.
    pub fn tables(&self) -> BTreeMap<String, String> {
        self.reports
            .iter()
            .map(|(record_type, report)| (record_type.clone(), report.table.clone()))
            .collect()
    }
}
