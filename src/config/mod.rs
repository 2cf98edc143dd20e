//! Configuration loading for the clickstream loader.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `CLICKSTREAM_`, applies command-line overrides last, and produces a typed
//! [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::source::DEFAULT_BATCH_SIZE;

const ENV_PREFIX: &str = "CLICKSTREAM_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `CLICKSTREAM_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_source_path")]
    pub source_path: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Connection parameters for the destination database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_db_charset")]
    pub charset: String,
    /// Full connection URL. When set, the individual parts above are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Values supplied on the command line. `None` leaves the loaded value untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub source_path: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub log_level: Option<String>,
    pub db_host: Option<String>,
    pub db_port: Option<u16>,
    pub db_user: Option<String>,
    pub db_name: Option<String>,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            source_path: default_source_path(),
            batch_size: default_batch_size(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: String::new(),
            name: default_db_name(),
            charset: default_db_charset(),
            url: None,
        }
    }
}

impl AppConfig {
    /// Apply command-line overrides on top of the loaded values.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(path) = &overrides.source_path {
            self.source_path = path.clone();
        }
        if let Some(batch_size) = overrides.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(level) = &overrides.log_level {
            self.log_level = level.clone();
        }
        if let Some(host) = &overrides.db_host {
            self.database.host = host.clone();
        }
        if let Some(port) = overrides.db_port {
            self.database.port = port;
        }
        if let Some(user) = &overrides.db_user {
            self.database.user = user.clone();
        }
        if let Some(name) = &overrides.db_name {
            self.database.name = name.clone();
        }
        if let Some(url) = &overrides.database_url {
            self.database.url = Some(url.clone());
        }
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.database.password.is_empty() {
            config.database.password = REDACTED.to_string();
        }
        if let Some(url) = config.database.url.take() {
            config.database.url = Some(redact_url_password(&url));
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if a setting is unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize {
                value: self.batch_size,
            });
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.source_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingSetting {
                key: "SOURCE_PATH",
            });
        }

        self.database.validate()
    }
}

impl DatabaseConfig {
    /// Validates that enough is known to build a connection URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.url {
            return Url::parse(url)
                .map(|_| ())
                .map_err(|source| ConfigError::InvalidDatabaseUrl {
                    reason: source.to_string(),
                });
        }

        for (key, value) in [
            ("DB_HOST", &self.host),
            ("DB_USER", &self.user),
            ("DB_NAME", &self.name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingSetting { key });
            }
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "DB_PORT",
                value: self.port.to_string(),
            });
        }

        Ok(())
    }

    /// Connection URL for the destination. An explicit URL wins over the parts.
    pub fn connection_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }

        let invalid = |reason: &str| ConfigError::InvalidDatabaseUrl {
            reason: reason.to_string(),
        };

        let mut url = Url::parse("mysql://localhost")
            .map_err(|source| invalid(&source.to_string()))?;
        url.set_host(Some(&self.host))
            .map_err(|source| invalid(&source.to_string()))?;
        url.set_port(Some(self.port))
            .map_err(|_| invalid("port cannot be set"))?;
        url.set_username(&self.user)
            .map_err(|_| invalid("user cannot be set"))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| invalid("password cannot be set"))?;
        }
        url.set_path(&self.name);
        if !self.charset.is_empty() {
            url.query_pairs_mut().append_pair("charset", &self.charset);
        }

        Ok(url.into())
    }
}

fn redact_url_password(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some(REDACTED)).is_err() {
                return REDACTED.to_string();
            }
            url.into()
        }
        Ok(url) => url.into(),
        Err(_) => REDACTED.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_source_path() -> PathBuf {
    PathBuf::from("data.csv")
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_db_user() -> String {
    "root".to_string()
}

fn default_db_name() -> String {
    "autodoc".to_string()
}

fn default_db_charset() -> String {
    "utf8mb4".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for CLICKSTREAM_{key}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("batch size must be at least 1, got {value}")]
    InvalidBatchSize { value: usize },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("CLICKSTREAM_{key} must not be empty")]
    MissingSetting { key: &'static str },
    #[error("invalid database URL: {reason}")]
    InvalidDatabaseUrl { reason: String },
}

/// Loads configuration using layered `.env` files and `CLICKSTREAM_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration from env files and the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with_overrides(&ConfigOverrides::default())
    }

    /// Loads configuration, then applies command-line overrides before validating.
    pub fn load_with_overrides(
        &self,
        overrides: &ConfigOverrides,
    ) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let mut take = |key: &str| layered.remove(key).filter(|v| !v.is_empty());

        let profile = take("PROFILE").unwrap_or(profile_hint);
        let log_level = take("LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take("LOG_FORMAT").unwrap_or_else(default_log_format);
        let source_path = take("SOURCE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_source_path);
        let batch_size = parse_number(take("BATCH_SIZE"), "BATCH_SIZE")?
            .unwrap_or_else(default_batch_size);

        let database = DatabaseConfig {
            host: take("DB_HOST").unwrap_or_else(default_db_host),
            port: parse_number(take("DB_PORT"), "DB_PORT")?.unwrap_or_else(default_db_port),
            user: take("DB_USER").unwrap_or_else(default_db_user),
            password: take("DB_PASSWORD").unwrap_or_default(),
            name: take("DB_NAME").unwrap_or_else(default_db_name),
            charset: take("DB_CHARSET").unwrap_or_else(default_db_charset),
            url: take("DATABASE_URL"),
        };

        let mut config = AppConfig {
            profile,
            log_level,
            log_format,
            source_path,
            batch_size,
            database,
        };
        config.apply_overrides(overrides);

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number<T: std::str::FromStr>(
    raw: Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value })
    })
    .transpose()
}
