//! Configuration for the chat log service.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::common::errors::{ChatLogError, ChatLogResult};

/// Environment variable naming an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "CHATLOG_CONFIG";

/// Upper bound accepted for `pagination.max_limit`.
pub const MAX_PAGE_LIMIT: u32 = 10_000;

/// Top-level service configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: IpAddr,
    /// Port to bind.
    pub port: u16,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Pagination settings.
    pub pagination: PaginationConfig,
    /// Display name used when a user id cannot be resolved.
    pub unknown_user_name: String,
    /// API key for an admin account provisioned at startup.
    pub bootstrap_admin_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            storage: StorageConfig::default(),
            pagination: PaginationConfig::default(),
            unknown_user_name: "Unknown".to_string(),
            bootstrap_admin_key: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the optional JSON file in `CHATLOG_CONFIG`,
    /// then apply environment overrides and validate.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if any value is invalid.
    pub fn load() -> ChatLogResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_json(&std::fs::read_to_string(path)?)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the document is not valid JSON for this schema.
    pub fn from_json(raw: &str) -> ChatLogResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply `CHATLOG_*` overrides using `lookup` to read variables.
    ///
    /// # Errors
    /// Returns an error if a variable is set to an unparsable value.
    pub fn apply_env<F>(&mut self, lookup: F) -> ChatLogResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CHATLOG_HOST") {
            self.host = host
                .parse()
                .map_err(|_| ChatLogError::InvalidConfig(format!("CHATLOG_HOST: {host}")))?;
        }
        if let Some(port) = lookup("CHATLOG_PORT") {
            self.port = port
                .parse()
                .map_err(|_| ChatLogError::InvalidConfig(format!("CHATLOG_PORT: {port}")))?;
        }
        if let Some(path) = lookup("CHATLOG_DB_PATH") {
            self.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(max) = lookup("CHATLOG_MAX_PAGE_SIZE") {
            self.pagination.max_limit = max.parse().map_err(|_| {
                ChatLogError::InvalidConfig(format!("CHATLOG_MAX_PAGE_SIZE: {max}"))
            })?;
        }
        if let Some(key) = lookup("CHATLOG_BOOTSTRAP_ADMIN_KEY") {
            self.bootstrap_admin_key = Some(key).filter(|k| !k.is_empty());
        }
        Ok(())
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatLogResult<()> {
        validate_table_name("storage.chat_log_table", &self.storage.chat_log_table)?;
        validate_table_name("storage.user_table", &self.storage.user_table)?;

        if self.storage.chat_log_table == self.storage.user_table {
            return Err(ChatLogError::InvalidConfig(
                "storage.chat_log_table and storage.user_table must differ".to_string(),
            ));
        }

        if self.pagination.default_limit == 0 {
            return Err(ChatLogError::InvalidConfig(
                "pagination.default_limit must be > 0".to_string(),
            ));
        }

        if self.pagination.max_limit < self.pagination.default_limit {
            return Err(ChatLogError::InvalidConfig(
                "pagination.max_limit must be >= pagination.default_limit".to_string(),
            ));
        }

        if self.pagination.max_limit > MAX_PAGE_LIMIT {
            return Err(ChatLogError::InvalidConfig(format!(
                "pagination.max_limit must be <= {MAX_PAGE_LIMIT}"
            )));
        }

        if self.unknown_user_name.trim().is_empty() {
            return Err(ChatLogError::InvalidConfig(
                "unknown_user_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(field: &str, name: &str) -> ChatLogResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ChatLogError::InvalidConfig(format!(
            "{field} must be a plain SQL identifier, got {name:?}"
        )))
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Chat log table name.
    pub chat_log_table: String,
    /// User directory table name.
    pub user_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("chat_logs.sqlite"),
            chat_log_table: "chat_log".to_string(),
            user_table: "users".to_string(),
        }
    }
}

/// Pagination limits for list endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Page size when the request omits `limit`.
    pub default_limit: u32,
    /// Largest accepted `limit`.
    pub max_limit: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 1000,
        }
    }
}
