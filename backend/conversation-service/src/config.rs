/// Configuration management for Conversation Service
///
/// Loads configuration from environment variables.
use crate::services::{AccessPolicy, LedgerSettings};
use crate::workers::ReceiptCleanupConfig;
use anyhow::{bail, Context, Result};
use db_pool::{parse_env_flag, parse_env_with_default};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub session: SessionConfig,
    pub receipts: ReceiptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (development, staging, production)
    pub env: String,
    pub host: String,
    pub port: u16,
    /// `json` switches log output to JSON lines
    pub log_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" | "in-memory" => Ok(StorageBackend::Memory),
            other => bail!("unsupported STORAGE_BACKEND '{}': expected postgres or memory", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Guests (X-Client-Id only) may not save when true
    pub require_auth_for_saves: bool,
    pub share_base_url: String,
    pub list_max_limit: i64,
    pub home_top_n: i64,
    /// Save toggles without an Idempotency-Key are rejected when true
    pub require_idempotency_key: bool,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// HS256 secret for session tokens; sessions are disabled without it
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptConfig {
    pub cleanup_enabled: bool,
    pub retention_hours: i64,
    pub cleanup_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env_with_default("PORT", 8090),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        };

        let storage = StorageConfig {
            backend: std::env::var("STORAGE_BACKEND")
                .unwrap_or_else(|_| "postgres".to_string())
                .parse()
                .context("Invalid STORAGE_BACKEND")?,
        };

        let ledger = LedgerConfig {
            require_auth_for_saves: parse_env_flag("LEDGER_REQUIRE_AUTH_FOR_SAVES", true),
            share_base_url: std::env::var("SHARE_BASE_URL")
                .unwrap_or_else(|_| "https://shareg.pt".to_string()),
            list_max_limit: parse_env_with_default("LIST_MAX_LIMIT", 100),
            home_top_n: parse_env_with_default("HOME_TOP_N", 10),
            require_idempotency_key: parse_env_flag("LEDGER_REQUIRE_IDEMPOTENCY_KEY", false),
        };

        let session = SessionConfig {
            jwt_secret: std::env::var("SESSION_JWT_SECRET")
                .ok()
                .filter(|secret| !secret.trim().is_empty()),
        };

        let receipts = ReceiptConfig {
            cleanup_enabled: parse_env_flag("SAVE_RECEIPT_CLEANUP_ENABLED", true),
            retention_hours: parse_env_with_default("SAVE_RECEIPT_RETENTION_HOURS", 168),
            cleanup_interval_secs: parse_env_with_default("SAVE_RECEIPT_CLEANUP_INTERVAL_SECS", 3600),
        };

        let config = Config {
            app,
            storage,
            ledger,
            session,
            receipts,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        matches!(self.app.env.as_str(), "production" | "prod")
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.list_max_limit < 1 {
            bail!("LIST_MAX_LIMIT must be at least 1");
        }
        if self.ledger.home_top_n < 0 {
            bail!("HOME_TOP_N must not be negative");
        }
        if !self.ledger.share_base_url.starts_with("http://")
            && !self.ledger.share_base_url.starts_with("https://")
        {
            bail!("SHARE_BASE_URL must be an http(s) URL");
        }
        if self.receipts.retention_hours < 1 {
            bail!("SAVE_RECEIPT_RETENTION_HOURS must be at least 1");
        }
        if self.receipts.cleanup_interval_secs == 0 {
            bail!("SAVE_RECEIPT_CLEANUP_INTERVAL_SECS must be positive");
        }

        if self.is_production() {
            if self.session.jwt_secret.is_none() {
                bail!("SESSION_JWT_SECRET is required in production");
            }
            if self.storage.backend != StorageBackend::Postgres {
                bail!("STORAGE_BACKEND must be postgres in production");
            }
        }
        Ok(())
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            access: AccessPolicy {
                require_auth_for_saves: self.ledger.require_auth_for_saves,
            },
            share_base_url: self.ledger.share_base_url.clone(),
            list_max_limit: self.ledger.list_max_limit,
            home_top_n: self.ledger.home_top_n,
            require_request_key: self.ledger.require_idempotency_key,
        }
    }

    pub fn receipt_cleanup(&self) -> ReceiptCleanupConfig {
        ReceiptCleanupConfig {
            enabled: self.receipts.cleanup_enabled,
            retention: chrono::Duration::hours(self.receipts.retention_hours),
            interval: Duration::from_secs(self.receipts.cleanup_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "APP_ENV",
        "PORT",
        "STORAGE_BACKEND",
        "SESSION_JWT_SECRET",
        "LEDGER_REQUIRE_AUTH_FOR_SAVES",
        "SHARE_BASE_URL",
        "LIST_MAX_LIMIT",
        "LEDGER_REQUIRE_IDEMPOTENCY_KEY",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_default_values() {
        clear_env();

        let config = Config::from_env().unwrap();

        assert_eq!(config.app.env, "development");
        assert_eq!(config.app.port, 8090);
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert!(config.ledger.require_auth_for_saves);
        assert_eq!(config.ledger.share_base_url, "https://shareg.pt");
        assert_eq!(config.ledger.list_max_limit, 100);
        assert_eq!(config.ledger.home_top_n, 10);
        assert!(!config.ledger.require_idempotency_key);
        assert_eq!(config.receipts.retention_hours, 168);
        assert!(config.session.jwt_secret.is_none());
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("STORAGE_BACKEND", "memory");
        std::env::set_var("LEDGER_REQUIRE_AUTH_FOR_SAVES", "false");
        std::env::set_var("LIST_MAX_LIMIT", "25");
        std::env::set_var("LEDGER_REQUIRE_IDEMPOTENCY_KEY", "true");

        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        let settings = config.ledger_settings();
        assert!(!settings.access.require_auth_for_saves);
        assert_eq!(settings.list_max_limit, 25);
        assert!(settings.require_request_key);
    }

    #[test]
    #[serial]
    fn test_production_requires_secret_and_postgres() {
        clear_env();
        std::env::set_var("APP_ENV", "production");
        assert!(Config::from_env().is_err());

        std::env::set_var("SESSION_JWT_SECRET", "prod-secret");
        std::env::set_var("STORAGE_BACKEND", "memory");
        assert!(Config::from_env().is_err());

        std::env::set_var("STORAGE_BACKEND", "postgres");
        let config = Config::from_env().unwrap();
        clear_env();

        assert!(config.is_production());
        assert!(!format!("{:?}", config.session).contains("prod-secret"));
    }

    #[test]
    #[serial]
    fn test_rejects_unknown_backend() {
        clear_env();
        std::env::set_var("STORAGE_BACKEND", "sqlite");
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
