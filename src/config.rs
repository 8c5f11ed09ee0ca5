//! Configuration management for TouristID

use crate::blockchain::HashScheme;
use crate::credential::DEFAULT_IMAGE_SIZE;
use crate::pipeline::PipelineConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Upper bound on the reconciliation grace period (30 days).
const MAX_RECONCILE_GRACE_SECS: u64 = 30 * 24 * 60 * 60;

/// Smallest QR code (version 1) is 21 modules wide.
const MIN_IMAGE_SIZE: u32 = 21;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub credential: CredentialConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub hash_scheme: HashScheme,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_reconcile_grace_secs")]
    pub reconcile_grace_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            reconcile_grace_secs: default_reconcile_grace_secs(),
        }
    }
}

impl StorageConfig {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            storage_timeout: Duration::from_millis(self.timeout_ms),
            reconcile_grace: Duration::from_secs(self.reconcile_grace_secs),
        }
    }
}

/// Credentials guarding the read-back endpoints. Empty means locked.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub admin_user: String,
    #[serde(default)]
    pub admin_pass: String,
}

impl AuthConfig {
    pub fn is_configured(&self) -> bool {
        !self.admin_user.is_empty() && !self.admin_pass.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    #[serde(default = "default_image_size")]
    pub image_size: u32,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            image_size: default_image_size(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8085
}

fn default_db_path() -> String {
    "./data/touristid.db".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_reconcile_grace_secs() -> u64 {
    300
}

fn default_image_size() -> u32 {
    DEFAULT_IMAGE_SIZE
}

/// Load `path` (defaults when the file is absent), apply the `PORT`,
/// `ADMIN_USER` and `ADMIN_PASS` environment overrides, then validate.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config_str = fs::read_to_string(path.as_ref()).unwrap_or_default();
    let mut config = parse_config(&config_str)?;

    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
        config.server.port = port;
    }
    if let Ok(user) = std::env::var("ADMIN_USER") {
        config.auth.admin_user = user;
    }
    if let Ok(pass) = std::env::var("ADMIN_PASS") {
        config.auth.admin_pass = pass;
    }

    validate(&config)?;
    Ok(config)
}

pub fn parse_config(config_str: &str) -> Result<Config, Box<dyn std::error::Error>> {
    if config_str.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(toml::from_str(config_str)?)
}

pub fn validate(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if config.database.path.is_empty() {
        return Err("database.path must be set in config.toml".into());
    }
    if config.storage.timeout_ms == 0 {
        return Err("storage.timeout_ms must be greater than zero".into());
    }
    if config.storage.reconcile_grace_secs > MAX_RECONCILE_GRACE_SECS {
        return Err(format!(
            "storage.reconcile_grace_secs must be at most {}",
            MAX_RECONCILE_GRACE_SECS
        )
        .into());
    }
    if config.credential.image_size < MIN_IMAGE_SIZE {
        return Err(format!("credential.image_size must be at least {}", MIN_IMAGE_SIZE).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 8085);
        assert_eq!(config.database.path, "./data/touristid.db");
        assert_eq!(config.ledger.hash_scheme, HashScheme::Concat);
        assert_eq!(config.storage.timeout_ms, 5000);
        assert!(!config.auth.is_configured());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let config = parse_config(
            r#"
            [ledger]
            hash_scheme = "length_prefixed"

            [storage]
            timeout_ms = 250

            [auth]
            admin_user = "ops"
            admin_pass = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.ledger.hash_scheme, HashScheme::LengthPrefixed);
        assert_eq!(config.storage.pipeline_config().storage_timeout, Duration::from_millis(250));
        assert_eq!(config.storage.reconcile_grace_secs, 300);
        assert!(config.auth.is_configured());
        assert_eq!(config.server.bind, "0.0.0.0");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.storage.timeout_ms = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.storage.reconcile_grace_secs = 10_000_000_000_000;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.storage.reconcile_grace_secs = MAX_RECONCILE_GRACE_SECS;
        assert!(validate(&config).is_ok());

        let mut config = Config::default();
        config.credential.image_size = 8;
        assert!(validate(&config).is_err());

        assert!(parse_config("[ledger]\nhash_scheme = \"xor\"").is_err());
    }
}
