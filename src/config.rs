use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FootprintError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Gmail `newer_than:` bound, e.g. "1y" or "6m"
    #[serde(default = "default_recency")]
    pub recency: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
            max_results: default_max_results(),
            recency: default_recency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct VaultConfig {
    /// Hex or base64 AES key; usually supplied through `ENCRYPTION_KEY`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encryption_key: String,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("encryption_key", &if self.encryption_key.is_empty() { "<unset>" } else { "<redacted>" })
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_max_concurrent() -> usize {
    10
}

fn default_max_results() -> u32 {
    200
}

fn default_recency() -> String {
    "1y".to_string()
}

fn default_max_requests() -> u64 {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_database_path() -> PathBuf {
    PathBuf::from(".footprint/footprint.db")
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            let config = Self::default().apply_env();
            config.validate()?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FootprintError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| FootprintError::Config(format!("Failed to parse config file: {}", e)))?;
        let config = config.apply_env();

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Overlay secrets and deployment paths from the environment
    pub fn apply_env(mut self) -> Self {
        if let Ok(key) = std::env::var("ENCRYPTION_KEY") {
            if !key.is_empty() {
                self.vault.encryption_key = key;
            }
        }
        if let Ok(id) = std::env::var("GOOGLE_CLIENT_ID") {
            if !id.is_empty() {
                self.provider.client_id = id;
            }
        }
        if let Ok(secret) = std::env::var("GOOGLE_CLIENT_SECRET") {
            if !secret.is_empty() {
                self.provider.client_secret = secret;
            }
        }
        if let Ok(db) = std::env::var("FOOTPRINT_DB") {
            if !db.is_empty() {
                self.database.path = PathBuf::from(db);
            }
        }
        self
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                FootprintError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| FootprintError::Config(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| FootprintError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    ///
    /// The encryption key is checked lazily by the vault, so commands that never
    /// touch credentials still run without one.
    pub fn validate(&self) -> Result<()> {
        if self.scan.max_concurrent_requests == 0 {
            return Err(FootprintError::Config(
                "scan.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.scan.max_concurrent_requests > 50 {
            return Err(FootprintError::Config(
                "scan.max_concurrent_requests cannot exceed 50".to_string(),
            ));
        }
        if self.scan.max_results == 0 {
            return Err(FootprintError::Config(
                "scan.max_results must be at least 1".to_string(),
            ));
        }
        if !is_valid_recency(&self.scan.recency) {
            return Err(FootprintError::Config(format!(
                "Invalid scan.recency: '{}'. Expected a number followed by d, m or y",
                self.scan.recency
            )));
        }

        if self.rate_limit.max_requests == 0 {
            return Err(FootprintError::Config(
                "rate_limit.max_requests must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(FootprintError::Config(
                "rate_limit.window_secs must be greater than 0".to_string(),
            ));
        }

        if self.provider.request_timeout_secs == 0 {
            return Err(FootprintError::Config(
                "provider.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.database.path.as_os_str().is_empty() {
            return Err(FootprintError::Config(
                "database.path cannot be empty".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}

fn is_valid_recency(value: &str) -> bool {
    let Some(unit) = value.chars().last() else {
        return false;
    };
    let digits = &value[..value.len() - unit.len_utf8()];
    matches!(unit, 'd' | 'm' | 'y')
        && !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && digits.parse::<u32>().map(|n| n > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.scan.max_concurrent_requests, 10);
        assert_eq!(config.scan.max_results, 200);
        assert_eq!(config.scan.recency, "1y");
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.provider.request_timeout_secs, 20);
        assert!(config.vault.encryption_key.is_empty());
        assert_eq!(
            config.database.path,
            PathBuf::from(".footprint/footprint.db")
        );
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_max_concurrent_bounds() {
        let mut config = Config::default();
        config.scan.max_concurrent_requests = 0;
        assert!(config.validate().unwrap_err().to_string().contains("at least 1"));

        config.scan.max_concurrent_requests = 51;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("cannot exceed 50"));

        config.scan.max_concurrent_requests = 50;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_recency() {
        let mut config = Config::default();
        for ok in ["1y", "6m", "30d", "12m"] {
            config.scan.recency = ok.to_string();
            assert!(config.validate().is_ok(), "{} should be valid", ok);
        }
        for bad in ["", "y", "1w", "0d", "-1y", "one year"] {
            config.scan.recency = bad.to_string();
            assert!(config.validate().is_err(), "{} should be invalid", bad);
        }
    }

    #[test]
    fn test_config_validation_rate_limit() {
        let mut config = Config::default();
        config.rate_limit.window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limit.max_requests = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_timeout() {
        let mut config = Config::default();
        config.provider.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let mut config = Config::default();
        config.vault.encryption_key = "super-secret".to_string();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    #[serial]
    async fn test_load_partial_file_fills_defaults() {
        std::env::remove_var("ENCRYPTION_KEY");
        std::env::remove_var("FOOTPRINT_DB");
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(
            file.path(),
            "[rate_limit]\nmax_requests = 3\n\n[scan]\nrecency = \"6m\"\n",
        )
        .await
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.scan.recency, "6m");
        assert_eq!(config.scan.max_concurrent_requests, 10);
    }

    #[tokio::test]
    #[serial]
    async fn test_load_rejects_invalid_file() {
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), "[scan]\nmax_concurrent_requests = 0\n")
            .await
            .unwrap();
        let err = Config::load(file.path()).await.unwrap_err();
        assert!(matches!(err, FootprintError::Config(_)));
    }

    #[tokio::test]
    #[serial]
    async fn test_env_overrides_file() {
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), "[vault]\nencryption_key = \"from-file\"\n")
            .await
            .unwrap();

        std::env::set_var("ENCRYPTION_KEY", "from-env");
        std::env::set_var("FOOTPRINT_DB", "/tmp/footprint-test.db");
        let config = Config::load(file.path()).await.unwrap();
        std::env::remove_var("ENCRYPTION_KEY");
        std::env::remove_var("FOOTPRINT_DB");

        assert_eq!(config.vault.encryption_key, "from-env");
        assert_eq!(config.database.path, PathBuf::from("/tmp/footprint-test.db"));
    }

    #[tokio::test]
    #[serial]
    async fn test_save_and_reload() {
        std::env::remove_var("ENCRYPTION_KEY");
        std::env::remove_var("FOOTPRINT_DB");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.rate_limit.window_secs = 120;
        config.save(&path).await.unwrap();

        let loaded = Config::load(&path).await.unwrap();
        assert_eq!(loaded.rate_limit.window_secs, 120);
        assert!(loaded.vault.encryption_key.is_empty());
    }
}
