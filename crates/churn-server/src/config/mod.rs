//! Configuration module for the churn server.
//!
//! Configuration precedence:
//! 1. Environment variables (`CHURN_*`)
//! 2. Config file (`$CHURN_CONFIG`, else `./churn.toml` if present)
//! 3. Defaults

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use churn_training::TrainingHyperParams;
use serde::Deserialize;

use crate::error::{Result, ServerError};
use crate::queue::RetryPolicy;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CHURN_CONFIG";

/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "churn.toml";

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// The address to bind the HTTP server to.
    #[serde(default = "default_address")]
    pub address: SocketAddr,
    /// Largest accepted request body (dataset uploads).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: default_address(), max_upload_bytes: default_max_upload_bytes() }
    }
}

/// Where uploads and models live on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Uploaded datasets, one subdirectory per job.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    /// Root of the model registry.
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { uploads_dir: default_uploads_dir(), models_dir: default_models_dir() }
    }
}

/// Worker pool and retry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent training workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attempts before a job is dead-lettered (first run included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_workers() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    30_000
}

fn default_max_delay_ms() -> u64 {
    600_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.multiplier,
        )
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    /// Hyperparameters applied to every training job.
    #[serde(default)]
    pub training: TrainingHyperParams,
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the config file (if any) and environment variables.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from).or_else(|| {
            let local = PathBuf::from(DEFAULT_CONFIG_FILE);
            local.exists().then_some(local)
        });

        let mut config = match path {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Apply `CHURN_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("CHURN_ADDRESS") {
            self.server.address = address.parse()?;
        }
        if let Some(dir) = lookup("CHURN_UPLOADS_DIR") {
            self.storage.uploads_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("CHURN_MODELS_DIR") {
            self.storage.models_dir = PathBuf::from(dir);
        }
        if let Some(workers) = lookup("CHURN_WORKERS") {
            self.queue.workers = workers
                .parse()
                .map_err(|e| ServerError::Config(format!("CHURN_WORKERS: {e}")))?;
        }
        if let Some(attempts) = lookup("CHURN_MAX_ATTEMPTS") {
            self.queue.max_attempts = attempts
                .parse()
                .map_err(|e| ServerError::Config(format!("CHURN_MAX_ATTEMPTS: {e}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.max_upload_bytes == 0 {
            return Err(ServerError::Config("server.max_upload_bytes must be > 0".to_string()));
        }
        if self.queue.workers == 0 {
            return Err(ServerError::Config("queue.workers must be >= 1".to_string()));
        }
        if self.queue.max_attempts == 0 {
            return Err(ServerError::Config("queue.max_attempts must be >= 1".to_string()));
        }
        if !(self.queue.multiplier.is_finite() && self.queue.multiplier >= 1.0) {
            return Err(ServerError::Config("queue.multiplier must be >= 1.0".to_string()));
        }
        self.training.validate().map_err(|e| ServerError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.address, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.storage.uploads_dir, PathBuf::from("uploads"));
        assert_eq!(config.storage.models_dir, PathBuf::from("models"));
        assert_eq!(config.queue.workers, 2);
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.training.seed, 42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_from_queue_config() {
        let policy = QueueConfig::default().retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_secs(30));
        assert_eq!(policy.max_delay, Duration::from_secs(600));
    }

    #[test]
    fn test_config_deserialize_minimal() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.address, "127.0.0.1:5000".parse().unwrap());
    }

    #[test]
    fn test_config_deserialize_full() {
        let toml = r#"
            [server]
            address = "0.0.0.0:8080"

            [storage]
            uploads_dir = "/var/lib/churn/uploads"
            models_dir = "/var/lib/churn/models"

            [queue]
            workers = 4
            max_attempts = 3
            initial_delay_ms = 100
            max_delay_ms = 1000
            multiplier = 3.0

            [training]
            seed = 7
            test_ratio = 0.25
            n_trees = 50
            min_samples_split = 4
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.address, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.storage.models_dir, PathBuf::from("/var/lib/churn/models"));
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.retry_policy().initial_delay, Duration::from_millis(100));
        assert_eq!(config.training.n_trees, 50);
        assert_eq!(config.training.max_depth, None);
    }

    #[test]
    fn test_config_rejects_unknown_types() {
        assert!(Config::from_toml("[queue]\nworkers = \"many\"").is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CHURN_ADDRESS", "0.0.0.0:9000"),
            ("CHURN_MODELS_DIR", "/tmp/models"),
            ("CHURN_WORKERS", "8"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(ToString::to_string)).unwrap();

        assert_eq!(config.server.address, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.storage.models_dir, PathBuf::from("/tmp/models"));
        assert_eq!(config.storage.uploads_dir, PathBuf::from("uploads"));
        assert_eq!(config.queue.workers, 8);
    }

    #[test]
    fn test_apply_overrides_rejects_bad_values() {
        let mut config = Config::default();
        let result = config.apply_overrides(|k| (k == "CHURN_ADDRESS").then(|| "nowhere".to_string()));
        assert!(matches!(result, Err(ServerError::InvalidAddress(_))));

        let result = config.apply_overrides(|k| (k == "CHURN_WORKERS").then(|| "-1".to_string()));
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.queue.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("churn.toml");
        std::fs::write(&path, "[queue]\nmax_attempts = 2\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.queue.max_attempts, 2);
        assert!(Config::load_from_file(&temp.path().join("missing.toml")).is_err());
    }
}
