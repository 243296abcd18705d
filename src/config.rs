/*!
 * Configuration for the object store client
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::bucket::BucketName;
use crate::error::{StoreError, StoreResult};
use crate::recovery::{BackoffStrategy, RetryPolicy};

/// Smallest part the store accepts for every part but the last (5 MiB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest single part, and largest single-request upload or copy (5 GiB)
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts in one multipart upload
pub const MAX_PARTS: u32 = 10_000;

/// Default part size for multipart uploads (5 MiB)
pub const DEFAULT_PART_SIZE: u64 = MIN_PART_SIZE;

/// Default size above which uploads switch to multipart (5 MiB)
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = MIN_PART_SIZE;

/// Default number of parts in flight per upload
pub const DEFAULT_PARALLEL_PARTS: usize = 4;

/// Upper bound for `parallel_parts`
pub const MAX_PARALLEL_PARTS: usize = 16;

/// Keys per `DeleteObjects` request; also the store's maximum
pub const MAX_DELETE_BATCH: usize = 1000;

const DEFAULT_REGION: &str = "us-east-1";

/// Connection and transfer configuration
///
/// Loaded once at startup (TOML file, then `STOWAGE_*` environment
/// overrides) and validated with [`StoreConfig::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Host name or full URL of the endpoint; AWS S3 for the region when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Port appended to a bare host endpoint
    #[serde(default)]
    pub port: Option<u16>,

    /// Use HTTPS for bare host endpoints
    #[serde(default = "default_true")]
    pub secure: bool,

    #[serde(default = "default_region")]
    pub region: String,

    /// Access key ID (optional - SDK credential chain if not provided)
    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,

    /// Session token for temporary credentials
    #[serde(default)]
    pub session_token: Option<String>,

    /// Bucket used by [`ObjectStore::default_bucket`](crate::ObjectStore::default_bucket)
    #[serde(default)]
    pub default_bucket: Option<BucketName>,

    /// Path-style addressing (`endpoint/bucket/key`), needed by MinIO and most
    /// self-hosted stores
    #[serde(default = "default_true")]
    pub force_path_style: bool,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Tuning for the transfer engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Known sizes above this use multipart upload
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Size of every part except the last
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Parts in flight per upload
    #[serde(default = "default_parallel_parts")]
    pub parallel_parts: usize,

    /// Keys per `DeleteObjects` request
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,

    /// Deadline for each store request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: default_multipart_threshold(),
            part_size: default_part_size(),
            parallel_parts: default_parallel_parts(),
            delete_batch_size: default_delete_batch_size(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl TransferConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy derived from the attempt budget and backoff bounds
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            backoff: BackoffStrategy::ExponentialWithJitter,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.part_size < MIN_PART_SIZE {
            return Err(StoreError::InvalidConfig(format!(
                "Part size {} is below minimum {}",
                self.part_size, MIN_PART_SIZE
            )));
        }

        if self.part_size > MAX_PART_SIZE {
            return Err(StoreError::InvalidConfig(format!(
                "Part size {} exceeds maximum {}",
                self.part_size, MAX_PART_SIZE
            )));
        }

        if self.multipart_threshold > MAX_PART_SIZE {
            return Err(StoreError::InvalidConfig(format!(
                "Multipart threshold {} exceeds the single-request limit {}",
                self.multipart_threshold, MAX_PART_SIZE
            )));
        }

        if self.parallel_parts == 0 || self.parallel_parts > MAX_PARALLEL_PARTS {
            return Err(StoreError::InvalidConfig(format!(
                "Parallel parts must be between 1 and {}, got {}",
                MAX_PARALLEL_PARTS, self.parallel_parts
            )));
        }

        if self.delete_batch_size == 0 || self.delete_batch_size > MAX_DELETE_BATCH {
            return Err(StoreError::InvalidConfig(format!(
                "Delete batch size must be between 1 and {}, got {}",
                MAX_DELETE_BATCH, self.delete_batch_size
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(StoreError::InvalidConfig(
                "Request timeout must be at least 1 second".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(StoreError::InvalidConfig(
                "Max attempts must be at least 1".to_string(),
            ));
        }

        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(StoreError::InvalidConfig(format!(
                "Initial backoff {}ms exceeds max backoff {}ms",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            port: None,
            secure: true,
            region: default_region(),
            access_key: None,
            secret_key: None,
            session_token: None,
            default_bucket: None,
            force_path_style: true,
            log_level: LogLevel::Info,
            log_file: None,
            transfer: TransferConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Config for a self-hosted endpoint with static credentials
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            StoreError::InvalidConfig(format!("{}: {}", path.display(), e))
        })
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> StoreResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `STOWAGE_*` environment overrides
    pub fn apply_env(&mut self) -> StoreResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, keyed by `STOWAGE_*` variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> StoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("STOWAGE_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(port) = lookup("STOWAGE_PORT") {
            self.port = Some(parse_env("STOWAGE_PORT", &port)?);
        }
        if let Some(secure) = lookup("STOWAGE_SECURE") {
            self.secure = parse_bool("STOWAGE_SECURE", &secure)?;
        }
        if let Some(region) = lookup("STOWAGE_REGION") {
            self.region = region;
        }
        if let Some(access_key) = lookup("STOWAGE_ACCESS_KEY") {
            self.access_key = Some(access_key);
        }
        if let Some(secret_key) = lookup("STOWAGE_SECRET_KEY") {
            self.secret_key = Some(secret_key);
        }
        if let Some(token) = lookup("STOWAGE_SESSION_TOKEN") {
            self.session_token = Some(token);
        }
        if let Some(bucket) = lookup("STOWAGE_DEFAULT_BUCKET") {
            self.default_bucket = Some(BucketName::parse(bucket)?);
        }
        if let Some(path_style) = lookup("STOWAGE_PATH_STYLE") {
            self.force_path_style = parse_bool("STOWAGE_PATH_STYLE", &path_style)?;
        }
        if let Some(threshold) = lookup("STOWAGE_MULTIPART_THRESHOLD") {
            self.transfer.multipart_threshold = parse_env("STOWAGE_MULTIPART_THRESHOLD", &threshold)?;
        }
        if let Some(part_size) = lookup("STOWAGE_PART_SIZE") {
            self.transfer.part_size = parse_env("STOWAGE_PART_SIZE", &part_size)?;
        }
        if let Some(parallel) = lookup("STOWAGE_PARALLEL_PARTS") {
            self.transfer.parallel_parts = parse_env("STOWAGE_PARALLEL_PARTS", &parallel)?;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> StoreResult<()> {
        if self.region.is_empty() {
            return Err(StoreError::InvalidConfig(
                "Region cannot be empty".to_string(),
            ));
        }

        // Validate credentials consistency
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(StoreError::InvalidConfig(
                "Both access_key and secret_key must be provided together".to_string(),
            ));
        }

        if self.session_token.is_some() && self.access_key.is_none() {
            return Err(StoreError::InvalidConfig(
                "session_token requires access_key and secret_key".to_string(),
            ));
        }

        self.endpoint_url()?;
        self.transfer.validate()
    }

    /// Endpoint as a URL, built from `endpoint`, `port` and `secure`
    pub fn endpoint_url(&self) -> StoreResult<Url> {
        let raw = match &self.endpoint {
            Some(endpoint) if endpoint.contains("://") => endpoint.clone(),
            Some(endpoint) => {
                let scheme = if self.secure { "https" } else { "http" };
                let host = endpoint.trim_end_matches('/');
                match self.port {
                    Some(port) => format!("{}://{}:{}", scheme, host, port),
                    None => format!("{}://{}", scheme, host),
                }
            }
            None => format!("https://s3.{}.amazonaws.com", self.region),
        };

        let url = Url::parse(&raw)
            .map_err(|e| StoreError::InvalidConfig(format!("Invalid endpoint {:?}: {}", raw, e)))?;
        if url.host_str().is_none() {
            return Err(StoreError::InvalidConfig(format!(
                "Endpoint {:?} has no host",
                raw
            )));
        }
        if !matches!(url.scheme(), "http" | "https") {
            return Err(StoreError::InvalidConfig(format!(
                "Endpoint scheme must be http or https, got {}",
                url.scheme()
            )));
        }
        Ok(url)
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> StoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| StoreError::InvalidConfig(format!("{} has invalid value {:?}", name, value)))
}

fn parse_bool(name: &str, value: &str) -> StoreResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StoreError::InvalidConfig(format!(
            "{} has invalid value {:?}",
            name, value
        ))),
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_multipart_threshold() -> u64 {
    DEFAULT_MULTIPART_THRESHOLD
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_parallel_parts() -> usize {
    DEFAULT_PARALLEL_PARTS
}

fn default_delete_batch_size() -> usize {
    MAX_DELETE_BATCH
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transfer.part_size, 5 * 1024 * 1024);
        assert_eq!(config.transfer.parallel_parts, 4);
        assert_eq!(config.transfer.delete_batch_size, 1000);
        assert_eq!(config.transfer.max_attempts, 3);
    }

    #[test]
    fn test_endpoint_url_building() {
        let mut config = StoreConfig::with_endpoint("minio.local", "ak", "sk");
        config.port = Some(9000);
        config.secure = false;
        assert_eq!(
            config.endpoint_url().unwrap().as_str(),
            "http://minio.local:9000/"
        );

        config.endpoint = Some("https://storage.example.com".to_string());
        assert_eq!(
            config.endpoint_url().unwrap().as_str(),
            "https://storage.example.com/"
        );

        let aws = StoreConfig {
            region: "eu-west-1".to_string(),
            ..Default::default()
        };
        assert_eq!(
            aws.endpoint_url().unwrap().host_str(),
            Some("s3.eu-west-1.amazonaws.com")
        );
    }

    #[test]
    fn test_validate_rejects_bad_transfer_settings() {
        let mut config = StoreConfig::default();
        config.transfer.part_size = 1024;
        assert!(matches!(config.validate(), Err(StoreError::InvalidConfig(_))));

        let mut config = StoreConfig::default();
        config.transfer.parallel_parts = 0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.transfer.parallel_parts = MAX_PARALLEL_PARTS + 1;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.transfer.delete_batch_size = 1001;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.transfer.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_paired_credentials() {
        let config = StoreConfig {
            access_key: Some("ak".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_with_defaults() {
        let text = r#"
            endpoint = "localhost"
            port = 9000
            secure = false
            access_key = "minioadmin"
            secret_key = "minioadmin"
            default_bucket = "uploads"

            [transfer]
            part_size = 8388608
        "#;
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), text).unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, Some(9000));
        assert_eq!(config.default_bucket.as_ref().unwrap().as_str(), "uploads");
        assert_eq!(config.transfer.part_size, 8 * 1024 * 1024);
        assert_eq!(config.transfer.parallel_parts, DEFAULT_PARALLEL_PARTS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_default_bucket_in_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "default_bucket = \"Bad..Name\"").unwrap();
        assert!(matches!(
            StoreConfig::from_file(file.path()),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STOWAGE_ENDPOINT", "minio.internal"),
            ("STOWAGE_PORT", "9000"),
            ("STOWAGE_SECURE", "false"),
            ("STOWAGE_DEFAULT_BUCKET", "media"),
            ("STOWAGE_PARALLEL_PARTS", "8"),
        ]
        .into_iter()
        .collect();

        let mut config = StoreConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("minio.internal"));
        assert_eq!(config.port, Some(9000));
        assert!(!config.secure);
        assert_eq!(config.transfer.parallel_parts, 8);
        assert_eq!(config.default_bucket.unwrap().as_str(), "media");

        let mut config = StoreConfig::default();
        let err = config
            .apply_overrides(|name| (name == "STOWAGE_PORT").then(|| "ninety".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("STOWAGE_PORT"));
    }
}
