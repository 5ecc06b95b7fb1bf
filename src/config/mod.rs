use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::MirrorError;
use crate::mirror::sync::{FailurePolicy, SyncOptions};

/// Sync engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Uploads in flight (default: 8)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Discovered files buffered ahead of the uploader (default: 16)
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// best_effort or fail_fast
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_concurrency() -> usize {
    8
}

fn default_queue_depth() -> usize {
    16
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_depth: default_queue_depth(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            concurrency: self.concurrency,
            queue_depth: self.queue_depth,
            failure_policy: self.failure_policy,
        }
    }
}

/// Service endpoint overrides; regional AWS endpoints when unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub codecommit: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Region of the repository and the bucket
    #[serde(default)]
    pub region: String,

    /// Destination bucket
    #[serde(default)]
    pub bucket: String,

    /// Branch to check out; remote default branch when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Local clone workspace (default: /tmp/store)
    #[serde(default = "default_clone_dir")]
    pub clone_dir: PathBuf,

    /// Directory inside the clone that gets published (default: public)
    #[serde(default = "default_publish_dir")]
    pub publish_dir: String,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Throttling retries per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_clone_dir() -> PathBuf {
    PathBuf::from("/tmp/store")
}

fn default_publish_dir() -> String {
    "public".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

impl Config {
    pub fn new(region: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            bucket: bucket.into(),
            branch: None,
            clone_dir: default_clone_dir(),
            publish_dir: default_publish_dir(),
            sync: SyncConfig::default(),
            endpoints: EndpointsConfig::default(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }

    /// Root of the tree mirrored into the bucket
    pub fn sync_root(&self) -> PathBuf {
        self.clone_dir.join(&self.publish_dir)
    }

    pub fn validate(&self) -> std::result::Result<(), MirrorError> {
        if self.region.trim().is_empty() {
            return Err(MirrorError::Configuration("region is not set".to_string()));
        }
        if self.bucket.trim().is_empty() {
            return Err(MirrorError::Configuration("bucket is not set".to_string()));
        }
        if self.sync.concurrency == 0 {
            return Err(MirrorError::Configuration(
                "sync.concurrency must be at least 1".to_string(),
            ));
        }
        if self.sync.queue_depth == 0 {
            return Err(MirrorError::Configuration(
                "sync.queue_depth must be at least 1".to_string(),
            ));
        }
        if self.clone_dir.as_os_str().is_empty() || self.clone_dir.parent().is_none() {
            return Err(MirrorError::Configuration(format!(
                "clone_dir {:?} must name a directory below a parent",
                self.clone_dir
            )));
        }
        if Path::new(&self.publish_dir).is_absolute() {
            return Err(MirrorError::Configuration(format!(
                "publish_dir {:?} must be relative to clone_dir",
                self.publish_dir
            )));
        }
        Ok(())
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_non_empty(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}={:?}: {}", name, raw, e)),
        None => Ok(None),
    }
}

/// Load configuration from environment variables
///
/// - REGION / AWS_REGION
/// - S3_BUCKET
/// - BRANCH (optional)
/// - CLONE_DIR, PUBLISH_DIR (optional, default /tmp/store and public)
/// - SYNC_CONCURRENCY, SYNC_QUEUE_DEPTH, SYNC_FAILURE_POLICY (optional)
/// - S3_ENDPOINT, CODECOMMIT_ENDPOINT (optional)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let region = env_non_empty("REGION")
        .or_else(|| env_non_empty("AWS_REGION"))
        .unwrap_or_default();
    let bucket = env_non_empty("S3_BUCKET").unwrap_or_default();

    let mut config = Config::new(region, bucket);
    config.branch = env_non_empty("BRANCH");

    if let Some(dir) = env_non_empty("CLONE_DIR") {
        config.clone_dir = PathBuf::from(dir);
    }
    if let Some(dir) = env_non_empty("PUBLISH_DIR") {
        config.publish_dir = dir;
    }

    if let Some(val) = env_parse("SYNC_CONCURRENCY")? {
        config.sync.concurrency = val;
    }
    if let Some(val) = env_parse("SYNC_QUEUE_DEPTH")? {
        config.sync.queue_depth = val;
    }
    if let Some(val) = env_parse("SYNC_FAILURE_POLICY")? {
        config.sync.failure_policy = val;
    }

    config.endpoints.s3 = env_non_empty("S3_ENDPOINT");
    config.endpoints.codecommit = env_non_empty("CODECOMMIT_ENDPOINT");

    Ok(config)
}

/// Load configuration from file or environment, then validate it
///
/// # Arguments
/// * `config_path` - Optional path to YAML config file; environment when absent
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config = match config_path {
        Some(path) => load_from_yaml(path)?,
        None => load_from_env()?,
    };

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
