use std::path::PathBuf;
use std::time::Duration;

use common::ResizePolicy;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CorsConfig {
    /// Allowed origins. Empty disables the CORS layer.
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

fn default_cors_max_age() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Mount point of the image route, e.g. "/sss". Empty mounts at the root.
    #[serde(default)]
    pub path_prefix: String,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Default: 20.
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
    /// Idle connections kept open. Default: 10.
    #[serde(default = "default_db_min_connections")]
    pub min_connections: u32,
    /// Default: 1800 (30 minutes).
    #[serde(default = "default_db_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    /// How long a request waits for a pooled connection. Default: 3.
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Default: 5.
    #[serde(default = "default_db_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_db_max_connections() -> u32 {
    20
}
fn default_db_min_connections() -> u32 {
    10
}
fn default_db_max_lifetime_secs() -> u64 {
    30 * 60
}
fn default_db_acquire_timeout_secs() -> u64 {
    3
}
fn default_db_connect_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Filesystem,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    pub endpoint: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

fn default_s3_region() -> String {
    "auto".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Key prefix for every object. Default: "cdnhub/sss".
    #[serde(default = "default_storage_prefix")]
    pub prefix: String,
    /// Per-call timeout for head/get/put. Default: 10.
    #[serde(default = "default_storage_op_timeout_secs")]
    pub op_timeout_secs: u64,
    pub s3: Option<S3Config>,
    pub filesystem: Option<FilesystemConfig>,
}

fn default_storage_prefix() -> String {
    "cdnhub/sss".into()
}
fn default_storage_op_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct OriginConfig {
    /// Per-request timeout. Default: 10.
    #[serde(default = "default_origin_timeout_secs")]
    pub timeout_secs: u64,
    /// Largest accepted origin body. Default: 10 MiB.
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: usize,
    /// Default: 5.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Redirect targets that mean "this entity has no image".
    #[serde(default = "default_absent_markers")]
    pub absent_markers: Vec<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_origin_timeout_secs() -> u64 {
    10
}
fn default_max_fetch_bytes() -> usize {
    10 << 20
}
fn default_max_redirects() -> usize {
    5
}
fn default_absent_markers() -> Vec<String> {
    vec!["no-poster.gif".into()]
}
fn default_user_agent() -> String {
    concat!("imgcache/", env!("CARGO_PKG_VERSION")).into()
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_origin_timeout_secs(),
            max_fetch_bytes: default_max_fetch_bytes(),
            max_redirects: default_max_redirects(),
            absent_markers: default_absent_markers(),
            user_agent: default_user_agent(),
        }
    }
}

impl OriginConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResizeConfig {
    #[serde(flatten)]
    pub policy: ResizePolicy,
    /// Output encoder quality, 0-100. Default: 80.
    #[serde(default = "default_quality")]
    pub quality: f32,
}

fn default_quality() -> f32 {
    80.0
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            policy: ResizePolicy::default(),
            quality: default_quality(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Cache writes finish before the response is sent.
    #[default]
    Sync,
    /// Cache writes run in the background and are dropped when saturated.
    Async,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default)]
    pub mode: UploadMode,
    /// Background upload permits. Default: 32.
    #[serde(default = "default_upload_max_concurrent")]
    pub max_concurrent: usize,
    /// Timeout for a single background upload. Default: 30.
    #[serde(default = "default_upload_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_upload_max_concurrent() -> usize {
    32
}
fn default_upload_timeout_secs() -> u64 {
    30
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            mode: UploadMode::default(),
            max_concurrent: default_upload_max_concurrent(),
            timeout_secs: default_upload_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub resize: ResizeConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("IMGCACHE_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("storage.backend", "s3")?
            // Load from config/config.toml
            .add_source(File::with_name(&config_path).required(false))
            // Override from environment (e.g., IMGCACHE__STORAGE__S3__BUCKET)
            .add_source(
                Environment::with_prefix("IMGCACHE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("origin.absent_markers")
                    .with_list_parse_key("server.cors.allow_origins")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}
