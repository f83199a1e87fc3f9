use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration for the telemetry service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Secret store configuration
    #[serde(default)]
    pub secret_store: SecretStoreConfig,
    /// Object store configuration
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// API configuration for the ingestion endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Where credential secrets are read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretBackend {
    /// Secrets projected into the filesystem, one directory per secret
    #[default]
    Directory,
    /// Secrets declared inline in the configuration
    Static,
}

/// Secret store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SecretStoreConfig {
    /// Backend used to resolve secrets
    #[serde(default)]
    pub backend: SecretBackend,
    /// Root directory of mounted secrets (directory backend)
    #[serde(default = "default_secret_root")]
    pub root: String,
    /// Namespace the secrets are scoped to (directory backend)
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Inline secrets: name -> field -> value (static backend)
    #[serde(default)]
    pub secrets: HashMap<String, HashMap<String, String>>,
}

/// Object store client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    /// Signing region (MinIO ignores it but the SDK requires one)
    #[serde(default = "default_region")]
    pub region: String,
    /// Force path-style access (required for MinIO)
    #[serde(default = "default_true")]
    pub force_path_style: bool,
    /// Directory for payload staging files (system temp dir when unset)
    pub staging_dir: Option<String>,
}

// Default value functions
fn default_service_name() -> String {
    "telemetry-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn default_secret_root() -> String {
    "/etc/nier/secrets".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "telemetry-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(
                config::File::with_name("config/telemetry")
                    .required(false)
            )
            .add_source(
                config::File::with_name("/etc/nier/telemetry")
                    .required(false)
            )
            // Override with environment variables
            // TELEMETRY__API__PORT -> api.port
            .add_source(
                config::Environment::with_prefix("TELEMETRY")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get the directory staging files are created in
    pub fn staging_dir(&self) -> PathBuf {
        self.object_store
            .staging_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Get the namespaced root of mounted secrets
    pub fn secret_dir(&self) -> PathBuf {
        PathBuf::from(&self.secret_store.root).join(&self.secret_store.namespace)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for SecretStoreConfig {
    fn default() -> Self {
        Self {
            backend: SecretBackend::default(),
            root: default_secret_root(),
            namespace: default_namespace(),
            secrets: HashMap::new(),
        }
    }
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            force_path_style: default_true(),
            staging_dir: None,
        }
    }
}
