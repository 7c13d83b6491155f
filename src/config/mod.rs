use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_ssm::Client as SsmClient;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Prefix of every environment variable read by the service
pub const ENV_PREFIX: &str = "MENUCARD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {message}")]
    LoadError { message: String },

    #[error("Parameter not found: {name}")]
    ParameterNotFound { name: String },

    #[error("AWS SDK error: {source}")]
    AwsSdk {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub mail: MailConfig,
    pub auth: AuthConfig,
    pub aws: AwsConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,
}

/// Which entity store backs the repositories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Dynamodb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_dishes_table")]
    pub dishes_table_name: String,
    #[serde(default = "default_menus_table")]
    pub menus_table_name: String,
    #[serde(default = "default_unique_keys_table")]
    pub unique_keys_table_name: String,
    #[serde(default = "default_region")]
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_media_url")]
    pub media_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub email_host_user: String,
    /// Comma-separated recipient addresses
    #[serde(default)]
    pub digest_recipients: String,
    #[serde(default)]
    pub digest_enabled: bool,
    #[serde(default = "default_digest_hour")]
    pub digest_hour: u32,
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Comma-separated API tokens accepted on write requests
    #[serde(default)]
    pub api_tokens: String,
    /// Optional SSM parameter holding additional comma-separated tokens
    #[serde(default)]
    pub api_token_parameter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    pub dynamodb_client: DynamoDbClient,
    pub ssm_client: SsmClient,
    pub parameter_store: Arc<ParameterStoreConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_service_version")]
    pub service_version: String,
    #[serde(default)]
    pub otlp_endpoint: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub enable_json_logging: bool,
}

pub struct ParameterStoreConfig {
    ssm_client: SsmClient,
    cache: Arc<RwLock<HashMap<String, (String, Instant)>>>,
    cache_ttl: Duration,
}

impl fmt::Debug for ParameterStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterStoreConfig")
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_size", &"<runtime>")
            .finish()
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_tokens", &format!("<{} configured>", self.static_tokens().len()))
            .field("api_token_parameter", &self.api_token_parameter)
            .finish()
    }
}

/// Load the environment source shared by every configuration section
fn environment_settings() -> Result<config::Config, ConfigError> {
    config::Config::builder()
        .add_source(config::Environment::with_prefix(ENV_PREFIX))
        .build()
        .map_err(|e| ConfigError::LoadError {
            message: format!("Failed to load configuration: {}", e),
        })
}

/// Deserialize one configuration section from already loaded settings
pub(crate) fn section_from<T: serde::de::DeserializeOwned>(
    settings: config::Config,
    section: &str,
) -> Result<T, ConfigError> {
    settings
        .try_deserialize()
        .map_err(|e| ConfigError::LoadError {
            message: format!("Failed to deserialize {} config: {}", section, e),
        })
}

impl Config {
    pub async fn from_environment() -> Result<Self, ConfigError> {
        info!("Loading configuration from environment");

        let server = ServerConfig::from_env()?;
        let database = DatabaseConfig::from_env()?;
        let storage = StorageConfig::from_env()?;
        let mail = MailConfig::from_env()?;
        let auth = AuthConfig::from_env()?;
        let observability = ObservabilityConfig::from_env()?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(database.region.clone()))
            .load()
            .await;

        let dynamodb_client = DynamoDbClient::new(&aws_config);
        let ssm_client = SsmClient::new(&aws_config);

        let parameter_store = Arc::new(ParameterStoreConfig::new(
            ssm_client.clone(),
            Duration::from_secs(5 * 60),
        ));

        let aws = AwsConfig {
            region: database.region.clone(),
            dynamodb_client,
            ssm_client,
            parameter_store,
        };

        let config = Config {
            server,
            database,
            storage,
            mail,
            auth,
            aws,
            observability,
        };

        config.validate()?;
        config.check_connectivity().await;

        info!("Configuration loaded successfully");
        debug!("Configuration: {:?}", config);

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        info!("Validating configuration");

        self.server.validate()?;
        self.database.validate()?;
        self.mail.validate()?;

        info!("Configuration validation completed");
        Ok(())
    }

    /// Probe DynamoDB when it backs the store; failures are logged, not fatal
    async fn check_connectivity(&self) {
        if self.database.backend != StorageBackend::Dynamodb {
            return;
        }

        match self.aws.dynamodb_client.list_tables().limit(1).send().await {
            Ok(_) => info!("AWS DynamoDB connectivity validated"),
            Err(e) => warn!("AWS DynamoDB connectivity test failed: {}", e),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_timeout(),
            max_request_size: default_max_request_size(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            media_url: default_media_url(),
        }
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        section_from(environment_settings()?, "server")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ValidationError {
                message: "Server port cannot be 0".to_string(),
            });
        }

        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError {
                message: "Request timeout cannot be 0".to_string(),
            });
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError {
                message: "Maximum upload size cannot be 0".to_string(),
            });
        }

        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        section_from(environment_settings()?, "database")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend != StorageBackend::Dynamodb {
            return Ok(());
        }

        for (label, name) in [
            ("Dishes", &self.dishes_table_name),
            ("Menus", &self.menus_table_name),
            ("Unique keys", &self.unique_keys_table_name),
        ] {
            if name.is_empty() {
                return Err(ConfigError::ValidationError {
                    message: format!("{} table name cannot be empty", label),
                });
            }
        }

        Ok(())
    }
}

impl StorageConfig {
    fn from_env() -> Result<Self, ConfigError> {
        section_from(environment_settings()?, "storage")
    }
}

impl MailConfig {
    fn from_env() -> Result<Self, ConfigError> {
        section_from(environment_settings()?, "mail")
    }

    /// Recipient addresses with blanks removed
    pub fn recipients(&self) -> Vec<String> {
        split_list(&self.digest_recipients).into_iter().collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.digest_hour > 23 {
            return Err(ConfigError::ValidationError {
                message: format!("Digest hour must be 0-23, got {}", self.digest_hour),
            });
        }

        if self.digest_enabled && self.email_host_user.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "Digest is enabled but no sender address is configured".to_string(),
            });
        }

        Ok(())
    }
}

impl AuthConfig {
    fn from_env() -> Result<Self, ConfigError> {
        section_from(environment_settings()?, "auth")
    }

    pub fn static_tokens(&self) -> BTreeSet<String> {
        split_list(&self.api_tokens)
    }

    /// Resolve the full token set, adding tokens held in Parameter Store when configured
    pub async fn resolve_tokens(&self, parameter_store: &ParameterStoreConfig) -> BTreeSet<String> {
        let mut tokens = self.static_tokens();

        if let Some(name) = &self.api_token_parameter {
            match parameter_store.get_parameter(name).await {
                Ok(value) => tokens.extend(split_list(&value)),
                Err(e) => warn!("Failed to load API tokens from parameter {}: {}", name, e),
            }
        }

        if tokens.is_empty() {
            warn!("No API tokens configured; all write requests will be rejected");
        }

        tokens
    }
}

impl ObservabilityConfig {
    fn from_env() -> Result<Self, ConfigError> {
        section_from(environment_settings()?, "observability")
    }
}

impl ParameterStoreConfig {
    pub fn new(ssm_client: SsmClient, cache_ttl: Duration) -> Self {
        Self {
            ssm_client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_ttl,
        }
    }

    pub async fn get_parameter(&self, name: &str) -> Result<String, ConfigError> {
        debug!("Getting parameter: {}", name);

        {
            let cache = self.cache.read().await;
            if let Some((value, timestamp)) = cache.get(name) {
                if timestamp.elapsed() < self.cache_ttl {
                    debug!("Parameter found in cache: {}", name);
                    return Ok(value.clone());
                }
                debug!("Parameter cache expired: {}", name);
            }
        }

        debug!("Fetching parameter from AWS SSM: {}", name);
        let result = self
            .ssm_client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| ConfigError::AwsSdk {
                source: Box::new(e),
            })?;

        let value = result
            .parameter()
            .and_then(|p| p.value())
            .ok_or_else(|| ConfigError::ParameterNotFound {
                name: name.to_string(),
            })?
            .to_string();

        {
            let mut cache = self.cache.write().await;
            cache.insert(name.to_string(), (value.clone(), Instant::now()));
        }

        debug!("Parameter retrieved and cached: {}", name);
        Ok(value)
    }

    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
        info!("Parameter store cache cleared");
    }

    pub async fn cache_size(&self) -> usize {
        let cache = self.cache.read().await;
        cache.len()
    }
}

/// Split a comma-separated list, trimming entries and dropping blanks
pub(crate) fn split_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

// Default value functions
pub(crate) fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub(crate) fn default_port() -> u16 {
    8080
}

pub(crate) fn default_timeout() -> u64 {
    30
}

pub(crate) fn default_max_request_size() -> usize {
    1024 * 1024 // 1MB
}

pub(crate) fn default_max_upload_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

pub(crate) fn default_dishes_table() -> String {
    "MenuDishes".to_string()
}

pub(crate) fn default_menus_table() -> String {
    "Menus".to_string()
}

pub(crate) fn default_unique_keys_table() -> String {
    "MenuUniqueKeys".to_string()
}

pub(crate) fn default_region() -> String {
    "us-west-2".to_string()
}

pub(crate) fn default_upload_dir() -> PathBuf {
    PathBuf::from("./media")
}

pub(crate) fn default_media_url() -> String {
    "/media".to_string()
}

pub(crate) fn default_digest_hour() -> u32 {
    10
}

pub(crate) fn default_service_name() -> String {
    "menucard-rs".to_string()
}

pub(crate) fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub(crate) fn default_metrics_port() -> u16 {
    9090
}

pub(crate) fn default_log_level() -> String {
    "info".to_string()
}
