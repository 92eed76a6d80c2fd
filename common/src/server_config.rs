use config::{Config, ConfigError, Environment, File, FileFormat};
use dotenv::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Upper bound for a single uploaded file, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    #[serde(default = "default_json_body_limit")]
    pub json_body_limit: usize,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Switches the session cookie to `Secure; SameSite=None`.
    #[serde(default)]
    pub production: bool,
    /// Honour `Forwarded`/`X-Forwarded-For` when keying rate limits.
    /// Only enable behind a proxy that overwrites those headers.
    #[serde(default)]
    pub trust_proxy: bool,
}

fn default_max_file_size() -> usize {
    10 * 1024 * 1024
}

fn default_json_body_limit() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub dbname: String,
    /// Run the schema DDL at start-up.
    #[serde(default)]
    pub synchronize: bool,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host, self.port, self.username, self.password, self.dbname
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirebaseConfig {
    pub project_id: String,
    /// Path of the Google service account JSON key. Used for Firebase and the Healthcare API.
    pub service_account_path: String,
    #[serde(default = "default_identity_toolkit_url")]
    pub identity_toolkit_url: String,
    #[serde(default = "default_public_keys_url")]
    pub public_keys_url: String,
    #[serde(default = "default_key_refresh_seconds")]
    pub key_refresh_seconds: u64,
    #[serde(default = "default_session_expires_in")]
    pub session_expires_in_seconds: u64,
}

fn default_identity_toolkit_url() -> String {
    "https://identitytoolkit.googleapis.com/v1".to_string()
}

fn default_public_keys_url() -> String {
    "https://www.googleapis.com/identitytoolkit/v3/relyingparty/publicKeys".to_string()
}

fn default_key_refresh_seconds() -> u64 {
    600
}

fn default_session_expires_in() -> u64 {
    60 * 60 * 24
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthcareConfig {
    #[serde(default = "default_healthcare_url")]
    pub base_url: String,
    /// Store that receives de-identified copies, in the same dataset as the source.
    pub destination_store_id: String,
    pub gcs_config_uri: Option<String>,
}

fn default_healthcare_url() -> String {
    "https://healthcare.googleapis.com/v1".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorMode {
    Remote,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataExtractorConfig {
    #[serde(default = "default_extractor_mode")]
    pub mode: ExtractorMode,
    #[serde(default = "default_extractor_url")]
    pub url: String,
}

fn default_extractor_mode() -> ExtractorMode {
    ExtractorMode::Remote
}

fn default_extractor_url() -> String {
    "http://localhost:5001/extract-metadata".to_string()
}

impl Default for MetadataExtractorConfig {
    fn default() -> Self {
        Self {
            mode: default_extractor_mode(),
            url: default_extractor_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_global_max")]
    pub global_max: u64,
    #[serde(default = "default_auth_max")]
    pub auth_max: u64,
    #[serde(default = "default_auth_max")]
    pub register_max: u64,
}

fn default_window_seconds() -> u64 {
    15 * 60
}

fn default_global_max() -> u64 {
    100
}

fn default_auth_max() -> u64 {
    5
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            global_max: default_global_max(),
            auth_max: default_auth_max(),
            register_max: default_auth_max(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Lowercase SHA-256 digests of files that must be rejected.
    #[serde(default)]
    pub malicious_hashes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_name")]
    pub name: String,
    /// When set, the extracted metadata of every upload is written here as text.
    pub metadata_log_dir: Option<String>,
}

fn default_log_name() -> String {
    "portal-server".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            name: default_log_name(),
            metadata_log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub firebase: FirebaseConfig,
    pub healthcare: HealthcareConfig,
    #[serde(default)]
    pub metadata_extractor: MetadataExtractorConfig,
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

static APP_ENV: &str = "APP_ENV";
static APP_PREFIX: &str = "PORTAL";

fn env_source() -> Environment {
    // PORTAL_DATABASE__HOST overrides database.host
    Environment::with_prefix(APP_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    dotenv().ok();

    let env = env::var(APP_ENV).unwrap_or_else(|_| "dev".into());
    let config_path = format!("application.{}.json", env);

    let settings = Config::builder()
        .add_source(File::with_name(&config_path).required(true))
        .add_source(env_source())
        .build()?;

    settings.try_deserialize()
}

/// Parse a JSON document with the same layout as `application.<env>.json`.
pub fn load_config_from_str(json: &str) -> Result<AppConfig, ConfigError> {
    Config::builder()
        .add_source(File::from_str(json, FileFormat::Json))
        .build()?
        .try_deserialize()
}

#[cfg(test)]
pub(crate) const SAMPLE_CONFIG: &str = r#"{
    "server": { "port": 3001, "host": "0.0.0.0", "allowed_origins": ["http://localhost:3000"] },
    "database": {
        "host": "localhost", "port": 5432, "username": "portal",
        "password": "secret", "dbname": "portal"
    },
    "firebase": { "project_id": "demo-portal", "service_account_path": "./service-account.json" },
    "healthcare": {
        "destination_store_id": "deid-store",
        "gcs_config_uri": "gs://bucket/de-id-template.json"
    },
    "security": { "malicious_hashes": ["275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f"] }
}"#;
