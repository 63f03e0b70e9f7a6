use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiry_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    pub root: PathBuf,
    pub max_upload_bytes: usize,
    /// Overrides the `<scheme>://<host>` prefix of generated media URLs.
    pub public_base_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub root_class_id: u32,
    pub necrosis_class_id: u32,
    pub outline_thickness: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_any_origin: bool,
    /// Comma separated list of origins used when `allow_any_origin` is off.
    pub allowed_origins: String,
    pub max_age: u32,
}

impl CorsConfig {
    pub fn origins(&self) -> Vec<&str> {
        self.allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub media: MediaConfig,
    pub inference: InferenceConfig,
    pub cors: CorsConfig,
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
    environment: &str,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("environment", environment)?
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8000)?
        .set_default("server.workers", num_cpus::get() as i64)?
        .set_default("database.url", "sqlite://necrosis.db?mode=rwc")?
        .set_default("database.max_connections", 5)?
        .set_default("auth.jwt_secret", "development_secret")?
        .set_default("auth.token_expiry_hours", 24 * 7)?
        .set_default("media.root", "media")?
        .set_default("media.max_upload_bytes", 20 * 1024 * 1024)?
        .set_default("inference.url", "http://127.0.0.1:9000/predict")?
        .set_default("inference.timeout_secs", 60)?
        .set_default("inference.root_class_id", 0)?
        .set_default("inference.necrosis_class_id", 1)?
        .set_default("inference.outline_thickness", 6)?
        .set_default("cors.enabled", true)?
        .set_default("cors.allow_any_origin", false)?
        .set_default("cors.allowed_origins", "http://localhost:5173,http://127.0.0.1:5173")?
        .set_default("cors.max_age", 3600)
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = with_defaults(Config::builder(), &run_mode)?
            // Add in settings from the config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // E.g., `APP_SERVER__PORT=5001` would set `Settings.server.port`
            .add_source(
                Environment::with_prefix("app")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        s.try_deserialize()
    }

    /// Settings for tests: in-memory database, cheap password hashing and
    /// no environment overrides.
    pub fn new_for_test() -> Result<Self, ConfigError> {
        with_defaults(Config::builder(), "test")?
            .set_override("database.url", "sqlite::memory:")?
            .set_override("database.max_connections", 1)?
            .set_override("auth.jwt_secret", "test_secret")?
            .set_override("auth.token_expiry_hours", 1)?
            .set_override("server.workers", 1)?
            .build()?
            .try_deserialize()
    }

    pub fn is_in_memory_database(&self) -> bool {
        self.database.url.contains(":memory:")
    }
}
