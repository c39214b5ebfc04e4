// Configuration loading (§6 "Configuration"). Grounded on the `config`
// crate usage elsewhere in the retrieved pack (TOML file + environment
// overlay), generalized from the teacher's single `DATABASE_FILE` env
// var read directly in `main.rs`.
use crate::models::DatabaseConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
    /// Legacy single-database form, accepted per §6 when `databases` is
    /// absent.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub collections: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub mongodb: MongoConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

impl AppConfig {
    /// Loads from `config.toml` (if present) in the working directory,
    /// overlaid with `AKTUELL_`-prefixed environment variables, as named
    /// in §6 ("All options accept overrides from environment variables
    /// prefixed with the application name").
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("AKTUELL")
                    .separator("__")
                    .try_parsing(true),
            );
        builder.build()?.try_deserialize()
    }

    /// Resolves the configured whitelist, falling back to the legacy
    /// `mongodb.database` + `mongodb.collections` pair when `databases`
    /// is absent (§6).
    pub fn resolved_databases(&self) -> Vec<DatabaseConfig> {
        if !self.mongodb.databases.is_empty() {
            return self.mongodb.databases.clone();
        }

        match &self.mongodb.database {
            Some(name) => vec![DatabaseConfig {
                name: name.clone(),
                collections: self.mongodb.collections.clone().unwrap_or_default(),
            }],
            None => vec![],
        }
    }
}
