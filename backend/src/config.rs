//! `ferry-board.toml` configuration file support.
//!
//! Every section is optional. A missing `[[corridors]]` table means the
//! built-in Cape & Islands network is used.
//!
//! ```toml
//! [repository]
//! type = "local"
//!
//! [board]
//! fetch_timeout_ms = 8000
//! strict_authority = true
//!
//! [[templates]]
//! route = "wh-vh-ssa"
//! departures = ["7:00 AM", "9:30 AM"]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::db::factory::RepositoryType;
use crate::db::PostgresConfig;
use crate::models::corridor::{builtin_corridors, builtin_operators, builtin_ports, CorridorRegistry};
use crate::models::identity::IdentityError;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "FERRY_BOARD_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("No ferry-board.toml found in standard locations")]
    NotFound,

    #[error("Invalid repository type: {0}")]
    InvalidRepositoryType(String),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Unknown port: {0}")]
    UnknownPort(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Unknown route in template: {0}")]
    UnknownRoute(String),

    #[error("Invalid corridor {corridor}: {reason}")]
    InvalidCorridor { corridor: String, reason: String },

    #[error("Invalid identity in config: {0}")]
    Identity(#[from] IdentityError),

    #[error("{0}")]
    Repository(String),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub repository: RepositorySettings,
    #[serde(default)]
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub board: BoardSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub ports: Vec<PortSettings>,
    #[serde(default)]
    pub operators: Vec<OperatorSettings>,
    #[serde(default)]
    pub corridors: Vec<CorridorSettings>,
    #[serde(default)]
    pub templates: Vec<TemplateSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySettings {
    #[serde(rename = "type", default = "default_repo_type")]
    pub repo_type: String,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            repo_type: default_repo_type(),
        }
    }
}

fn default_repo_type() -> String {
    "local".to_string()
}

/// Postgres connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSettings {
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

/// Board composition knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSettings {
    /// Per-route schedule fetch bound.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Per-sailing forecast lookup bound.
    #[serde(default = "default_forecast_timeout_ms")]
    pub forecast_timeout_ms: u64,
    #[serde(default = "default_schedule_cache_ttl_secs")]
    pub schedule_cache_ttl_secs: u64,
    #[serde(default = "default_status_cache_ttl_secs")]
    pub status_cache_ttl_secs: u64,
    /// Treat a template sailing under operator-only authority as fatal.
    #[serde(default = "default_true")]
    pub strict_authority: bool,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            forecast_timeout_ms: default_forecast_timeout_ms(),
            schedule_cache_ttl_secs: default_schedule_cache_ttl_secs(),
            status_cache_ttl_secs: default_status_cache_ttl_secs(),
            strict_authority: true,
        }
    }
}

impl BoardSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn forecast_timeout(&self) -> Duration {
        Duration::from_millis(self.forecast_timeout_ms)
    }

    pub fn schedule_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.schedule_cache_ttl_secs)
    }

    pub fn status_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.status_cache_ttl_secs)
    }
}

fn default_fetch_timeout_ms() -> u64 {
    8_000
}

fn default_forecast_timeout_ms() -> u64 {
    3_000
}

fn default_schedule_cache_ttl_secs() -> u64 {
    300
}

fn default_status_cache_ttl_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Cancel future sailings that vanish from an operator snapshot.
    #[serde(default = "default_true")]
    pub infer_removed: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            infer_removed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSettings {
    pub slug: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSettings {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSettings {
    pub id: String,
    pub operator: String,
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub crossing_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorridorSettings {
    pub id: String,
    pub name: String,
    pub terminals: Vec<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub routes: Vec<RouteSettings>,
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

/// Static departures served when no operator data exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSettings {
    pub route: String,
    pub departures: Vec<String>,
    #[serde(default)]
    pub vessel: Option<String>,
    #[serde(default)]
    pub advisories: Vec<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Search for `ferry-board.toml` in:
    /// 1. Current directory
    /// 2. `backend/` directory
    /// 3. Parent directory
    pub fn from_default_location() -> Result<Self, ConfigError> {
        let search_paths = [
            PathBuf::from("ferry-board.toml"),
            PathBuf::from("backend/ferry-board.toml"),
            PathBuf::from("../ferry-board.toml"),
        ];

        for path in search_paths {
            if path.exists() {
                log::info!("Loading configuration from {}", path.display());
                return Self::from_file(&path);
            }
        }

        Err(ConfigError::NotFound)
    }

    /// `FERRY_BOARD_CONFIG` if set, else the default locations, else defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(path);
        }

        match Self::from_default_location() {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound) => {
                log::info!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn repository_type(&self) -> Result<RepositoryType, ConfigError> {
        RepositoryType::from_str(&self.repository.repo_type)
            .map_err(ConfigError::InvalidRepositoryType)
    }

    /// Corridor table, falling back to built-in ports and operators when a
    /// section is omitted.
    pub fn corridor_registry(&self) -> Result<CorridorRegistry, ConfigError> {
        if self.corridors.is_empty() && self.ports.is_empty() && self.operators.is_empty() {
            return Ok(CorridorRegistry::builtin());
        }

        let ports = if self.ports.is_empty() {
            builtin_ports()
        } else {
            self.ports.clone()
        };
        let operators = if self.operators.is_empty() {
            builtin_operators()
        } else {
            self.operators.clone()
        };
        let corridors = if self.corridors.is_empty() {
            builtin_corridors()
        } else {
            self.corridors.clone()
        };

        CorridorRegistry::from_settings(&ports, &operators, &corridors)
    }

    /// Convert to PostgresConfig if this is a Postgres configuration.
    #[cfg(feature = "postgres-repo")]
    pub fn to_postgres_config(&self) -> Result<Option<PostgresConfig>, ConfigError> {
        if self.repository_type()? != RepositoryType::Postgres {
            return Ok(None);
        }

        if self.postgres.database_url.is_empty() {
            return Err(ConfigError::Repository(
                "Postgres repository requires 'postgres.database_url' setting".to_string(),
            ));
        }

        Ok(Some(PostgresConfig {
            database_url: self.postgres.database_url.clone(),
            max_pool_size: self.postgres.max_connections,
            min_pool_size: self.postgres.min_connections,
            connection_timeout_sec: self.postgres.connect_timeout,
            idle_timeout_sec: self.postgres.idle_timeout,
            max_retries: self.postgres.max_retries,
            retry_delay_ms: self.postgres.retry_delay_ms,
        }))
    }

    #[cfg(not(feature = "postgres-repo"))]
    pub fn to_postgres_config(&self) -> Result<Option<PostgresConfig>, ConfigError> {
        if self.repository_type()? == RepositoryType::Postgres {
            return Err(ConfigError::Repository(
                "Postgres repository feature not enabled".to_string(),
            ));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.repository_type().unwrap(), RepositoryType::Local);
        assert_eq!(config.board.fetch_timeout(), Duration::from_secs(8));
        assert!(config.board.strict_authority);
        assert!(config.ingest.infer_removed);
        assert_eq!(config.corridor_registry().unwrap().corridors().len(), 4);
    }

    #[test]
    fn test_parse_board_and_templates() {
        let toml = r#"
[board]
fetch_timeout_ms = 1500
strict_authority = false

[ingest]
infer_removed = false

[[templates]]
route = "wh-vh-ssa"
departures = ["7:00 AM", "09:30"]
advisories = ["Reservations recommended"]
"#;
        let config = AppConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.board.fetch_timeout_ms, 1500);
        assert_eq!(config.board.forecast_timeout_ms, 3000);
        assert!(!config.board.strict_authority);
        assert!(!config.ingest.infer_removed);
        assert_eq!(config.templates.len(), 1);
        assert_eq!(config.templates[0].departures.len(), 2);
    }

    #[test]
    fn test_custom_corridor_reuses_builtin_ports() {
        let toml = r#"
[[corridors]]
id = "wh-ob"
name = "Woods Hole Oak Bluffs"
terminals = ["Woods Hole", "OB"]

[[corridors.routes]]
id = "wh-ob-ssa"
operator = "ssa"
origin = "wh"
destination = "ob"
"#;
        let config = AppConfig::from_toml_str(toml).unwrap();
        let registry = config.corridor_registry().unwrap();
        assert_eq!(registry.corridors().len(), 1);
        assert_eq!(registry.corridors()[0].timezone, chrono_tz::America::New_York);
    }

    #[test]
    fn test_invalid_repository_type() {
        let config = AppConfig::from_toml_str("[repository]\ntype = \"sqlite\"\n").unwrap();
        assert!(matches!(
            config.repository_type(),
            Err(ConfigError::InvalidRepositoryType(_))
        ));
    }

    #[cfg(not(feature = "postgres-repo"))]
    #[test]
    fn test_postgres_without_feature_is_rejected() {
        let config = AppConfig::from_toml_str("[repository]\ntype = \"postgres\"\n").unwrap();
        assert!(config.to_postgres_config().is_err());
    }
}
