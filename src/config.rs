//! Database configuration loaded from environment variables.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{Classify, ErrorKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("failed to load env file {path}: {source}")]
    EnvFile {
        path: String,
        #[source]
        source: dotenvy::Error,
    },
}

impl Classify for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

/// Connection parameters for the card store.
///
/// | Env Var         | Default   |
/// |-----------------|-----------|
/// | `DB_HOST`       | required  |
/// | `DB_PORT`       | required  |
/// | `DB_USER`       | required  |
/// | `DB_PASSWORD`   | required  |
/// | `DB_NAME`       | required  |
/// | `DB_SSLMODE`    | `disable` |
/// | `USE_DB_PREFIX` | `false`   |
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    /// Connect to `db.<host>` instead of `<host>`.
    pub use_db_prefix: bool,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("use_db_prefix", &self.use_db_prefix)
            .finish()
    }
}

impl DbConfig {
    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let port_raw = required("DB_PORT")?;
        let port = port_raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
            name: "DB_PORT",
            value: port_raw.clone(),
        })?;

        let ssl_mode = lookup("DB_SSLMODE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "disable".to_string());
        if PgSslMode::from_str(&ssl_mode).is_err() {
            return Err(ConfigError::Invalid {
                name: "DB_SSLMODE",
                value: ssl_mode,
            });
        }

        let use_db_prefix = match lookup("USE_DB_PREFIX").map(|v| v.trim().to_ascii_lowercase()) {
            None => false,
            Some(v) => match v.as_str() {
                "" | "false" | "0" | "no" => false,
                "true" | "1" | "yes" => true,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "USE_DB_PREFIX",
                        value: v,
                    })
                }
            },
        };

        Ok(Self {
            host: required("DB_HOST")?,
            port,
            user: required("DB_USER")?,
            password: required("DB_PASSWORD")?,
            database: required("DB_NAME")?,
            ssl_mode,
            use_db_prefix,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load `env_file` (or `.env` when `None`) into the process environment,
    /// then read it. A missing file is tolerated.
    pub fn load(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        let path = env_file.unwrap_or_else(|| Path::new(".env"));
        match dotenvy::from_path(path) {
            Ok(()) => info!(path = %path.display(), "loaded env file"),
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "env file not found; using process environment");
            }
            Err(source) => {
                return Err(ConfigError::EnvFile {
                    path: path.display().to_string(),
                    source,
                })
            }
        }
        Self::from_env()
    }

    /// Host actually connected to.
    pub fn effective_host(&self) -> String {
        if self.use_db_prefix {
            format!("db.{}", self.host)
        } else {
            self.host.clone()
        }
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        let ssl_mode = PgSslMode::from_str(&self.ssl_mode).map_err(|_| ConfigError::Invalid {
            name: "DB_SSLMODE",
            value: self.ssl_mode.clone(),
        })?;
        Ok(PgConnectOptions::new()
            .host(&self.effective_host())
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .ssl_mode(ssl_mode))
    }
}
