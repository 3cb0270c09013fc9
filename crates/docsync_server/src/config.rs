use std::env;
use std::path::PathBuf;
use std::time::Duration;

use docsync::registry::{DEFAULT_DEBOUNCE, DEFAULT_OUTBOUND_CAPACITY, RegistryConfig};
use thiserror::Error;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3030)
    pub port: u16,
    /// Database file path (default: ./docsync.db)
    pub database_path: PathBuf,
    /// CORS allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
    /// Cookie carrying the session token (default: docsync_session)
    pub session_cookie_name: String,
    /// Quiet window before a dirty document is stored (default: 30s)
    pub flush_debounce: Duration,
    /// Queued outbound messages per session before it is dropped (default: 256)
    pub session_outbound_buffer: usize,
    /// Root text projected into `projectedContent` (default: content)
    pub projection_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
            database_path: PathBuf::from("./docsync.db"),
            cors_origins: vec!["http://localhost:5173".to_string()],
            session_cookie_name: "docsync_session".to_string(),
            flush_debounce: DEFAULT_DEBOUNCE,
            session_outbound_buffer: DEFAULT_OUTBOUND_CAPACITY,
            projection_root: docsync::DEFAULT_TEXT_ROOT.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);
        let port = match env::var("PORT") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidPort(value))?,
            Err(_) => defaults.port,
        };

        let database_path = env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let cors_origins = match env::var("CORS_ORIGINS") {
            Ok(value) => value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.cors_origins,
        };

        let session_cookie_name = env::var("SESSION_COOKIE_NAME")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.session_cookie_name);

        let flush_debounce = match env::var("FLUSH_DEBOUNCE_SECS") {
            Ok(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(ConfigError::InvalidDebounce(value)),
            },
            Err(_) => defaults.flush_debounce,
        };

        let session_outbound_buffer = env::var("SESSION_OUTBOUND_BUFFER")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.session_outbound_buffer);

        let projection_root = env::var("PROJECTION_ROOT").unwrap_or(defaults.projection_root);

        Ok(Config {
            host,
            port,
            database_path,
            cors_origins,
            session_cookie_name,
            flush_debounce,
            session_outbound_buffer,
            projection_root,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            debounce: self.flush_debounce,
            outbound_capacity: self.session_outbound_buffer,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid PORT environment variable: {0}")]
    InvalidPort(String),
    #[error("Invalid FLUSH_DEBOUNCE_SECS environment variable: {0}")]
    InvalidDebounce(String),
}
