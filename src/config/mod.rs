//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::util::rate_limit::{DEFAULT_INBOUND_FRAME_LIMIT, DEFAULT_MIN_RESPONSE_INTERVAL};

/// Default per-decision inference budget
pub const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_millis(20);

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Exported policy weights; heuristic only when unset
    pub model_path: Option<PathBuf>,
    /// Directory holding the game client and model artifacts
    pub static_dir: PathBuf,
    /// Allowed client origins for CORS (empty = any)
    pub client_origins: Vec<String>,

    /// Minimum gap between two responses on one session
    pub min_response_interval: Duration,
    /// Upper bound on a single policy inference
    pub decision_timeout: Duration,
    /// Inbound frames per second per session before frames are dropped
    pub inbound_frame_limit: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            model_path: env::var("MODEL_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            static_dir: env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("frontend")),
            client_origins: env::var("CLIENT_ORIGIN")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),

            min_response_interval: parse_var::<u64>("MIN_RESPONSE_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MIN_RESPONSE_INTERVAL),
            decision_timeout: parse_var::<u64>("DECISION_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DECISION_TIMEOUT),
            inbound_frame_limit: parse_var::<u32>("INBOUND_FRAME_LIMIT")?
                .unwrap_or(DEFAULT_INBOUND_FRAME_LIMIT),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            log_level: "info".to_string(),
            model_path: None,
            static_dir: PathBuf::from("frontend"),
            client_origins: Vec::new(),
            min_response_interval: DEFAULT_MIN_RESPONSE_INTERVAL,
            decision_timeout: DEFAULT_DECISION_TIMEOUT,
            inbound_frame_limit: DEFAULT_INBOUND_FRAME_LIMIT,
        }
    }
}

/// Split a comma-separated origin list
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Read an optional numeric variable; present-but-garbage is an error
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
