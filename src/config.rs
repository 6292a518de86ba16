//! Environment driven service configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::http::DEFAULT_TIMEOUT;

pub const DEFAULT_PROJECT_ID: &str = "default-project";
pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_PUBLIC_DIR: &str = "public";
pub const DEFAULT_CODERABBIT_REPORT_URL: &str =
    "https://api.coderabbit.ai/api/v1/report.generate";
pub const DEFAULT_ANAM_SESSION_TOKEN_URL: &str = "https://api.anam.ai/v1/auth/session-token";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not a valid socket address: {value}")]
    InvalidBind { name: &'static str, value: String },
    #[error("{name} must be a positive integer, got {value}")]
    InvalidNumber { name: &'static str, value: String },
}

/// Everything the service reads from the environment.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub anam_api_key: Option<String>,
    pub anam_avatar_id: Option<String>,
    pub anam_session_token_url: String,
    pub elevenlabs_agent_id: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub profiles_json: Option<String>,
    pub convex_url: Option<String>,
    pub convex_admin_key: Option<String>,
    pub database_path: Option<PathBuf>,
    pub report_project_id: Option<String>,
    pub report_source_url: Option<String>,
    pub coderabbit_api_key: Option<String>,
    pub coderabbit_report_url: String,
    pub bind: Option<SocketAddr>,
    pub http_timeout: Duration,
    pub public_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind = match get("PARROT_HTTP_BIND") {
            Some(value) => Some(value.parse().map_err(|_| ConfigError::InvalidBind {
                name: "PARROT_HTTP_BIND",
                value,
            })?),
            None => None,
        };

        let http_timeout = match get("PARROT_HTTP_TIMEOUT_MS") {
            Some(value) => match value.parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    return Err(ConfigError::InvalidNumber {
                        name: "PARROT_HTTP_TIMEOUT_MS",
                        value,
                    })
                }
            },
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            anam_api_key: get("ANAM_API_KEY"),
            anam_avatar_id: get("ANAM_AVATAR_ID"),
            anam_session_token_url: get("ANAM_SESSION_TOKEN_URL")
                .unwrap_or_else(|| DEFAULT_ANAM_SESSION_TOKEN_URL.into()),
            elevenlabs_agent_id: get("ELEVENLABS_AGENT_ID"),
            elevenlabs_api_key: get("ELEVENLABS_API_KEY"),
            profiles_json: get("PROFILES_JSON"),
            convex_url: get("CONVEX_URL")
                .or_else(|| get("VITE_CONVEX_URL"))
                .map(|url| url.trim_end_matches('/').to_string()),
            convex_admin_key: get("CONVEX_ADMIN_KEY"),
            database_path: get("PARROT_DATABASE_PATH").map(PathBuf::from),
            report_project_id: get("REPORT_PROJECT_ID"),
            report_source_url: get("REPORT_SOURCE_URL"),
            coderabbit_api_key: get("CODERABBIT_API_KEY"),
            coderabbit_report_url: get("CODERABBIT_REPORT_URL")
                .unwrap_or_else(|| DEFAULT_CODERABBIT_REPORT_URL.into()),
            bind,
            http_timeout,
            public_dir: get("PARROT_PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR)),
            log_dir: get("PARROT_LOG_DIR").map(PathBuf::from),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind.unwrap_or_else(|| {
            DEFAULT_BIND
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8787)))
        })
    }

    /// Project used when a request does not name one.
    pub fn default_project_id(&self) -> &str {
        self.report_project_id
            .as_deref()
            .unwrap_or(DEFAULT_PROJECT_ID)
    }
}
