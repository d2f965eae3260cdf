//! Session configuration from environment variables.

use std::time::Duration;

use bijou_shared::{ENGINE_IO_VERSION, HANDSHAKE_PATH, TRANSPORT};
use thiserror::Error;
use url::Url;

use crate::ws::BackoffPolicy;

pub const SOCKET_URL_ENV: &str = "BIJOU_SOCKET_URL";
pub const API_BASE_URL_ENV: &str = "BIJOU_API_BASE_URL";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";
/// Trailing segment of the REST base that the socket endpoint does not have.
pub const API_PATH_SUFFIX: &str = "/api";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid socket endpoint {endpoint:?}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },
    #[error("unsupported endpoint scheme {0:?}")]
    UnsupportedScheme(String),
}

/// Where and how the session connects.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base of the messaging host, e.g. `https://shop.example.com`.
    pub endpoint: String,
    pub backoff: BackoffPolicy,
    /// Bound on dial + open + namespace connect.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            backoff: BackoffPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Build configuration from environment variables.
    ///
    /// Environment variables:
    /// - `BIJOU_SOCKET_URL`: explicit messaging endpoint (wins when set)
    /// - `BIJOU_API_BASE_URL`: REST base the endpoint is derived from
    ///   (default: "http://localhost:5000/api")
    pub fn from_env() -> Self {
        let explicit = std::env::var(SOCKET_URL_ENV).ok();
        let api_base = std::env::var(API_BASE_URL_ENV)
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        Self::new(resolve_endpoint(explicit.as_deref(), &api_base))
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Full websocket URL for the Socket.IO handshake.
    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            source,
        })?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }

        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base_path}{HANDSHAKE_PATH}"));
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair("EIO", ENGINE_IO_VERSION)
            .append_pair("transport", TRANSPORT);
        Ok(url)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(resolve_endpoint(None, DEFAULT_API_BASE_URL))
    }
}

/// Explicit endpoint if configured, otherwise the REST base minus `/api`.
pub fn resolve_endpoint(explicit: Option<&str>, api_base: &str) -> String {
    if let Some(explicit) = explicit.map(str::trim).filter(|e| !e.is_empty()) {
        return explicit.trim_end_matches('/').to_string();
    }

    let base = api_base.trim().trim_end_matches('/');
    base.strip_suffix(API_PATH_SUFFIX)
        .unwrap_or(base)
        .trim_end_matches('/')
        .to_string()
}
