//! Client configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use changa_shared::{is_local_address, PUBLIC_AUTH_PATHS};

const DEFAULT_API_URL: &str = "http://localhost:5000/api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

/// Endpoints and timings for the session and realtime layer.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every API path is joined onto, e.g. `https://changa.co.ke/api`.
    pub api_base_url: String,
    /// Push endpoint for the realtime channel.
    pub ws_url: String,
    pub request_timeout: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Endpoint paths that never carry a token and never trigger a refresh.
    pub public_paths: Vec<String>,
    /// Directory for the persisted session; `None` uses the platform config dir.
    pub storage_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl ClientConfig {
    /// Build a config for an API base, deriving the push endpoint from it.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        let api_base_url = normalize_base_url(&api_base_url.into());
        let ws_url = derive_ws_url(&api_base_url);
        Self {
            api_base_url,
            ws_url,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            public_paths: PUBLIC_AUTH_PATHS.iter().map(|p| p.to_string()).collect(),
            storage_dir: None,
        }
    }

    /// Parse the configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CHANGA_API_URL`: API base (default: "http://localhost:5000/api")
    /// - `CHANGA_WS_URL`: push endpoint (default: API origin with a ws scheme)
    /// - `CHANGA_REQUEST_TIMEOUT_SECS`: per-request timeout (default: 30)
    /// - `CHANGA_RECONNECT_DELAY_MS`: reconnect interval (default: 3000)
    /// - `CHANGA_STORAGE_DIR`: session storage directory (default: platform config dir)
    pub fn from_env() -> Self {
        let api = std::env::var("CHANGA_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let mut config = Self::new(api);

        if let Ok(ws) = std::env::var("CHANGA_WS_URL") {
            if !ws.trim().is_empty() {
                config.ws_url = ws.trim().to_string();
            }
        }
        if let Some(secs) = env_u64("CHANGA_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("CHANGA_RECONNECT_DELAY_MS") {
            config.reconnect_delay = Duration::from_millis(ms);
        }
        if let Ok(dir) = std::env::var("CHANGA_STORAGE_DIR") {
            if !dir.trim().is_empty() {
                config.storage_dir = Some(PathBuf::from(dir));
            }
        }
        config
    }

    /// Override the push endpoint.
    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Join an API path onto the base URL. Absolute URLs pass through.
    pub fn api_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.api_base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// The endpoint path of a request, relative to the API base, without query.
    ///
    /// `https://host/api/auth/login?x=1` and `auth/login` both yield `/auth/login`.
    pub fn endpoint_path(&self, path: &str) -> String {
        let relative = if path.starts_with("http://") || path.starts_with("https://") {
            let full = url::Url::parse(path)
                .map(|u| u.path().to_string())
                .unwrap_or_else(|_| path.to_string());
            let base_path = url::Url::parse(&self.api_base_url)
                .map(|u| u.path().trim_end_matches('/').to_string())
                .unwrap_or_default();
            match full.strip_prefix(&base_path) {
                Some(rest) if !base_path.is_empty() => rest.to_string(),
                _ => full,
            }
        } else {
            path.to_string()
        };

        let without_query = relative.split(['?', '#']).next().unwrap_or_default();
        let trimmed = without_query.trim_matches('/');
        format!("/{trimmed}")
    }

    /// Whether a request path is on the public allowlist.
    pub fn is_public(&self, path: &str) -> bool {
        let endpoint = self.endpoint_path(path);
        self.public_paths
            .iter()
            .any(|p| p.trim_end_matches('/') == endpoint)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Give a bare host a scheme: http for local addresses, https otherwise.
fn normalize_base_url(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches('/');
    if raw.contains("://") {
        return raw.to_string();
    }
    let host = raw.split('/').next().unwrap_or(raw);
    if is_local_address(host) {
        format!("http://{raw}")
    } else {
        format!("https://{raw}")
    }
}

/// Convert the API origin to a WS/WSS origin.
fn derive_ws_url(api_base_url: &str) -> String {
    let origin = match url::Url::parse(api_base_url) {
        Ok(u) => u.origin().ascii_serialization(),
        Err(_) => api_base_url.to_string(),
    };
    if origin.starts_with("https://") {
        origin.replacen("https://", "wss://", 1)
    } else {
        origin.replacen("http://", "ws://", 1)
    }
}
