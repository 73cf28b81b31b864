//! Messaging configuration from environment variables.

use std::time::Duration;

use dealflow_shared::ConversationId;
use url::Url;

use crate::error::ConfigError;
use crate::ws::ReconnectConfig;

/// Default REST base address.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Tunables for the messaging core.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagingConfig {
    /// Base address of the REST API, e.g. `https://app.example.com/api`.
    pub api_base_url: String,
    /// Base address of the duplex channel endpoint. Derived from
    /// `api_base_url` when unset.
    pub ws_base_url: Option<String>,
    /// Interval between fallback re-fetches while the channel is down.
    pub poll_interval: Duration,
    pub reconnect: ReconnectConfig,
    /// Quiet period after which a typing indicator is dropped.
    pub typing_expiry: Duration,
    /// Maximum characters kept in a conversation's last-message snippet.
    pub snippet_len: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            ws_base_url: None,
            poll_interval: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            typing_expiry: Duration::from_secs(3),
            snippet_len: 80,
        }
    }
}

impl MessagingConfig {
    /// Build configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DEALFLOW_API_URL`: REST base address (default: `http://localhost:8000/api`)
    /// - `DEALFLOW_WS_URL`: channel base address (default: derived from the API origin)
    /// - `DEALFLOW_POLL_INTERVAL_SECS`: fallback poll interval (default: 10)
    /// - `DEALFLOW_RECONNECT_BASE_MS`: reconnect base delay (default: 1000)
    /// - `DEALFLOW_RECONNECT_MAX_ATTEMPTS`: reconnect attempt cap (default: 5)
    /// - `DEALFLOW_TYPING_EXPIRY_MS`: typing indicator quiet period (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_base_url =
            std::env::var("DEALFLOW_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let ws_base_url = std::env::var("DEALFLOW_WS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let poll_interval = env_number("DEALFLOW_POLL_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);
        let base_delay = env_number("DEALFLOW_RECONNECT_BASE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect.base_delay);
        let max_attempts = env_number("DEALFLOW_RECONNECT_MAX_ATTEMPTS")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(defaults.reconnect.max_attempts);
        let typing_expiry = env_number("DEALFLOW_TYPING_EXPIRY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.typing_expiry);

        Self {
            api_base_url,
            ws_base_url,
            poll_interval,
            reconnect: ReconnectConfig {
                base_delay,
                max_attempts,
                ..defaults.reconnect
            },
            typing_expiry,
            snippet_len: defaults.snippet_len,
        }
    }

    /// Channel address for a conversation, carrying the bearer credential as
    /// a query parameter.
    pub fn ws_url(&self, conversation_id: &ConversationId, token: &str) -> Result<Url, ConfigError> {
        let mut url = match &self.ws_base_url {
            Some(base) => Url::parse(base)?,
            None => {
                let mut url = Url::parse(&self.api_base_url)?;
                let scheme = match url.scheme() {
                    "https" => "wss",
                    "http" => "ws",
                    other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
                };
                url.set_scheme(scheme)
                    .map_err(|()| ConfigError::UnsupportedScheme(scheme.to_string()))?;
                url.set_path("");
                url
            }
        };

        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!(
            "{base_path}/ws/chat/{}/",
            urlencoding::encode(conversation_id.as_str())
        ));
        url.set_query(None);
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring malformed setting");
            None
        }
    }
}
