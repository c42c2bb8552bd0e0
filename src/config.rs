//! Client configuration loaded from environment variables.
//!
//! Credentials are optional; when one is set both must be present:
//! - `KRAKEN_API_KEY`: API key for Kraken authentication
//! - `KRAKEN_API_SECRET`: base64 API secret for Kraken authentication
//!
//! Endpoints and book settings can be overridden with
//! `KRAKEN_WEBSOCKET_URL`, `KRAKEN_AUTH_WEBSOCKET_URL`, `KRAKEN_REST_URL`,
//! `KRAKEN_BOOK_DEPTH` and `KRAKEN_CA_BUNDLE`.

use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::models::BookDepth;

/// Default public WebSocket endpoint.
pub const DEFAULT_WEBSOCKET_URL: &str = "wss://ws.kraken.com/v2";

/// Default authenticated WebSocket endpoint.
pub const DEFAULT_AUTH_WEBSOCKET_URL: &str = "wss://ws-auth.kraken.com/v2";

/// Default REST API base URL.
pub const DEFAULT_REST_URL: &str = "https://api.kraken.com";

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub kraken: KrakenConfig,
    pub book: BookConfig,
    /// Extra PEM roots appended to the built-in trust store.
    pub ca_bundle: Option<PathBuf>,
}

/// Kraken endpoints and credentials.
#[derive(Clone)]
pub struct KrakenConfig {
    pub websocket_url: String,
    pub auth_websocket_url: String,
    pub rest_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<Zeroizing<String>>,
}

impl KrakenConfig {
    /// Returns `true` if both API credentials are configured.
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.api_key, &self.api_secret),
            (Some(k), Some(s)) if !k.is_empty() && !s.is_empty()
        )
    }
}

impl std::fmt::Debug for KrakenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KrakenConfig")
            .field("websocket_url", &self.websocket_url)
            .field("auth_websocket_url", &self.auth_websocket_url)
            .field("rest_url", &self.rest_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for KrakenConfig {
    fn default() -> Self {
        Self {
            websocket_url: DEFAULT_WEBSOCKET_URL.to_string(),
            auth_websocket_url: DEFAULT_AUTH_WEBSOCKET_URL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
            api_key: None,
            api_secret: None,
        }
    }
}

/// Order book settings.
#[derive(Debug, Clone, Copy)]
pub struct BookConfig {
    pub depth: BookDepth,
}

/// Timing knobs for one WebSocket session.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// A ping is sent whenever no ping went out for this long.
    pub ping_interval: Duration,
    /// Bounded wait for the next inbound message; a timeout sends a ping.
    pub recv_timeout: Duration,
    /// Upper bound of the exponential part of the reconnect wait, in seconds.
    pub backoff_cap_secs: u64,
    /// Reconnect attempts allowed before the session becomes terminal.
    pub max_reconnect_attempts: u32,
    /// How long `send` waits for a ready socket.
    pub send_timeout: Duration,
    /// How long `start` waits for every session to become ready.
    pub start_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            recv_timeout: Duration::from_secs(10),
            backoff_cap_secs: 180,
            max_reconnect_attempts: 6,
            send_timeout: Duration::from_secs(30),
            start_timeout: Duration::from_secs(10),
        }
    }
}

/// Loads the client configuration from environment variables.
///
/// # Errors
///
/// Returns [`LadderError::Config`](crate::LadderError::Config) if only
/// one of the two credential variables is set or the book depth is not a
/// supported value.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let websocket_url = non_empty_var("KRAKEN_WEBSOCKET_URL")
        .unwrap_or_else(|| DEFAULT_WEBSOCKET_URL.to_string());
    let auth_websocket_url = non_empty_var("KRAKEN_AUTH_WEBSOCKET_URL")
        .unwrap_or_else(|| DEFAULT_AUTH_WEBSOCKET_URL.to_string());
    let rest_url =
        non_empty_var("KRAKEN_REST_URL").unwrap_or_else(|| DEFAULT_REST_URL.to_string());

    let api_key = non_empty_var("KRAKEN_API_KEY");
    let api_secret = non_empty_var("KRAKEN_API_SECRET");

    match (&api_key, &api_secret) {
        (Some(_), None) => {
            return Err(crate::LadderError::Config(
                "KRAKEN_API_KEY is set but KRAKEN_API_SECRET is missing".to_string(),
            ));
        }
        (None, Some(_)) => {
            return Err(crate::LadderError::Config(
                "KRAKEN_API_SECRET is set but KRAKEN_API_KEY is missing".to_string(),
            ));
        }
        _ => {}
    }

    let depth = match non_empty_var("KRAKEN_BOOK_DEPTH") {
        Some(raw) => {
            let value: u16 = raw.parse().map_err(|_| {
                crate::LadderError::Config(format!("KRAKEN_BOOK_DEPTH is not a number: {raw}"))
            })?;
            BookDepth::try_from(value)?
        }
        None => BookDepth::default(),
    };

    Ok(AppConfig {
        kraken: KrakenConfig {
            websocket_url,
            auth_websocket_url,
            rest_url,
            api_key,
            api_secret: api_secret.map(Zeroizing::new),
        },
        book: BookConfig { depth },
        ca_bundle: non_empty_var("KRAKEN_CA_BUNDLE").map(PathBuf::from),
    })
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
