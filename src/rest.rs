//! Minimal Kraken REST collaborator.
//!
//! Only two endpoints are consumed by the streaming layer:
//! - [`AssetPairs`](https://docs.kraken.com/api/docs/rest-api/get-tradable-asset-pairs)
//!   for the decimal precision of prices and quantities, which the order
//!   book needs to reproduce the exchange checksum;
//! - [`GetWebSocketsToken`](https://docs.kraken.com/api/docs/rest-api/get-websockets-token)
//!   for the bearer token of the authenticated WebSocket session. The token
//!   is valid for 15 minutes after creation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::Result;
use crate::auth::{next_nonce, sign};

const ASSET_PAIRS_PATH: &str = "/0/public/AssetPairs";
const TOKEN_PATH: &str = "/0/private/GetWebSocketsToken";

/// Upper bound for one REST round trip. Book handling awaits these calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Decimal places used by the exchange for one trading pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairPrecision {
    pub price_decimals: u32,
    pub qty_decimals: u32,
}

/// Resolves per-symbol decimal precision.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn precision(&self, symbol: &str) -> Result<PairPrecision>;
}

/// Issues bearer tokens for authenticated WebSocket sessions.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn ws_token(&self) -> Result<String>;
}

/// Envelope shared by every Kraken REST response.
#[derive(Debug, Deserialize)]
struct RestResponse<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

impl<T> RestResponse<T> {
    fn into_result(self) -> Result<T> {
        if !self.error.is_empty() {
            return Err(crate::LadderError::Api(self.error));
        }
        self.result.ok_or_else(|| {
            crate::LadderError::MalformedMessage("missing result in REST response".into())
        })
    }
}

/// One entry of the `AssetPairs` result.
#[derive(Debug, Deserialize)]
struct AssetPairInfo {
    #[serde(default)]
    altname: Option<String>,
    #[serde(default)]
    wsname: Option<String>,
    pair_decimals: u32,
    lot_decimals: u32,
}

#[derive(Debug, Deserialize)]
struct TokenResult {
    token: String,
}

/// Async client for the REST endpoints listed in the module docs.
#[derive(Clone)]
pub struct KrakenRest {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<Zeroizing<String>>,
}

impl KrakenRest {
    /// Builds a client on top of a preconfigured TLS config.
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::Tls`](crate::LadderError::Tls) if the HTTP
    /// client cannot be constructed.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        api_secret: Option<Zeroizing<String>>,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .use_preconfigured_tls(tls_config)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| crate::LadderError::Tls(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
        })
    }

    /// Fetches price and lot decimals for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns a [`LadderError`](crate::LadderError) if the request fails,
    /// the API reports an error, or the pair is missing from the response.
    pub async fn get_asset_pairs(&self, symbol: &str) -> Result<PairPrecision> {
        let body: RestResponse<serde_json::Map<String, serde_json::Value>> = self
            .http
            .get(format!("{}{ASSET_PAIRS_PATH}", self.base_url))
            .query(&[("pair", symbol)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let pairs = body.into_result()?;
        let precision = select_pair(symbol, pairs)?;
        debug!(
            symbol,
            price_decimals = precision.price_decimals,
            qty_decimals = precision.qty_decimals,
            "Resolved pair precision"
        );
        Ok(precision)
    }

    /// Fetches a short-lived WebSocket authentication token.
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::Authentication`](crate::LadderError::Authentication)
    /// without credentials, otherwise any HTTP or API failure.
    pub async fn get_ws_token(&self) -> Result<String> {
        let (Some(api_key), Some(api_secret)) = (&self.api_key, &self.api_secret) else {
            return Err(crate::LadderError::Authentication(
                "API key and secret are required for a WebSocket token".into(),
            ));
        };

        let nonce = next_nonce();
        let post_data = format!("nonce={nonce}");
        let signature = sign(api_secret, TOKEN_PATH, nonce, &post_data)?;

        let body: RestResponse<TokenResult> = self
            .http
            .post(format!("{}{TOKEN_PATH}", self.base_url))
            .header("API-Key", api_key)
            .header("API-Sign", &signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(post_data)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let token = body.into_result()?.token;
        info!("Obtained WebSocket authentication token");
        Ok(token)
    }
}

#[async_trait]
impl MetadataResolver for KrakenRest {
    async fn precision(&self, symbol: &str) -> Result<PairPrecision> {
        self.get_asset_pairs(symbol).await
    }
}

#[async_trait]
impl TokenProvider for KrakenRest {
    async fn ws_token(&self) -> Result<String> {
        self.get_ws_token().await
    }
}

/// Picks the entry for `symbol` out of an `AssetPairs` result.
///
/// The result is keyed by Kraken's internal pair name, so the entry is
/// matched by key, then `wsname`/`altname`, and finally accepted if it is
/// the only one.
fn select_pair(
    symbol: &str,
    pairs: serde_json::Map<String, serde_json::Value>,
) -> Result<PairPrecision> {
    let total = pairs.len();
    let mut entries = Vec::with_capacity(total);
    for (key, value) in pairs {
        let info: AssetPairInfo = serde_json::from_value(value)?;
        entries.push((key, info));
    }

    let is_match = |key: &str, info: &AssetPairInfo| {
        key == symbol
            || info.wsname.as_deref() == Some(symbol)
            || info.altname.as_deref() == Some(symbol)
    };

    let position = entries.iter().position(|(k, i)| is_match(k, i));
    let chosen = match position {
        Some(index) => Some(entries.swap_remove(index).1),
        None if total == 1 => entries.pop().map(|(_, info)| info),
        None => None,
    };

    chosen
        .map(|info| PairPrecision {
            price_decimals: info.pair_decimals,
            qty_decimals: info.lot_decimals,
        })
        .ok_or_else(|| {
            crate::LadderError::MalformedMessage(format!("pair {symbol} missing from AssetPairs"))
        })
}
