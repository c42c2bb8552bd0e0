//! Shared models for Kraken WebSocket V2 messages.
//!
//! Contains channel definitions, subscription request/acknowledgement types,
//! and common protocol messages (ping/pong, heartbeat, status).

pub mod book;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Available Kraken WebSocket V2 channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Book,
    Ticker,
    /// Level-3 individual orders (wire name: `"level3"`).
    Orders,
    /// OHLC candlestick data (wire name: `"ohlc"`).
    Candles,
    Trades,
    Instruments,
    Executions,
    Balances,
    Status,
    Heartbeat,
}

impl Channel {
    /// Returns the wire-format channel name expected by the Kraken API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Book => "book",
            Channel::Ticker => "ticker",
            Channel::Orders => "level3",
            Channel::Candles => "ohlc",
            Channel::Trades => "trade",
            Channel::Instruments => "instrument",
            Channel::Executions => "executions",
            Channel::Balances => "balances",
            Channel::Status => "status",
            Channel::Heartbeat => "heartbeat",
        }
    }

    /// Looks a channel up by its wire name.
    pub fn from_wire(name: &str) -> Option<Channel> {
        let channel = match name {
            "book" => Channel::Book,
            "ticker" => Channel::Ticker,
            "level3" => Channel::Orders,
            "ohlc" => Channel::Candles,
            "trade" => Channel::Trades,
            "instrument" => Channel::Instruments,
            "executions" => Channel::Executions,
            "balances" => Channel::Balances,
            "status" => Channel::Status,
            "heartbeat" => Channel::Heartbeat,
            _ => return None,
        };
        Some(channel)
    }

    /// Returns `true` for channels served only on the authenticated endpoint.
    pub fn is_private(&self) -> bool {
        matches!(
            self,
            Channel::Orders | Channel::Executions | Channel::Balances
        )
    }

    /// Returns `true` for channels whose subscriptions are keyed by symbol.
    pub fn is_symbol_based(&self) -> bool {
        matches!(
            self,
            Channel::Book | Channel::Ticker | Channel::Candles | Channel::Trades | Channel::Orders
        )
    }
}

/// RPC methods that act on the account and need the authenticated session.
pub const PRIVATE_METHODS: [&str; 8] = [
    "add_order",
    "amend_order",
    "batch_add",
    "batch_cancel",
    "cancel_all",
    "cancel_all_orders_after",
    "cancel_order",
    "edit_order",
];

/// Supported order book depths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BookDepth {
    #[default]
    D10,
    D25,
    D100,
    D500,
    D1000,
}

impl BookDepth {
    /// Returns the depth as sent on the wire.
    pub fn as_u16(&self) -> u16 {
        match self {
            BookDepth::D10 => 10,
            BookDepth::D25 => 25,
            BookDepth::D100 => 100,
            BookDepth::D500 => 500,
            BookDepth::D1000 => 1000,
        }
    }

    /// Returns the depth as a level count.
    pub fn levels(&self) -> usize {
        usize::from(self.as_u16())
    }
}

impl TryFrom<u16> for BookDepth {
    type Error = crate::LadderError;

    fn try_from(value: u16) -> crate::Result<Self> {
        match value {
            10 => Ok(BookDepth::D10),
            25 => Ok(BookDepth::D25),
            100 => Ok(BookDepth::D100),
            500 => Ok(BookDepth::D500),
            1000 => Ok(BookDepth::D1000),
            other => Err(crate::LadderError::Config(format!(
                "unsupported book depth {other} (expected 10, 25, 100, 500 or 1000)"
            ))),
        }
    }
}

/// Parameters of a subscribe/unsubscribe request.
///
/// `channel` is mandatory; every other field (`symbol`, `depth`,
/// `interval`, `snapshot`, `token`, ...) is carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub channel: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SubscriptionParams {
    /// Parameters for a channel without symbols (e.g. `instrument`).
    pub fn new(channel: Channel) -> Self {
        Self {
            channel: channel.as_str().to_string(),
            extra: Map::new(),
        }
    }

    /// Parameters for a symbol-based channel.
    pub fn with_symbols(channel: Channel, symbols: &[String]) -> Self {
        Self::new(channel).with("symbol", Value::from(symbols.to_vec()))
    }

    /// Parameters for the book channel at a fixed depth.
    pub fn book(symbols: &[String], depth: BookDepth) -> Self {
        Self::with_symbols(Channel::Book, symbols).with("depth", Value::from(depth.as_u16()))
    }

    /// Adds or replaces one parameter.
    #[must_use]
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Returns the channel if it is one this crate knows about.
    pub fn known_channel(&self) -> Option<Channel> {
        Channel::from_wire(&self.channel)
    }

    /// Returns `true` when the channel needs the authenticated session.
    pub fn is_private(&self) -> bool {
        self.known_channel().is_some_and(|c| c.is_private())
    }
}

/// A `subscribe` request sent to the Kraken WebSocket API.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub method: String,
    pub params: SubscriptionParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_id: Option<u64>,
}

impl SubscribeRequest {
    pub fn new(params: SubscriptionParams, req_id: Option<u64>) -> Self {
        Self {
            method: "subscribe".to_string(),
            params,
            req_id,
        }
    }
}

/// An `unsubscribe` request sent to the Kraken WebSocket API.
#[derive(Debug, Clone, Serialize)]
pub struct UnsubscribeRequest {
    pub method: String,
    pub params: SubscriptionParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_id: Option<u64>,
}

impl UnsubscribeRequest {
    pub fn new(params: SubscriptionParams, req_id: Option<u64>) -> Self {
        Self {
            method: "unsubscribe".to_string(),
            params,
            req_id,
        }
    }
}

/// A `ping` request used to test connection liveness.
#[derive(Debug, Serialize)]
pub struct PingRequest {
    pub method: String,
}

impl PingRequest {
    pub fn new() -> Self {
        Self {
            method: "ping".to_string(),
        }
    }
}

impl Default for PingRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Server response to a [`PingRequest`].
#[derive(Debug, Clone, Deserialize)]
pub struct PongResponse {
    pub method: String,
    #[serde(default)]
    pub req_id: Option<u64>,
    #[serde(default)]
    pub time_in: Option<String>,
    #[serde(default)]
    pub time_out: Option<String>,
}

/// System status update broadcast on the `status` channel.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateResponse {
    pub channel: String,
    #[serde(rename = "type")]
    pub tpe: String,
    pub data: Vec<StatusData>,
}

/// Detailed system status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub api_version: String,
    pub connection_id: u64,
    pub system: String,
    pub version: String,
}

/// Acknowledgement of a `subscribe` or `unsubscribe` request.
///
/// Kraken answers once per symbol; `result` echoes the accepted
/// parameters, sometimes with extra fields such as `warnings`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionAck {
    pub method: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Option<Map<String, Value>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub req_id: Option<u64>,
}

impl SubscriptionAck {
    /// `true` for a `subscribe` acknowledgement.
    pub fn is_subscribe(&self) -> bool {
        self.method == "subscribe"
    }

    /// Channel named in the result, if any.
    pub fn channel(&self) -> Option<&str> {
        self.result.as_ref()?.get("channel")?.as_str()
    }

    /// Single symbol named in the result, if it is a plain string.
    pub fn symbol(&self) -> Option<&str> {
        self.result.as_ref()?.get("symbol")?.as_str()
    }
}

/// Accepts a JSON number or a numeric string.
pub(crate) fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
