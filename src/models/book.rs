//! Order book channel models.

use serde::Deserialize;

/// Whether a book message carries the full state or a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookMessageKind {
    Snapshot,
    Update,
}

/// A snapshot or update message from the `book` channel.
#[derive(Debug, Clone, Deserialize)]
pub struct BookMessage {
    pub channel: String,
    #[serde(rename = "type")]
    pub tpe: BookMessageKind,
    pub data: Vec<BookData>,
}

/// Order book snapshot or incremental update for a single trading pair.
#[derive(Debug, Clone, Deserialize)]
pub struct BookData {
    pub symbol: String,
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
    /// CRC32 checksum used to verify order book integrity.
    #[serde(default)]
    pub checksum: Option<u64>,
    /// Absent on snapshots.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A single price level as delivered by the exchange.
///
/// Values arrive as JSON floats and are only meaningful after formatting to
/// the pair's precision.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BookLevel {
    #[serde(deserialize_with = "super::number_or_string")]
    pub price: f64,
    #[serde(deserialize_with = "super::number_or_string")]
    pub qty: f64,
}
