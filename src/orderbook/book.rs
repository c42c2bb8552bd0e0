//! Depth-bounded, price-ordered order book for a single symbol.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::warn;

use super::checksum;
use crate::models::BookDepth;
use crate::models::book::{BookData, BookLevel};
use crate::rest::PairPrecision;

/// One price level, stored at the pair's fixed precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub qty: Decimal,
    pub timestamp: Option<String>,
}

impl PriceLevel {
    /// Formats raw exchange floats to the pair's decimals.
    ///
    /// Returns `None` for values that cannot be represented (NaN, infinity).
    pub fn normalize(
        level: &BookLevel,
        precision: PairPrecision,
        timestamp: Option<&str>,
    ) -> Option<Self> {
        let price = fixed(level.price, precision.price_decimals)?;
        let qty = fixed(level.qty, precision.qty_decimals)?;
        Some(Self {
            price,
            qty,
            timestamp: timestamp.map(String::from),
        })
    }
}

/// Renders `value` with exactly `decimals` places and parses it back, so
/// the scale survives into the checksum.
fn fixed(value: f64, decimals: u32) -> Option<Decimal> {
    Decimal::from_str(&format!("{value:.*}", decimals as usize)).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

/// One side of the book. Bids are best-first by descending price, asks by
/// ascending price.
#[derive(Debug, Clone)]
pub struct BookSide {
    side: Side,
    levels: BTreeMap<Decimal, PriceLevel>,
}

impl BookSide {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Best-first iteration.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &PriceLevel> + '_> {
        match self.side {
            Side::Bid => Box::new(self.levels.values().rev()),
            Side::Ask => Box::new(self.levels.values()),
        }
    }

    pub fn best(&self) -> Option<&PriceLevel> {
        self.iter().next()
    }

    /// Upserts the level, or removes its price when the quantity is zero.
    fn apply(&mut self, level: PriceLevel) {
        if level.qty <= Decimal::ZERO {
            self.levels.remove(&level.price);
        } else {
            self.levels.insert(level.price, level);
        }
    }

    /// Drops the worst levels until at most `depth` remain.
    fn truncate(&mut self, depth: usize) {
        while self.levels.len() > depth {
            match self.side {
                Side::Bid => self.levels.pop_first(),
                Side::Ask => self.levels.pop_last(),
            };
        }
    }

    fn clear(&mut self) {
        self.levels.clear();
    }
}

/// Synchronization state of a live book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    Synced,
    /// A checksum mismatch was detected; the book waits for a resync.
    Invalid,
}

/// Order book for one symbol.
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    depth: usize,
    precision: PairPrecision,
    bids: BookSide,
    asks: BookSide,
    state: BookState,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>, depth: BookDepth, precision: PairPrecision) -> Self {
        Self {
            symbol: symbol.into(),
            depth: depth.levels(),
            precision,
            bids: BookSide::new(Side::Bid),
            asks: BookSide::new(Side::Ask),
            state: BookState::Synced,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn precision(&self) -> PairPrecision {
        self.precision
    }

    pub fn state(&self) -> BookState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == BookState::Synced
    }

    /// Marks the book stale until the next snapshot.
    pub fn invalidate(&mut self) {
        self.state = BookState::Invalid;
    }

    pub fn bids(&self) -> &BookSide {
        &self.bids
    }

    pub fn asks(&self) -> &BookSide {
        &self.asks
    }

    /// Replaces the whole book with a snapshot. The checksum is not
    /// evaluated.
    pub fn apply_snapshot(&mut self, data: &BookData) {
        self.bids.clear();
        self.asks.clear();
        self.apply_levels(data);
        self.state = BookState::Synced;
    }

    /// Applies a delta and verifies the exchange checksum.
    ///
    /// Returns `false` and marks the book invalid on mismatch. A delta
    /// without checksum is accepted as is.
    pub fn apply_update(&mut self, data: &BookData) -> bool {
        self.apply_levels(data);

        let Some(expected) = data.checksum else {
            return true;
        };
        let actual = self.checksum();
        if u64::from(actual) == expected {
            return true;
        }

        warn!(
            symbol = %self.symbol,
            expected,
            actual,
            "Order book checksum mismatch"
        );
        self.state = BookState::Invalid;
        false
    }

    /// CRC32 over the top of the current book.
    pub fn checksum(&self) -> u32 {
        checksum::compute(self.asks.iter(), self.bids.iter())
    }

    /// Owned copy of the current state.
    pub fn view(&self) -> BookView {
        BookView {
            symbol: self.symbol.clone(),
            bids: self.bids.iter().cloned().collect(),
            asks: self.asks.iter().cloned().collect(),
            valid: self.is_valid(),
            checksum: self.checksum(),
        }
    }

    fn apply_levels(&mut self, data: &BookData) {
        let timestamp = data.timestamp.as_deref();
        for (side, raw) in [(&mut self.bids, &data.bids), (&mut self.asks, &data.asks)] {
            for level in raw {
                match PriceLevel::normalize(level, self.precision, timestamp) {
                    Some(level) => side.apply(level),
                    None => warn!(symbol = %self.symbol, ?level, "Skipping unrepresentable level"),
                }
            }
            side.truncate(self.depth);
        }
    }
}

/// Read-only copy of a book handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct BookView {
    pub symbol: String,
    /// Best-first.
    pub bids: Vec<PriceLevel>,
    /// Best-first.
    pub asks: Vec<PriceLevel>,
    pub valid: bool,
    pub checksum: u32,
}

impl BookView {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Best ask minus best bid.
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }
}
