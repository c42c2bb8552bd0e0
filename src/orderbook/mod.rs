//! Local order books validated against the exchange checksum.
//!
//! - [`checksum`] - CRC32 over the top levels
//! - [`book`] - Depth-bounded book store
//! - [`engine`] - Snapshot/delta application and self-healing resync
//! - [`client`] - [`OrderBookClient`] public API

pub mod book;
pub mod checksum;
pub mod client;
pub mod engine;

pub use book::{BookSide, BookState, BookView, OrderBook, PriceLevel, Side};
pub use client::OrderBookClient;
pub use engine::{BookEngine, BookHandler, BookOptions, BookUpdate, DEFAULT_RESYNC_DELAY};
