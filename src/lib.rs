//! Kraken WebSocket V2 streaming client library.
//!
//! Provides managed WebSocket sessions with keepalive, reconnect and
//! subscription replay, plus locally maintained order books validated
//! against the exchange checksum.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod orderbook;
pub mod rest;
pub mod tls;
pub mod websocket;

pub use error::{LadderError, Result};
