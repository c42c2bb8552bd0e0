//! Async WebSocket client for connecting to and interacting with the
//! Kraken WebSocket V2 API.
//!
//! This module is organized by domain:
//! - [`frame`] - Tagged decoding of inbound messages
//! - [`subscription`] - Bookkeeping of active subscriptions
//! - [`connection`] - Session lifecycle: keepalive, reconnect, replay
//! - [`client`] - Public/private session pair and message routing

pub mod client;
pub mod connection;
pub mod frame;
pub mod subscription;

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tracing::{debug, info};
use tungstenite::Message;

use crate::Result;
use crate::models::PingRequest;

pub use client::{ClientOptions, KrakenClient, Sessions};
pub use connection::{
    Authentication, CommandSink, Connection, ConnectionSpec, ErrorEvent, Event, Keepalive,
    MessageHandler, SessionState, reconnect_wait,
};
pub use frame::Frame;
pub use subscription::{SubscriptionRecord, SubscriptionTracker};

/// Write half of a Kraken WebSocket connection.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of a Kraken WebSocket connection.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Establishes a WebSocket connection to the given URL.
///
/// `wss://` URLs use the supplied TLS config; `ws://` URLs connect in plain
/// text.
///
/// # Errors
///
/// Returns a [`LadderError`](crate::LadderError) if the connection or TLS handshake fails.
pub async fn connect(
    url: &str,
    tls_config: Arc<rustls::ClientConfig>,
) -> Result<(WsWriter, WsReader)> {
    let (ws_stream, _) =
        connect_async_tls_with_config(url, None, true, Some(Connector::Rustls(tls_config)))
            .await?;
    info!(url, "WebSocket handshake completed");

    Ok(ws_stream.split())
}

/// Sends a ping message over the WebSocket to test connection liveness.
///
/// # Errors
///
/// Returns a [`LadderError`](crate::LadderError) if sending the message fails.
pub async fn ping(write: &mut WsWriter) -> Result<()> {
    let request = PingRequest::new();
    let json = serde_json::to_string(&request)?;
    write.send(Message::Text(json.into())).await?;
    debug!("Sent ping");

    Ok(())
}
