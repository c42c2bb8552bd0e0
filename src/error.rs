//! Crate-level error types.
//!
//! [`LadderError`] covers configuration, transport, REST and protocol
//! failures behind a single enum.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LadderError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum LadderError {
    /// Configuration from the environment was missing or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An HTTP request to the REST API failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// TLS configuration could not be built.
    #[error("tls error: {0}")]
    Tls(String),

    /// An inbound message did not have the expected shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The REST API answered with a non-empty `error` array.
    #[error("Kraken API error: {}", .0.join(", "))]
    Api(Vec<String>),

    /// A private operation was attempted without usable credentials.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// An outbound message was rejected before it reached the socket.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Waiting for a connection (or another resource) took too long.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The socket was closed by the peer or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// The session exhausted its reconnect budget and is terminal.
    #[error("maximum reconnect attempts ({0}) exceeded")]
    MaxReconnect(u32),
}
