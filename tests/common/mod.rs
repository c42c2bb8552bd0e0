//! Shared test utilities: TLS config, a local WebSocket server that
//! acknowledges subscriptions like Kraken does, and recording fakes.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tungstenite::Message;

use ladder::config::SessionOptions;
use ladder::orderbook::{BookHandler, BookUpdate};
use ladder::rest::{MetadataResolver, PairPrecision, TokenProvider};
use ladder::websocket::{CommandSink, Event, MessageHandler};

/// Kraken WebSocket V2 public endpoint URL.
pub const KRAKEN_WS_URL: &str = "wss://ws.kraken.com/v2";

/// Builds a rustls TLS config with the built-in roots for use in tests.
pub fn test_tls_config() -> Arc<rustls::ClientConfig> {
    Arc::new(ladder::tls::build_tls_config(None).expect("failed to build TLS config"))
}

/// Session timing suitable for a loopback server.
pub fn fast_options() -> SessionOptions {
    SessionOptions {
        ping_interval: Duration::from_secs(30),
        recv_timeout: Duration::from_secs(5),
        backoff_cap_secs: 1,
        max_reconnect_attempts: 3,
        send_timeout: Duration::from_secs(5),
        start_timeout: Duration::from_secs(5),
    }
}

/// A message received by the mock server, tagged with the 1-based index of
/// the connection it arrived on.
#[derive(Debug, Clone)]
pub struct Received {
    pub connection: usize,
    pub message: Value,
}

/// Local server on `127.0.0.1:0` answering ping, (un)subscribe and
/// challenge requests. Book subscriptions are followed by a snapshot.
/// WebSocket ping control frames are reported as `{"control": "ping"}`.
pub struct MockServer {
    pub url: String,
    pub received: mpsc::UnboundedReceiver<Received>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                index += 1;
                tokio::spawn(serve(stream, index, tx.clone()));
            }
        });

        Self {
            url: format!("ws://{addr}"),
            received: rx,
        }
    }

    /// Next message whose `method` equals `method`, within `timeout`.
    pub async fn next_method(&mut self, method: &str, timeout: Duration) -> Option<Received> {
        self.next_where("method", method, timeout).await
    }

    /// Next ping control frame, within `timeout`.
    pub async fn next_control_ping(&mut self, timeout: Duration) -> Option<Received> {
        self.next_where("control", "ping", timeout).await
    }

    /// Counts messages with the given `method` arriving within `window`.
    pub async fn count_method(&mut self, method: &str, window: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + window;
        let mut count = 0;
        while let Ok(Some(received)) =
            tokio::time::timeout_at(deadline, self.received.recv()).await
        {
            if received.message["method"] == method {
                count += 1;
            }
        }
        count
    }

    async fn next_where(&mut self, key: &str, value: &str, timeout: Duration) -> Option<Received> {
        tokio::time::timeout(timeout, async {
            while let Some(received) = self.received.recv().await {
                if received.message[key] == value {
                    return Some(received);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }
}

async fn serve(stream: TcpStream, index: usize, tx: mpsc::UnboundedSender<Received>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    while let Some(Ok(message)) = read.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            Message::Ping(_) => {
                let _ = tx.send(Received {
                    connection: index,
                    message: json!({"control": "ping"}),
                });
                continue;
            }
            _ => continue,
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let _ = tx.send(Received {
            connection: index,
            message: value.clone(),
        });

        for reply in replies_for(&value, index) {
            if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                return;
            }
        }
    }
}

/// Kraken acknowledges a multi-symbol request once per symbol, echoing a
/// single symbol string and occasionally a `warnings` list. Challenges are
/// unique per connection: `chal-<connection>`.
fn replies_for(request: &Value, connection: usize) -> Vec<Value> {
    if request["event"] == "challenge" {
        return vec![json!({"event": "challenge", "message": format!("chal-{connection}")})];
    }

    let method = request["method"].as_str().unwrap_or_default();
    let mut replies = match method {
        "ping" => vec![json!({"method": "pong", "time_in": "t0", "time_out": "t1"})],
        "subscribe" | "unsubscribe" => {
            let mut params = request["params"].as_object().cloned().unwrap_or_default();
            params.remove("token");
            let symbols = params.remove("symbol");
            let results: Vec<Value> = match symbols {
                Some(Value::Array(symbols)) => symbols
                    .into_iter()
                    .map(|symbol| {
                        let mut result = params.clone();
                        result.insert("symbol".into(), symbol);
                        result.insert("warnings".into(), json!(["mock warning"]));
                        Value::Object(result)
                    })
                    .collect(),
                _ => vec![Value::Object(params)],
            };
            results
                .into_iter()
                .map(|result| json!({"method": method, "result": result, "success": true}))
                .collect()
        }
        _ => Vec::new(),
    };

    if method == "subscribe" && request["params"]["channel"] == "book" {
        let symbols = request["params"]["symbol"].as_array().cloned().unwrap_or_default();
        for symbol in symbols {
            replies.push(json!({
                "channel": "book",
                "type": "snapshot",
                "data": [{
                    "symbol": symbol,
                    "bids": [{"price": 99.0, "qty": 2.0}],
                    "asks": [{"price": 100.0, "qty": 1.0}],
                    "checksum": 3736292885u64
                }]
            }));
        }
    }
    replies
}

/// Records every session event.
#[derive(Default)]
pub struct EventLog {
    pub events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().expect("event log poisoned").clone()
    }
}

#[async_trait]
impl MessageHandler for EventLog {
    async fn on_message(&self, event: Event) {
        self.events.lock().expect("event log poisoned").push(event);
    }
}

/// Resolver returning the same precision for every symbol.
pub struct FixedPrecision(pub PairPrecision);

#[async_trait]
impl MetadataResolver for FixedPrecision {
    async fn precision(&self, _symbol: &str) -> ladder::Result<PairPrecision> {
        Ok(self.0)
    }
}

/// Resolver whose lookups never complete.
#[derive(Default)]
pub struct PendingResolver {
    pub calls: AtomicUsize,
}

impl PendingResolver {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataResolver for PendingResolver {
    async fn precision(&self, _symbol: &str) -> ladder::Result<PairPrecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Issues `tok-1`, `tok-2`, ... one per call.
#[derive(Default)]
pub struct CountingTokens {
    pub issued: AtomicUsize,
}

impl CountingTokens {
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for CountingTokens {
    async fn ws_token(&self) -> ladder::Result<String> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("tok-{n}"))
    }
}

/// Records outbound commands and book notifications.
#[derive(Default)]
pub struct Recorder {
    pub sent: Mutex<Vec<Value>>,
    pub updates: Mutex<Vec<(String, BookUpdate)>>,
}

impl Recorder {
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().expect("recorder poisoned").clone()
    }

    pub fn updates(&self) -> Vec<(String, BookUpdate)> {
        self.updates.lock().expect("recorder poisoned").clone()
    }
}

#[async_trait]
impl CommandSink for Recorder {
    async fn send(&self, message: Value) -> ladder::Result<()> {
        self.sent.lock().expect("recorder poisoned").push(message);
        Ok(())
    }
}

#[async_trait]
impl BookHandler for Recorder {
    async fn on_update(&self, symbol: &str, update: BookUpdate) {
        self.updates
            .lock()
            .expect("recorder poisoned")
            .push((symbol.to_string(), update));
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
