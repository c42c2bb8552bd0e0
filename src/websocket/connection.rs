//! WebSocket session lifecycle management.
//!
//! A [`Connection`] owns one logical session against one endpoint. A
//! supervisor task connects, keeps the socket alive with periodic pings,
//! reconnects with randomized exponential backoff when the session fails,
//! and replays every confirmed subscription once the new socket is ready.
//!
//! Each session runs two tasks side by side: the receive loop and the
//! replay task. The first failure of either tears the whole session down.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::Message as WsMessage;
use zeroize::Zeroizing;

use super::frame::Frame;
use super::subscription::{SubscriptionRecord, SubscriptionTracker};
use super::{WsWriter, connect, ping};
use crate::Result;
use crate::auth::SignedChallenge;
use crate::config::SessionOptions;
use crate::error::LadderError;
use crate::models::SubscribeRequest;
use crate::rest::TokenProvider;

/// How many times `send` re-checks for a writer after the socket was
/// reported ready.
const SEND_ATTEMPTS: u32 = 12;

/// How long `stop` waits for the supervisor to unwind before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Connecting,
    Connected,
    Reconnecting,
    Cancelling,
    ErrorHandling,
    /// Reconnect attempts exhausted; terminal.
    Failed,
    Closed,
}

/// How a private session proves its identity.
pub enum Authentication {
    /// Public session.
    None,
    /// Bearer token fetched before every connect and attached to
    /// `params.token` of outbound commands.
    Token(Arc<dyn TokenProvider>),
    /// Server-issued challenge signed with the API secret; the pair is
    /// attached to every outbound command.
    Challenge {
        api_key: String,
        api_secret: Zeroizing<String>,
    },
}

impl std::fmt::Debug for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authentication::None => f.write_str("None"),
            Authentication::Token(_) => f.write_str("Token"),
            Authentication::Challenge { .. } => f.write_str("Challenge(<redacted>)"),
        }
    }
}

/// Liveness message sent on an idle socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Keepalive {
    /// `{"method": "ping"}` application message.
    #[default]
    Method,
    /// WebSocket ping control frame.
    Frame,
}

/// Authentication material valid for the current socket only.
#[derive(Debug, Clone)]
enum AuthMaterial {
    Token(String),
    Challenge(SignedChallenge),
}

/// Everything delivered to a [`MessageHandler`].
#[derive(Debug, Clone)]
pub enum Event {
    /// A socket was established (not yet necessarily authenticated).
    Connected { private: bool },
    /// One decoded inbound message.
    Frame(Frame),
    /// Session-level failure or shutdown.
    Error(ErrorEvent),
}

/// Error payloads routed through the normal message callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorEvent {
    /// The session was stopped on request.
    Cancelled,
    /// The socket of the public (`private == false`) or authenticated
    /// session failed; a reconnect follows unless attempts are exhausted.
    ConnectionLost { private: bool, reason: String },
    /// Reconnect attempts exhausted; the session is terminal.
    MaxReconnect { attempts: u32 },
}

/// Receives every inbound frame and session event, in order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, event: Event);
}

/// Anything that can transmit a JSON command to the exchange.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, message: Value) -> Result<()>;
}

/// Static description of a session.
#[derive(Debug)]
pub struct ConnectionSpec {
    pub url: String,
    pub private: bool,
    pub auth: Authentication,
    pub keepalive: Keepalive,
    pub options: SessionOptions,
    pub tls: Arc<rustls::ClientConfig>,
}

impl ConnectionSpec {
    /// Unauthenticated session with default timing.
    pub fn public(url: impl Into<String>, tls: Arc<rustls::ClientConfig>) -> Self {
        Self {
            url: url.into(),
            private: false,
            auth: Authentication::None,
            keepalive: Keepalive::default(),
            options: SessionOptions::default(),
            tls,
        }
    }

    /// Authenticated session with default timing.
    pub fn private(
        url: impl Into<String>,
        tls: Arc<rustls::ClientConfig>,
        auth: Authentication,
    ) -> Self {
        Self {
            private: true,
            auth,
            ..Self::public(url, tls)
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, keepalive: Keepalive) -> Self {
        self.keepalive = keepalive;
        self
    }
}

/// Cloneable handle to one managed session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    private: bool,
    auth: Authentication,
    keepalive: Keepalive,
    options: SessionOptions,
    tls: Arc<rustls::ClientConfig>,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    ready: watch::Sender<bool>,
    state: watch::Sender<SessionState>,
    material: RwLock<Option<AuthMaterial>>,
    tracker: Mutex<SubscriptionTracker>,
    attempts: AtomicU32,
    last_ping: Mutex<Instant>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    #[must_use]
    pub fn new(spec: ConnectionSpec) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: spec.url,
                private: spec.private,
                auth: spec.auth,
                keepalive: spec.keepalive,
                options: spec.options,
                tls: spec.tls,
                writer: tokio::sync::Mutex::new(None),
                ready: watch::Sender::new(false),
                state: watch::Sender::new(SessionState::Init),
                material: RwLock::new(None),
                tracker: Mutex::new(SubscriptionTracker::new()),
                attempts: AtomicU32::new(0),
                last_ping: Mutex::new(Instant::now()),
                cancel: Mutex::new(CancellationToken::new()),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn is_private(&self) -> bool {
        self.inner.private
    }

    /// Spawns the supervisor task. Does nothing if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, handler: Arc<dyn MessageHandler>) {
        let mut task = lock(&self.inner.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            warn!(url = %self.inner.url, "Session already running");
            return;
        }

        let cancel = CancellationToken::new();
        *lock(&self.inner.cancel) = cancel.clone();
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.state.send_replace(SessionState::Init);
        *task = Some(tokio::spawn(self.inner.clone().supervise(handler, cancel)));
    }

    /// Cancels the session, waits for the supervisor to exit and clears
    /// the subscription records.
    pub async fn stop(&self) {
        self.inner.state.send_replace(SessionState::Cancelling);
        lock(&self.inner.cancel).cancel();

        let handle = lock(&self.inner.task).take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(STOP_GRACE, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(url = %self.inner.url, error = %e, "Session task ended abnormally");
                }
                Err(_) => {
                    warn!(url = %self.inner.url, "Session task did not unwind, aborting");
                    handle.abort();
                    self.inner.drop_socket().await;
                }
            }
        }

        lock(&self.inner.tracker).clear();
        self.inner.state.send_replace(SessionState::Closed);
        info!(url = %self.inner.url, "Session stopped");
    }

    /// Waits until a socket is connected (and authenticated, where
    /// applicable).
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::Timeout`] if no socket becomes ready in time,
    /// or [`LadderError::MaxReconnect`] once the session is terminal.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        self.inner.wait_ready(timeout).await
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Sends a command, attaching authentication material on private
    /// sessions.
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::Timeout`] if no socket is ready within the
    /// send timeout, [`LadderError::MaxReconnect`] on a terminal session,
    /// [`LadderError::Authentication`] if the private session holds no
    /// material, or any transport error.
    pub async fn send(&self, message: Value) -> Result<()> {
        self.inner.send_command(message).await
    }

    /// Sends a message exactly as given.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub async fn send_raw(&self, message: Value) -> Result<()> {
        let text = serde_json::to_string(&message)?;
        self.inner.transmit(WsMessage::Text(text.into())).await
    }

    /// Closes the current socket without stopping the session. The
    /// supervisor treats this as a failure and reconnects.
    pub async fn close_connection(&self) {
        self.inner.ready.send_replace(false);
        let mut guard = self.inner.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            info!(url = %self.inner.url, "Closing socket");
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Close handshake failed");
            }
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// `true` once reconnect attempts are exhausted.
    pub fn exception_occurred(&self) -> bool {
        self.state() == SessionState::Failed
    }

    /// Snapshot of the confirmed subscriptions.
    pub fn subscriptions(&self) -> Vec<SubscriptionRecord> {
        lock(&self.inner.tracker).active()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandSink for Connection {
    async fn send(&self, message: Value) -> Result<()> {
        Connection::send(self, message).await
    }
}

impl Inner {
    async fn supervise(
        self: Arc<Self>,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) {
        loop {
            let outcome = tokio::try_join!(
                self.recover_subscriptions(&cancel),
                self.run_session(&handler, &cancel),
            );
            self.drop_socket().await;

            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = outcome {
                self.set_state(SessionState::ErrorHandling);
                warn!(url = %self.url, error = %e, "Session failed");
                let lost = ErrorEvent::ConnectionLost {
                    private: self.private,
                    reason: e.to_string(),
                };
                handler.on_message(Event::Error(lost)).await;
            }

            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let max = self.options.max_reconnect_attempts;
            if attempt > max {
                self.set_state(SessionState::Failed);
                error!(url = %self.url, attempts = max, "Maximum reconnect attempts exceeded");
                handler
                    .on_message(Event::Error(ErrorEvent::MaxReconnect { attempts: max }))
                    .await;
                return;
            }

            self.set_state(SessionState::Reconnecting);
            let wait = reconnect_wait(attempt, self.options.backoff_cap_secs);
            info!(
                url = %self.url,
                attempt,
                wait_secs = wait.as_secs_f64(),
                "Reconnecting after backoff"
            );
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }
        }

        self.set_state(SessionState::Closed);
        debug!(url = %self.url, "Supervisor exited");
    }

    /// Runs one socket until it fails (`Err`) or the session is cancelled
    /// (`Ok`).
    async fn run_session(
        &self,
        handler: &Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.set_state(SessionState::Connecting);

        let material = match &self.auth {
            Authentication::Token(provider) => {
                Some(AuthMaterial::Token(provider.ws_token().await?))
            }
            _ => None,
        };
        *write(&self.material) = material;

        info!(url = %self.url, private = self.private, "Connecting to WebSocket");
        let (writer, mut reader) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            pair = connect(&self.url, self.tls.clone()) => pair?,
        };
        *self.writer.lock().await = Some(writer);

        self.keepalive().await?;
        match &self.auth {
            Authentication::Challenge { api_key, .. } => {
                let request = json!({"event": "challenge", "api_key": api_key});
                self.write_now(WsMessage::Text(request.to_string().into()))
                    .await?;
                debug!("Requested authentication challenge");
            }
            _ => {
                self.ready.send_replace(true);
            }
        }
        self.attempts.store(0, Ordering::SeqCst);
        self.set_state(SessionState::Connected);
        info!(url = %self.url, "WebSocket connected");
        handler
            .on_message(Event::Connected {
                private: self.private,
            })
            .await;

        loop {
            let since_ping = lock(&self.last_ping).elapsed();
            if since_ping >= self.options.ping_interval {
                self.keepalive().await?;
                continue;
            }
            let wait = self
                .options
                .recv_timeout
                .min(self.options.ping_interval - since_ping);

            let next = tokio::select! {
                () = cancel.cancelled() => return self.cancelled(handler).await,
                next = tokio::time::timeout(wait, reader.next()) => next,
            };

            match next {
                Err(_) => {
                    debug!(url = %self.url, "Receive idle, probing");
                    self.keepalive().await?;
                }
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    tokio::select! {
                        () = cancel.cancelled() => return self.cancelled(handler).await,
                        dispatched = self.dispatch(&text, handler) => dispatched?,
                    }
                }
                Ok(Some(Ok(WsMessage::Close(frame)))) => {
                    info!(url = %self.url, ?frame, "Server closed the connection");
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => return Err(LadderError::ConnectionClosed),
            }
        }
    }

    async fn cancelled(&self, handler: &Arc<dyn MessageHandler>) -> Result<()> {
        info!(url = %self.url, "Session cancelled");
        handler.on_message(Event::Error(ErrorEvent::Cancelled)).await;
        self.close_socket().await;
        Ok(())
    }

    /// Waits for the socket to become ready, then resends every recorded
    /// subscription once.
    async fn recover_subscriptions(&self, cancel: &CancellationToken) -> Result<()> {
        let mut ready = self.ready.subscribe();
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            changed = ready.wait_for(|r| *r) => {
                changed.map_err(|_| LadderError::ConnectionClosed)?;
            }
        }

        let records = lock(&self.tracker).active();
        if records.is_empty() {
            return Ok(());
        }
        info!(url = %self.url, count = records.len(), "Recovering subscriptions");
        for record in records {
            let request = SubscribeRequest::new(record.params.clone(), None);
            self.send_command(serde_json::to_value(&request)?).await?;
            info!(
                channel = record.channel(),
                symbols = ?record.symbols(),
                "Recovered subscription"
            );
        }
        Ok(())
    }

    async fn dispatch(&self, text: &str, handler: &Arc<dyn MessageHandler>) -> Result<()> {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Dropping malformed message");
                return Ok(());
            }
        };

        match &frame {
            Frame::Subscription(ack) => {
                lock(&self.tracker).record(ack);
            }
            Frame::Challenge(challenge) => {
                if let Authentication::Challenge { api_secret, .. } = &self.auth {
                    let signed = SignedChallenge::new(api_secret, challenge)?;
                    *write(&self.material) = Some(AuthMaterial::Challenge(signed));
                    self.ready.send_replace(true);
                    info!(url = %self.url, "Challenge signed, session authenticated");
                }
            }
            _ => {}
        }

        handler.on_message(Event::Frame(frame)).await;
        Ok(())
    }

    async fn send_command(&self, mut message: Value) -> Result<()> {
        if self.private {
            self.wait_ready(self.options.send_timeout).await?;
            self.attach_auth(&mut message)?;
        }
        let text = serde_json::to_string(&message)?;
        debug!(url = %self.url, "Sending: {}", redact(&message, &text));
        self.transmit(WsMessage::Text(text.into())).await
    }

    fn attach_auth(&self, message: &mut Value) -> Result<()> {
        let material = read(&self.material).clone().ok_or_else(|| {
            LadderError::Authentication("private session holds no credentials yet".into())
        })?;
        let object = message.as_object_mut().ok_or_else(|| {
            LadderError::InvalidRequest("private messages must be JSON objects".into())
        })?;

        match material {
            AuthMaterial::Token(token) => {
                let params = object
                    .entry("params")
                    .or_insert_with(|| Value::Object(Map::new()))
                    .as_object_mut()
                    .ok_or_else(|| {
                        LadderError::InvalidRequest("params must be a JSON object".into())
                    })?;
                params.insert("token".to_string(), Value::String(token));
            }
            AuthMaterial::Challenge(signed) => {
                object.insert(
                    "original_challenge".to_string(),
                    Value::String(signed.original_challenge),
                );
                object.insert(
                    "signed_challenge".to_string(),
                    Value::String(signed.signed_challenge),
                );
            }
        }
        Ok(())
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut ready = self.ready.subscribe();
        let mut state = self.state.subscribe();
        let outcome = tokio::time::timeout(timeout, async {
            tokio::select! {
                changed = ready.wait_for(|r| *r) => {
                    changed.map(|_| ()).map_err(|_| LadderError::ConnectionClosed)
                }
                Ok(_) = state.wait_for(|s| *s == SessionState::Failed) => Err(
                    LadderError::MaxReconnect(self.options.max_reconnect_attempts),
                ),
            }
        })
        .await;

        outcome.unwrap_or_else(|_| {
            Err(LadderError::Timeout(format!(
                "no ready socket for {} within {timeout:?}",
                self.url
            )))
        })
    }

    /// Writes once a socket is ready, re-checking a bounded number of times
    /// if it vanishes between the readiness signal and the write.
    async fn transmit(&self, message: WsMessage) -> Result<()> {
        for _ in 0..SEND_ATTEMPTS {
            self.wait_ready(self.options.send_timeout).await?;
            let mut guard = self.writer.lock().await;
            if let Some(writer) = guard.as_mut() {
                writer.send(message).await?;
                return Ok(());
            }
        }
        Err(LadderError::Timeout(format!(
            "socket for {} disappeared on every send attempt",
            self.url
        )))
    }

    /// Writes on the current socket without waiting for readiness.
    async fn write_now(&self, message: WsMessage) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(LadderError::ConnectionClosed)?;
        writer.send(message).await?;
        Ok(())
    }

    async fn keepalive(&self) -> Result<()> {
        {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(LadderError::ConnectionClosed)?;
            match self.keepalive {
                Keepalive::Method => ping(writer).await?,
                Keepalive::Frame => writer.send(WsMessage::Ping(Default::default())).await?,
            }
        }
        *lock(&self.last_ping) = Instant::now();
        Ok(())
    }

    async fn close_socket(&self) {
        self.ready.send_replace(false);
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.close().await
        {
            debug!(error = %e, "Close handshake failed");
        }
    }

    async fn drop_socket(&self) {
        self.ready.send_replace(false);
        *self.writer.lock().await = None;
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(url = %self.url, from = ?previous, to = ?state, "Session state changed");
        }
    }
}

/// Randomized exponential backoff before reconnect `attempt` (1-based).
///
/// Uniform in `[1, 1 + min(cap_secs, 2^attempt - 1))` seconds.
pub fn reconnect_wait(attempt: u32, cap_secs: u64) -> Duration {
    let ceiling = backoff_ceiling(attempt, cap_secs) as f64;
    Duration::from_secs_f64(rand::random::<f64>() * ceiling + 1.0)
}

/// Upper bound of the random part of [`reconnect_wait`], in seconds.
pub fn backoff_ceiling(attempt: u32, cap_secs: u64) -> u64 {
    let exponential = 1u64
        .checked_shl(attempt)
        .map_or(u64::MAX, |v| v - 1);
    exponential.min(cap_secs)
}

/// Hides the bearer token in debug logs.
fn redact(message: &Value, text: &str) -> String {
    match message.pointer("/params/token") {
        Some(Value::String(token)) => text.replace(token.as_str(), "<redacted>"),
        _ => text.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
