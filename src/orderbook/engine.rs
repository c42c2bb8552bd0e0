//! Order book synchronization engine.
//!
//! Per symbol the book moves through: no book, `Synced` after a snapshot,
//! `Invalid` after a checksum mismatch, then removed on the unsubscribe
//! acknowledgement and rebuilt from the snapshot that follows the
//! resubscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::book::{BookState, BookView, OrderBook};
use crate::Result;
use crate::models::book::{BookData, BookMessage, BookMessageKind};
use crate::models::{
    BookDepth, Channel, SubscribeRequest, SubscriptionAck, SubscriptionParams, UnsubscribeRequest,
};
use crate::rest::{MetadataResolver, PairPrecision};
use crate::websocket::client::ClientOptions;
use crate::websocket::connection::{CommandSink, ErrorEvent, Event, MessageHandler};
use crate::websocket::frame::Frame;
use crate::websocket::subscription::SubscriptionRecord;

/// Pause between unsubscribing a corrupt book and subscribing again.
pub const DEFAULT_RESYNC_DELAY: Duration = Duration::from_secs(3);

/// Consecutive precision lookups that may fail for one symbol before its
/// book is abandoned.
pub const MAX_PRECISION_RETRIES: u32 = 5;

/// Order book client settings.
#[derive(Debug, Clone, Copy)]
pub struct BookOptions {
    pub depth: BookDepth,
    pub resync_delay: Duration,
    pub client: ClientOptions,
}

impl Default for BookOptions {
    fn default() -> Self {
        Self {
            depth: BookDepth::default(),
            resync_delay: DEFAULT_RESYNC_DELAY,
            client: ClientOptions::default(),
        }
    }
}

/// What happened to a book.
#[derive(Debug, Clone)]
pub enum BookUpdate {
    /// A snapshot or delta was applied. `view.valid` is `false` only for
    /// the delta that failed verification.
    Applied {
        kind: BookMessageKind,
        view: BookView,
    },
    /// The book diverged from the exchange and is being resubscribed.
    ChecksumMismatch { message: String },
}

/// Receives book notifications, in message order.
#[async_trait]
pub trait BookHandler: Send + Sync {
    async fn on_update(&self, symbol: &str, update: BookUpdate);
}

/// Applies book frames and heals books whose checksum diverges.
pub struct BookEngine {
    depth: BookDepth,
    resync_delay: Duration,
    books: RwLock<HashMap<String, OrderBook>>,
    precisions: Mutex<HashMap<String, PairPrecision>>,
    precision_failures: Mutex<HashMap<String, u32>>,
    resolver: Arc<dyn MetadataResolver>,
    sink: Arc<dyn CommandSink>,
    handler: Arc<dyn BookHandler>,
}

impl BookEngine {
    pub fn new(
        options: &BookOptions,
        resolver: Arc<dyn MetadataResolver>,
        sink: Arc<dyn CommandSink>,
        handler: Arc<dyn BookHandler>,
    ) -> Self {
        Self {
            depth: options.depth,
            resync_delay: options.resync_delay,
            books: RwLock::new(HashMap::new()),
            precisions: Mutex::new(HashMap::new()),
            precision_failures: Mutex::new(HashMap::new()),
            resolver,
            sink,
            handler,
        }
    }

    pub fn depth(&self) -> BookDepth {
        self.depth
    }

    /// Copy of the current book for `symbol`.
    pub fn get_book(&self, symbol: &str) -> Option<BookView> {
        self.books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .map(OrderBook::view)
    }

    /// Symbols that currently hold a book.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        symbols.sort();
        symbols
    }

    /// Applies every entry of a `book` channel message.
    pub async fn process_book(&self, message: BookMessage) {
        for data in message.data {
            self.apply(message.tpe, data).await;
        }
    }

    /// Drops the book of a confirmed book unsubscription.
    pub fn process_ack(&self, ack: &SubscriptionAck) {
        if !ack.success || ack.is_subscribe() || ack.channel() != Some(Channel::Book.as_str()) {
            return;
        }
        let Some(record) = SubscriptionRecord::from_ack(ack) else {
            return;
        };

        let mut books = self.books.write().unwrap_or_else(PoisonError::into_inner);
        for symbol in record.symbols() {
            if books.remove(&symbol).is_some() {
                info!(symbol = %symbol, "Order book removed");
            }
        }
    }

    async fn apply(&self, kind: BookMessageKind, data: BookData) {
        let symbol = data.symbol.clone();

        if kind == BookMessageKind::Update {
            match self.state_of(&symbol) {
                None => {
                    debug!(symbol = %symbol, "Dropping delta for a book without snapshot");
                    return;
                }
                Some(BookState::Invalid) => {
                    debug!(symbol = %symbol, "Dropping delta while resyncing");
                    return;
                }
                Some(BookState::Synced) => {}
            }
        }

        let precision = match self.precision(&symbol).await {
            Ok(precision) => precision,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Could not resolve pair precision");
                self.precision_failed(symbol);
                return;
            }
        };

        let (view, valid) = {
            let mut books = self.books.write().unwrap_or_else(PoisonError::into_inner);
            let book = books
                .entry(symbol.clone())
                .or_insert_with(|| OrderBook::new(&symbol, self.depth, precision));
            let valid = match kind {
                BookMessageKind::Snapshot => {
                    book.apply_snapshot(&data);
                    true
                }
                BookMessageKind::Update => book.apply_update(&data),
            };
            (book.view(), valid)
        };

        self.handler
            .on_update(&symbol, BookUpdate::Applied { kind, view })
            .await;

        if !valid {
            let message =
                format!("Checksum mismatch - resubscribing to the order book for {symbol}");
            self.handler
                .on_update(&symbol, BookUpdate::ChecksumMismatch { message })
                .await;
            self.schedule_resync(symbol);
        }
    }

    fn state_of(&self, symbol: &str) -> Option<BookState> {
        self.books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .map(OrderBook::state)
    }

    /// Marks every book stale after the public socket was lost. The
    /// replayed subscription delivers fresh snapshots.
    pub fn invalidate_all(&self) {
        let mut books = self.books.write().unwrap_or_else(PoisonError::into_inner);
        for book in books.values_mut() {
            book.invalidate();
        }
        if !books.is_empty() {
            warn!(count = books.len(), "Order books stale until resubscribed");
        }
    }

    /// Retries the subscription, or abandons the symbol once the lookup
    /// failed more than [`MAX_PRECISION_RETRIES`] times in a row.
    fn precision_failed(&self, symbol: String) {
        let failures = {
            let mut counts = self
                .precision_failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let count = counts.entry(symbol.clone()).or_insert(0);
            *count += 1;
            let failures = *count;
            if failures > MAX_PRECISION_RETRIES {
                counts.remove(&symbol);
            }
            failures
        };

        if failures <= MAX_PRECISION_RETRIES {
            self.schedule_resync(symbol);
            return;
        }

        error!(
            symbol = %symbol,
            failures,
            "Giving up on order book, pair precision unavailable"
        );
        let sink = self.sink.clone();
        let params = SubscriptionParams::book(std::slice::from_ref(&symbol), self.depth);
        tokio::spawn(async move {
            if let Err(e) = send(&*sink, &UnsubscribeRequest::new(params, None)).await {
                warn!(symbol = %symbol, error = %e, "Unsubscribe of abandoned book failed");
            }
        });
    }

    /// Resolves precision once per symbol.
    async fn precision(&self, symbol: &str) -> Result<PairPrecision> {
        let cached = self
            .precisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied();
        if let Some(precision) = cached {
            return Ok(precision);
        }

        let precision = self.resolver.precision(symbol).await?;
        self.precision_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(symbol);
        self.precisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol.to_string(), precision);
        Ok(precision)
    }

    /// Unsubscribes, waits for the resync delay, then subscribes again.
    fn schedule_resync(&self, symbol: String) {
        let sink = self.sink.clone();
        let params = SubscriptionParams::book(std::slice::from_ref(&symbol), self.depth);
        let delay = self.resync_delay;

        tokio::spawn(async move {
            info!(symbol = %symbol, delay_secs = delay.as_secs_f64(), "Resyncing order book");
            if let Err(e) = send(&*sink, &UnsubscribeRequest::new(params.clone(), None)).await {
                warn!(symbol = %symbol, error = %e, "Unsubscribe for resync failed");
            }
            tokio::time::sleep(delay).await;
            if let Err(e) = send(&*sink, &SubscribeRequest::new(params, None)).await {
                warn!(symbol = %symbol, error = %e, "Resubscribe failed");
            }
        });
    }
}

async fn send(sink: &dyn CommandSink, request: &impl Serialize) -> Result<()> {
    sink.send(serde_json::to_value(request)?).await
}

#[async_trait]
impl MessageHandler for BookEngine {
    async fn on_message(&self, event: Event) {
        match event {
            Event::Frame(Frame::Book(message)) => self.process_book(message).await,
            Event::Frame(Frame::Subscription(ack)) => self.process_ack(&ack),
            Event::Error(ErrorEvent::ConnectionLost { private: false, .. }) => {
                self.invalidate_all();
            }
            Event::Error(error) => debug!(?error, "Session error event"),
            _ => {}
        }
    }
}
