//! Bookkeeping of confirmed subscriptions.
//!
//! Records are only created from server acknowledgements, never from
//! outbound requests, so the tracker mirrors what the exchange actually
//! accepted. Each session replays its records after a reconnect.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::models::{SubscriptionAck, SubscriptionParams};

/// Fields echoed in acknowledgements that must not be replayed.
const TRANSIENT_FIELDS: [&str; 3] = ["warnings", "maxratecount", "token"];

/// One confirmed subscription, normalized for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub params: SubscriptionParams,
}

impl SubscriptionRecord {
    /// Normalizes the `result` of an acknowledgement.
    ///
    /// Transient fields are dropped and a single `symbol` string becomes a
    /// one-element list for symbol-based channels. Returns `None` when the
    /// result carries no channel.
    pub fn from_ack(ack: &SubscriptionAck) -> Option<Self> {
        let mut result: Map<String, Value> = ack.result.clone()?;
        let channel = match result.remove("channel")? {
            Value::String(channel) => channel,
            _ => return None,
        };
        for field in TRANSIENT_FIELDS {
            result.remove(field);
        }

        let mut params = SubscriptionParams {
            channel,
            extra: result,
        };
        if params.known_channel().is_some_and(|c| c.is_symbol_based())
            && let Some(Value::String(symbol)) = params.extra.get("symbol")
        {
            let list = Value::from(vec![symbol.clone()]);
            params.extra.insert("symbol".to_string(), list);
        }

        Some(Self { params })
    }

    /// Wire name of the channel.
    pub fn channel(&self) -> &str {
        &self.params.channel
    }

    /// Symbols of the subscription, empty for symbol-less channels.
    pub fn symbols(&self) -> Vec<String> {
        match self.params.extra.get("symbol") {
            Some(Value::String(symbol)) => vec![symbol.clone()],
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(|s| s.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Returns `true` if the record needs the authenticated session.
    pub fn is_private(&self) -> bool {
        self.params.is_private()
    }

    /// Identity match used to replace and remove records.
    ///
    /// Channel and symbol set must be equal. `depth` and `interval` must be
    /// equal when both sides carry them; a side that omits one matches any
    /// value, since unsubscribe acknowledgements do not always echo them.
    pub fn matches(&self, other: &SubscriptionRecord) -> bool {
        if self.channel() != other.channel() {
            return false;
        }
        let ours: BTreeSet<String> = self.symbols().into_iter().collect();
        let theirs: BTreeSet<String> = other.symbols().into_iter().collect();
        if ours != theirs {
            return false;
        }

        ["depth", "interval"].iter().all(|field| {
            match (self.params.extra.get(*field), other.params.extra.get(*field)) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        })
    }
}

/// Ordered set of confirmed subscriptions for one session.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    records: Vec<SubscriptionRecord>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one acknowledgement.
    ///
    /// A successful subscribe adds (or replaces) the record, a successful
    /// unsubscribe removes it. Failed acknowledgements are logged and leave
    /// the set unchanged. Returns `true` if the set changed.
    pub fn record(&mut self, ack: &SubscriptionAck) -> bool {
        if !ack.success {
            warn!(
                method = %ack.method,
                error = ack.error.as_deref().unwrap_or("unknown error"),
                "Subscription request rejected"
            );
            return false;
        }

        let Some(record) = SubscriptionRecord::from_ack(ack) else {
            debug!(method = %ack.method, "Acknowledgement without channel, ignoring");
            return false;
        };

        let before = self.records.len();
        self.records.retain(|existing| !existing.matches(&record));
        let removed = before - self.records.len();

        if ack.is_subscribe() {
            info!(
                channel = record.channel(),
                symbols = ?record.symbols(),
                "Subscription confirmed"
            );
            self.records.push(record);
            true
        } else {
            info!(
                channel = record.channel(),
                symbols = ?record.symbols(),
                "Unsubscription confirmed"
            );
            removed > 0
        }
    }

    /// Snapshot of the active records, in confirmation order.
    pub fn active(&self) -> Vec<SubscriptionRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
