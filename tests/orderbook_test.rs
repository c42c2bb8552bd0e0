//! Order book synchronization tests driven by recorded book frames.

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use serde_json::{Value, json};

use ladder::models::BookDepth;
use ladder::models::book::{BookMessage, BookMessageKind};
use ladder::orderbook::{BookEngine, BookOptions, BookUpdate};
use ladder::rest::PairPrecision;
use ladder::websocket::{Event, Frame, MessageHandler};

use common::{FixedPrecision, Recorder};

const BOOK_SNAPSHOT_JSON: &str = include_str!("fixtures/book_snapshot.json");
const BOOK_UPDATE_JSON: &str = include_str!("fixtures/book_update.json");

const BTC_USD: PairPrecision = PairPrecision {
    price_decimals: 1,
    qty_decimals: 8,
};

fn engine(depth: BookDepth, precision: PairPrecision, recorder: &Arc<Recorder>) -> BookEngine {
    let options = BookOptions {
        depth,
        resync_delay: Duration::from_millis(100),
        ..BookOptions::default()
    };
    BookEngine::new(
        &options,
        Arc::new(FixedPrecision(precision)),
        recorder.clone(),
        recorder.clone(),
    )
}

fn frame(text: &str) -> Event {
    Event::Frame(Frame::decode(text).expect("Failed to decode frame"))
}

fn book(value: Value) -> BookMessage {
    serde_json::from_value(value).expect("Failed to deserialize book message")
}

#[tokio::test]
async fn test_ten_level_book_validates_reference_checksum() {
    let recorder = Arc::new(Recorder::default());
    let engine = engine(BookDepth::D25, BTC_USD, &recorder);

    engine.on_message(frame(BOOK_SNAPSHOT_JSON)).await;
    let view = engine.get_book("BTC/USD").expect("book after snapshot");
    assert_eq!(view.checksum, 2435408008);
    assert_eq!(view.bids.len(), 12);

    engine.on_message(frame(BOOK_UPDATE_JSON)).await;
    let view = engine.get_book("BTC/USD").expect("book after update");
    assert!(view.valid);
    assert_eq!(view.checksum, 3107414144);
    assert_eq!(view.best_bid().map(|l| l.price), Some(dec!(45284.0)));
    assert_eq!(view.best_ask().map(|l| l.price), Some(dec!(45285.3)));
    assert_eq!(view.bids[1].qty, dec!(1.25));

    let updates = recorder.updates();
    assert_eq!(updates.len(), 2);
    assert!(matches!(
        &updates[1].1,
        BookUpdate::Applied { kind: BookMessageKind::Update, view } if view.valid
    ));
    assert!(recorder.sent().is_empty());
}

#[tokio::test]
async fn test_zero_quantity_delta_empties_ask_side() {
    let recorder = Arc::new(Recorder::default());
    let precision = PairPrecision {
        price_decimals: 2,
        qty_decimals: 1,
    };
    let engine = engine(BookDepth::D10, precision, &recorder);

    engine
        .process_book(book(json!({
            "channel": "book",
            "type": "snapshot",
            "data": [{
                "symbol": "BTC/USD",
                "asks": [{"price": 100.00, "qty": 1.0}],
                "bids": [{"price": 99.00, "qty": 2.0}]
            }]
        })))
        .await;
    engine
        .process_book(book(json!({
            "channel": "book",
            "type": "update",
            "data": [{
                "symbol": "BTC/USD",
                "asks": [{"price": 100.00, "qty": 0}],
                "bids": [],
                "checksum": 560944349u64
            }]
        })))
        .await;

    let view = engine.get_book("BTC/USD").expect("book");
    assert!(view.asks.is_empty());
    assert_eq!(view.bids.len(), 1);
    assert!(view.valid);
}

#[tokio::test]
async fn test_duplicate_delta_leaves_book_unchanged() {
    let recorder = Arc::new(Recorder::default());
    let engine = engine(BookDepth::D25, BTC_USD, &recorder);

    engine.on_message(frame(BOOK_SNAPSHOT_JSON)).await;
    engine.on_message(frame(BOOK_UPDATE_JSON)).await;
    let first = engine.get_book("BTC/USD").expect("book");

    engine.on_message(frame(BOOK_UPDATE_JSON)).await;
    let second = engine.get_book("BTC/USD").expect("book");

    assert_eq!(first, second);
    assert!(second.valid);
}

#[tokio::test]
async fn test_depth_bound_keeps_best_levels() {
    let recorder = Arc::new(Recorder::default());
    let engine = engine(BookDepth::D10, BTC_USD, &recorder);

    engine.on_message(frame(BOOK_SNAPSHOT_JSON)).await;
    engine
        .process_book(book(json!({
            "channel": "book",
            "type": "update",
            "data": [{
                "symbol": "BTC/USD",
                "bids": [{"price": 45284.5, "qty": 1.0}, {"price": 45000.0, "qty": 1.0}],
                "asks": [{"price": 45285.1, "qty": 1.0}]
            }]
        })))
        .await;

    let view = engine.get_book("BTC/USD").expect("book");
    assert_eq!(view.bids.len(), 10);
    assert_eq!(view.asks.len(), 10);
    assert_eq!(view.bids[0].price, dec!(45284.5));
    assert!(view.bids.iter().all(|l| l.price > dec!(45000.0)));
    assert!(view.bids.windows(2).all(|w| w[0].price > w[1].price));
    assert_eq!(view.asks[0].price, dec!(45285.1));
    assert!(view.asks.windows(2).all(|w| w[0].price < w[1].price));
}

#[tokio::test]
async fn test_checksum_mismatch_resubscribes_once() {
    let recorder = Arc::new(Recorder::default());
    let engine = engine(BookDepth::D25, BTC_USD, &recorder);

    engine.on_message(frame(BOOK_SNAPSHOT_JSON)).await;
    let corrupt = BOOK_UPDATE_JSON.replace("3107414144", "12345");
    engine.on_message(frame(&corrupt)).await;
    // Further deltas while invalid are dropped without notification.
    engine.on_message(frame(BOOK_UPDATE_JSON)).await;
    engine.on_message(frame(&corrupt)).await;

    let view = engine.get_book("BTC/USD").expect("book");
    assert!(!view.valid);

    let updates = recorder.updates();
    assert_eq!(updates.len(), 3);
    assert!(matches!(&updates[1].1, BookUpdate::Applied { view, .. } if !view.valid));
    assert!(matches!(&updates[2].1, BookUpdate::ChecksumMismatch { .. }));
    assert!(
        updates[1..]
            .iter()
            .all(|(_, u)| !matches!(u, BookUpdate::Applied { view, .. } if view.valid))
    );

    assert!(
        common::wait_until(Duration::from_millis(50), || recorder.sent().len() == 1).await,
        "unsubscribe should be sent right away"
    );
    assert_eq!(recorder.sent()[0]["method"], "unsubscribe");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let sent = recorder.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1]["method"], "subscribe");
    assert_eq!(
        sent[1]["params"],
        json!({"channel": "book", "symbol": ["BTC/USD"], "depth": 25})
    );

    // The exchange confirms the unsubscribe, then sends a fresh snapshot.
    engine
        .on_message(frame(
            r#"{"method":"unsubscribe","result":{"channel":"book","symbol":"BTC/USD","depth":25},"success":true}"#,
        ))
        .await;
    assert!(engine.get_book("BTC/USD").is_none());

    engine.on_message(frame(BOOK_SNAPSHOT_JSON)).await;
    engine.on_message(frame(BOOK_UPDATE_JSON)).await;
    assert!(engine.get_book("BTC/USD").expect("book").valid);
}
