//! Decoding tests for inbound Kraken WebSocket V2 frames.

use rust_decimal_macros::dec;

use ladder::models::book::BookMessageKind;
use ladder::orderbook::PriceLevel;
use ladder::rest::PairPrecision;
use ladder::websocket::{Frame, SubscriptionRecord};

const BOOK_SNAPSHOT_JSON: &str = include_str!("fixtures/book_snapshot.json");
const BOOK_UPDATE_JSON: &str = include_str!("fixtures/book_update.json");
const SUBSCRIBE_ACK_JSON: &str = include_str!("fixtures/subscribe_ack.json");
const EXECUTIONS_ACK_JSON: &str = include_str!("fixtures/executions_ack.json");
const STATUS_JSON: &str = include_str!("fixtures/status.json");

#[test]
fn test_book_snapshot_decodes() {
    let frame = Frame::decode(BOOK_SNAPSHOT_JSON).expect("Failed to decode snapshot");

    let Frame::Book(message) = frame else {
        panic!("expected a book frame");
    };
    assert_eq!(message.tpe, BookMessageKind::Snapshot);
    assert_eq!(message.data.len(), 1);

    let data = &message.data[0];
    assert_eq!(data.symbol, "BTC/USD");
    assert_eq!(data.bids.len(), 12);
    assert_eq!(data.asks.len(), 12);
    assert_eq!(data.checksum, Some(2435408008));
    assert!(data.timestamp.is_none());
}

#[test]
fn test_book_update_levels_normalize_to_pair_precision() {
    let Frame::Book(message) = Frame::decode(BOOK_UPDATE_JSON).expect("Failed to decode update")
    else {
        panic!("expected a book frame");
    };
    assert_eq!(message.tpe, BookMessageKind::Update);

    let data = &message.data[0];
    let precision = PairPrecision {
        price_decimals: 1,
        qty_decimals: 8,
    };
    let level = PriceLevel::normalize(&data.bids[0], precision, data.timestamp.as_deref())
        .expect("level should be representable");

    assert_eq!(level.price, dec!(45283.5));
    assert_eq!(level.qty.to_string(), "1.25000000");
    assert_eq!(
        level.timestamp.as_deref(),
        Some("2023-10-06T17:35:55.440295Z")
    );

    let removed = PriceLevel::normalize(&data.asks[0], precision, None).expect("zero level");
    assert!(removed.qty.is_zero());
}

#[test]
fn test_subscribe_ack_normalizes_for_replay() {
    let Frame::Subscription(ack) = Frame::decode(SUBSCRIBE_ACK_JSON).expect("Failed to decode ack")
    else {
        panic!("expected a subscription frame");
    };
    assert!(ack.success);
    assert!(ack.is_subscribe());

    let record = SubscriptionRecord::from_ack(&ack).expect("ack carries a channel");
    assert_eq!(record.channel(), "book");
    assert_eq!(record.symbols(), vec!["BTC/USD".to_string()]);
    assert_eq!(record.params.extra["symbol"], serde_json::json!(["BTC/USD"]));
    assert_eq!(record.params.extra["depth"], 25);
    assert!(!record.params.extra.contains_key("warnings"));
    assert!(!record.is_private());
}

#[test]
fn test_executions_ack_is_private_and_stripped() {
    let Frame::Subscription(ack) =
        Frame::decode(EXECUTIONS_ACK_JSON).expect("Failed to decode ack")
    else {
        panic!("expected a subscription frame");
    };

    let record = SubscriptionRecord::from_ack(&ack).expect("ack carries a channel");
    assert!(record.is_private());
    assert!(!record.params.extra.contains_key("maxratecount"));
    assert_eq!(record.params.extra["snap_orders"], true);
}

#[test]
fn test_status_decodes() {
    let Frame::Status(status) = Frame::decode(STATUS_JSON).expect("Failed to decode status")
    else {
        panic!("expected a status frame");
    };

    assert_eq!(status.channel, "status");
    assert_eq!(status.tpe, "update");
    assert_eq!(status.data[0].api_version, "v2");
    assert_eq!(status.data[0].system, "online");
    assert_eq!(status.data[0].connection_id, 12893948786176260000);
}

#[test]
fn test_heartbeat_and_pong_decode() {
    assert!(matches!(
        Frame::decode(r#"{"channel":"heartbeat"}"#),
        Ok(Frame::Heartbeat)
    ));

    let pong = r#"{"method":"pong","req_id":101,"time_in":"2023-09-24T14:10:23.799685Z","time_out":"2023-09-24T14:10:23.799703Z"}"#;
    match Frame::decode(pong).expect("Failed to decode pong") {
        Frame::Pong(pong) => {
            assert_eq!(pong.req_id, Some(101));
            assert_eq!(pong.time_in.as_deref(), Some("2023-09-24T14:10:23.799685Z"));
        }
        other => panic!("expected pong, got {other:?}"),
    }
}

#[test]
fn test_numeric_strings_are_accepted() {
    let text = r#"{"channel":"book","type":"update","data":[{"symbol":"ETH/USD","bids":[{"price":"1850.25","qty":"3.5"}],"asks":[],"checksum":1}]}"#;
    let Frame::Book(message) = Frame::decode(text).expect("Failed to decode update") else {
        panic!("expected a book frame");
    };
    assert_eq!(message.data[0].bids[0].price, 1850.25);
    assert_eq!(message.data[0].bids[0].qty, 3.5);
}
