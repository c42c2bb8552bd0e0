use std::sync::Arc;

use async_trait::async_trait;
use ladder::LadderError;
use ladder::config::fetch_config;
use ladder::orderbook::{BookHandler, BookOptions, BookUpdate, OrderBookClient};
use tracing::{info, warn};

/// Levels printed per side.
const TOP_LEVELS: usize = 5;

struct TopOfBook;

#[async_trait]
impl BookHandler for TopOfBook {
    async fn on_update(&self, symbol: &str, update: BookUpdate) {
        match update {
            BookUpdate::Applied { view, .. } => {
                println!("{symbol}  valid={}  checksum={}", view.valid, view.checksum);
                for ask in view.asks.iter().take(TOP_LEVELS).rev() {
                    println!("    ask {:>14} {:>16}", ask.price, ask.qty);
                }
                for bid in view.bids.iter().take(TOP_LEVELS) {
                    println!("    bid {:>14} {:>16}", bid.price, bid.qty);
                }
                if let Some(spread) = view.spread() {
                    println!("    spread {spread}");
                }
            }
            BookUpdate::ChecksumMismatch { message } => warn!(symbol, "{message}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), LadderError> {
    // Initialize tracing subscriber for logging output.
    tracing_subscriber::fmt::init();

    let app_config = fetch_config()?;

    let mut symbols: Vec<String> = std::env::args().skip(1).collect();
    if symbols.is_empty() {
        symbols.push("BTC/USD".to_string());
    }

    let options = BookOptions {
        depth: app_config.book.depth,
        ..BookOptions::default()
    };
    let client = OrderBookClient::new(&app_config, options, Arc::new(TopOfBook))?;
    client.start().await?;
    client.add_book(&symbols).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                if client.client().exception_occurred() {
                    warn!("Session failed permanently, exiting");
                    break;
                }
            }
        }
    }

    info!("Shutting down");
    if let Err(e) = client.remove_book(&symbols).await {
        warn!("Failed to unsubscribe: {e}");
    }
    client.stop().await;

    Ok(())
}
