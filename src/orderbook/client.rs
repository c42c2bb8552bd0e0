//! Order book client: a [`KrakenClient`] whose frames feed a [`BookEngine`].

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::book::BookView;
use super::engine::{BookEngine, BookHandler, BookOptions};
use crate::Result;
use crate::config::AppConfig;
use crate::error::LadderError;
use crate::models::{BookDepth, SubscriptionParams};
use crate::rest::{KrakenRest, MetadataResolver};
use crate::tls::build_tls_config;
use crate::websocket::client::{KrakenClient, Sessions};

/// Maintains validated local order books for subscribed symbols.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use ladder::orderbook::{BookHandler, BookOptions, BookUpdate, OrderBookClient};
/// # struct Print;
/// # #[async_trait::async_trait]
/// # impl BookHandler for Print {
/// #     async fn on_update(&self, symbol: &str, update: BookUpdate) {
/// #         println!("{symbol}: {update:?}");
/// #     }
/// # }
/// # async fn run() -> ladder::Result<()> {
/// let config = ladder::config::fetch_config()?;
/// let client = OrderBookClient::new(&config, BookOptions::default(), Arc::new(Print))?;
/// client.start().await?;
/// client.add_book(&["BTC/USD".to_string()]).await?;
/// # Ok(())
/// # }
/// ```
pub struct OrderBookClient {
    client: KrakenClient,
    engine: Arc<BookEngine>,
}

impl OrderBookClient {
    /// Builds the client from configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`LadderError`] if the TLS or HTTP client cannot be built,
    /// or the public session is disabled.
    pub fn new(
        config: &AppConfig,
        options: BookOptions,
        handler: Arc<dyn BookHandler>,
    ) -> Result<Self> {
        let tls = build_tls_config(config.ca_bundle.as_deref())?;
        let rest = Arc::new(KrakenRest::new(
            &config.kraken.rest_url,
            config.kraken.api_key.clone(),
            config.kraken.api_secret.clone(),
            tls.clone(),
        )?);
        let sessions =
            Sessions::from_config(&config.kraken, &options.client, Arc::new(tls), rest.clone());

        Self::from_parts(sessions, options, rest, handler)
    }

    /// Builds the client over already constructed sessions.
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::Config`] without a public session.
    pub fn from_parts(
        sessions: Sessions,
        options: BookOptions,
        resolver: Arc<dyn MetadataResolver>,
        handler: Arc<dyn BookHandler>,
    ) -> Result<Self> {
        let public = sessions.public.clone().ok_or_else(|| {
            LadderError::Config("order books need the public session".to_string())
        })?;
        let engine = Arc::new(BookEngine::new(&options, resolver, Arc::new(public), handler));
        let client = KrakenClient::from_parts(
            sessions,
            engine.clone(),
            options.client.session.start_timeout,
        );

        Ok(Self { client, engine })
    }

    /// # Errors
    ///
    /// See [`KrakenClient::start`].
    pub async fn start(&self) -> Result<()> {
        self.client.start().await
    }

    pub async fn stop(&self) {
        self.client.stop().await;
    }

    /// Subscribes to the book channel for `symbols` at the configured depth.
    ///
    /// # Errors
    ///
    /// See [`KrakenClient::send_message`].
    pub async fn add_book(&self, symbols: &[String]) -> Result<()> {
        info!(?symbols, depth = self.depth().as_u16(), "Adding order books");
        let params = SubscriptionParams::book(symbols, self.depth());
        self.client.subscribe(params, None).await
    }

    /// Unsubscribes from the book channel for `symbols`. The books are
    /// dropped once the exchange confirms.
    ///
    /// # Errors
    ///
    /// See [`KrakenClient::send_message`].
    pub async fn remove_book(&self, symbols: &[String]) -> Result<()> {
        info!(?symbols, "Removing order books");
        let params = SubscriptionParams::book(symbols, self.depth());
        self.client.unsubscribe(params, None).await
    }

    /// # Errors
    ///
    /// See [`KrakenClient::subscribe`].
    pub async fn subscribe(&self, params: SubscriptionParams, req_id: Option<u64>) -> Result<()> {
        self.client.subscribe(params, req_id).await
    }

    /// # Errors
    ///
    /// See [`KrakenClient::unsubscribe`].
    pub async fn unsubscribe(
        &self,
        params: SubscriptionParams,
        req_id: Option<u64>,
    ) -> Result<()> {
        self.client.unsubscribe(params, req_id).await
    }

    /// # Errors
    ///
    /// See [`KrakenClient::send_raw`].
    pub async fn send_raw(&self, message: Value, private: bool) -> Result<()> {
        self.client.send_raw(message, private).await
    }

    /// Copy of the current book for `symbol`, if one is held.
    pub fn get_book(&self, symbol: &str) -> Option<BookView> {
        self.engine.get_book(symbol)
    }

    pub fn depth(&self) -> BookDepth {
        self.engine.depth()
    }

    /// The underlying session client.
    pub fn client(&self) -> &KrakenClient {
        &self.client
    }
}
