//! Public/private session pair with message validation and routing.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use super::connection::{Authentication, Connection, ConnectionSpec, MessageHandler};
use super::subscription::SubscriptionRecord;
use crate::Result;
use crate::config::{AppConfig, KrakenConfig, SessionOptions};
use crate::error::LadderError;
use crate::models::{
    Channel, PRIVATE_METHODS, SubscribeRequest, SubscriptionParams, UnsubscribeRequest,
};
use crate::rest::{KrakenRest, TokenProvider};
use crate::tls::build_tls_config;

/// Construction options for [`KrakenClient`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientOptions {
    /// Skip the public session (private-only clients).
    pub no_public: bool,
    pub session: SessionOptions,
}

/// The sessions a client drives.
#[derive(Clone, Default)]
pub struct Sessions {
    pub public: Option<Connection>,
    pub private: Option<Connection>,
}

impl Sessions {
    /// Public session unless disabled, private session only with
    /// credentials.
    pub fn from_config(
        config: &KrakenConfig,
        options: &ClientOptions,
        tls: Arc<rustls::ClientConfig>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let public = (!options.no_public).then(|| {
            Connection::new(
                ConnectionSpec::public(&config.websocket_url, tls.clone())
                    .with_options(options.session),
            )
        });
        let private = config.has_credentials().then(|| {
            Connection::new(
                ConnectionSpec::private(
                    &config.auth_websocket_url,
                    tls.clone(),
                    Authentication::Token(tokens),
                )
                .with_options(options.session),
            )
        });

        Self { public, private }
    }

    fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.public.iter().chain(self.private.iter())
    }
}

/// High-level client over up to two WebSocket sessions.
///
/// Every inbound frame of both sessions is delivered to the same
/// [`MessageHandler`]. Outbound commands are validated and routed to the
/// public or the authenticated session.
pub struct KrakenClient {
    sessions: Sessions,
    handler: Arc<dyn MessageHandler>,
    start_timeout: Duration,
}

impl KrakenClient {
    /// Builds a client from environment-style configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::Tls`] if the TLS or HTTP client cannot be
    /// built.
    pub fn new(
        config: &AppConfig,
        options: ClientOptions,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self> {
        let tls = build_tls_config(config.ca_bundle.as_deref())?;
        let rest = KrakenRest::new(
            &config.kraken.rest_url,
            config.kraken.api_key.clone(),
            config.kraken.api_secret.clone(),
            tls.clone(),
        )?;
        let sessions = Sessions::from_config(&config.kraken, &options, Arc::new(tls), Arc::new(rest));

        Ok(Self::from_parts(sessions, handler, options.session.start_timeout))
    }

    /// Builds a client over already constructed sessions.
    pub fn from_parts(
        sessions: Sessions,
        handler: Arc<dyn MessageHandler>,
        start_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            handler,
            start_timeout,
        }
    }

    /// Starts every session and waits until each one is ready.
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::Timeout`] if a session is not ready within
    /// the start timeout. The sessions keep retrying in the background.
    pub async fn start(&self) -> Result<()> {
        for connection in self.sessions.iter() {
            connection.start(self.handler.clone());
        }
        for connection in self.sessions.iter() {
            connection
                .wait_ready(self.start_timeout)
                .await
                .map_err(|_| {
                    LadderError::Timeout(format!(
                        "could not connect to {} within {:?}",
                        connection.url(),
                        self.start_timeout
                    ))
                })?;
        }
        info!("Client started");
        Ok(())
    }

    /// Stops every session.
    pub async fn stop(&self) {
        for connection in self.sessions.iter() {
            connection.stop().await;
        }
        info!("Client stopped");
    }

    /// Validates `message` and sends it over the matching session.
    ///
    /// Private commands get the session token attached.
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::InvalidRequest`] for malformed messages,
    /// [`LadderError::Authentication`] for private commands without
    /// credentials, or any send error.
    pub async fn send_message(&self, message: Value) -> Result<()> {
        let private = is_private_message(&message)?;
        self.route(private)?.send(message).await
    }

    /// Sends `message` unchanged over the chosen session.
    ///
    /// # Errors
    ///
    /// See [`KrakenClient::send_message`].
    pub async fn send_raw(&self, message: Value, private: bool) -> Result<()> {
        self.route(private)?.send_raw(message).await
    }

    /// Subscribes to a channel.
    ///
    /// # Errors
    ///
    /// See [`KrakenClient::send_message`].
    pub async fn subscribe(&self, params: SubscriptionParams, req_id: Option<u64>) -> Result<()> {
        let request = SubscribeRequest::new(params, req_id);
        self.send_message(serde_json::to_value(&request)?).await
    }

    /// Unsubscribes from a channel.
    ///
    /// # Errors
    ///
    /// See [`KrakenClient::send_message`].
    pub async fn unsubscribe(
        &self,
        params: SubscriptionParams,
        req_id: Option<u64>,
    ) -> Result<()> {
        let request = UnsubscribeRequest::new(params, req_id);
        self.send_message(serde_json::to_value(&request)?).await
    }

    /// Confirmed subscriptions of the public session.
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::InvalidRequest`] without a public session.
    pub fn active_public_subscriptions(&self) -> Result<Vec<SubscriptionRecord>> {
        self.route(false).map(Connection::subscriptions)
    }

    /// Confirmed subscriptions of the authenticated session.
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::Authentication`] without credentials.
    pub fn active_private_subscriptions(&self) -> Result<Vec<SubscriptionRecord>> {
        self.route(true).map(Connection::subscriptions)
    }

    /// `true` once any session has exhausted its reconnect attempts.
    pub fn exception_occurred(&self) -> bool {
        let failed = self.sessions.iter().any(Connection::exception_occurred);
        if failed {
            warn!("A session reached its terminal state");
        }
        failed
    }

    pub fn public(&self) -> Option<&Connection> {
        self.sessions.public.as_ref()
    }

    pub fn private(&self) -> Option<&Connection> {
        self.sessions.private.as_ref()
    }

    fn route(&self, private: bool) -> Result<&Connection> {
        if private {
            self.sessions.private.as_ref().ok_or_else(|| {
                LadderError::Authentication(
                    "private command requires API key and secret".into(),
                )
            })
        } else {
            self.sessions
                .public
                .as_ref()
                .ok_or_else(|| LadderError::InvalidRequest("no public session configured".into()))
        }
    }
}

/// Validates an outbound command and reports whether it needs the
/// authenticated session.
///
/// # Errors
///
/// Returns [`LadderError::InvalidRequest`] if `method` is missing or empty,
/// or a (un)subscribe command lacks `params.channel`.
pub fn is_private_message(message: &Value) -> Result<bool> {
    let method = message
        .get("method")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            LadderError::InvalidRequest("message must carry a non-empty \"method\"".into())
        })?;

    if PRIVATE_METHODS.contains(&method) {
        return Ok(true);
    }

    if method == "subscribe" || method == "unsubscribe" {
        let channel = message
            .pointer("/params/channel")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LadderError::InvalidRequest(format!("{method} message must carry params.channel"))
            })?;
        return Ok(Channel::from_wire(channel).is_some_and(|c| c.is_private()));
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::websocket::connection::Event;

    struct Silent;

    #[async_trait]
    impl MessageHandler for Silent {
        async fn on_message(&self, _event: Event) {}
    }

    fn public_only() -> KrakenClient {
        let tls = Arc::new(build_tls_config(None).unwrap());
        let sessions = Sessions {
            public: Some(Connection::new(ConnectionSpec::public(
                "wss://ws.kraken.com/v2",
                tls,
            ))),
            private: None,
        };
        KrakenClient::from_parts(sessions, Arc::new(Silent), Duration::from_secs(1))
    }

    #[test]
    fn classifies_private_commands() {
        assert!(is_private_message(&json!({"method": "add_order", "params": {}})).unwrap());
        assert!(
            is_private_message(&json!({"method": "subscribe", "params": {"channel": "executions"}}))
                .unwrap()
        );
        assert!(
            is_private_message(&json!({"method": "unsubscribe", "params": {"channel": "level3"}}))
                .unwrap()
        );
        assert!(
            !is_private_message(&json!({"method": "subscribe", "params": {"channel": "book"}}))
                .unwrap()
        );
        assert!(!is_private_message(&json!({"method": "ping"})).unwrap());
    }

    #[test]
    fn rejects_malformed_commands() {
        for message in [
            json!({"params": {}}),
            json!({"method": ""}),
            json!({"method": 7}),
            json!({"method": "subscribe", "params": {"symbol": ["BTC/USD"]}}),
        ] {
            assert!(matches!(
                is_private_message(&message),
                Err(LadderError::InvalidRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn private_command_without_credentials_fails_fast() {
        let client = public_only();
        let result = client
            .send_message(json!({"method": "cancel_all", "params": {}}))
            .await;
        assert!(matches!(result, Err(LadderError::Authentication(_))));

        let result = client
            .subscribe(SubscriptionParams::new(Channel::Balances), None)
            .await;
        assert!(matches!(result, Err(LadderError::Authentication(_))));
    }

    #[test]
    fn subscription_listings_follow_configured_sessions() {
        let client = public_only();
        assert!(client.active_public_subscriptions().unwrap().is_empty());
        assert!(client.active_private_subscriptions().is_err());
        assert!(!client.exception_occurred());
    }

    #[test]
    fn sessions_follow_credentials() {
        let tls = Arc::new(build_tls_config(None).unwrap());
        let rest = Arc::new(
            KrakenRest::new("https://api.kraken.com", None, None, (*tls).clone()).unwrap(),
        );

        let config = KrakenConfig::default();
        let sessions =
            Sessions::from_config(&config, &ClientOptions::default(), tls.clone(), rest.clone());
        assert!(sessions.public.is_some());
        assert!(sessions.private.is_none());

        let config = KrakenConfig {
            api_key: Some("key".into()),
            api_secret: Some(zeroize::Zeroizing::new("c2VjcmV0".into())),
            ..KrakenConfig::default()
        };
        let options = ClientOptions {
            no_public: true,
            ..ClientOptions::default()
        };
        let sessions = Sessions::from_config(&config, &options, tls, rest);
        assert!(sessions.public.is_none());
        assert!(sessions.private.as_ref().is_some_and(Connection::is_private));
    }
}
