//! TLS client configuration shared by the WebSocket and REST clients.
//!
//! Builds a [`rustls::ClientConfig`] trusting the Mozilla root set, with an
//! optional PEM bundle of extra roots (e.g. a corporate proxy CA).

use std::path::Path;
use std::sync::Arc;

use rustls::ClientConfig;
use tracing::debug;

use crate::Result;

/// Builds a [`ClientConfig`] with the webpki roots plus any certificates
/// found in `extra_pem`.
///
/// # Errors
///
/// Returns [`LadderError::Tls`](crate::LadderError::Tls) if the bundle
/// cannot be read or parsed, or the protocol versions are rejected.
pub fn build_tls_config(extra_pem: Option<&Path>) -> Result<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = extra_pem {
        let pem = std::fs::read(path).map_err(|e| {
            crate::LadderError::Tls(format!("failed to read {}: {e}", path.display()))
        })?;
        let certs: Vec<_> = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| crate::LadderError::Tls(format!("failed to parse CA PEM: {e}")))?;
        let (added, ignored) = root_store.add_parsable_certificates(certs);
        debug!(added, ignored, path = %path.display(), "Loaded extra CA roots");
    }

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| crate::LadderError::Tls(format!("unsupported protocol versions: {e}")))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(config)
}
