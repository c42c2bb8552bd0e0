//! Request signing for the Kraken REST API and challenge signing for
//! challenge/response WebSocket sessions.
//!
//! Both schemes key an HMAC-SHA512 with the base64-decoded API secret:
//! - REST: `Base64(HMAC-SHA512(secret, path + SHA256(nonce + post_data)))`
//! - challenge: `Base64(HMAC-SHA512(secret, SHA256(challenge)))`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::prelude::*;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256, Sha512};

use crate::Result;

/// Tracks the last nonce issued so every call returns a strictly
/// increasing value even when the wall-clock hasn't advanced.
///
/// Uses nanosecond resolution in a `u64`, which overflows around year 2554.
static LAST_NONCE: AtomicU64 = AtomicU64::new(0);

/// A server challenge together with its signature.
///
/// Valid only for the connection that received the challenge; a new one is
/// derived after every reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedChallenge {
    pub original_challenge: String,
    pub signed_challenge: String,
}

impl SignedChallenge {
    /// Signs `challenge` with the base64 `api_secret`.
    ///
    /// # Errors
    ///
    /// Returns [`LadderError::Authentication`](crate::LadderError::Authentication)
    /// if the secret is not valid base64.
    pub fn new(api_secret: &str, challenge: &str) -> Result<Self> {
        Ok(Self {
            original_challenge: challenge.to_string(),
            signed_challenge: sign_challenge(api_secret, challenge)?,
        })
    }
}

/// Returns a strictly monotonically-increasing nonce with nanosecond resolution.
///
/// Uses the wall-clock as the baseline but guarantees that successive calls
/// always return a value larger than the previous one, even when the clock
/// resolution is too coarse or the clock jumps backwards.
pub fn next_nonce() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();

    let mut prev = LAST_NONCE.load(Ordering::Relaxed);
    loop {
        let nonce = now.max(prev + 1);
        match LAST_NONCE.compare_exchange_weak(prev, nonce, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return nonce,
            Err(actual) => prev = actual,
        }
    }
}

/// Computes the `API-Sign` header value for a private REST call.
///
/// # Errors
///
/// Returns [`LadderError::Authentication`](crate::LadderError::Authentication)
/// if the secret is not valid base64.
pub fn sign(api_secret: &str, path: &str, nonce: u64, post_data: &str) -> Result<String> {
    let mut sha256 = Sha256::new();
    sha256.update(format!("{nonce}{post_data}").as_bytes());
    let sha256_digest = sha256.finalize();

    let mut hmac_input = Vec::from(path.as_bytes());
    hmac_input.extend_from_slice(&sha256_digest);

    hmac_sha512_base64(api_secret, &hmac_input)
}

/// Signs a WebSocket challenge string.
///
/// # Errors
///
/// Returns [`LadderError::Authentication`](crate::LadderError::Authentication)
/// if the secret is not valid base64.
pub fn sign_challenge(api_secret: &str, challenge: &str) -> Result<String> {
    let digest = Sha256::digest(challenge.as_bytes());
    hmac_sha512_base64(api_secret, &digest)
}

fn hmac_sha512_base64(api_secret: &str, message: &[u8]) -> Result<String> {
    let secret = BASE64_STANDARD.decode(api_secret).map_err(|e| {
        crate::LadderError::Authentication(format!("invalid base64 api_secret: {e}"))
    })?;

    let mut mac = Hmac::<Sha512>::new_from_slice(&secret)
        .map_err(|e| crate::LadderError::Authentication(format!("invalid HMAC key: {e}")))?;
    mac.update(message);

    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}
