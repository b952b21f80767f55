//! Webhook signature verification (`t=<unix>,v1=<hex>` scheme, HMAC-SHA256).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header")]
    MalformedHeader,

    #[error("signature mismatch")]
    Mismatch,

    #[error("timestamp outside tolerance")]
    Expired,
}

/// Checks `header` against the raw request body.
///
/// The MAC covers `"{t}.{body}"` byte for byte, so the body must be the exact
/// bytes received, never a re-serialized parse. Any one of several `v1`
/// entries may match (the provider sends more than one while rotating secrets).
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }
    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::MalformedHeader)?;

    let mac = signed_mac(payload, timestamp, secret)?;
    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(SignatureError::Mismatch);
    }

    if (now - ts).abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    Ok(())
}

fn signed_mac(payload: &[u8], timestamp: &str, secret: &str) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::MalformedHeader)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Produces a header value the way the provider signs deliveries.
#[cfg(test)]
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mac = signed_mac(payload, &timestamp.to_string(), secret).unwrap();
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
