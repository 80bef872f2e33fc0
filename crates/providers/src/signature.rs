//! Stripe webhook signature verification.
//!
//! Stripe signs each delivery with the endpoint secret. The `Stripe-Signature` header has the
//! form `t=<unix seconds>,v1=<hex>[,v1=<hex>...][,v0=<hex>]`, where each `v1` value is
//! `HMAC-SHA256(secret, "<t>.<raw body>")`. Multiple `v1` entries appear while a secret is
//! being rolled; any one matching is sufficient.

use crate::{ProviderError, ProviderResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> ProviderResult<ParsedHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| ProviderError::MalformedSignature("timestamp is not an integer"))?,
                )
            }
            "v1" => {
                // Undecodable entries are skipped rather than fatal; another v1 may still match.
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(ProviderError::MalformedSignature("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(ProviderError::MalformedSignature("missing v1 signature"));
    }

    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> ProviderResult<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|_| ProviderError::MalformedSignature("invalid signing secret"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Verify a Stripe webhook delivery.
///
/// # Arguments
/// * `payload` - The raw request body, exactly as received
/// * `header` - The `Stripe-Signature` header value
/// * `secret` - The endpoint signing secret (`whsec_...`), used verbatim as the HMAC key
/// * `tolerance_secs` - Maximum allowed age of the signature timestamp
/// * `now` - Current unix time in seconds
///
/// # Errors
/// Returns `MalformedSignature`, `SignatureExpired` or `SignatureMismatch`.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> ProviderResult<()> {
    let parsed = parse_header(header)?;

    // `t` comes straight from the request; an age that overflows i64 is out of tolerance.
    let age_secs = now.saturating_sub(parsed.timestamp);
    match age_secs.checked_abs() {
        Some(age) if age <= tolerance_secs => {}
        _ => return Err(ProviderError::SignatureExpired { age_secs }),
    }

    let mac = mac_for(secret, parsed.timestamp, payload)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok());

    if matched {
        Ok(())
    } else {
        Err(ProviderError::SignatureMismatch)
    }
}

/// Build a `Stripe-Signature` header value for a payload.
///
/// Used by tests and by the CLI when replaying captured payloads against a local server.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> ProviderResult<String> {
    let digest = mac_for(secret, timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
}
