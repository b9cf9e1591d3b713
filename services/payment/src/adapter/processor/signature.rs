//! HMAC-SHA256 signatures attached by payment gateways to webhook events.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, PartialEq, Eq)]
pub enum SignatureError {
    MissingSecret,
    MalformedHeader(String),
    /// signed time, and the seconds it drifts from now
    TimestampOutOfTolerance(i64, i64),
    Mismatch,
}

fn new_mac(secret: &str) -> Result<HmacSha256, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_e| SignatureError::MissingSecret)
}

fn verify_hex_digest(mac: HmacSha256, given_hex: &str) -> Result<(), SignatureError> {
    let given = hex::decode(given_hex.trim()).map_err(|_e| SignatureError::Mismatch)?;
    // constant-time comparison
    mac.verify_slice(given.as_slice())
        .map_err(|_e| SignatureError::Mismatch)
}

fn stripe_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = new_mac(secret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Builds the value of the `Stripe-Signature` header for the payload signed
/// at `timestamp`, in the form `t=<unix-secs>,v1=<hex>`
pub fn stripe_signature_header(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, SignatureError> {
    let mac = stripe_mac(secret, timestamp, payload)?;
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={digest}"))
}

/// The header may carry several `v1` entries while a secret is being
/// rolled, any one of them matching is accepted.
pub fn verify_stripe(
    secret: &str,
    header: &str,
    payload: &[u8],
    now_secs: i64,
    tolerance_secs: u32,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for item in header.split(',') {
        let (k, v) = item
            .trim()
            .split_once('=')
            .ok_or_else(|| SignatureError::MalformedHeader(item.to_string()))?;
        match k {
            "t" => {
                let t = v
                    .parse::<i64>()
                    .map_err(|_e| SignatureError::MalformedHeader(item.to_string()))?;
                timestamp = Some(t);
            }
            "v1" => candidates.push(v),
            _others => {} // older schemes such as `v0` are ignored
        }
    }
    let timestamp =
        timestamp.ok_or_else(|| SignatureError::MalformedHeader("timestamp-missing".to_string()))?;
    if candidates.is_empty() {
        return Err(SignatureError::MalformedHeader("v1-missing".to_string()));
    }
    let drift = now_secs - timestamp;
    if drift.abs() > tolerance_secs as i64 {
        return Err(SignatureError::TimestampOutOfTolerance(timestamp, drift));
    }
    let mac = stripe_mac(secret, timestamp, payload)?;
    let matched = candidates
        .into_iter()
        .any(|c| verify_hex_digest(mac.clone(), c).is_ok());
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

pub fn chapa_signature(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
    let mut mac = new_mac(secret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_chapa(secret: &str, header: &str, payload: &[u8]) -> Result<(), SignatureError> {
    if header.trim().is_empty() {
        return Err(SignatureError::MalformedHeader("empty".to_string()));
    }
    let mut mac = new_mac(secret)?;
    mac.update(payload);
    verify_hex_digest(mac, header)
}
