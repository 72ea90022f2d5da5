//! HMAC-SHA256 verification of payment webhook payloads.
//!
//! Two header conventions are accepted: `Stripe-Signature: t=<unix>,v1=<hex>`
//! and the generic `x-timestamp` / `x-signature` pair. In both cases the MAC
//! covers `"{timestamp}.{raw body}"`.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    MissingHeader,
    #[error("signature header malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    TimestampOutOfTolerance,
    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies `payload` against the signature headers. `now` is a unix timestamp.
pub fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), SignatureError> {
    let (timestamp, signatures) = extract(headers)?;

    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    if (now - ts).unsigned_abs() > tolerance_secs {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let expected = compute_signature(secret, &timestamp, payload);
    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn extract(headers: &HeaderMap) -> Result<(String, Vec<String>), SignatureError> {
    if let Some(raw) = headers.get(STRIPE_SIGNATURE_HEADER) {
        let raw = raw.to_str().map_err(|_| SignatureError::Malformed)?;
        let mut ts = None;
        let mut v1 = Vec::new();
        for part in raw.split(',') {
            match part.trim().split_once('=') {
                Some(("t", val)) => ts = Some(val.to_string()),
                Some(("v1", val)) => v1.push(val.to_string()),
                _ => {}
            }
        }
        return match ts {
            Some(ts) if !v1.is_empty() => Ok((ts, v1)),
            _ => Err(SignatureError::Malformed),
        };
    }

    match (headers.get(TIMESTAMP_HEADER), headers.get(SIGNATURE_HEADER)) {
        (Some(ts), Some(sig)) => {
            let ts = ts.to_str().map_err(|_| SignatureError::Malformed)?;
            let sig = sig.to_str().map_err(|_| SignatureError::Malformed)?;
            Ok((ts.to_string(), vec![sig.to_string()]))
        }
        (None, None) => Err(SignatureError::MissingHeader),
        _ => Err(SignatureError::Malformed),
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn compute_signature(secret: &str, timestamp: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Builds a `Stripe-Signature` header value for `payload`.
pub fn stripe_signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let ts = timestamp.to_string();
    format!("t={},v1={}", ts, compute_signature(secret, &ts, payload))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;

    fn stripe_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(STRIPE_SIGNATURE_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accepts_valid_stripe_signature() {
        let headers = stripe_headers(&stripe_signature_header(SECRET, NOW, BODY));
        assert_eq!(verify_signature(&headers, BODY, SECRET, 300, NOW), Ok(()));
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let valid = compute_signature(SECRET, &NOW.to_string(), BODY);
        let headers = stripe_headers(&format!("t={},v1=deadbeef,v1={}", NOW, valid));
        assert_eq!(verify_signature(&headers, BODY, SECRET, 300, NOW), Ok(()));
    }

    #[test]
    fn accepts_generic_header_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from(NOW));
        let sig = compute_signature(SECRET, &NOW.to_string(), BODY);
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&sig).unwrap());
        assert_eq!(verify_signature(&headers, BODY, SECRET, 300, NOW), Ok(()));
    }

    #[test]
    fn rejects_tampered_body() {
        let headers = stripe_headers(&stripe_signature_header(SECRET, NOW, BODY));
        let tampered = br#"{"id":"evt_1","type":"payment_intent.canceled"}"#;
        assert_eq!(
            verify_signature(&headers, tampered, SECRET, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let headers = stripe_headers(&stripe_signature_header("other", NOW, BODY));
        assert_eq!(
            verify_signature(&headers, BODY, SECRET, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let headers = stripe_headers(&stripe_signature_header(SECRET, NOW - 301, BODY));
        assert_eq!(
            verify_signature(&headers, BODY, SECRET, 300, NOW),
            Err(SignatureError::TimestampOutOfTolerance)
        );
    }

    #[test]
    fn rejects_missing_and_malformed_headers() {
        assert_eq!(
            verify_signature(&HeaderMap::new(), BODY, SECRET, 300, NOW),
            Err(SignatureError::MissingHeader)
        );
        assert_eq!(
            verify_signature(&stripe_headers("v1=abc"), BODY, SECRET, 300, NOW),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_signature(&stripe_headers("t=soon,v1=abc"), BODY, SECRET, 300, NOW),
            Err(SignatureError::Malformed)
        );
    }
}
