//! Signature algorithm and verification for webhook deliveries.
//!
//! Every webhook POST from the relayer carries an HMAC-SHA256 signature of
//! the raw request body, keyed by the secret the merchant registered:
//!
//! ```text
//! Autopay-Signature: {base64_signature}
//! ```
//!
//! The signed payload embeds its own `timestamp` and `id` fields (see
//! [`crate::events::WebhookPayload`]); receivers should verify the signature
//! against the exact bytes of the body before parsing, then use
//! [`check_timestamp`] for replay protection and the event id for
//! deduplication, since delivery is at-least-once.

/// Header name for the HMAC signature.
pub const SIGNATURE_HEADER: &str = "Autopay-Signature";

/// Maximum allowed age of a webhook payload (in seconds).
pub const MAX_PAYLOAD_AGE: i64 = 5 * 60;

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("payload timestamp too old")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

/// Sign a raw webhook body, returning the `Autopay-Signature` header value.
pub fn sign(key: &[u8], body: &[u8]) -> String {
    let signature = ring::hmac::sign(&ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key), body);
    fast32::base64::RFC4648_NOPAD.encode(signature.as_ref())
}

/// Verify an `Autopay-Signature` header value against the raw request body.
pub fn verify(key: &[u8], body: &[u8], header_value: &str) -> Result<(), SignatureError> {
    let signature = fast32::base64::RFC4648_NOPAD
        .decode_str(header_value)
        .map_err(|_| SignatureError::InvalidBase64)?;
    ring::hmac::verify(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        body,
        &signature,
    )?;
    Ok(())
}

/// Check that a payload timestamp is within [`MAX_PAYLOAD_AGE`] of `now`.
pub fn check_timestamp(timestamp: i64, now: i64) -> Result<(), SignatureError> {
    if now - timestamp > MAX_PAYLOAD_AGE {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let key = b"whsec_test_secret";
        let body = br#"{"event":"charge.succeeded","data":{}}"#;
        let header = sign(key, body);
        assert!(verify(key, body, &header).is_ok());
    }

    #[test]
    fn tampered_body_fails_verification() {
        let key = b"whsec_test_secret";
        let header = sign(key, b"original body");
        assert!(matches!(
            verify(key, b"tampered body", &header),
            Err(SignatureError::SignatureMismatch)
        ));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let header = sign(b"key-a", b"body");
        assert!(verify(b"key-b", b"body", &header).is_err());
    }

    #[test]
    fn garbage_header_is_rejected() {
        assert!(matches!(
            verify(b"key", b"body", "!!not-base64!!"),
            Err(SignatureError::InvalidBase64)
        ));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        assert!(check_timestamp(1_000, 1_000 + MAX_PAYLOAD_AGE).is_ok());
        assert!(matches!(
            check_timestamp(1_000, 1_000 + MAX_PAYLOAD_AGE + 1),
            Err(SignatureError::Expired)
        ));
    }
}
