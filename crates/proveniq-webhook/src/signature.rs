//! Webhook payload signing.
//!
//! HMAC-SHA256 over `"{timestamp}.{body}"` with the subscription's shared
//! secret, rendered as lowercase hex. Binding the timestamp into the
//! signed bytes lets receivers reject replayed posts without parsing the
//! body.

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Header carrying the hex HMAC-SHA256 signature.
pub const SIGNATURE_HEADER: &str = "X-Proveniq-Signature";
/// Header carrying the unix-seconds timestamp the signature binds.
pub const TIMESTAMP_HEADER: &str = "X-Proveniq-Timestamp";
/// Header carrying the target subscription id.
pub const SUBSCRIPTION_HEADER: &str = "X-Proveniq-Subscription-Id";

type HmacSha256 = Hmac<Sha256>;

/// Sign a delivery body.
pub fn sign_payload(secret: &str, timestamp: &str, body: &str) -> String {
    // HMAC-SHA256 accepts keys of any length, so construction cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac-sha256 accepts keys of any length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Receiver-side check. Comparison walks the full length regardless of
/// where the first difference is.
pub fn verify_signature(secret: &str, timestamp: &str, body: &str, signature_hex: &str) -> bool {
    let expected = sign_payload(secret, timestamp, body);
    if expected.len() != signature_hex.len() {
        return false;
    }
    expected
        .bytes()
        .zip(signature_hex.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_deterministic() {
        let a = sign_payload("secret", "1700000000", r#"{"event_id":"e"}"#);
        let b = sign_payload("secret", "1700000000", r#"{"event_id":"e"}"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn signature_binds_secret_timestamp_and_body() {
        let base = sign_payload("secret", "1700000000", "body");
        assert_ne!(base, sign_payload("other", "1700000000", "body"));
        assert_ne!(base, sign_payload("secret", "1700000001", "body"));
        assert_ne!(base, sign_payload("secret", "1700000000", "body2"));
    }

    #[test]
    fn verify_accepts_good_and_rejects_bad() {
        let sig = sign_payload("secret", "1700000000", "body");
        assert!(verify_signature("secret", "1700000000", "body", &sig));
        assert!(!verify_signature("secret", "1700000000", "tampered", &sig));
        assert!(!verify_signature("secret", "1700000000", "body", "deadbeef"));
    }
}
