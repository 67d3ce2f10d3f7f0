#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **proveniq-hash** – Deterministic SHA-256 hashing for the Proveniq chain.
//!
//! Four named hashes make up the ledger's hash domain: the payload hash,
//! the chained entry hash, the evidence-set hash and the asset-state hash.
//! All four are pure functions of their inputs and must match across
//! implementations bit-exactly; misordered keys or a reformatted timestamp
//! are breaking bugs, not cosmetic ones.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

mod canonical;

pub use canonical::canonical_json;

/// Literal substituted for the previous hash when hashing the first entry.
pub const GENESIS: &str = "GENESIS";

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash of a payload's canonical serialization.
pub fn hash_payload(payload: &Value) -> String {
    sha256_hex(canonical_json(payload).as_bytes())
}

/// Chained entry hash.
///
/// The domain is the five values joined by the byte `|`, with the literal
/// [`GENESIS`] substituted when `previous_hash` is absent. `created_at` is
/// the exact timestamp string stored with the row (see
/// [`timestamp_string`]); feeding a reformatted variant breaks the chain.
pub fn hash_entry(
    payload_hash: &str,
    previous_hash: Option<&str>,
    source: &str,
    event_type: &str,
    created_at: &str,
) -> String {
    let previous = previous_hash.unwrap_or(GENESIS);
    let joined = [payload_hash, previous, source, event_type, created_at].join("|");
    sha256_hex(joined.as_bytes())
}

/// Hash of an evidence set: the content hashes sorted, then joined by `|`.
/// Sorting makes the digest insensitive to attachment order.
pub fn hash_evidence_set(content_hashes: &[String]) -> String {
    let mut sorted: Vec<&str> = content_hashes.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sha256_hex(sorted.join("|").as_bytes())
}

/// Hash of an asset's verification-relevant state.
///
/// Canonical hash of the object `{claim_json, evidence_hashes,
/// ruleset_version}`. Evidence hashes are sorted first so grant-time and
/// replay-time computations agree regardless of accumulation order.
pub fn hash_asset_state(claim_json: &Value, evidence_hashes: &[String], ruleset_version: &str) -> String {
    let mut sorted = evidence_hashes.to_vec();
    sorted.sort_unstable();
    let state = serde_json::json!({
        "claim_json": claim_json,
        "evidence_hashes": sorted,
        "ruleset_version": ruleset_version,
    });
    hash_payload(&state)
}

/// The timestamp rendering committed to by the hash domain: RFC 3339 UTC
/// with exactly millisecond precision and a `Z` suffix.
pub fn timestamp_string(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn payload_hash_is_insensitive_to_key_order() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":{"b":2,"a":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":{"a":3,"b":2},"x":1}"#).unwrap();
        assert_eq!(hash_payload(&a), hash_payload(&b));
    }

    #[test]
    fn payload_hash_is_sensitive_to_any_value_change() {
        let a = json!({"x": 1});
        let b = json!({"x": 2});
        let c = json!({"x": "1"});
        assert_ne!(hash_payload(&a), hash_payload(&b));
        assert_ne!(hash_payload(&a), hash_payload(&c));
    }

    #[test]
    fn genesis_entry_hashes_the_literal_sentinel() {
        let payload_hash = hash_payload(&json!({"asset_id": "A"}));
        let ts = "2026-08-01T12:00:00.000Z";
        let expected = sha256_hex(
            format!("{payload_hash}|GENESIS|home|HOME_ASSET_REGISTERED|{ts}").as_bytes(),
        );
        assert_eq!(
            hash_entry(&payload_hash, None, "home", "HOME_ASSET_REGISTERED", ts),
            expected
        );
    }

    #[test]
    fn entry_hash_links_to_previous() {
        let ph = hash_payload(&json!({"p": 1}));
        let first = hash_entry(&ph, None, "home", "HOME_PHOTO_ADDED", "t1");
        let second = hash_entry(&ph, Some(&first), "home", "HOME_PHOTO_ADDED", "t1");
        assert_ne!(first, second);
        // Same inputs recompute identically.
        assert_eq!(
            second,
            hash_entry(&ph, Some(&first), "home", "HOME_PHOTO_ADDED", "t1")
        );
    }

    #[test]
    fn evidence_set_hash_is_order_insensitive() {
        let a = vec!["h2".to_string(), "h1".to_string()];
        let b = vec!["h1".to_string(), "h2".to_string()];
        assert_eq!(hash_evidence_set(&a), hash_evidence_set(&b));
        assert_ne!(hash_evidence_set(&a), hash_evidence_set(&b[..1].to_vec()));
    }

    #[test]
    fn asset_state_hash_commits_to_all_three_inputs() {
        let claim = json!({"v": 1});
        let evidence = vec!["h1".to_string()];
        let base = hash_asset_state(&claim, &evidence, "v1.0.0");
        assert_ne!(base, hash_asset_state(&json!({"v": 2}), &evidence, "v1.0.0"));
        assert_ne!(
            base,
            hash_asset_state(&claim, &["h1".to_string(), "h2".to_string()], "v1.0.0")
        );
        assert_ne!(base, hash_asset_state(&claim, &evidence, "v2.0.0"));
    }

    #[test]
    fn timestamp_rendering_is_millisecond_z() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        assert_eq!(timestamp_string(&ts), "2026-08-01T12:00:00.000Z");
    }
}
