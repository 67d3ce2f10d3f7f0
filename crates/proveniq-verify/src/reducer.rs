//! The verification replay reducer.
//!
//! `reduce` folds an asset's ledger entries (ascending by sequence) into a
//! verification status record. It is pure and deterministic: same rows,
//! same `as_of`, same result. Producer-supplied "current" hashes are never
//! consulted; only the replayed claim and evidence inputs count.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use proveniq_hash::{hash_asset_state, hash_evidence_set};
use proveniq_store_core::LedgerEntry;
use proveniq_types::EventId;

/// Ruleset applied when no event carries one.
pub const DEFAULT_RULESET_VERSION: &str = "v1.0.0";

/// Confidence ceiling in basis points.
const MAX_CONFIDENCE_BPS: i64 = 10_000;

//─────────────────────────────
//  Result types
//─────────────────────────────

/// Derived verification status of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// No grant observed in the history.
    Unverified,
    /// A grant exists and the replayed state still matches it.
    VerifiedActive,
    /// The grant's expiration has passed.
    VerifiedDecayed,
    /// A later grant replaced the one under evaluation.
    Superseded,
    /// The replayed state no longer matches the granted snapshot.
    Invalidated,
    /// A freeze or dispute is active.
    Frozen,
    /// The grant was explicitly revoked.
    Revoked,
}

impl VerificationStatus {
    /// Stable wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "UNVERIFIED",
            VerificationStatus::VerifiedActive => "VERIFIED_ACTIVE",
            VerificationStatus::VerifiedDecayed => "VERIFIED_DECAYED",
            VerificationStatus::Superseded => "SUPERSEDED",
            VerificationStatus::Invalidated => "INVALIDATED",
            VerificationStatus::Frozen => "FROZEN",
            VerificationStatus::Revoked => "REVOKED",
        }
    }
}

/// Output of one replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Asset the replay covered.
    pub asset_id: String,
    /// Derived status.
    pub status: VerificationStatus,
    /// Machine-readable reason, set when the status needs one
    /// (`STATE_HASH_MISMATCH` for invalidation).
    pub reason_code: Option<String>,
    /// Ruleset the current snapshot was computed under.
    pub ruleset_version: String,
    /// Confidence figures in basis points, clamped to 0..=10000.
    pub confidences: BTreeMap<String, i64>,
    /// Latest replayed claim, if any.
    pub claim_json: Option<Value>,
    /// Replayed evidence content hashes, in attachment order.
    pub evidence_hashes: Vec<String>,
    /// Evidence-set hash recomputed from the replayed inputs.
    pub evidence_set_hash_current: String,
    /// Asset-state hash recomputed from the replayed inputs.
    pub asset_state_hash_current: String,
    /// Evidence-set hash recorded on the effective grant.
    pub granted_evidence_set_hash: Option<String>,
    /// Asset-state hash recorded on the effective grant.
    pub granted_asset_state_hash: Option<String>,
    /// The grant entry backing the current status, if any.
    pub last_verification_event_id: Option<EventId>,
    /// Entry that superseded the effective grant, if any.
    pub superseded_by_event_id: Option<EventId>,
    /// Entry that revoked verification, if any.
    pub revoked_by_event_id: Option<EventId>,
    /// Entry that froze the asset, while a freeze is active.
    pub freeze_event_id: Option<EventId>,
    /// True while a freeze or dispute is active.
    pub active_freeze: bool,
    /// Expiration carried by the effective grant, if any.
    pub grant_expires_at: Option<DateTime<Utc>>,
}

//─────────────────────────────
//  Fold state
//─────────────────────────────

#[derive(Debug, Clone)]
struct GrantState {
    event_id: EventId,
    asset_state_hash: Option<String>,
    evidence_set_hash: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    confidences: BTreeMap<String, i64>,
    superseded_by: Option<EventId>,
}

#[derive(Debug, Default)]
struct Replay {
    claim_json: Option<Value>,
    evidence_hashes: Vec<String>,
    active_freeze: bool,
    freeze_event_id: Option<EventId>,
    revoked_by_event_id: Option<EventId>,
    grant: Option<GrantState>,
    ruleset_version: Option<String>,
}

fn parse_expires_at(payload: &Value) -> Option<DateTime<Utc>> {
    // An unparseable expiration is treated as absent; proof validation has
    // its own malformed-expiration rule.
    payload
        .get("expires_at")
        .and_then(|v| v.as_str())
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn parse_confidences(payload: &Value) -> BTreeMap<String, i64> {
    let mut out = BTreeMap::new();
    if let Some(map) = payload.get("confidences").and_then(|v| v.as_object()) {
        for (name, value) in map {
            if let Some(n) = value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)) {
                out.insert(name.clone(), n.clamp(0, MAX_CONFIDENCE_BPS));
            }
        }
    }
    out
}

fn apply(replay: &mut Replay, entry: &LedgerEntry) {
    match entry.event_type.as_str() {
        "CLAIM_ADDED" | "CLAIM_UPDATED" => {
            replay.claim_json = Some(
                entry
                    .payload
                    .get("claim")
                    .cloned()
                    .unwrap_or_else(|| entry.payload.clone()),
            );
        }
        "EVIDENCE_ADDED" => {
            if let Some(hash) = entry.payload.get("content_hash").and_then(|v| v.as_str()) {
                replay.evidence_hashes.push(hash.to_string());
            }
        }
        "EVIDENCE_FROZEN" | "DISPUTE_FILED" => {
            replay.active_freeze = true;
            replay.freeze_event_id = Some(entry.id);
        }
        "FREEZE_LIFTED" | "DISPUTE_RESOLVED" => {
            replay.active_freeze = false;
            replay.freeze_event_id = None;
        }
        "VERIFICATION_REVOKED" => {
            replay.revoked_by_event_id = Some(entry.id);
        }
        "VERIFICATION_GRANTED" => {
            if let Some(previous) = replay.grant.as_mut() {
                previous.superseded_by = Some(entry.id);
            }
            let read = |field: &str| {
                entry
                    .payload
                    .get(field)
                    .and_then(|v| v.as_str())
                    .map(String::from)
            };
            let ruleset = entry.ruleset_version.clone().or_else(|| read("ruleset_version"));
            replay.grant = Some(GrantState {
                event_id: entry.id,
                asset_state_hash: entry.asset_state_hash.clone().or_else(|| read("asset_state_hash")),
                evidence_set_hash: entry
                    .evidence_set_hash
                    .clone()
                    .or_else(|| read("evidence_set_hash")),
                expires_at: parse_expires_at(&entry.payload),
                confidences: parse_confidences(&entry.payload),
                superseded_by: None,
            });
            if ruleset.is_some() {
                replay.ruleset_version = ruleset;
            }
            replay.revoked_by_event_id = None;
        }
        _ => {}
    }
}

//─────────────────────────────
//  The reducer
//─────────────────────────────

/// Replay an asset's history into a verification result.
///
/// `rows` must be the asset's ledger entries sorted ascending by sequence
/// number; entries for other assets are ignored. `as_of` is the instant
/// expiration is evaluated against.
pub fn reduce(asset_id: &str, rows: &[LedgerEntry], as_of: DateTime<Utc>) -> VerificationResult {
    let mut replay = Replay::default();
    for entry in rows {
        if entry.asset_id.as_deref() != Some(asset_id) {
            continue;
        }
        apply(&mut replay, entry);
    }

    let ruleset_version = replay
        .ruleset_version
        .clone()
        .unwrap_or_else(|| DEFAULT_RULESET_VERSION.to_string());
    let evidence_set_hash_current = hash_evidence_set(&replay.evidence_hashes);
    let claim_for_hash = replay.claim_json.clone().unwrap_or(Value::Null);
    let asset_state_hash_current =
        hash_asset_state(&claim_for_hash, &replay.evidence_hashes, &ruleset_version);

    let grant = replay.grant.as_ref();
    let granted_asset_state_hash = grant.and_then(|g| g.asset_state_hash.clone());
    let granted_evidence_set_hash = grant.and_then(|g| g.evidence_set_hash.clone());

    // Decision ladder; first match wins.
    let (status, reason_code) = if replay.revoked_by_event_id.is_some() {
        (VerificationStatus::Revoked, None)
    } else if replay.active_freeze {
        (VerificationStatus::Frozen, None)
    } else if grant.is_none() {
        (VerificationStatus::Unverified, None)
    } else if grant.and_then(|g| g.superseded_by).is_some() {
        (VerificationStatus::Superseded, None)
    } else if granted_asset_state_hash.as_deref() != Some(asset_state_hash_current.as_str())
        || granted_evidence_set_hash.as_deref() != Some(evidence_set_hash_current.as_str())
    {
        (
            VerificationStatus::Invalidated,
            Some("STATE_HASH_MISMATCH".to_string()),
        )
    } else if grant
        .and_then(|g| g.expires_at)
        .map_or(false, |expires| as_of > expires)
    {
        (VerificationStatus::VerifiedDecayed, None)
    } else {
        (VerificationStatus::VerifiedActive, None)
    };

    VerificationResult {
        asset_id: asset_id.to_string(),
        status,
        reason_code,
        ruleset_version,
        confidences: grant.map(|g| g.confidences.clone()).unwrap_or_default(),
        claim_json: replay.claim_json,
        evidence_hashes: replay.evidence_hashes,
        evidence_set_hash_current,
        asset_state_hash_current,
        granted_evidence_set_hash,
        granted_asset_state_hash,
        last_verification_event_id: grant.map(|g| g.event_id),
        superseded_by_event_id: grant.and_then(|g| g.superseded_by),
        revoked_by_event_id: replay.revoked_by_event_id,
        freeze_event_id: replay.freeze_event_id,
        active_freeze: replay.active_freeze,
        grant_expires_at: grant.and_then(|g| g.expires_at),
    }
}
