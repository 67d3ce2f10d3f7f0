//! Projection rules from ledger entries to derived rows.
//!
//! Shared between the append engine (write-time projection) and the full
//! read-model rebuild, so both paths derive identical rows from the same
//! entry.

use serde_json::json;
use uuid::Uuid;

use proveniq_store_core::{EvidenceSnapshot, LedgerEntry, ProofView};

/// Derive the evidence snapshot an `EVIDENCE_ADDED` entry projects, if it
/// carries enough to project one (an asset subject and a content hash).
pub fn evidence_snapshot(entry: &LedgerEntry) -> Option<EvidenceSnapshot> {
    if entry.event_type != "EVIDENCE_ADDED" {
        return None;
    }
    let asset_id = entry.asset_id.clone()?;
    let content_hash = entry
        .payload
        .get("content_hash")
        .and_then(|v| v.as_str())
        .map(String::from)?;
    let evidence_id = entry
        .payload
        .get("evidence_id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| content_hash.clone());
    Some(EvidenceSnapshot {
        asset_id,
        evidence_id,
        content_hash,
        storage_ref: entry
            .payload
            .get("storage_ref")
            .and_then(|v| v.as_str())
            .map(String::from),
        metadata: entry
            .payload
            .get("metadata")
            .cloned()
            .unwrap_or_else(|| json!({})),
        created_at: entry.created_at,
    })
}

/// Reconstruct the proof-view row a `PROOF_VIEW_CREATED` entry describes.
/// Used by the read-model rebuild; issuance writes the row directly.
pub fn proof_view_from_event(entry: &LedgerEntry) -> Option<ProofView> {
    if entry.event_type != "PROOF_VIEW_CREATED" {
        return None;
    }
    let payload = &entry.payload;
    let field = |name: &str| payload.get(name).and_then(|v| v.as_str()).map(String::from);

    let proof_id = Uuid::parse_str(&field("proof_id")?).ok()?;
    let verification_event_id = Uuid::parse_str(&field("verification_event_id")?).ok()?;
    Some(ProofView {
        proof_id,
        asset_id: field("asset_id").or_else(|| entry.asset_id.clone())?,
        verification_event_id,
        snapshot_hash: field("snapshot_hash")?,
        asset_state_hash: field("asset_state_hash")?,
        evidence_set_hash: field("evidence_set_hash")?,
        ruleset_version: field("ruleset_version").unwrap_or_else(|| "v1.0.0".into()),
        expires_at: field("expires_at")
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(&raw).ok())
            .map(|t| t.with_timezone(&chrono::Utc)),
        revoked_at: None,
        created_by: field("created_by"),
        scope: field("scope"),
        created_at: entry.created_at,
    })
}

/// Extract the proof id a `PROOF_VIEW_REVOKED` entry targets.
pub fn revoked_proof_id(entry: &LedgerEntry) -> Option<Uuid> {
    if entry.event_type != "PROOF_VIEW_REVOKED" {
        return None;
    }
    entry
        .payload
        .get("proof_id")
        .and_then(|v| v.as_str())
        .and_then(|raw| Uuid::parse_str(raw).ok())
}
