//! Verification cache refresh and full read-model rebuild.
//!
//! The cache row is a convenience copy of the reducer's output; the
//! rebuild truncates every derived table and replays the whole ledger,
//! which is also how the "derived rows equal reducer output" property is
//! checked in anger.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use proveniq_ledger::projection;
use proveniq_store_core::prelude::*;
use proveniq_types::taxonomy;

use crate::reducer::reduce;

/// Rows examined per rebuild batch.
const REBUILD_BATCH: u32 = 1000;

/// Re-derive and upsert the cache row for one asset.
pub async fn refresh_verification_cache<S>(
    store: &S,
    asset_id: &str,
) -> Result<VerificationCacheRow, StoreError>
where
    S: Store + ?Sized,
{
    let rows = store.entries_for_asset(asset_id, None, 0).await?;
    let result = reduce(asset_id, &rows, Utc::now());
    let row = VerificationCacheRow {
        asset_id: asset_id.to_string(),
        status: result.status.as_str().to_string(),
        confidences: json!(result.confidences),
        last_verification_event_id: result.last_verification_event_id,
        active_freeze: result.active_freeze,
        ruleset_version: result.ruleset_version,
        updated_at: Utc::now(),
    };
    store.upsert_verification_cache(&row).await?;
    Ok(row)
}

/// Outcome of a full read-model rebuild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebuildReport {
    /// Ledger entries replayed.
    pub entries_replayed: u64,
    /// Evidence snapshots re-projected.
    pub evidence_snapshots: u64,
    /// Proof views re-inserted.
    pub proof_views: u64,
    /// Proof views re-revoked.
    pub proofs_revoked: u64,
    /// Verification cache rows refreshed.
    pub assets_refreshed: u64,
}

/// Truncate all derived tables and rebuild them from the ledger.
pub async fn rebuild_read_models<S>(store: &S) -> Result<RebuildReport, StoreError>
where
    S: Store + ?Sized,
{
    store.truncate_derived().await?;

    let mut report = RebuildReport::default();
    let mut assets: BTreeSet<String> = BTreeSet::new();
    let mut from = 1u64;

    loop {
        let batch = store.entries_in_range(from, None, REBUILD_BATCH).await?;
        if batch.is_empty() {
            break;
        }
        for entry in &batch {
            report.entries_replayed += 1;

            if let Some(snapshot) = projection::evidence_snapshot(entry) {
                store.upsert_evidence_snapshot(&snapshot).await?;
                report.evidence_snapshots += 1;
            }
            if let Some(proof) = projection::proof_view_from_event(entry) {
                store.insert_proof(&proof).await?;
                report.proof_views += 1;
            }
            if let Some(proof_id) = projection::revoked_proof_id(entry) {
                if store.revoke_proof(&proof_id, entry.created_at).await? {
                    report.proofs_revoked += 1;
                } else {
                    warn!(%proof_id, "revocation event for unknown proof during rebuild");
                }
            }
            if taxonomy::is_verification_relevant(&entry.event_type) {
                if let Some(asset_id) = &entry.asset_id {
                    assets.insert(asset_id.clone());
                }
            }
        }
        // Dense sequence numbers, so the next batch starts right after.
        from = batch
            .last()
            .map(|e| e.sequence_number + 1)
            .unwrap_or(from + REBUILD_BATCH as u64);
    }

    for asset_id in &assets {
        refresh_verification_cache(store, asset_id).await?;
        report.assets_refreshed += 1;
    }

    info!(
        entries = report.entries_replayed,
        assets = report.assets_refreshed,
        "read-model rebuild finished"
    );
    Ok(report)
}
