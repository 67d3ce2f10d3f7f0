//! Chain integrity verification.
//!
//! Walks a window of the chain in order, recomputing the payload hash,
//! the entry hash and the previous-hash link for every entry. Failures
//! are reported, never repaired: a chain that does not recompute is
//! evidence of tampering and requires operator intervention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use proveniq_hash::{hash_entry, hash_payload, timestamp_string};
use proveniq_store_core::prelude::*;
use proveniq_types::SequenceNumber;

/// Outcome of one verification pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// True when every checked entry recomputed cleanly.
    pub valid: bool,
    /// Number of entries examined.
    pub entries_checked: u64,
    /// First sequence number examined, if any.
    pub first_sequence: Option<SequenceNumber>,
    /// Last sequence number examined, if any.
    pub last_sequence: Option<SequenceNumber>,
    /// Human-readable descriptions of every violation found.
    pub errors: Vec<String>,
    /// When the pass completed.
    pub verified_at: DateTime<Utc>,
}

/// Recompute hashes and chain links for entries in `[from, to]`.
///
/// `to = None` runs to the head; `limit` bounds the number of rows
/// examined regardless. When `from > 1` the predecessor entry is loaded
/// so the first link can still be checked.
pub async fn verify_range<S>(
    store: &S,
    from: SequenceNumber,
    to: Option<SequenceNumber>,
    limit: u32,
) -> Result<IntegrityReport, StoreError>
where
    S: LedgerStore + ?Sized,
{
    let from = from.max(1);
    let entries = store.entries_in_range(from, to, limit).await?;
    let mut errors = Vec::new();

    let mut previous_hash: Option<String> = if from > 1 {
        match store.entry_at_sequence(from - 1).await? {
            Some(predecessor) => Some(predecessor.entry_hash),
            None => {
                errors.push(format!("predecessor entry {} is missing", from - 1));
                None
            }
        }
    } else {
        None
    };
    let mut previous_sequence = from - 1;

    for entry in &entries {
        let sequence = entry.sequence_number;

        if sequence != previous_sequence + 1 {
            errors.push(format!(
                "sequence gap: entry {sequence} follows {previous_sequence}"
            ));
        }

        let recomputed_payload = hash_payload(&entry.payload);
        if recomputed_payload != entry.payload_hash {
            errors.push(format!(
                "entry {sequence}: payload hash mismatch (stored {}, recomputed {recomputed_payload})",
                entry.payload_hash
            ));
        }

        match (&entry.previous_hash, &previous_hash) {
            (None, None) if sequence == 1 => {}
            (Some(stored), Some(expected)) if stored == expected => {}
            (stored, expected) => {
                // A broken link on the first row of a window with a missing
                // predecessor was already reported above.
                if !(from > 1 && sequence == from && expected.is_none()) {
                    errors.push(format!(
                        "entry {sequence}: chain link mismatch (stored {stored:?}, expected {expected:?})"
                    ));
                }
            }
        }

        let recomputed_entry = hash_entry(
            &entry.payload_hash,
            entry.previous_hash.as_deref(),
            &entry.source,
            &entry.event_type,
            &timestamp_string(&entry.created_at),
        );
        if recomputed_entry != entry.entry_hash {
            errors.push(format!(
                "entry {sequence}: entry hash mismatch (stored {}, recomputed {recomputed_entry})",
                entry.entry_hash
            ));
        }

        previous_hash = Some(entry.entry_hash.clone());
        previous_sequence = sequence;
    }

    let report = IntegrityReport {
        valid: errors.is_empty(),
        entries_checked: entries.len() as u64,
        first_sequence: entries.first().map(|e| e.sequence_number),
        last_sequence: entries.last().map(|e| e.sequence_number),
        errors,
        verified_at: Utc::now(),
    };
    info!(
        entries_checked = report.entries_checked,
        valid = report.valid,
        "integrity verification pass finished"
    );
    Ok(report)
}

/// Record an integrity checkpoint when a valid pass reached the current
/// chain head. Returns the checkpoint, or `None` when the pass did not
/// qualify.
pub async fn record_checkpoint_if_head<S>(
    store: &S,
    report: &IntegrityReport,
) -> Result<Option<IntegrityCheckpoint>, StoreError>
where
    S: LedgerStore + CheckpointStore + ?Sized,
{
    if !report.valid {
        return Ok(None);
    }
    let Some(last_sequence) = report.last_sequence else {
        return Ok(None);
    };
    let Some(head) = store.head().await? else {
        return Ok(None);
    };
    if head.sequence_number != last_sequence {
        return Ok(None);
    }

    let checkpoint = IntegrityCheckpoint {
        id: Uuid::new_v4(),
        checkpoint_sequence: head.sequence_number,
        checkpoint_hash: head.entry_hash,
        entries_count: report.entries_checked,
        verified_at: report.verified_at,
    };
    store.insert_checkpoint(&checkpoint).await?;
    Ok(Some(checkpoint))
}
