//! Persisted row types.
//!
//! `LedgerEntry` is the source of truth; everything else in this module is
//! either a derived read model (rebuildable from the ledger) or webhook
//! delivery bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use proveniq_types::{EventId, SequenceNumber};

//─────────────────────────────
//  Ledger entries
//─────────────────────────────

/// A committed, immutable ledger entry.
///
/// Written exclusively by the append engine and never updated or deleted.
/// `previous_hash` is `None` only for sequence 1; `created_at` is truncated
/// to the millisecond so its RFC 3339 rendering (part of the hash domain)
/// round-trips bit-exactly through storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Opaque unique identifier.
    pub id: EventId,
    /// Strictly monotonic, gapless position in the chain. Starts at 1.
    pub sequence_number: SequenceNumber,
    /// Canonical event type.
    pub event_type: String,
    /// Envelope schema version active at commit time.
    pub schema_version: String,
    /// Origin domain.
    pub source: String,
    /// Producer identity.
    pub producer: String,
    /// Correlation identifier, if supplied.
    pub correlation_id: Option<String>,
    /// Acting principal, if supplied.
    pub actor_id: Option<String>,
    /// Asset subject, if supplied.
    pub asset_id: Option<String>,
    /// Anchor subject, if supplied.
    pub anchor_id: Option<String>,
    /// Opaque JSON payload.
    pub payload: Value,
    /// SHA-256 of the canonical payload serialization.
    pub payload_hash: String,
    /// `entry_hash` of the predecessor; `None` for the genesis entry.
    pub previous_hash: Option<String>,
    /// Chained SHA-256 over payload hash, predecessor, source, type, time.
    pub entry_hash: String,
    /// Materialized asset-state hash for verification-relevant events.
    pub asset_state_hash: Option<String>,
    /// Materialized evidence-set hash for verification-relevant events.
    pub evidence_set_hash: Option<String>,
    /// Ruleset version projected from the payload, when present.
    pub ruleset_version: Option<String>,
    /// Commit wall-clock time; part of the hash domain.
    pub created_at: DateTime<Utc>,
    /// Producer-supplied retry-safety key, unique across the ledger.
    pub idempotency_key: String,
}

/// Query filter for `GET /events`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Match a single canonical event type.
    pub event_type: Option<String>,
    /// Match a single origin domain.
    pub source: Option<String>,
    /// Match a correlation identifier.
    pub correlation_id: Option<String>,
    /// Match an asset subject.
    pub asset_id: Option<String>,
    /// Match an anchor subject.
    pub anchor_id: Option<String>,
    /// Only entries with a sequence number at or above this value.
    pub from_sequence: Option<SequenceNumber>,
    /// Page size; the HTTP layer caps this.
    pub limit: u32,
    /// Page offset.
    pub offset: u64,
}

/// Aggregate chain counters for `GET /stats` and `/health`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Total committed entries.
    pub total_entries: u64,
    /// Sequence number of the chain head, if any entries exist.
    pub head_sequence: Option<SequenceNumber>,
    /// Entry hash of the chain head.
    pub head_entry_hash: Option<String>,
    /// Commit time of the chain head.
    pub last_created_at: Option<DateTime<Utc>>,
}

//─────────────────────────────
//  Derived read models
//─────────────────────────────

/// Materialized projection of one `EVIDENCE_ADDED` event. Rebuildable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSnapshot {
    /// Asset the evidence attaches to.
    pub asset_id: String,
    /// Evidence identifier from the payload.
    pub evidence_id: String,
    /// Content hash of the evidence blob.
    pub content_hash: String,
    /// Pointer into external storage, if any.
    pub storage_ref: Option<String>,
    /// Free-form evidence metadata.
    pub metadata: Value,
    /// Commit time of the projecting event.
    pub created_at: DateTime<Utc>,
}

/// A time-bound, snapshot-bound statement that an asset was verified.
/// Inserted on `PROOF_VIEW_CREATED`, revoked on `PROOF_VIEW_REVOKED`,
/// otherwise immutable. Rebuildable from those events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofView {
    /// Proof identifier.
    pub proof_id: Uuid,
    /// Asset the proof covers.
    pub asset_id: String,
    /// The `VERIFICATION_GRANTED` entry this proof is bound to.
    pub verification_event_id: EventId,
    /// Hash of `{asset_state_hash, evidence_set_hash}` at issuance.
    pub snapshot_hash: String,
    /// Asset-state hash recorded at issuance.
    pub asset_state_hash: String,
    /// Evidence-set hash recorded at issuance.
    pub evidence_set_hash: String,
    /// Ruleset version recorded at issuance.
    pub ruleset_version: String,
    /// Expiration instant; a proof without one never validates.
    pub expires_at: Option<DateTime<Utc>>,
    /// Revocation instant, if revoked.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Issuing principal, if recorded.
    pub created_by: Option<String>,
    /// Scope label restricting what the proof attests to.
    pub scope: Option<String>,
    /// Issuance time.
    pub created_at: DateTime<Utc>,
}

/// Per-asset cached verification status. Rebuildable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationCacheRow {
    /// Asset identifier.
    pub asset_id: String,
    /// Derived status symbol, e.g. `VERIFIED_ACTIVE`.
    pub status: String,
    /// Confidence figures in basis points, as a JSON object.
    pub confidences: Value,
    /// The grant entry backing the current status, if any.
    pub last_verification_event_id: Option<EventId>,
    /// True while a freeze or dispute is active.
    pub active_freeze: bool,
    /// Ruleset version the status was derived under.
    pub ruleset_version: String,
    /// Refresh time.
    pub updated_at: DateTime<Utc>,
}

/// Periodic integrity checkpoint recorded after a verification pass that
/// reached the chain head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityCheckpoint {
    /// Checkpoint identifier.
    pub id: Uuid,
    /// Sequence number of the verified head.
    pub checkpoint_sequence: SequenceNumber,
    /// Entry hash of the verified head.
    pub checkpoint_hash: String,
    /// Number of entries covered by the pass.
    pub entries_count: u64,
    /// When the pass completed.
    pub verified_at: DateTime<Utc>,
}

/// Append-time audit record: alias normalization, advisory hash
/// disagreements, operator actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Ledger entry the record refers to, if any.
    pub event_id: Option<EventId>,
    /// Machine-readable action symbol, e.g. `ALIAS_NORMALIZED`.
    pub action: String,
    /// Structured detail.
    pub detail: Value,
    /// Record time.
    pub created_at: DateTime<Utc>,
}

//─────────────────────────────
//  Webhook bookkeeping
//─────────────────────────────

/// A registered webhook subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription identifier.
    pub id: Uuid,
    /// Owning subscriber.
    pub subscriber_id: String,
    /// Delivery endpoint.
    pub webhook_url: String,
    /// Event types to deliver; empty means all.
    pub event_types: Vec<String>,
    /// Origin domains to deliver; empty means all.
    pub source_filter: Vec<String>,
    /// Shared HMAC secret for payload signing.
    pub secret: String,
    /// Inactive subscriptions match nothing.
    pub active: bool,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether a committed event should be fanned out to this subscription.
    pub fn matches(&self, event_type: &str, source: &str) -> bool {
        self.active
            && (self.event_types.is_empty()
                || self.event_types.iter().any(|t| t == event_type))
            && (self.source_filter.is_empty()
                || self.source_filter.iter().any(|s| s == source))
    }
}

/// Delivery lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for its `next_retry_at` to pass.
    Pending,
    /// Endpoint acknowledged with a 2xx.
    Delivered,
    /// Marked failed outside the retry loop (diagnostic states).
    Failed,
    /// Retries exhausted; a dead-letter row exists.
    DeadLetter,
}

impl DeliveryStatus {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::DeadLetter => "dead_letter",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            "dead_letter" => Some(DeliveryStatus::DeadLetter),
            _ => None,
        }
    }
}

/// One at-least-once delivery attempt stream for (subscription, event).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    /// Delivery identifier.
    pub id: Uuid,
    /// Target subscription.
    pub subscription_id: Uuid,
    /// Ledger entry being delivered.
    pub event_id: EventId,
    /// Lifecycle state.
    pub status: DeliveryStatus,
    /// Completed attempt count.
    pub attempts: u32,
    /// Time of the most recent attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest time the next attempt may run.
    pub next_retry_at: DateTime<Utc>,
    /// Worker claim timestamp; stale claims are reclaimed.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Diagnostic from the most recent failure.
    pub last_error: Option<String>,
    /// HTTP status of the most recent response, if any.
    pub response_status: Option<u16>,
    /// Response body prefix (at most 1000 bytes).
    pub response_body: Option<String>,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
}

/// Terminal record for a delivery that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Dead-letter identifier.
    pub id: Uuid,
    /// The exhausted delivery.
    pub delivery_id: Uuid,
    /// Target subscription.
    pub subscription_id: Uuid,
    /// Ledger entry that failed to deliver.
    pub event_id: EventId,
    /// Snapshot of the event as it would have been delivered.
    pub event_snapshot: Value,
    /// Last failure diagnostic.
    pub failure_reason: String,
    /// Dead-letter time.
    pub created_at: DateTime<Utc>,
}

/// Aggregate delivery counters for `GET /webhooks/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Deliveries waiting or between retries.
    pub pending: u64,
    /// Acknowledged deliveries.
    pub delivered: u64,
    /// Diagnostically failed deliveries.
    pub failed: u64,
    /// Dead-lettered deliveries.
    pub dead_letter: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(event_types: Vec<&str>, sources: Vec<&str>, active: bool) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            subscriber_id: "sub-1".into(),
            webhook_url: "https://example.test/hook".into(),
            event_types: event_types.into_iter().map(String::from).collect(),
            source_filter: sources.into_iter().map(String::from).collect(),
            secret: "s3cr3t".into(),
            active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_filters_match_everything() {
        let s = subscription(vec![], vec![], true);
        assert!(s.matches("HOME_PHOTO_ADDED", "home"));
        assert!(s.matches("VERIFICATION_GRANTED", "verification"));
    }

    #[test]
    fn filters_restrict_matching() {
        let s = subscription(vec!["EVIDENCE_ADDED"], vec!["home"], true);
        assert!(s.matches("EVIDENCE_ADDED", "home"));
        assert!(!s.matches("EVIDENCE_ADDED", "service"));
        assert!(!s.matches("CLAIM_ADDED", "home"));
    }

    #[test]
    fn inactive_subscriptions_never_match() {
        let s = subscription(vec![], vec![], false);
        assert!(!s.matches("HOME_PHOTO_ADDED", "home"));
    }

    #[test]
    fn delivery_status_round_trips() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
            DeliveryStatus::DeadLetter,
        ] {
            assert_eq!(DeliveryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DeliveryStatus::parse("bogus"), None);
    }
}
