//! Storage trait contracts.
//!
//! Drivers implement the focused traits below; the blanket [`Store`]
//! supertrait is what the engine, reducer and worker take as a bound.
//! Every method is async and returns [`StoreError`] so drivers can surface
//! typed conflicts (idempotency, subscription uniqueness) that callers
//! handle semantically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use proveniq_types::{EventId, SequenceNumber};

use crate::rows::*;
use crate::StoreError;

/// How long a worker claim on a delivery stays valid. Claims older than
/// this are considered abandoned (worker crash) and become claimable again.
pub const CLAIM_TIMEOUT_SECS: i64 = 300;

//─────────────────────────────
//  Ledger
//─────────────────────────────

/// Append-only access to the chain itself.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a fully computed entry, atomically inserting pending
    /// webhook deliveries for every matching active subscription.
    ///
    /// Must fail with [`StoreError::DuplicateIdempotencyKey`] when the
    /// idempotency key is already committed and with
    /// [`StoreError::WriteConflict`] when the sequence number is taken.
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError>;

    /// The entry with the maximum sequence number, if any.
    async fn head(&self) -> Result<Option<LedgerEntry>, StoreError>;

    /// Fetch by entry identifier.
    async fn entry_by_id(&self, id: &EventId) -> Result<Option<LedgerEntry>, StoreError>;

    /// Fetch by idempotency key.
    async fn entry_by_idempotency_key(&self, key: &str)
        -> Result<Option<LedgerEntry>, StoreError>;

    /// Fetch by chain position.
    async fn entry_at_sequence(
        &self,
        sequence: SequenceNumber,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// Entries with `from <= sequence_number <= to`, ascending, at most
    /// `limit` rows. `to = None` means up to the head.
    async fn entries_in_range(
        &self,
        from: SequenceNumber,
        to: Option<SequenceNumber>,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// All entries for an asset, ascending by sequence. `limit = None`
    /// returns the full history (the replay reducer needs every row).
    async fn entries_for_asset(
        &self,
        asset_id: &str,
        limit: Option<u32>,
        offset: u64,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// All entries for an anchor, ascending by sequence.
    async fn entries_for_anchor(
        &self,
        anchor_id: &str,
        limit: Option<u32>,
        offset: u64,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Filtered page of entries, ascending by sequence.
    async fn entries_filtered(&self, filter: &EventFilter)
        -> Result<Vec<LedgerEntry>, StoreError>;

    /// Aggregate chain counters.
    async fn stats(&self) -> Result<LedgerStats, StoreError>;
}

//─────────────────────────────
//  Subscriptions
//─────────────────────────────

/// Webhook subscription registry.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Register a subscription. Fails with
    /// [`StoreError::SubscriptionExists`] on a (subscriber_id, webhook_url)
    /// collision.
    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), StoreError>;

    /// Fetch by identifier.
    async fn subscription(&self, id: &Uuid) -> Result<Option<Subscription>, StoreError>;

    /// All subscriptions, newest first.
    async fn subscriptions(&self) -> Result<Vec<Subscription>, StoreError>;

    /// Remove a subscription. Returns false when it did not exist.
    async fn delete_subscription(&self, id: &Uuid) -> Result<bool, StoreError>;
}

//─────────────────────────────
//  Deliveries
//─────────────────────────────

/// Webhook delivery queue and dead-letter store.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Atomically claim up to `limit` due pending deliveries (oldest
    /// first). A claimed delivery is invisible to other workers until its
    /// claim expires ([`CLAIM_TIMEOUT_SECS`]) or it is marked terminal.
    async fn claim_due_deliveries(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, StoreError>;

    /// Record a 2xx acknowledgement.
    async fn mark_delivered(
        &self,
        id: &Uuid,
        response_status: u16,
        response_body: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt and schedule the next one.
    #[allow(clippy::too_many_arguments)]
    async fn mark_retry(
        &self,
        id: &Uuid,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
        response_status: Option<u16>,
        response_body: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Move a delivery to `dead_letter` after exhausted retries.
    async fn mark_dead_letter(
        &self,
        id: &Uuid,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Insert the terminal dead-letter record.
    async fn insert_dead_letter(&self, dead_letter: &DeadLetter) -> Result<(), StoreError>;

    /// Fetch a delivery by identifier.
    async fn delivery(&self, id: &Uuid) -> Result<Option<WebhookDelivery>, StoreError>;

    /// Page of dead letters, newest first.
    async fn dead_letters(&self, limit: u32, offset: u64) -> Result<Vec<DeadLetter>, StoreError>;

    /// Fetch a dead letter by identifier.
    async fn dead_letter(&self, id: &Uuid) -> Result<Option<DeadLetter>, StoreError>;

    /// Requeue a dead-lettered delivery: reset it to pending with zero
    /// attempts and drop the dead-letter row. Returns the refreshed
    /// delivery, or `None` when no such dead letter exists.
    async fn requeue_dead_letter(
        &self,
        dead_letter_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookDelivery>, StoreError>;

    /// Aggregate delivery counters.
    async fn delivery_stats(&self) -> Result<DeliveryStats, StoreError>;
}

//─────────────────────────────
//  Proof views
//─────────────────────────────

/// Proof-view rows.
#[async_trait]
pub trait ProofViewStore: Send + Sync {
    /// Insert an issued proof.
    async fn insert_proof(&self, proof: &ProofView) -> Result<(), StoreError>;

    /// Fetch by proof identifier.
    async fn proof(&self, proof_id: &Uuid) -> Result<Option<ProofView>, StoreError>;

    /// Flip `revoked_at`. Returns false when the proof does not exist.
    async fn revoke_proof(&self, proof_id: &Uuid, revoked_at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// All proofs for an asset, newest first.
    async fn proofs_for_asset(&self, asset_id: &str) -> Result<Vec<ProofView>, StoreError>;
}

//─────────────────────────────
//  Projections
//─────────────────────────────

/// Derived read models: evidence snapshots and the verification cache.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Upsert one evidence snapshot (keyed by asset_id + evidence_id).
    async fn upsert_evidence_snapshot(&self, snapshot: &EvidenceSnapshot)
        -> Result<(), StoreError>;

    /// All evidence snapshots for an asset, ascending by creation time.
    async fn evidence_for_asset(&self, asset_id: &str)
        -> Result<Vec<EvidenceSnapshot>, StoreError>;

    /// Upsert the per-asset verification cache row.
    async fn upsert_verification_cache(&self, row: &VerificationCacheRow)
        -> Result<(), StoreError>;

    /// Fetch the cached verification status for an asset.
    async fn verification_cache(&self, asset_id: &str)
        -> Result<Option<VerificationCacheRow>, StoreError>;

    /// Truncate every derived table (evidence snapshots, verification
    /// cache, proof views) ahead of a full rebuild from the ledger.
    async fn truncate_derived(&self) -> Result<(), StoreError>;
}

//─────────────────────────────
//  Audit and checkpoints
//─────────────────────────────

/// Append-time audit trail.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Record an audit entry.
    async fn record_audit(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Page of audit records, newest first.
    async fn audit_log(&self, limit: u32, offset: u64) -> Result<Vec<AuditRecord>, StoreError>;
}

/// Integrity checkpoint history.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Record a checkpoint.
    async fn insert_checkpoint(&self, checkpoint: &IntegrityCheckpoint)
        -> Result<(), StoreError>;

    /// The most recent checkpoint, if any.
    async fn latest_checkpoint(&self) -> Result<Option<IntegrityCheckpoint>, StoreError>;
}

//─────────────────────────────
//  Blanket supertrait
//─────────────────────────────

/// Everything a full driver provides. Implemented automatically for any
/// type that implements the focused traits.
pub trait Store:
    LedgerStore
    + SubscriptionStore
    + DeliveryStore
    + ProofViewStore
    + ProjectionStore
    + AuditStore
    + CheckpointStore
{
}

impl<T> Store for T where
    T: LedgerStore
        + SubscriptionStore
        + DeliveryStore
        + ProofViewStore
        + ProjectionStore
        + AuditStore
        + CheckpointStore
{
}
