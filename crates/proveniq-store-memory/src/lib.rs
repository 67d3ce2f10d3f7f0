#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **proveniq-store-memory** – In-memory storage driver for the Proveniq ledger.
//!
//! Fast, non-persistent backend for tests and development. All tables live
//! behind a single `RwLock` so the multi-table writes (entry + delivery
//! fan-out, dead-letter moves) are atomic exactly like the SQLite driver's
//! transactions. Data is lost when the process terminates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use proveniq_store_core::prelude::*;
use proveniq_store_core::CLAIM_TIMEOUT_SECS;
use proveniq_types::{EventId, SequenceNumber};

//─────────────────────────────
//  Backing state
//─────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    /// Entries ordered by sequence number (dense, so index = seq - 1).
    entries: Vec<LedgerEntry>,
    by_id: HashMap<EventId, usize>,
    by_idempotency_key: HashMap<String, usize>,
    subscriptions: Vec<Subscription>,
    deliveries: HashMap<Uuid, WebhookDelivery>,
    dead_letters: Vec<DeadLetter>,
    proofs: HashMap<Uuid, ProofView>,
    evidence: Vec<EvidenceSnapshot>,
    verification_cache: HashMap<String, VerificationCacheRow>,
    audit: Vec<AuditRecord>,
    checkpoints: Vec<IntegrityCheckpoint>,
}

/// An in-memory, non-persistent ledger store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<tokio::sync::RwLock<MemoryState>>,
}

impl MemoryStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total committed entries (test helper).
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// All deliveries regardless of state (test helper).
    pub async fn all_deliveries(&self) -> Vec<WebhookDelivery> {
        self.state.read().await.deliveries.values().cloned().collect()
    }
}

fn page<T: Clone>(items: &[T], limit: Option<u32>, offset: u64) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(usize::MAX);
    let iter = items.iter().skip(offset);
    match limit {
        Some(limit) => iter.take(limit as usize).cloned().collect(),
        None => iter.cloned().collect(),
    }
}

//─────────────────────────────
//  Ledger
//─────────────────────────────

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        if state.by_idempotency_key.contains_key(&entry.idempotency_key) {
            return Err(StoreError::DuplicateIdempotencyKey);
        }
        let expected = state.entries.len() as u64 + 1;
        if entry.sequence_number != expected {
            return Err(StoreError::WriteConflict(format!(
                "sequence {} already assigned (next is {})",
                entry.sequence_number, expected
            )));
        }

        let index = state.entries.len();
        state.by_id.insert(entry.id, index);
        state
            .by_idempotency_key
            .insert(entry.idempotency_key.clone(), index);
        state.entries.push(entry.clone());

        // Fan out deliveries for matching subscriptions, atomically with
        // the entry itself.
        let matching: Vec<Uuid> = state
            .subscriptions
            .iter()
            .filter(|s| s.matches(&entry.event_type, &entry.source))
            .map(|s| s.id)
            .collect();
        for subscription_id in matching {
            let delivery = WebhookDelivery {
                id: Uuid::new_v4(),
                subscription_id,
                event_id: entry.id,
                status: DeliveryStatus::Pending,
                attempts: 0,
                last_attempt_at: None,
                next_retry_at: entry.created_at,
                claimed_at: None,
                last_error: None,
                response_status: None,
                response_body: None,
                created_at: entry.created_at,
            };
            state.deliveries.insert(delivery.id, delivery);
        }

        Ok(())
    }

    async fn head(&self) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.state.read().await.entries.last().cloned())
    }

    async fn entry_by_id(&self, id: &EventId) -> Result<Option<LedgerEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state.by_id.get(id).map(|&i| state.entries[i].clone()))
    }

    async fn entry_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .by_idempotency_key
            .get(key)
            .map(|&i| state.entries[i].clone()))
    }

    async fn entry_at_sequence(
        &self,
        sequence: SequenceNumber,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let state = self.state.read().await;
        if sequence == 0 {
            return Ok(None);
        }
        Ok(state.entries.get(sequence as usize - 1).cloned())
    }

    async fn entries_in_range(
        &self,
        from: SequenceNumber,
        to: Option<SequenceNumber>,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read().await;
        let from = from.max(1);
        let out: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| {
                e.sequence_number >= from && to.map_or(true, |t| e.sequence_number <= t)
            })
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(out)
    }

    async fn entries_for_asset(
        &self,
        asset_id: &str,
        limit: Option<u32>,
        offset: u64,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read().await;
        let rows: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.asset_id.as_deref() == Some(asset_id))
            .cloned()
            .collect();
        Ok(page(&rows, limit, offset))
    }

    async fn entries_for_anchor(
        &self,
        anchor_id: &str,
        limit: Option<u32>,
        offset: u64,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read().await;
        let rows: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.anchor_id.as_deref() == Some(anchor_id))
            .cloned()
            .collect();
        Ok(page(&rows, limit, offset))
    }

    async fn entries_filtered(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read().await;
        let rows: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| {
                filter
                    .event_type
                    .as_deref()
                    .map_or(true, |t| e.event_type == t)
                    && filter.source.as_deref().map_or(true, |s| e.source == s)
                    && filter
                        .correlation_id
                        .as_deref()
                        .map_or(true, |c| e.correlation_id.as_deref() == Some(c))
                    && filter
                        .asset_id
                        .as_deref()
                        .map_or(true, |a| e.asset_id.as_deref() == Some(a))
                    && filter
                        .anchor_id
                        .as_deref()
                        .map_or(true, |a| e.anchor_id.as_deref() == Some(a))
                    && filter
                        .from_sequence
                        .map_or(true, |s| e.sequence_number >= s)
            })
            .cloned()
            .collect();
        Ok(page(&rows, Some(filter.limit), filter.offset))
    }

    async fn stats(&self) -> Result<LedgerStats, StoreError> {
        let state = self.state.read().await;
        let head = state.entries.last();
        Ok(LedgerStats {
            total_entries: state.entries.len() as u64,
            head_sequence: head.map(|e| e.sequence_number),
            head_entry_hash: head.map(|e| e.entry_hash.clone()),
            last_created_at: head.map(|e| e.created_at),
        })
    }
}

//─────────────────────────────
//  Subscriptions
//─────────────────────────────

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let exists = state.subscriptions.iter().any(|s| {
            s.subscriber_id == subscription.subscriber_id
                && s.webhook_url == subscription.webhook_url
        });
        if exists {
            return Err(StoreError::SubscriptionExists);
        }
        state.subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn subscription(&self, id: &Uuid) -> Result<Option<Subscription>, StoreError> {
        let state = self.state.read().await;
        Ok(state.subscriptions.iter().find(|s| s.id == *id).cloned())
    }

    async fn subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        let state = self.state.read().await;
        let mut out = state.subscriptions.clone();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn delete_subscription(&self, id: &Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id != *id);
        Ok(state.subscriptions.len() != before)
    }
}

//─────────────────────────────
//  Deliveries
//─────────────────────────────

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn claim_due_deliveries(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let mut state = self.state.write().await;
        let claim_cutoff = now - Duration::seconds(CLAIM_TIMEOUT_SECS);

        let mut due: Vec<Uuid> = state
            .deliveries
            .values()
            .filter(|d| {
                d.status == DeliveryStatus::Pending
                    && d.next_retry_at <= now
                    && d.claimed_at.map_or(true, |c| c < claim_cutoff)
            })
            .map(|d| d.id)
            .collect();
        due.sort_by_key(|id| state.deliveries[id].created_at);
        due.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(d) = state.deliveries.get_mut(&id) {
                d.claimed_at = Some(now);
                claimed.push(d.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_delivered(
        &self,
        id: &Uuid,
        response_status: u16,
        response_body: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(d) = state.deliveries.get_mut(id) {
            d.status = DeliveryStatus::Delivered;
            d.attempts += 1;
            d.last_attempt_at = Some(now);
            d.claimed_at = None;
            d.response_status = Some(response_status);
            d.response_body = response_body;
            d.last_error = None;
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: &Uuid,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
        response_status: Option<u16>,
        response_body: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(d) = state.deliveries.get_mut(id) {
            d.status = DeliveryStatus::Pending;
            d.attempts = attempts;
            d.last_attempt_at = Some(now);
            d.next_retry_at = next_retry_at;
            d.claimed_at = None;
            d.last_error = Some(error.to_string());
            d.response_status = response_status;
            d.response_body = response_body;
        }
        Ok(())
    }

    async fn mark_dead_letter(
        &self,
        id: &Uuid,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(d) = state.deliveries.get_mut(id) {
            d.status = DeliveryStatus::DeadLetter;
            d.attempts = attempts;
            d.last_attempt_at = Some(now);
            d.claimed_at = None;
            d.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn insert_dead_letter(&self, dead_letter: &DeadLetter) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.dead_letters.push(dead_letter.clone());
        Ok(())
    }

    async fn delivery(&self, id: &Uuid) -> Result<Option<WebhookDelivery>, StoreError> {
        Ok(self.state.read().await.deliveries.get(id).cloned())
    }

    async fn dead_letters(&self, limit: u32, offset: u64)
        -> Result<Vec<DeadLetter>, StoreError> {
        let state = self.state.read().await;
        let mut rows = state.dead_letters.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(&rows, Some(limit), offset))
    }

    async fn dead_letter(&self, id: &Uuid) -> Result<Option<DeadLetter>, StoreError> {
        let state = self.state.read().await;
        Ok(state.dead_letters.iter().find(|d| d.id == *id).cloned())
    }

    async fn requeue_dead_letter(
        &self,
        dead_letter_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookDelivery>, StoreError> {
        let mut state = self.state.write().await;
        let Some(position) = state
            .dead_letters
            .iter()
            .position(|d| d.id == *dead_letter_id)
        else {
            return Ok(None);
        };
        let dead = state.dead_letters.remove(position);
        let refreshed = state.deliveries.get_mut(&dead.delivery_id).map(|d| {
            d.status = DeliveryStatus::Pending;
            d.attempts = 0;
            d.next_retry_at = now;
            d.claimed_at = None;
            d.last_error = None;
            d.clone()
        });
        Ok(refreshed)
    }

    async fn delivery_stats(&self) -> Result<DeliveryStats, StoreError> {
        let state = self.state.read().await;
        let mut stats = DeliveryStats::default();
        for d in state.deliveries.values() {
            match d.status {
                DeliveryStatus::Pending => stats.pending += 1,
                DeliveryStatus::Delivered => stats.delivered += 1,
                DeliveryStatus::Failed => stats.failed += 1,
                DeliveryStatus::DeadLetter => stats.dead_letter += 1,
            }
        }
        Ok(stats)
    }
}

//─────────────────────────────
//  Proof views
//─────────────────────────────

#[async_trait]
impl ProofViewStore for MemoryStore {
    async fn insert_proof(&self, proof: &ProofView) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.proofs.insert(proof.proof_id, proof.clone());
        Ok(())
    }

    async fn proof(&self, proof_id: &Uuid) -> Result<Option<ProofView>, StoreError> {
        Ok(self.state.read().await.proofs.get(proof_id).cloned())
    }

    async fn revoke_proof(
        &self,
        proof_id: &Uuid,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.proofs.get_mut(proof_id) {
            Some(p) => {
                p.revoked_at = Some(revoked_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn proofs_for_asset(&self, asset_id: &str) -> Result<Vec<ProofView>, StoreError> {
        let state = self.state.read().await;
        let mut rows: Vec<ProofView> = state
            .proofs
            .values()
            .filter(|p| p.asset_id == asset_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

//─────────────────────────────
//  Projections
//─────────────────────────────

#[async_trait]
impl ProjectionStore for MemoryStore {
    async fn upsert_evidence_snapshot(
        &self,
        snapshot: &EvidenceSnapshot,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .evidence
            .retain(|e| !(e.asset_id == snapshot.asset_id && e.evidence_id == snapshot.evidence_id));
        state.evidence.push(snapshot.clone());
        Ok(())
    }

    async fn evidence_for_asset(
        &self,
        asset_id: &str,
    ) -> Result<Vec<EvidenceSnapshot>, StoreError> {
        let state = self.state.read().await;
        let mut rows: Vec<EvidenceSnapshot> = state
            .evidence
            .iter()
            .filter(|e| e.asset_id == asset_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.created_at);
        Ok(rows)
    }

    async fn upsert_verification_cache(
        &self,
        row: &VerificationCacheRow,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .verification_cache
            .insert(row.asset_id.clone(), row.clone());
        Ok(())
    }

    async fn verification_cache(
        &self,
        asset_id: &str,
    ) -> Result<Option<VerificationCacheRow>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .verification_cache
            .get(asset_id)
            .cloned())
    }

    async fn truncate_derived(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.evidence.clear();
        state.verification_cache.clear();
        state.proofs.clear();
        Ok(())
    }
}

//─────────────────────────────
//  Audit and checkpoints
//─────────────────────────────

#[async_trait]
impl AuditStore for MemoryStore {
    async fn record_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.audit.push(record.clone());
        Ok(())
    }

    async fn audit_log(&self, limit: u32, offset: u64) -> Result<Vec<AuditRecord>, StoreError> {
        let state = self.state.read().await;
        let mut rows = state.audit.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(&rows, Some(limit), offset))
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn insert_checkpoint(
        &self,
        checkpoint: &IntegrityCheckpoint,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    async fn latest_checkpoint(&self) -> Result<Option<IntegrityCheckpoint>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .checkpoints
            .iter()
            .max_by_key(|c| c.verified_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(sequence: u64, key: &str) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            sequence_number: sequence,
            event_type: "HOME_PHOTO_ADDED".into(),
            schema_version: "1.0".into(),
            source: "home".into(),
            producer: "home-app".into(),
            correlation_id: None,
            actor_id: None,
            asset_id: Some("A".into()),
            anchor_id: None,
            payload: json!({"p": 1}),
            payload_hash: "ph".into(),
            previous_hash: None,
            entry_hash: format!("hash-{sequence}"),
            asset_state_hash: None,
            evidence_set_hash: None,
            ruleset_version: None,
            created_at: Utc::now(),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn append_rejects_duplicate_idempotency_keys() {
        let store = MemoryStore::new();
        store.append(&entry(1, "k1")).await.unwrap();
        let err = store.append(&entry(2, "k1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdempotencyKey));
    }

    #[tokio::test]
    async fn append_rejects_sequence_conflicts() {
        let store = MemoryStore::new();
        store.append(&entry(1, "k1")).await.unwrap();
        let err = store.append(&entry(1, "k2")).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteConflict(_)));
    }

    #[tokio::test]
    async fn append_fans_out_matching_deliveries() {
        let store = MemoryStore::new();
        store
            .create_subscription(&Subscription {
                id: Uuid::new_v4(),
                subscriber_id: "s".into(),
                webhook_url: "https://example.test/h".into(),
                event_types: vec![],
                source_filter: vec!["home".into()],
                secret: "sec".into(),
                active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store.append(&entry(1, "k1")).await.unwrap();
        assert_eq!(store.all_deliveries().await.len(), 1);
    }

    #[tokio::test]
    async fn claims_hide_deliveries_from_other_workers() {
        let store = MemoryStore::new();
        store
            .create_subscription(&Subscription {
                id: Uuid::new_v4(),
                subscriber_id: "s".into(),
                webhook_url: "https://example.test/h".into(),
                event_types: vec![],
                source_filter: vec![],
                secret: "sec".into(),
                active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store.append(&entry(1, "k1")).await.unwrap();

        let now = Utc::now();
        let first = store.claim_due_deliveries(10, now).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.claim_due_deliveries(10, now).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn requeue_resets_delivery_and_drops_dead_letter() {
        let store = MemoryStore::new();
        store
            .create_subscription(&Subscription {
                id: Uuid::new_v4(),
                subscriber_id: "s".into(),
                webhook_url: "https://example.test/h".into(),
                event_types: vec![],
                source_filter: vec![],
                secret: "sec".into(),
                active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store.append(&entry(1, "k1")).await.unwrap();
        let delivery = store.all_deliveries().await.pop().unwrap();

        let now = Utc::now();
        store
            .mark_dead_letter(&delivery.id, 5, "gave up", now)
            .await
            .unwrap();
        let dead = DeadLetter {
            id: Uuid::new_v4(),
            delivery_id: delivery.id,
            subscription_id: delivery.subscription_id,
            event_id: delivery.event_id,
            event_snapshot: json!({}),
            failure_reason: "gave up".into(),
            created_at: now,
        };
        store.insert_dead_letter(&dead).await.unwrap();

        let refreshed = store.requeue_dead_letter(&dead.id, now).await.unwrap().unwrap();
        assert_eq!(refreshed.status, DeliveryStatus::Pending);
        assert_eq!(refreshed.attempts, 0);
        assert!(store.dead_letters(10, 0).await.unwrap().is_empty());
    }
}
