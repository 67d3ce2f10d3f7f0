//! The append engine.
//!
//! Contract: given a validated envelope, persist exactly one new entry
//! with the next sequence number, or detect an idempotency collision and
//! return the prior result. The engine never writes two entries for the
//! same idempotency key.
//!
//! All appenders in the process serialize on one advisory lock, which
//! keeps the chain linear: the head read, the hash computation and the
//! insert happen with no competing writer. The store's unique constraint
//! on `sequence_number` backs the lock up should a second process ever
//! share the database.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use proveniq_hash::{hash_entry, timestamp_string};
use proveniq_store_core::prelude::*;
use proveniq_types::envelope::CanonicalEnvelope;
use proveniq_types::{taxonomy, ErrorCode, EventId, SequenceNumber};

use crate::validator::{EnvelopeValidator, ValidatedEnvelope, ValidationError};

/// Reserved key of the process-global chain lock. The advisory lock key
/// space of this subsystem consists of exactly this value; nothing else in
/// the process may lock it.
pub const CHAIN_LOCK_KEY: u64 = 0x70726f76_6c656467; // "prov" "ledg"

/// The one chain lock for this process, keyed by [`CHAIN_LOCK_KEY`].
static CHAIN_LOCK: Lazy<Arc<Mutex<u64>>> = Lazy::new(|| Arc::new(Mutex::new(CHAIN_LOCK_KEY)));

/// Buffer size for the committed-entry broadcast channel.
const BROADCAST_BUFFER: usize = 1024;

//─────────────────────────────
//  Results and errors
//─────────────────────────────

/// What a producer gets back from an append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendReceipt {
    /// Identifier of the committed (or previously committed) entry.
    pub event_id: EventId,
    /// Chain position of the entry.
    pub sequence_number: SequenceNumber,
    /// Chained hash of the entry.
    pub entry_hash: String,
    /// Commit time of the entry.
    pub committed_at: DateTime<Utc>,
    /// Schema version the entry was committed under.
    pub schema_version: String,
    /// True when this request resolved to an earlier commit.
    pub deduped: bool,
}

impl AppendReceipt {
    fn from_entry(entry: &LedgerEntry, deduped: bool) -> Self {
        Self {
            event_id: entry.id,
            sequence_number: entry.sequence_number,
            entry_hash: entry.entry_hash.clone(),
            committed_at: entry.created_at,
            schema_version: entry.schema_version.clone(),
            deduped,
        }
    }
}

/// Append failures.
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    /// Rejected before any write.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Transient storage condition; the caller may retry the request.
    #[error("append conflict, retry: {0}")]
    Retriable(String),
    /// Storage failed; rolled back, nothing was committed.
    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
}

impl AppendError {
    /// The wire code the HTTP layer maps this failure to.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppendError::Validation(v) => v.code(),
            AppendError::Retriable(_) => ErrorCode::InternalError,
            AppendError::Storage(_) => ErrorCode::InternalError,
        }
    }
}

//─────────────────────────────
//  Engine
//─────────────────────────────

/// Serialized writer for the hash chain.
pub struct AppendEngine<S> {
    store: Arc<S>,
    validator: EnvelopeValidator,
    chain_lock: Arc<Mutex<u64>>,
    committed_tx: broadcast::Sender<LedgerEntry>,
}

impl<S: Store> AppendEngine<S> {
    /// Build an engine over a store and a configured validator.
    pub fn new(store: Arc<S>, validator: EnvelopeValidator) -> Self {
        Self {
            store,
            validator,
            chain_lock: Arc::clone(&CHAIN_LOCK),
            committed_tx: broadcast::channel(BROADCAST_BUFFER).0,
        }
    }

    /// The store this engine writes to.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The schema version committed entries are stamped with.
    pub fn active_schema_version(&self) -> &str {
        self.validator.active_schema_version()
    }

    /// Subscribe to the live stream of committed entries.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEntry> {
        self.committed_tx.subscribe()
    }

    /// Validate, normalize and append one canonical event.
    pub async fn append(&self, envelope: CanonicalEnvelope) -> Result<AppendReceipt, AppendError> {
        let validated = self.validator.validate(envelope)?;

        // Critical section: held across the head read and the insert only,
        // never across an HTTP boundary.
        let _chain = self.chain_lock.lock().await;

        let key = validated.envelope.idempotency_key.clone();
        if let Some(existing) = self
            .store
            .entry_by_idempotency_key(&key)
            .await
            .map_err(AppendError::Storage)?
        {
            debug!(idempotency_key = %key, sequence = existing.sequence_number, "idempotent replay");
            return Ok(AppendReceipt::from_entry(&existing, true));
        }

        let head = self.store.head().await.map_err(AppendError::Storage)?;
        let sequence_number = head.as_ref().map(|h| h.sequence_number).unwrap_or(0) + 1;
        let previous_hash = head.map(|h| h.entry_hash);

        let entry = build_entry(&validated, sequence_number, previous_hash);

        match self.store.append(&entry).await {
            Ok(()) => {}
            Err(StoreError::DuplicateIdempotencyKey) => {
                // A concurrent duplicate won between our lookup and the
                // insert. Retry the lookup once and dedupe.
                let existing = self
                    .store
                    .entry_by_idempotency_key(&key)
                    .await
                    .map_err(AppendError::Storage)?
                    .ok_or_else(|| {
                        AppendError::Retriable("idempotency key vanished mid-append".into())
                    })?;
                return Ok(AppendReceipt::from_entry(&existing, true));
            }
            Err(StoreError::WriteConflict(msg)) => return Err(AppendError::Retriable(msg)),
            Err(other) => return Err(AppendError::Storage(other)),
        }

        debug!(
            sequence = entry.sequence_number,
            event_type = %entry.event_type,
            source = %entry.source,
            "entry committed"
        );

        self.audit_append(&validated, &entry).await;
        self.project_evidence(&entry).await;

        let receipt = AppendReceipt::from_entry(&entry, false);
        let _ = self.committed_tx.send(entry);
        Ok(receipt)
    }

    /// Best-effort audit records. The entry is durable at this point, so
    /// audit failures degrade to warnings instead of failing the ingest.
    async fn audit_append(&self, validated: &ValidatedEnvelope, entry: &LedgerEntry) {
        if let Some(original) = &validated.normalized_alias {
            let record = AuditRecord {
                id: Uuid::new_v4(),
                event_id: Some(entry.id),
                action: "ALIAS_NORMALIZED".into(),
                detail: json!({
                    "original_event_type": original,
                    "canonical_event_type": entry.event_type,
                }),
                created_at: entry.created_at,
            };
            if let Err(e) = self.store.record_audit(&record).await {
                warn!(error = %e, "failed to record alias audit entry");
            }
        }

        if validated.producer_hash_mismatch {
            let record = AuditRecord {
                id: Uuid::new_v4(),
                event_id: Some(entry.id),
                action: "CANONICAL_HASH_MISMATCH".into(),
                detail: json!({
                    "supplied": validated.envelope.canonical_hash_hex,
                    "recomputed": entry.payload_hash,
                    "producer": entry.producer,
                }),
                created_at: entry.created_at,
            };
            if let Err(e) = self.store.record_audit(&record).await {
                warn!(error = %e, "failed to record hash-mismatch audit entry");
            }
        }
    }

    /// Write-time projection of evidence attachments. Rebuildable, so a
    /// failure here never affects the ingestion result.
    async fn project_evidence(&self, entry: &LedgerEntry) {
        let Some(snapshot) = crate::projection::evidence_snapshot(entry) else {
            return;
        };
        if let Err(e) = self.store.upsert_evidence_snapshot(&snapshot).await {
            warn!(error = %e, "failed to project evidence snapshot");
        }
    }
}

/// Compute the commit time, hashes and projection columns for a new entry.
fn build_entry(
    validated: &ValidatedEnvelope,
    sequence_number: SequenceNumber,
    previous_hash: Option<String>,
) -> LedgerEntry {
    let envelope = &validated.envelope;
    // The hash domain commits to the millisecond rendering; truncate the
    // stored instant to match by round-tripping through the string.
    let created_at_str = timestamp_string(&Utc::now());
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    let source = envelope
        .source
        .clone()
        .unwrap_or_else(|| taxonomy::default_source(&envelope.event_type));

    let entry_hash = hash_entry(
        &validated.payload_hash,
        previous_hash.as_deref(),
        &source,
        &envelope.event_type,
        &created_at_str,
    );

    // Projection columns are extracted at write time for the events the
    // replay reducer consumes; everything else stores nulls.
    let projected = taxonomy::is_verification_relevant(&envelope.event_type);
    let projected_str = |field: &str| {
        projected
            .then(|| envelope.payload.get(field).and_then(|v| v.as_str()))
            .flatten()
            .map(String::from)
    };

    LedgerEntry {
        id: Uuid::new_v4(),
        sequence_number,
        event_type: envelope.event_type.clone(),
        schema_version: envelope.schema_version.clone(),
        source,
        producer: envelope.producer.clone(),
        correlation_id: Some(envelope.correlation_id.clone()),
        actor_id: envelope.subject.actor_id.clone(),
        asset_id: envelope.subject.asset_id.clone(),
        anchor_id: envelope.subject.anchor_id.clone(),
        payload: envelope.payload.clone(),
        payload_hash: validated.payload_hash.clone(),
        previous_hash,
        entry_hash,
        asset_state_hash: projected_str("asset_state_hash"),
        evidence_set_hash: projected_str("evidence_set_hash"),
        ruleset_version: projected_str("ruleset_version"),
        created_at,
        idempotency_key: envelope.idempotency_key.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ValidatorConfig;
    use proveniq_hash::{hash_payload, sha256_hex, GENESIS};
    use proveniq_store_memory::MemoryStore;
    use proveniq_types::envelope::Subject;

    fn engine() -> AppendEngine<MemoryStore> {
        AppendEngine::new(
            Arc::new(MemoryStore::new()),
            EnvelopeValidator::new(ValidatorConfig::single_version("1.0")),
        )
    }

    fn envelope(event_type: &str, key: &str, payload: serde_json::Value) -> CanonicalEnvelope {
        CanonicalEnvelope {
            schema_version: "1.0".into(),
            event_type: event_type.into(),
            occurred_at: Utc::now(),
            correlation_id: "corr".into(),
            idempotency_key: key.into(),
            producer: "home-app".into(),
            producer_version: "1.0.0".into(),
            source: None,
            subject: Subject {
                asset_id: Some("A".into()),
                anchor_id: None,
                actor_id: None,
            },
            canonical_hash_hex: hash_payload(&payload),
            payload,
            signatures: vec![],
        }
    }

    #[tokio::test]
    async fn genesis_append_starts_the_chain() {
        let engine = engine();
        let receipt = engine
            .append(envelope(
                "HOME_ASSET_REGISTERED",
                "k1",
                json!({"asset_id": "A"}),
            ))
            .await
            .unwrap();

        assert_eq!(receipt.sequence_number, 1);
        assert!(!receipt.deduped);

        let entry = engine.store().head().await.unwrap().unwrap();
        assert_eq!(entry.previous_hash, None);
        let expected = sha256_hex(
            format!(
                "{}|{GENESIS}|home|HOME_ASSET_REGISTERED|{}",
                entry.payload_hash,
                timestamp_string(&entry.created_at)
            )
            .as_bytes(),
        );
        assert_eq!(entry.entry_hash, expected);
    }

    #[tokio::test]
    async fn idempotent_replay_returns_the_original() {
        let engine = engine();
        let e = envelope("HOME_ASSET_REGISTERED", "k1", json!({"asset_id": "A"}));

        let first = engine.append(e.clone()).await.unwrap();
        let second = engine.append(e).await.unwrap();

        assert!(second.deduped);
        assert_eq!(second.sequence_number, first.sequence_number);
        assert_eq!(second.entry_hash, first.entry_hash);
        assert_eq!(engine.store().entry_count().await, 1);
    }

    #[tokio::test]
    async fn chain_continuity_links_entries() {
        let engine = engine();
        let first = engine
            .append(envelope(
                "HOME_ASSET_REGISTERED",
                "k1",
                json!({"asset_id": "A"}),
            ))
            .await
            .unwrap();
        let second = engine
            .append(envelope("HOME_PHOTO_ADDED", "k2", json!({"p": 1})))
            .await
            .unwrap();

        assert_eq!(second.sequence_number, 2);
        let entry2 = engine
            .store()
            .entry_at_sequence(2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry2.previous_hash.as_deref(), Some(first.entry_hash.as_str()));
    }

    #[tokio::test]
    async fn projection_columns_only_for_verification_events() {
        let engine = engine();
        engine
            .append(envelope(
                "VERIFICATION_GRANTED",
                "k1",
                json!({
                    "asset_state_hash": "ash",
                    "evidence_set_hash": "esh",
                    "ruleset_version": "v1.0.0"
                }),
            ))
            .await
            .unwrap();
        engine
            .append(envelope(
                "HOME_PHOTO_ADDED",
                "k2",
                json!({"asset_state_hash": "should-not-project"}),
            ))
            .await
            .unwrap();

        let grant = engine.store().entry_at_sequence(1).await.unwrap().unwrap();
        assert_eq!(grant.asset_state_hash.as_deref(), Some("ash"));
        assert_eq!(grant.evidence_set_hash.as_deref(), Some("esh"));
        assert_eq!(grant.ruleset_version.as_deref(), Some("v1.0.0"));

        let photo = engine.store().entry_at_sequence(2).await.unwrap().unwrap();
        assert_eq!(photo.asset_state_hash, None);
    }

    #[tokio::test]
    async fn evidence_events_project_snapshots() {
        let engine = engine();
        engine
            .append(envelope(
                "EVIDENCE_ADDED",
                "k1",
                json!({
                    "evidence_id": "ev-1",
                    "content_hash": "h1",
                    "storage_ref": "s3://bucket/ev-1"
                }),
            ))
            .await
            .unwrap();

        let evidence = engine.store().evidence_for_asset("A").await.unwrap();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].content_hash, "h1");
        assert_eq!(evidence[0].storage_ref.as_deref(), Some("s3://bucket/ev-1"));
    }

    #[tokio::test]
    async fn alias_normalization_is_audited() {
        let engine = engine();
        engine
            .append(envelope("VERIFY_GRANTED", "k1", json!({"x": 1})))
            .await
            .unwrap();

        let audits = engine.store().audit_log(10, 0).await.unwrap();
        assert!(audits.iter().any(|a| a.action == "ALIAS_NORMALIZED"));
        let entry = engine.store().entry_at_sequence(1).await.unwrap().unwrap();
        assert_eq!(entry.event_type, "VERIFICATION_GRANTED");
    }

    #[tokio::test]
    async fn adversarial_producer_hash_is_audited_not_trusted() {
        let engine = engine();
        let mut e = envelope("HOME_PHOTO_ADDED", "k1", json!({"p": 1}));
        e.canonical_hash_hex = "f".repeat(64);
        engine.append(e).await.unwrap();

        let entry = engine.store().entry_at_sequence(1).await.unwrap().unwrap();
        assert_eq!(entry.payload_hash, hash_payload(&json!({"p": 1})));
        let audits = engine.store().audit_log(10, 0).await.unwrap();
        assert!(audits.iter().any(|a| a.action == "CANONICAL_HASH_MISMATCH"));
    }
}
