//! Proof-view issuance, revocation and validation.
//!
//! A proof view is a time-bound, snapshot-bound statement that an asset
//! was verified at a given moment. Issuance and revocation both flow
//! through the append engine so the ledger remains the source of truth;
//! the proof row itself is a rebuildable projection. Validation composes
//! the stored row with a fresh replay of the asset.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use proveniq_hash::hash_payload;
use proveniq_ledger::{AppendEngine, AppendError};
use proveniq_store_core::prelude::*;
use proveniq_types::envelope::{CanonicalEnvelope, Subject};
use proveniq_types::{ErrorCode, EventId};

use crate::reducer::{reduce, VerificationStatus};

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Proof-service failures. State conditions (revoked, expired, stale) are
/// not errors; they come back inside [`ProofValidation`].
#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    /// No proof with the requested identifier.
    #[error("proof not found")]
    NotFound,
    /// The backing ledger append failed.
    #[error(transparent)]
    Append(#[from] AppendError),
    /// Storage failed.
    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
}

impl ProofError {
    /// The wire code the HTTP layer maps this failure to.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProofError::NotFound => ErrorCode::ProofNotFound,
            ProofError::Append(e) => e.code(),
            ProofError::Storage(_) => ErrorCode::InternalError,
        }
    }
}

//─────────────────────────────
//  Requests and results
//─────────────────────────────

/// Issuance input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueProofRequest {
    /// Asset the proof covers.
    pub asset_id: String,
    /// The `VERIFICATION_GRANTED` entry being attested.
    pub verification_event_id: EventId,
    /// Asset-state hash at grant time.
    pub asset_state_hash: String,
    /// Evidence-set hash at grant time.
    pub evidence_set_hash: String,
    /// Ruleset the grant was evaluated under.
    pub ruleset_version: String,
    /// Expiration instant; proofs are always time-bound.
    pub expires_at: DateTime<Utc>,
    /// Optional scope label.
    pub scope: Option<String>,
    /// Issuing principal, if recorded.
    pub created_by: Option<String>,
}

/// Outcome of `validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofValidation {
    /// True when every rule passed.
    pub ok: bool,
    /// `OK`, or the first failing rule's reason code.
    pub reason: String,
    /// The derived status of the underlying asset at validation time.
    pub status: String,
    /// When the validation ran.
    pub checked_at: DateTime<Utc>,
}

impl ProofValidation {
    fn fail(reason: impl Into<String>, status: VerificationStatus, now: DateTime<Utc>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
            status: status.as_str().to_string(),
            checked_at: now,
        }
    }
}

//─────────────────────────────
//  Service
//─────────────────────────────

/// Issues and validates proof views against a ledger.
pub struct ProofService<S> {
    store: Arc<S>,
    engine: Arc<AppendEngine<S>>,
}

impl<S: Store> ProofService<S> {
    /// Build a service over a store and the engine that writes to it.
    pub fn new(store: Arc<S>, engine: Arc<AppendEngine<S>>) -> Self {
        Self { store, engine }
    }

    /// Issue a proof: emit `PROOF_VIEW_CREATED` through the append engine,
    /// then insert the row.
    pub async fn issue(&self, request: IssueProofRequest) -> Result<ProofView, ProofError> {
        let proof_id = Uuid::new_v4();
        let snapshot_hash = snapshot_hash(&request.asset_state_hash, &request.evidence_set_hash);
        let now = Utc::now();

        let payload = json!({
            "proof_id": proof_id.to_string(),
            "asset_id": request.asset_id,
            "verification_event_id": request.verification_event_id.to_string(),
            "snapshot_hash": snapshot_hash,
            "asset_state_hash": request.asset_state_hash,
            "evidence_set_hash": request.evidence_set_hash,
            "ruleset_version": request.ruleset_version,
            "expires_at": request.expires_at.to_rfc3339(),
            "scope": request.scope,
            "created_by": request.created_by,
        });
        self.emit(
            "PROOF_VIEW_CREATED",
            &request.asset_id,
            format!("proof-created-{proof_id}"),
            payload,
        )
        .await?;

        let proof = ProofView {
            proof_id,
            asset_id: request.asset_id,
            verification_event_id: request.verification_event_id,
            snapshot_hash,
            asset_state_hash: request.asset_state_hash,
            evidence_set_hash: request.evidence_set_hash,
            ruleset_version: request.ruleset_version,
            expires_at: Some(request.expires_at),
            revoked_at: None,
            created_by: request.created_by,
            scope: request.scope,
            created_at: now,
        };
        self.store
            .insert_proof(&proof)
            .await
            .map_err(ProofError::Storage)?;
        debug!(proof_id = %proof_id, asset_id = %proof.asset_id, "proof issued");
        Ok(proof)
    }

    /// Revoke a proof: emit `PROOF_VIEW_REVOKED`, then flip `revoked_at`.
    pub async fn revoke(
        &self,
        proof_id: &Uuid,
        revoked_by: Option<String>,
    ) -> Result<ProofView, ProofError> {
        let proof = self
            .store
            .proof(proof_id)
            .await
            .map_err(ProofError::Storage)?
            .ok_or(ProofError::NotFound)?;

        let payload = json!({
            "proof_id": proof_id.to_string(),
            "asset_id": proof.asset_id,
            "revoked_by": revoked_by,
        });
        self.emit(
            "PROOF_VIEW_REVOKED",
            &proof.asset_id,
            format!("proof-revoked-{proof_id}"),
            payload,
        )
        .await?;

        let now = Utc::now();
        self.store
            .revoke_proof(proof_id, now)
            .await
            .map_err(ProofError::Storage)?;
        Ok(ProofView {
            revoked_at: Some(now),
            ..proof
        })
    }

    /// Fetch a proof row.
    pub async fn get(&self, proof_id: &Uuid) -> Result<ProofView, ProofError> {
        self.store
            .proof(proof_id)
            .await
            .map_err(ProofError::Storage)?
            .ok_or(ProofError::NotFound)
    }

    /// Validate a proof against the current replay state.
    pub async fn validate(
        &self,
        proof_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProofValidation, ProofError> {
        let proof = self.get(proof_id).await?;

        let rows = self
            .store
            .entries_for_asset(&proof.asset_id, None, 0)
            .await
            .map_err(ProofError::Storage)?;
        let derived = reduce(&proof.asset_id, &rows, now);
        let status = derived.status;

        // Ordered rules; first failure wins.
        if proof.revoked_at.is_some() {
            return Ok(ProofValidation::fail("PROOF_REVOKED", status, now));
        }
        match proof.expires_at {
            Some(expires_at) if now <= expires_at => {}
            // Missing expiration counts as malformed: proofs are time-bound.
            _ => return Ok(ProofValidation::fail("PROOF_EXPIRED", status, now)),
        }
        match status {
            VerificationStatus::Frozen => {
                return Ok(ProofValidation::fail("ASSET_FROZEN", status, now));
            }
            VerificationStatus::Revoked => {
                return Ok(ProofValidation::fail("ASSET_REVOKED", status, now));
            }
            VerificationStatus::Invalidated => {
                return Ok(ProofValidation::fail("INVALIDATED", status, now));
            }
            _ => {}
        }
        if derived.last_verification_event_id != Some(proof.verification_event_id) {
            return Ok(ProofValidation::fail("NOT_ACTIVE_GRANT", status, now));
        }
        if derived.asset_state_hash_current != proof.asset_state_hash
            || derived.evidence_set_hash_current != proof.evidence_set_hash
        {
            return Ok(ProofValidation::fail("INVALIDATED", status, now));
        }
        if snapshot_hash(&proof.asset_state_hash, &proof.evidence_set_hash) != proof.snapshot_hash {
            return Ok(ProofValidation::fail("SNAPSHOT_MISMATCH", status, now));
        }
        if status != VerificationStatus::VerifiedActive {
            return Ok(ProofValidation::fail(
                format!("NOT_VERIFIED_ACTIVE:{}", status.as_str()),
                status,
                now,
            ));
        }

        Ok(ProofValidation {
            ok: true,
            reason: "OK".into(),
            status: status.as_str().to_string(),
            checked_at: now,
        })
    }

    async fn emit(
        &self,
        event_type: &str,
        asset_id: &str,
        idempotency_key: String,
        payload: serde_json::Value,
    ) -> Result<(), ProofError> {
        let envelope = CanonicalEnvelope {
            schema_version: self.engine.active_schema_version().to_string(),
            event_type: event_type.to_string(),
            occurred_at: Utc::now(),
            correlation_id: idempotency_key.clone(),
            idempotency_key,
            producer: "proof-service".to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            source: None,
            subject: Subject {
                asset_id: Some(asset_id.to_string()),
                anchor_id: None,
                actor_id: None,
            },
            canonical_hash_hex: hash_payload(&payload),
            payload,
            signatures: vec![],
        };
        self.engine.append(envelope).await?;
        Ok(())
    }
}

/// `snapshot_hash = H({asset_state_hash, evidence_set_hash})`.
pub(crate) fn snapshot_hash(asset_state_hash: &str, evidence_set_hash: &str) -> String {
    hash_payload(&json!({
        "asset_state_hash": asset_state_hash,
        "evidence_set_hash": evidence_set_hash,
    }))
}
