//! Canonical and legacy event envelopes.
//!
//! The canonical envelope is the only write shape the ledger accepts.
//! Structural validation lives here; taxonomy normalization and schema
//! version gating are applied by the envelope validator in the ledger
//! crate, which also recomputes every hash the server depends on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{MAX_IDEMPOTENCY_KEY_LEN, MAX_IDENTIFIER_LEN, MAX_PAYLOAD_BYTES};

//─────────────────────────────
//  Canonical envelope
//─────────────────────────────

/// Routing and subject attributes of a canonical event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Asset the event is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    /// Anchor (physical tag / marker) the event is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_id: Option<String>,
    /// Acting principal recorded for audit purposes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
}

/// Detached producer signature. The ledger stores signatures verbatim;
/// verification against the partner registry is an external concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Identifier of the signing key in the partner registry.
    pub key_id: String,
    /// Signature algorithm label, e.g. `ed25519`.
    pub algorithm: String,
    /// Encoded signature value.
    pub value: String,
}

/// The canonical event envelope accepted by `POST /events/canonical`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEnvelope {
    /// Envelope schema version; only configured versions are accepted.
    pub schema_version: String,
    /// Event type from the closed taxonomy (legacy aliases accepted).
    pub event_type: String,
    /// Producer-side occurrence time.
    pub occurred_at: DateTime<Utc>,
    /// Correlation identifier for cross-service tracing.
    pub correlation_id: String,
    /// Producer-supplied key making retries safe.
    pub idempotency_key: String,
    /// Producer identity from the partner registry.
    pub producer: String,
    /// Producer software version.
    pub producer_version: String,
    /// Origin domain. Derived from the event-type family when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Subject attributes. Required by the envelope schema even when all
    /// of its attributes are absent.
    pub subject: Subject,
    /// Arbitrary JSON payload.
    pub payload: Value,
    /// Producer-computed canonical payload hash. Advisory only: the server
    /// recomputes and never trusts this value for integrity.
    pub canonical_hash_hex: String,
    /// Detached producer signatures.
    pub signatures: Vec<Signature>,
}

/// Structural violation of the canonical envelope schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("canonical schema violation: {0}")]
pub struct EnvelopeViolation(pub String);

impl CanonicalEnvelope {
    /// Validate the structural invariants of the envelope.
    ///
    /// Taxonomy membership and schema-version gating are intentionally not
    /// checked here; they depend on configuration and are enforced by the
    /// envelope validator.
    pub fn validate(&self) -> Result<(), EnvelopeViolation> {
        fn required(field: &str, value: &str) -> Result<(), EnvelopeViolation> {
            if value.trim().is_empty() {
                return Err(EnvelopeViolation(format!("{field} must not be empty")));
            }
            if value.len() > MAX_IDENTIFIER_LEN {
                return Err(EnvelopeViolation(format!(
                    "{field} exceeds {MAX_IDENTIFIER_LEN} bytes"
                )));
            }
            Ok(())
        }

        required("schema_version", &self.schema_version)?;
        required("event_type", &self.event_type)?;
        required("correlation_id", &self.correlation_id)?;
        required("producer", &self.producer)?;
        required("producer_version", &self.producer_version)?;
        required("canonical_hash_hex", &self.canonical_hash_hex)?;

        if self.idempotency_key.trim().is_empty() {
            return Err(EnvelopeViolation("idempotency_key must not be empty".into()));
        }
        if self.idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(EnvelopeViolation(format!(
                "idempotency_key exceeds {MAX_IDEMPOTENCY_KEY_LEN} bytes"
            )));
        }

        if !self.payload.is_object() {
            return Err(EnvelopeViolation("payload must be a JSON object".into()));
        }
        // Serialized size bound; the compact rendering is what gets hashed
        // and stored, so measure that.
        let payload_len = self.payload.to_string().len();
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(EnvelopeViolation(format!(
                "payload size {payload_len} exceeds {MAX_PAYLOAD_BYTES} bytes"
            )));
        }

        Ok(())
    }
}

//─────────────────────────────
//  Legacy envelope
//─────────────────────────────

/// Legacy write shape accepted by `POST /events`. Converted to a canonical
/// envelope internally; writes without an idempotency key are rejected
/// rather than silently duplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyEvent {
    /// Origin domain, always explicit on the legacy path.
    pub source: String,
    /// Event type (canonical or legacy alias).
    pub event_type: String,
    /// Arbitrary JSON payload.
    pub payload: Value,
    /// Correlation identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Acting principal, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// Asset the event is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    /// Anchor the event is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_id: Option<String>,
    /// Producer-supplied idempotency key. Required; see
    /// [`LegacyEvent::into_canonical`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Producer-side occurrence time; defaults to commit time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    /// Producer identity; defaults to `legacy` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
}

impl LegacyEvent {
    /// Convert into a canonical envelope under the given active schema
    /// version.
    ///
    /// Rejects events without an `idempotency_key`: synthesizing one from
    /// commit-time attributes would never actually deduplicate, and
    /// silently duplicating is not an option.
    pub fn into_canonical(self, schema_version: &str) -> Result<CanonicalEnvelope, EnvelopeViolation> {
        let idempotency_key = self
            .idempotency_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EnvelopeViolation("legacy event is missing idempotency_key".into()))?;

        let envelope = CanonicalEnvelope {
            schema_version: schema_version.to_string(),
            event_type: self.event_type,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            correlation_id: self
                .correlation_id
                .unwrap_or_else(|| format!("legacy-{idempotency_key}")),
            idempotency_key,
            producer: self.producer.unwrap_or_else(|| "legacy".to_string()),
            producer_version: "0".to_string(),
            source: Some(self.source),
            subject: Subject {
                asset_id: self.asset_id,
                anchor_id: self.anchor_id,
                actor_id: self.actor_id,
            },
            payload: self.payload,
            // Placeholder; the server recomputes the payload hash and treats
            // the producer value as advisory everywhere.
            canonical_hash_hex: "unverified".to_string(),
            signatures: Vec::new(),
        };
        envelope.validate()?;
        Ok(envelope)
    }
}
