//! Envelope validation and normalization.
//!
//! Applies, in order: structural validation, taxonomy normalization
//! (legacy aliases rewritten, original kept for the audit trail), schema
//! version gating, and server-side payload hashing. The producer's
//! `canonical_hash_hex` is never trusted; a disagreement is reported so
//! the append engine can audit it, but the recomputed value is the one
//! that enters the chain.

use proveniq_hash::hash_payload;
use proveniq_types::envelope::CanonicalEnvelope;
use proveniq_types::{taxonomy, ErrorCode};

/// Validation failures, each carrying its stable wire code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Envelope failed structural checks.
    #[error("canonical schema violation: {0}")]
    Schema(String),
    /// Event type is outside the closed taxonomy.
    #[error("invalid event type: {0}")]
    InvalidEventType(String),
    /// Schema version is not in the configured allowed set.
    #[error("unsupported schema version: {0}")]
    UnsupportedSchemaVersion(String),
}

impl ValidationError {
    /// The wire code the HTTP layer maps this failure to.
    pub fn code(&self) -> ErrorCode {
        match self {
            ValidationError::Schema(_) => ErrorCode::CanonicalSchemaViolation,
            ValidationError::InvalidEventType(_) => ErrorCode::InvalidEventType,
            ValidationError::UnsupportedSchemaVersion(_) => ErrorCode::UnsupportedSchemaVersion,
        }
    }
}

/// Schema version gate configuration.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Version stamped onto committed entries.
    pub active_schema_version: String,
    /// Versions accepted on ingest. Always contains the active version.
    pub allowed_schema_versions: Vec<String>,
}

impl ValidatorConfig {
    /// Config that accepts exactly the active version.
    pub fn single_version(active: impl Into<String>) -> Self {
        let active = active.into();
        Self {
            allowed_schema_versions: vec![active.clone()],
            active_schema_version: active,
        }
    }
}

/// A validated, normalized envelope plus what the server derived from it.
#[derive(Debug, Clone)]
pub struct ValidatedEnvelope {
    /// Envelope with the canonical event type and a resolved source.
    pub envelope: CanonicalEnvelope,
    /// Server-recomputed payload hash. This is the value that gets stored.
    pub payload_hash: String,
    /// Original event-type symbol when a legacy alias was rewritten.
    pub normalized_alias: Option<String>,
    /// True when the producer's advisory hash disagreed with ours.
    pub producer_hash_mismatch: bool,
}

/// The envelope validator applied ahead of every append.
#[derive(Debug, Clone)]
pub struct EnvelopeValidator {
    config: ValidatorConfig,
}

impl EnvelopeValidator {
    /// Build a validator over the given version gate.
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// The version stamped onto committed entries.
    pub fn active_schema_version(&self) -> &str {
        &self.config.active_schema_version
    }

    /// Validate and normalize a submitted envelope.
    pub fn validate(
        &self,
        mut envelope: CanonicalEnvelope,
    ) -> Result<ValidatedEnvelope, ValidationError> {
        envelope
            .validate()
            .map_err(|violation| ValidationError::Schema(violation.0))?;

        let normalized = taxonomy::normalize(&envelope.event_type)
            .ok_or_else(|| ValidationError::InvalidEventType(envelope.event_type.clone()))?;

        if !self
            .config
            .allowed_schema_versions
            .iter()
            .any(|v| v == &envelope.schema_version)
        {
            return Err(ValidationError::UnsupportedSchemaVersion(
                envelope.schema_version.clone(),
            ));
        }

        let payload_hash = hash_payload(&envelope.payload);
        let producer_hash_mismatch =
            !envelope.canonical_hash_hex.eq_ignore_ascii_case(&payload_hash);

        envelope.event_type = normalized.canonical;
        if envelope.source.as_deref().map_or(true, str::is_empty) {
            envelope.source = Some(taxonomy::default_source(&envelope.event_type));
        }

        Ok(ValidatedEnvelope {
            payload_hash,
            normalized_alias: normalized.alias_of,
            producer_hash_mismatch,
            envelope,
        })
    }
}
