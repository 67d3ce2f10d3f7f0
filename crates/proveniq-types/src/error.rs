//! Stable error codes surfaced to API callers.
//!
//! Component crates carry their own `thiserror` enums; each maps onto one
//! of these wire codes so the HTTP layer can render a uniform error body.

use serde::{Deserialize, Serialize};

/// Closed set of error codes returned by the ledger API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Envelope failed structural validation.
    CanonicalSchemaViolation,
    /// Event type is outside the closed taxonomy.
    InvalidEventType,
    /// Schema version is not in the configured allowed set.
    UnsupportedSchemaVersion,
    /// Internal marker for an idempotency collision; converted to a
    /// 200 dedup response before it reaches a caller.
    DuplicateIdempotencyKey,
    /// Stored hashes failed to recompute; evidence of tampering.
    LedgerHashMismatch,
    /// No ledger entry with the requested identifier.
    EventNotFound,
    /// Referenced item does not exist.
    ItemNotFound,
    /// Referenced wallet does not exist.
    WalletNotFound,
    /// Payload rejected before any write.
    InvalidPayload,
    /// Missing or unparseable credentials.
    Unauthorized,
    /// Authenticated but not allowed.
    Forbidden,
    /// Unexpected failure; safe to retry.
    InternalError,
    /// No proof view with the requested identifier.
    ProofNotFound,
}

impl ErrorCode {
    /// Stable wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CanonicalSchemaViolation => "CANONICAL_SCHEMA_VIOLATION",
            ErrorCode::InvalidEventType => "INVALID_EVENT_TYPE",
            ErrorCode::UnsupportedSchemaVersion => "UNSUPPORTED_SCHEMA_VERSION",
            ErrorCode::DuplicateIdempotencyKey => "DUPLICATE_IDEMPOTENCY_KEY",
            ErrorCode::LedgerHashMismatch => "LEDGER_HASH_MISMATCH",
            ErrorCode::EventNotFound => "EVENT_NOT_FOUND",
            ErrorCode::ItemNotFound => "ITEM_NOT_FOUND",
            ErrorCode::WalletNotFound => "WALLET_NOT_FOUND",
            ErrorCode::InvalidPayload => "INVALID_PAYLOAD",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ProofNotFound => "PROOF_NOT_FOUND",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_are_stable() {
        assert_eq!(
            ErrorCode::CanonicalSchemaViolation.as_str(),
            "CANONICAL_SCHEMA_VIOLATION"
        );
        assert_eq!(ErrorCode::LedgerHashMismatch.to_string(), "LEDGER_HASH_MISMATCH");
    }
}
