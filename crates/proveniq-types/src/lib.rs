#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **proveniq-types** – Shared primitive data structures for the Proveniq ledger.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It defines the canonical event envelope, the closed event-type taxonomy,
//! and the stable error codes surfaced to producers. It makes no assumptions
//! about I/O, cryptography, or storage.

use uuid::Uuid;

//─────────────────────────────
//  Input limits
//─────────────────────────────

/// Maximum allowed size for a serialized event payload to prevent memory
/// exhaustion attacks.
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576; // 1MB

/// Maximum allowed length for an idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 256;

/// Maximum allowed length for an event type symbol.
pub const MAX_EVENT_TYPE_LEN: usize = 128;

/// Maximum allowed length for producer and source identifiers.
pub const MAX_IDENTIFIER_LEN: usize = 256;

//─────────────────────────────
//  Core identifiers
//─────────────────────────────

/// Unique identifier for a committed ledger entry (UUID v4).
pub type EventId = Uuid;

/// Strictly monotonic, gapless position in the global chain. Starts at 1.
pub type SequenceNumber = u64;

//─────────────────────────────
//  Modules
//─────────────────────────────

/// Canonical and legacy event envelopes with structural validation.
pub mod envelope;
/// Closed event-type taxonomy, family prefixes and legacy alias mapping.
pub mod taxonomy;
/// Stable error codes surfaced to API callers.
pub mod error;

pub use envelope::{CanonicalEnvelope, EnvelopeViolation, LegacyEvent, Signature, Subject};
pub use error::ErrorCode;
