#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **proveniq-ledger** – Ingestion engine and hash-chain state machine.
//!
//! This crate owns the write path: envelope validation and normalization,
//! the serialized append under the process-global chain lock, and chain
//! integrity verification. Everything here is deterministic given the
//! store's contents; the only ambient inputs are the commit clock and the
//! generated entry id.

mod engine;
mod integrity;
/// Projection rules from entries to derived rows.
pub mod projection;
mod validator;

pub use engine::{AppendEngine, AppendError, AppendReceipt, CHAIN_LOCK_KEY};
pub use integrity::{record_checkpoint_if_head, verify_range, IntegrityReport};
pub use validator::{EnvelopeValidator, ValidatedEnvelope, ValidationError, ValidatorConfig};
