#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **proveniq-store-core** – Core storage abstractions for the Proveniq ledger.
//!
//! This crate defines the row types persisted by the ledger and the trait
//! contracts storage drivers implement. It sits between the primitive types
//! crate and the concrete drivers (memory, SQLite) so that the append
//! engine, the replay reducer and the delivery worker never name a driver.
//!
//! The ledger table is append-only: drivers must reject updates and deletes
//! of committed entries at the storage level, not merely by convention.

mod rows;
mod traits;

pub use rows::*;
pub use traits::*;

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors surfaced by storage drivers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An entry with this idempotency key is already committed. The append
    /// engine converts this into an idempotent dedup response.
    #[error("duplicate idempotency key")]
    DuplicateIdempotencyKey,
    /// A subscription with the same (subscriber_id, webhook_url) exists.
    #[error("subscription already exists for this subscriber and url")]
    SubscriptionExists,
    /// Two writers raced on the same chain position. Retriable; the unique
    /// sequence constraint kept the chain linear.
    #[error("write conflict: {0}")]
    WriteConflict(String),
    /// Anything else the backend reports.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::{
        AuditRecord, AuditStore, CheckpointStore, DeadLetter, DeliveryStats, DeliveryStatus,
        DeliveryStore, EventFilter, EvidenceSnapshot, IntegrityCheckpoint, LedgerEntry,
        LedgerStats, LedgerStore, ProjectionStore, ProofView, ProofViewStore, Store, StoreError,
        Subscription, SubscriptionStore, VerificationCacheRow, WebhookDelivery,
    };
}
