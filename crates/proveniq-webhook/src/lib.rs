#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **proveniq-webhook** – Webhook delivery engine for the Proveniq ledger.
//!
//! Committed events fan out to registered subscriptions as signed HTTP
//! posts with at-least-once semantics: failures retry with exponential
//! backoff, exhausted deliveries land in the dead-letter queue with a
//! snapshot of the event. Receivers must treat `event_id` as their
//! deduplication key.

mod signature;
mod transport;
mod worker;

pub use signature::{
    sign_payload, verify_signature, SIGNATURE_HEADER, SUBSCRIPTION_HEADER, TIMESTAMP_HEADER,
};
pub use transport::{HttpTransport, PostOutcome, WebhookTransport};
pub use worker::{DeliveryWorker, DrainReport, WebhookError, WorkerConfig};
