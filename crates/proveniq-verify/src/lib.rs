#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **proveniq-verify** – Event-sourced verification replay and proof views.
//!
//! The replay reducer is a pure function over an asset's ledger history;
//! it is the single source of verification truth, used online for reads
//! and offline for read-model rebuilds. Proof views compose the reducer
//! with stored proof metadata to answer "was this asset verified, and is
//! that statement still good".

mod cache;
mod proof;
mod reducer;

pub use cache::{rebuild_read_models, refresh_verification_cache, RebuildReport};
pub use proof::{IssueProofRequest, ProofError, ProofService, ProofValidation};
pub use reducer::{reduce, VerificationResult, VerificationStatus};
