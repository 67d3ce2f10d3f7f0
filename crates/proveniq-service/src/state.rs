//! Shared service state.

use std::sync::Arc;

use proveniq_ledger::AppendEngine;
use proveniq_store_core::Store;
use proveniq_verify::ProofService;
use proveniq_webhook::{DeliveryWorker, HttpTransport};

use crate::config::ServiceConfig;

/// Everything the handlers need, behind `Arc`s so the router clones are
/// cheap. Generic over the store so tests can run on the memory driver.
pub struct AppState<S> {
    /// Storage driver.
    pub store: Arc<S>,
    /// The single append engine for this process.
    pub engine: Arc<AppendEngine<S>>,
    /// Proof issuance and validation.
    pub proofs: Arc<ProofService<S>>,
    /// Delivery worker, shared with the background loop.
    pub worker: Arc<DeliveryWorker<S, HttpTransport>>,
    /// Resolved configuration.
    pub config: Arc<ServiceConfig>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            engine: Arc::clone(&self.engine),
            proofs: Arc::clone(&self.proofs),
            worker: Arc::clone(&self.worker),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: Store> AppState<S> {
    /// Wire up the full component stack over one store.
    pub fn build(store: Arc<S>, config: ServiceConfig) -> anyhow::Result<Self> {
        let engine = Arc::new(AppendEngine::new(
            Arc::clone(&store),
            proveniq_ledger::EnvelopeValidator::new(config.validator_config()),
        ));
        let proofs = Arc::new(ProofService::new(Arc::clone(&store), Arc::clone(&engine)));
        let worker = Arc::new(DeliveryWorker::new(
            Arc::clone(&store),
            HttpTransport::new()?,
            config.worker_config(),
        ));
        Ok(Self {
            store,
            engine,
            proofs,
            worker,
            config: Arc::new(config),
        })
    }
}
