//! The delivery worker.
//!
//! Cooperative drain loop: claim a batch of due pending deliveries, post
//! each one, and either acknowledge, reschedule with exponential backoff,
//! or dead-letter after the attempt budget is spent. Many workers may run
//! concurrently; the claim column keeps any delivery on exactly one
//! worker at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use proveniq_store_core::prelude::*;

use crate::signature::{sign_payload, SIGNATURE_HEADER, SUBSCRIPTION_HEADER, TIMESTAMP_HEADER};
use crate::transport::{truncate_body, PostOutcome, WebhookTransport};

//─────────────────────────────
//  Configuration
//─────────────────────────────

/// Worker tuning. The defaults match the documented retry ladder:
/// 60 s, 120 s, 240 s, 480 s, then dead-letter on the fifth failure.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Deliveries claimed per drain pass.
    pub batch_size: u32,
    /// Attempt budget before dead-lettering.
    pub max_attempts: u32,
    /// First retry delay in seconds; doubles per failure.
    pub backoff_base_secs: u64,
    /// Ceiling on any retry delay in seconds.
    pub backoff_cap_secs: u64,
    /// Sleep between drain passes in [`DeliveryWorker::run`].
    pub tick_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_attempts: 5,
            backoff_base_secs: 60,
            backoff_cap_secs: 86_400,
            tick_interval: Duration::from_secs(30),
        }
    }
}

/// Counters from one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Deliveries claimed this pass.
    pub claimed: u64,
    /// Acknowledged with a 2xx.
    pub delivered: u64,
    /// Rescheduled for a later retry.
    pub retried: u64,
    /// Moved to the dead-letter queue.
    pub dead_lettered: u64,
}

/// Delivery-engine failures (storage only; endpoint failures are data,
/// not errors).
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Storage failed mid-drain.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

//─────────────────────────────
//  Worker
//─────────────────────────────

/// Drains the delivery queue against a transport.
pub struct DeliveryWorker<S, T> {
    store: Arc<S>,
    transport: T,
    config: WorkerConfig,
}

impl<S: Store, T: WebhookTransport> DeliveryWorker<S, T> {
    /// Build a worker.
    pub fn new(store: Arc<S>, transport: T, config: WorkerConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Run one drain pass at the current wall clock.
    pub async fn process_pending(&self) -> Result<DrainReport, WebhookError> {
        self.drain(Utc::now()).await
    }

    /// Run one drain pass at an explicit instant. Time is a parameter so
    /// the retry ladder is testable without sleeping.
    pub async fn drain(&self, now: DateTime<Utc>) -> Result<DrainReport, WebhookError> {
        let batch = self
            .store
            .claim_due_deliveries(self.config.batch_size, now)
            .await?;
        let mut report = DrainReport {
            claimed: batch.len() as u64,
            ..Default::default()
        };

        for delivery in batch {
            match self.process_one(&delivery, now).await? {
                Disposition::Delivered => report.delivered += 1,
                Disposition::Retried => report.retried += 1,
                Disposition::DeadLettered => report.dead_lettered += 1,
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                delivered = report.delivered,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                "drain pass finished"
            );
        }
        Ok(report)
    }

    /// Loop forever with the configured tick, until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.process_pending().await {
                        warn!(error = %e, "drain pass failed");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("delivery worker stopped");
    }

    async fn process_one(
        &self,
        delivery: &WebhookDelivery,
        now: DateTime<Utc>,
    ) -> Result<Disposition, WebhookError> {
        let subscription = self.store.subscription(&delivery.subscription_id).await?;
        let entry = self.store.entry_by_id(&delivery.event_id).await?;

        let (subscription, entry) = match (subscription, entry) {
            (Some(s), Some(e)) if s.active => (s, e),
            (Some(_), Some(_)) => {
                return self
                    .handle_failure(delivery, None, "subscription is inactive".into(), None, now)
                    .await;
            }
            (subscription, entry) => {
                let diagnostic = match (subscription.is_some(), entry.is_some()) {
                    (false, _) => "subscription no longer exists",
                    (_, false) => "ledger entry no longer exists",
                    _ => "delivery references missing rows",
                };
                return self
                    .handle_failure(delivery, None, diagnostic.into(), None, now)
                    .await;
            }
        };

        let body = delivery_payload(delivery, &entry, now).to_string();
        let timestamp = now.timestamp().to_string();
        let signature = sign_payload(&subscription.secret, &timestamp, &body);
        let headers = [
            (SIGNATURE_HEADER, signature),
            (TIMESTAMP_HEADER, timestamp),
            (SUBSCRIPTION_HEADER, subscription.id.to_string()),
        ];

        let outcome = self
            .transport
            .post(&subscription.webhook_url, &headers, &body)
            .await;

        if outcome.is_success() {
            let status = outcome.status.unwrap_or(200);
            self.store
                .mark_delivered(&delivery.id, status, outcome.body_prefix.clone(), now)
                .await?;
            debug!(delivery_id = %delivery.id, status, "delivered");
            return Ok(Disposition::Delivered);
        }

        let reason = outcome.describe_failure();
        self.handle_failure(delivery, Some(&entry), reason, Some(&outcome), now)
            .await
    }

    async fn handle_failure(
        &self,
        delivery: &WebhookDelivery,
        entry: Option<&LedgerEntry>,
        reason: String,
        outcome: Option<&PostOutcome>,
        now: DateTime<Utc>,
    ) -> Result<Disposition, WebhookError> {
        let attempts = delivery.attempts + 1;

        if attempts >= self.config.max_attempts {
            self.store
                .mark_dead_letter(&delivery.id, attempts, &reason, now)
                .await?;
            let snapshot = entry
                .map(|e| json!(e))
                .unwrap_or_else(|| json!({"event_id": delivery.event_id.to_string()}));
            self.store
                .insert_dead_letter(&DeadLetter {
                    id: Uuid::new_v4(),
                    delivery_id: delivery.id,
                    subscription_id: delivery.subscription_id,
                    event_id: delivery.event_id,
                    event_snapshot: snapshot,
                    failure_reason: reason.clone(),
                    created_at: now,
                })
                .await?;
            warn!(delivery_id = %delivery.id, attempts, reason = %reason, "dead-lettered");
            return Ok(Disposition::DeadLettered);
        }

        let next_retry_at = now + chrono::Duration::seconds(self.backoff_secs(attempts) as i64);
        self.store
            .mark_retry(
                &delivery.id,
                attempts,
                next_retry_at,
                &reason,
                outcome.and_then(|o| o.status),
                outcome
                    .and_then(|o| o.body_prefix.as_deref())
                    .map(truncate_body),
                now,
            )
            .await?;
        debug!(delivery_id = %delivery.id, attempts, %next_retry_at, "rescheduled");
        Ok(Disposition::Retried)
    }

    /// Delay after the n-th consecutive failure:
    /// `min(base * 2^(n-1), cap)` seconds.
    fn backoff_secs(&self, attempts: u32) -> u64 {
        let doublings = attempts.saturating_sub(1).min(32);
        self.config
            .backoff_base_secs
            .saturating_mul(1u64 << doublings)
            .min(self.config.backoff_cap_secs)
    }
}

enum Disposition {
    Delivered,
    Retried,
    DeadLettered,
}

/// The body posted to receivers.
fn delivery_payload(
    delivery: &WebhookDelivery,
    entry: &LedgerEntry,
    now: DateTime<Utc>,
) -> serde_json::Value {
    json!({
        "event_id": entry.id.to_string(),
        "subscription_id": delivery.subscription_id.to_string(),
        "timestamp": now.to_rfc3339(),
        "data": {
            "sequence_number": entry.sequence_number,
            "event_type": entry.event_type,
            "source": entry.source,
            "schema_version": entry.schema_version,
            "correlation_id": entry.correlation_id,
            "asset_id": entry.asset_id,
            "anchor_id": entry.anchor_id,
            "payload": entry.payload,
            "payload_hash": entry.payload_hash,
            "entry_hash": entry.entry_hash,
            "created_at": entry.created_at.to_rfc3339(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker_with_base(base: u64, cap: u64) -> WorkerConfig {
        WorkerConfig {
            backoff_base_secs: base,
            backoff_cap_secs: cap,
            ..Default::default()
        }
    }

    #[test]
    fn backoff_doubles_from_base() {
        let config = worker_with_base(60, 86_400);
        let worker = DeliveryWorker {
            store: Arc::new(proveniq_store_memory::MemoryStore::new()),
            transport: NullTransport,
            config,
        };
        assert_eq!(worker.backoff_secs(1), 60);
        assert_eq!(worker.backoff_secs(2), 120);
        assert_eq!(worker.backoff_secs(3), 240);
        assert_eq!(worker.backoff_secs(4), 480);
        assert_eq!(worker.backoff_secs(5), 960);
    }

    #[test]
    fn backoff_is_capped_at_a_day() {
        let config = worker_with_base(60, 86_400);
        let worker = DeliveryWorker {
            store: Arc::new(proveniq_store_memory::MemoryStore::new()),
            transport: NullTransport,
            config,
        };
        assert_eq!(worker.backoff_secs(20), 86_400);
        // Shift amounts beyond u64 width must not wrap.
        assert_eq!(worker.backoff_secs(u32::MAX), 86_400);
    }

    struct NullTransport;

    #[async_trait::async_trait]
    impl WebhookTransport for NullTransport {
        async fn post(
            &self,
            _url: &str,
            _headers: &[(&'static str, String)],
            _body: &str,
        ) -> PostOutcome {
            PostOutcome::default()
        }
    }
}
