//! Delivery lifecycle against a scripted transport: acknowledgement,
//! the exponential retry ladder, dead-lettering, and requeue from the
//! dead-letter queue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use proveniq_store_core::prelude::*;
use proveniq_store_memory::MemoryStore;
use proveniq_webhook::{
    verify_signature, DeliveryWorker, PostOutcome, WebhookTransport, WorkerConfig,
    SIGNATURE_HEADER, SUBSCRIPTION_HEADER, TIMESTAMP_HEADER,
};

//─────────────────────────────
//  Scripted transport
//─────────────────────────────

#[derive(Debug, Clone)]
struct SeenRequest {
    url: String,
    headers: Vec<(&'static str, String)>,
    body: String,
}

/// Returns the scripted outcomes in order, then repeats the last one.
struct ScriptedTransport {
    script: Mutex<Vec<PostOutcome>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedTransport {
    fn new(script: Vec<PostOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
        })
    }

    async fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: &str,
    ) -> PostOutcome {
        self.seen.lock().await.push(SeenRequest {
            url: url.to_string(),
            headers: headers.to_vec(),
            body: body.to_string(),
        });
        let mut script = self.script.lock().await;
        if script.len() > 1 {
            script.remove(0)
        } else {
            script.first().cloned().unwrap_or_default()
        }
    }
}

fn ok_outcome() -> PostOutcome {
    PostOutcome {
        status: Some(200),
        body_prefix: Some("accepted".into()),
        error: None,
    }
}

fn server_error() -> PostOutcome {
    PostOutcome {
        status: Some(500),
        body_prefix: Some("boom".into()),
        error: None,
    }
}

//─────────────────────────────
//  Fixtures
//─────────────────────────────

fn entry(sequence: u64, key: &str) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::new_v4(),
        sequence_number: sequence,
        event_type: "HOME_PHOTO_ADDED".into(),
        schema_version: "1.0".into(),
        source: "home".into(),
        producer: "home-app".into(),
        correlation_id: None,
        actor_id: None,
        asset_id: Some("A".into()),
        anchor_id: None,
        payload: json!({"p": 1}),
        payload_hash: "ph".into(),
        previous_hash: None,
        entry_hash: format!("hash-{sequence}"),
        asset_state_hash: None,
        evidence_set_hash: None,
        ruleset_version: None,
        created_at: Utc::now(),
        idempotency_key: key.into(),
    }
}

async fn store_with_subscription(secret: &str) -> (Arc<MemoryStore>, Subscription) {
    let store = Arc::new(MemoryStore::new());
    let subscription = Subscription {
        id: Uuid::new_v4(),
        subscriber_id: "partner-1".into(),
        webhook_url: "https://partner.test/hooks".into(),
        event_types: vec![],
        source_filter: vec![],
        secret: secret.into(),
        active: true,
        created_at: Utc::now(),
    };
    store.create_subscription(&subscription).await.unwrap();
    store.append(&entry(1, "k1")).await.unwrap();
    (store, subscription)
}

fn worker(
    store: Arc<MemoryStore>,
    transport: Arc<ScriptedTransport>,
) -> DeliveryWorker<MemoryStore, Arc<ScriptedTransport>> {
    DeliveryWorker::new(store, transport, WorkerConfig::default())
}

async fn sole_delivery(store: &MemoryStore) -> WebhookDelivery {
    let mut all = store.all_deliveries().await;
    assert_eq!(all.len(), 1);
    all.pop().unwrap()
}

//─────────────────────────────
//  Tests
//─────────────────────────────

#[tokio::test]
async fn successful_delivery_is_signed_and_acknowledged() {
    let (store, subscription) = store_with_subscription("s3cr3t").await;
    let transport = ScriptedTransport::new(vec![ok_outcome()]);
    let worker = worker(Arc::clone(&store), Arc::clone(&transport));

    let report = worker.drain(Utc::now()).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.delivered, 1);

    let delivery = sole_delivery(&store).await;
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.response_status, Some(200));
    assert_eq!(delivery.response_body.as_deref(), Some("accepted"));

    // The request carried a verifiable signature over the exact body.
    let requests = transport.requests().await;
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.url, subscription.webhook_url);
    let header = |name: &str| {
        request
            .headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
            .unwrap()
    };
    assert_eq!(header(SUBSCRIPTION_HEADER), subscription.id.to_string());
    assert!(verify_signature(
        "s3cr3t",
        &header(TIMESTAMP_HEADER),
        &request.body,
        &header(SIGNATURE_HEADER),
    ));

    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body["data"]["sequence_number"], 1);
    assert_eq!(body["data"]["event_type"], "HOME_PHOTO_ADDED");
}

#[tokio::test]
async fn failing_endpoint_walks_the_backoff_ladder_into_the_dlq() {
    let (store, _) = store_with_subscription("s3cr3t").await;
    let transport = ScriptedTransport::new(vec![server_error()]);
    let worker = worker(Arc::clone(&store), Arc::clone(&transport));

    let mut now = Utc::now();
    let expected_delays = [60i64, 120, 240, 480];

    for (n, delay) in expected_delays.iter().enumerate() {
        let report = worker.drain(now).await.unwrap();
        assert_eq!(report.claimed, 1, "attempt {}", n + 1);
        assert_eq!(report.retried, 1);

        let delivery = sole_delivery(&store).await;
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.attempts, (n + 1) as u32);
        assert_eq!(delivery.response_status, Some(500));
        assert_eq!((delivery.next_retry_at - now).num_seconds(), *delay);

        // Not due yet: an immediate pass claims nothing.
        let idle = worker.drain(now + Duration::seconds(1)).await.unwrap();
        assert_eq!(idle.claimed, 0);

        now = delivery.next_retry_at + Duration::seconds(1);
    }

    // Fifth consecutive failure dead-letters the delivery.
    let report = worker.drain(now).await.unwrap();
    assert_eq!(report.dead_lettered, 1);

    let delivery = sole_delivery(&store).await;
    assert_eq!(delivery.status, DeliveryStatus::DeadLetter);
    assert_eq!(delivery.attempts, 5);

    let dead = store.dead_letters(10, 0).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].delivery_id, delivery.id);
    assert_eq!(dead[0].event_id, delivery.event_id);
    assert!(dead[0].failure_reason.contains("500"));
    assert_eq!(dead[0].event_snapshot["sequence_number"], 1);
}

#[tokio::test]
async fn recovery_mid_ladder_delivers() {
    let (store, _) = store_with_subscription("s3cr3t").await;
    let transport = ScriptedTransport::new(vec![server_error(), server_error(), ok_outcome()]);
    let worker = worker(Arc::clone(&store), Arc::clone(&transport));

    let mut now = Utc::now();
    for _ in 0..2 {
        worker.drain(now).await.unwrap();
        let delivery = sole_delivery(&store).await;
        now = delivery.next_retry_at + Duration::seconds(1);
    }

    let report = worker.drain(now).await.unwrap();
    assert_eq!(report.delivered, 1);
    let delivery = sole_delivery(&store).await;
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    assert_eq!(delivery.attempts, 3);
}

#[tokio::test]
async fn transport_failures_count_as_attempts() {
    let (store, _) = store_with_subscription("s3cr3t").await;
    let timeout = PostOutcome {
        status: None,
        body_prefix: None,
        error: Some("request failed: operation timed out".into()),
    };
    let transport = ScriptedTransport::new(vec![timeout]);
    let worker = worker(Arc::clone(&store), Arc::clone(&transport));

    worker.drain(Utc::now()).await.unwrap();
    let delivery = sole_delivery(&store).await;
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.attempts, 1);
    assert!(delivery.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn requeued_dead_letter_gets_a_fresh_ladder() {
    let (store, _) = store_with_subscription("s3cr3t").await;
    let transport = ScriptedTransport::new(vec![server_error()]);
    let worker = worker(Arc::clone(&store), Arc::clone(&transport));

    // Exhaust the ladder.
    let mut now = Utc::now();
    for _ in 0..5 {
        worker.drain(now).await.unwrap();
        now = now + Duration::days(1);
    }
    let dead = store.dead_letters(10, 0).await.unwrap();
    assert_eq!(dead.len(), 1);

    let refreshed = store
        .requeue_dead_letter(&dead[0].id, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.status, DeliveryStatus::Pending);
    assert_eq!(refreshed.attempts, 0);
    assert!(store.dead_letters(10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_subscription_is_a_retriable_diagnostic() {
    let (store, subscription) = store_with_subscription("s3cr3t").await;
    store.delete_subscription(&subscription.id).await.unwrap();

    let transport = ScriptedTransport::new(vec![ok_outcome()]);
    let worker = worker(Arc::clone(&store), Arc::clone(&transport));

    let report = worker.drain(Utc::now()).await.unwrap();
    assert_eq!(report.retried, 1);

    let delivery = sole_delivery(&store).await;
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert!(delivery
        .last_error
        .unwrap()
        .contains("subscription no longer exists"));
    // Nothing was posted.
    assert!(transport.requests().await.is_empty());
}
