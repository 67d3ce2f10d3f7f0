//! HTTP surface.
//!
//! All JSON, all authenticated by the admin API key except `GET /health`.
//! Handlers stay thin: parse, clamp, delegate to the engine / reducer /
//! worker, map errors through [`ApiError`].

use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use proveniq_ledger::{record_checkpoint_if_head, verify_range};
use proveniq_store_core::prelude::*;
use proveniq_types::envelope::{CanonicalEnvelope, LegacyEvent};
use proveniq_types::{taxonomy, ErrorCode};
use proveniq_verify::{
    rebuild_read_models, reduce, refresh_verification_cache, IssueProofRequest,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Hard cap on entry-listing page sizes.
const MAX_PAGE_LIMIT: u32 = 1000;
/// Default entry-listing page size.
const DEFAULT_PAGE_LIMIT: u32 = 100;
/// Hard cap on one integrity verification pass.
const MAX_VERIFY_LIMIT: u32 = 100_000;

//─────────────────────────────
//  Router assembly
//─────────────────────────────

/// Build the full router over the given state.
pub fn router<S: Store + 'static>(state: AppState<S>) -> Router {
    let authenticated = Router::new()
        .route("/events/canonical", post(ingest_canonical))
        .route("/events", post(ingest_legacy).get(list_events))
        .route("/events/:id", get(get_event))
        .route("/assets/:id/events", get(asset_events))
        .route("/assets/:id/verification", get(asset_verification))
        .route("/anchors/:id/events", get(anchor_events))
        .route("/integrity/verify", get(integrity_verify))
        .route("/stats", get(stats))
        .route("/subscriptions", post(create_subscription).get(list_subscriptions))
        .route(
            "/subscriptions/:id",
            get(get_subscription).delete(delete_subscription),
        )
        .route("/webhooks/stats", get(webhook_stats))
        .route("/webhooks/process", post(process_webhooks))
        .route("/webhooks/dead-letter", get(list_dead_letters))
        .route("/webhooks/dead-letter/:id/retry", post(retry_dead_letter))
        .route("/proofs", post(issue_proof))
        .route("/proofs/:id", get(get_proof))
        .route("/proofs/:id/revoke", post(revoke_proof))
        .route("/proofs/:id/validate", get(validate_proof))
        .route("/admin/rebuild-read-models", post(rebuild))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key::<S>,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//─────────────────────────────
//  Authentication
//─────────────────────────────

async fn require_api_key<S: Store + 'static>(
    State(state): State<AppState<S>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let supplied = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            request
                .headers()
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        });

    match supplied {
        None => Err(ApiError::unauthorized()),
        Some(key) if key == state.config.admin_api_key => Ok(next.run(request).await),
        Some(_) => Err(ApiError::forbidden()),
    }
}

//─────────────────────────────
//  Query shapes
//─────────────────────────────

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<u32>,
    offset: Option<u64>,
}

impl PageQuery {
    fn clamp(&self) -> (u32, u64) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        (limit, self.offset.unwrap_or(0))
    }
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    event_type: Option<String>,
    source: Option<String>,
    correlation_id: Option<String>,
    asset_id: Option<String>,
    anchor_id: Option<String>,
    from_sequence: Option<u64>,
    limit: Option<u32>,
    offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    from: Option<u64>,
    to: Option<u64>,
    limit: Option<u32>,
}

//─────────────────────────────
//  Ingestion
//─────────────────────────────

async fn ingest_canonical<S: Store>(
    State(state): State<AppState<S>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let envelope: CanonicalEnvelope = serde_json::from_value(body).map_err(|e| {
        ApiError::bad_request(
            ErrorCode::CanonicalSchemaViolation,
            format!("envelope does not match the canonical schema: {e}"),
        )
    })?;
    append_and_respond(&state, envelope).await
}

async fn ingest_legacy<S: Store>(
    State(state): State<AppState<S>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let legacy: LegacyEvent = serde_json::from_value(body).map_err(|e| {
        ApiError::bad_request(ErrorCode::InvalidPayload, format!("malformed legacy event: {e}"))
    })?;
    let mut envelope = legacy
        .into_canonical(&state.config.active_schema_version)
        .map_err(|violation| {
            ApiError::bad_request(ErrorCode::CanonicalSchemaViolation, violation.to_string())
        })?;
    // Legacy producers never sent a canonical hash; fill in the recomputed
    // one so the advisory-hash audit stays quiet on this path.
    envelope.canonical_hash_hex = proveniq_hash::hash_payload(&envelope.payload);
    append_and_respond(&state, envelope).await
}

async fn append_and_respond<S: Store>(
    state: &AppState<S>,
    envelope: CanonicalEnvelope,
) -> Result<Response, ApiError> {
    let canonical_type = taxonomy::normalize(&envelope.event_type).map(|n| n.canonical);
    let asset_id = envelope.subject.asset_id.clone();

    let receipt = state.engine.append(envelope).await?;

    // The cache is a rebuildable convenience row; refresh failures must
    // not disturb the committed append.
    if !receipt.deduped {
        if let (Some(event_type), Some(asset_id)) = (canonical_type, asset_id) {
            if taxonomy::is_verification_relevant(&event_type) {
                if let Err(e) =
                    refresh_verification_cache(state.store.as_ref(), &asset_id).await
                {
                    warn!(error = %e, %asset_id, "verification cache refresh failed");
                }
            }
        }
    }

    let status = if receipt.deduped {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let body = Json(json!({
        "event_id": receipt.event_id,
        "sequence_number": receipt.sequence_number,
        "entry_hash": receipt.entry_hash,
        "committed_at": receipt.committed_at,
        "schema_version": receipt.schema_version,
        "idempotent": receipt.deduped,
    }));
    Ok((status, body).into_response())
}

//─────────────────────────────
//  Entry retrieval
//─────────────────────────────

async fn get_event<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::bad_request(ErrorCode::InvalidPayload, "malformed event id"))?;
    state
        .store
        .entry_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(ErrorCode::EventNotFound, "no such event"))
}

async fn list_events<S: Store>(
    State(state): State<AppState<S>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let page = PageQuery {
        limit: query.limit,
        offset: query.offset,
    };
    let (limit, offset) = page.clamp();
    let filter = EventFilter {
        event_type: query.event_type,
        source: query.source,
        correlation_id: query.correlation_id,
        asset_id: query.asset_id,
        anchor_id: query.anchor_id,
        from_sequence: query.from_sequence,
        limit,
        offset,
    };
    Ok(Json(state.store.entries_filtered(&filter).await?))
}

async fn asset_events<S: Store>(
    State(state): State<AppState<S>>,
    Path(asset_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let (limit, offset) = page.clamp();
    Ok(Json(
        state
            .store
            .entries_for_asset(&asset_id, Some(limit), offset)
            .await?,
    ))
}

async fn anchor_events<S: Store>(
    State(state): State<AppState<S>>,
    Path(anchor_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let (limit, offset) = page.clamp();
    Ok(Json(
        state
            .store
            .entries_for_anchor(&anchor_id, Some(limit), offset)
            .await?,
    ))
}

async fn asset_verification<S: Store>(
    State(state): State<AppState<S>>,
    Path(asset_id): Path<String>,
) -> Result<Json<proveniq_verify::VerificationResult>, ApiError> {
    let rows = state.store.entries_for_asset(&asset_id, None, 0).await?;
    Ok(Json(reduce(&asset_id, &rows, Utc::now())))
}

//─────────────────────────────
//  Integrity and stats
//─────────────────────────────

async fn integrity_verify<S: Store>(
    State(state): State<AppState<S>>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<proveniq_ledger::IntegrityReport>, ApiError> {
    let limit = query.limit.unwrap_or(MAX_VERIFY_LIMIT).clamp(1, MAX_VERIFY_LIMIT);
    let report = verify_range(
        state.store.as_ref(),
        query.from.unwrap_or(1),
        query.to,
        limit,
    )
    .await?;
    if let Err(e) = record_checkpoint_if_head(state.store.as_ref(), &report).await {
        warn!(error = %e, "failed to record integrity checkpoint");
    }
    Ok(Json(report))
}

async fn stats<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ledger = state.store.stats().await?;
    let deliveries = state.store.delivery_stats().await?;
    let subscriptions = state.store.subscriptions().await?.len();
    Ok(Json(json!({
        "ledger": ledger,
        "deliveries": deliveries,
        "subscriptions": subscriptions,
    })))
}

async fn health<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ledger = state.store.stats().await?;
    Ok(Json(json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION"),
        "chain": ledger,
    })))
}

//─────────────────────────────
//  Subscriptions
//─────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateSubscriptionRequest {
    subscriber_id: String,
    webhook_url: String,
    #[serde(default)]
    event_types: Vec<String>,
    #[serde(default)]
    source_filter: Vec<String>,
    secret: String,
    active: Option<bool>,
}

async fn create_subscription<S: Store>(
    State(state): State<AppState<S>>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    if request.subscriber_id.trim().is_empty()
        || request.webhook_url.trim().is_empty()
        || request.secret.trim().is_empty()
    {
        return Err(ApiError::bad_request(
            ErrorCode::InvalidPayload,
            "subscriber_id, webhook_url and secret are required",
        ));
    }
    let subscription = Subscription {
        id: Uuid::new_v4(),
        subscriber_id: request.subscriber_id,
        webhook_url: request.webhook_url,
        event_types: request.event_types,
        source_filter: request.source_filter,
        secret: request.secret,
        active: request.active.unwrap_or(true),
        created_at: Utc::now(),
    };
    state.store.create_subscription(&subscription).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn list_subscriptions<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<Subscription>>, ApiError> {
    Ok(Json(state.store.subscriptions().await?))
}

async fn get_subscription<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, ApiError> {
    state
        .store
        .subscription(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(ErrorCode::ItemNotFound, "no such subscription"))
}

async fn delete_subscription<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete_subscription(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(ErrorCode::ItemNotFound, "no such subscription"))
    }
}

//─────────────────────────────
//  Webhook operations
//─────────────────────────────

async fn webhook_stats<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<DeliveryStats>, ApiError> {
    Ok(Json(state.store.delivery_stats().await?))
}

async fn process_webhooks<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<proveniq_webhook::DrainReport>, ApiError> {
    Ok(Json(state.worker.process_pending().await?))
}

async fn list_dead_letters<S: Store>(
    State(state): State<AppState<S>>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<DeadLetter>>, ApiError> {
    let (limit, offset) = page.clamp();
    Ok(Json(state.store.dead_letters(limit, offset).await?))
}

async fn retry_dead_letter<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WebhookDelivery>, ApiError> {
    state
        .store
        .requeue_dead_letter(&id, Utc::now())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(ErrorCode::ItemNotFound, "no such dead letter"))
}

//─────────────────────────────
//  Proof views
//─────────────────────────────

async fn issue_proof<S: Store>(
    State(state): State<AppState<S>>,
    Json(request): Json<IssueProofRequest>,
) -> Result<(StatusCode, Json<ProofView>), ApiError> {
    let proof = state.proofs.issue(request).await?;
    Ok((StatusCode::CREATED, Json(proof)))
}

async fn get_proof<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProofView>, ApiError> {
    Ok(Json(state.proofs.get(&id).await?))
}

#[derive(Debug, Default, Deserialize)]
struct RevokeRequest {
    revoked_by: Option<String>,
}

async fn revoke_proof<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    body: Option<Json<RevokeRequest>>,
) -> Result<Json<ProofView>, ApiError> {
    let revoked_by = body.and_then(|Json(r)| r.revoked_by);
    Ok(Json(state.proofs.revoke(&id, revoked_by).await?))
}

async fn validate_proof<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<proveniq_verify::ProofValidation>, ApiError> {
    Ok(Json(state.proofs.validate(&id, Utc::now()).await?))
}

//─────────────────────────────
//  Administration
//─────────────────────────────

async fn rebuild<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<proveniq_verify::RebuildReport>, ApiError> {
    Ok(Json(rebuild_read_models(state.store.as_ref()).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use proveniq_hash::hash_payload;
    use proveniq_store_memory::MemoryStore;
    use std::sync::Arc;
    use tower::ServiceExt;

    const API_KEY: &str = "test-admin-key-0123456789";

    fn test_state() -> AppState<MemoryStore> {
        let config = crate::config::ServiceConfig {
            database_url: "sqlite::memory:".into(),
            active_schema_version: "1.0".into(),
            allowed_schema_versions: vec!["1.0".into()],
            admin_api_key: API_KEY.into(),
            webhook_batch_size: 50,
            webhook_max_attempts: 5,
            webhook_backoff_base_secs: 60,
            webhook_backoff_cap_secs: 86_400,
            log_format: crate::config::LogFormat::Text,
        };
        AppState::build(Arc::new(MemoryStore::new()), config).unwrap()
    }

    fn canonical_body(event_type: &str, key: &str) -> serde_json::Value {
        let payload = json!({"asset_id": "A"});
        json!({
            "schema_version": "1.0",
            "event_type": event_type,
            "occurred_at": Utc::now().to_rfc3339(),
            "correlation_id": "corr-1",
            "idempotency_key": key,
            "producer": "home-app",
            "producer_version": "1.0.0",
            "subject": {"asset_id": "A"},
            "payload": payload,
            "canonical_hash_hex": hash_payload(&payload),
            "signatures": [],
        })
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", API_KEY)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_with_key(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-api-key", API_KEY)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_credentials() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "UP");
    }

    #[tokio::test]
    async fn everything_else_requires_the_api_key() {
        let app = router(test_state());
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stats")
                    .header("x-api-key", "wrong-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn canonical_ingest_is_201_then_200_on_replay() {
        let app = router(test_state());
        let body = canonical_body("HOME_ASSET_REGISTERED", "k1");

        let first = app
            .clone()
            .oneshot(post("/events/canonical", body.clone()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let first = json_body(first).await;
        assert_eq!(first["sequence_number"], 1);
        assert_eq!(first["idempotent"], false);

        let second = app.oneshot(post("/events/canonical", body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        let second = json_body(second).await;
        assert_eq!(second["sequence_number"], 1);
        assert_eq!(second["idempotent"], true);
        assert_eq!(second["entry_hash"], first["entry_hash"]);
    }

    #[tokio::test]
    async fn unknown_event_types_are_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(post(
                "/events/canonical",
                canonical_body("BILLING_CHARGED", "k1"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "INVALID_EVENT_TYPE");
    }

    #[tokio::test]
    async fn malformed_envelopes_are_schema_violations() {
        let app = router(test_state());
        let response = app
            .oneshot(post("/events/canonical", json!({"event_type": "HOME_X"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "CANONICAL_SCHEMA_VIOLATION");
    }

    #[tokio::test]
    async fn legacy_ingest_requires_an_idempotency_key() {
        let app = router(test_state());
        let response = app
            .oneshot(post(
                "/events",
                json!({
                    "source": "home",
                    "event_type": "HOME_PHOTO_ADDED",
                    "payload": {"p": 1},
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "CANONICAL_SCHEMA_VIOLATION");
    }

    #[tokio::test]
    async fn legacy_ingest_converts_and_commits() {
        let app = router(test_state());
        let response = app
            .clone()
            .oneshot(post(
                "/events",
                json!({
                    "source": "home",
                    "event_type": "HOME_PHOTO_ADDED",
                    "payload": {"p": 1},
                    "asset_id": "A",
                    "idempotency_key": "legacy-1",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let listed = app
            .oneshot(get_with_key("/events?event_type=HOME_PHOTO_ADDED"))
            .await
            .unwrap();
        let body = json_body(listed).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["source"], "home");
    }

    #[tokio::test]
    async fn integrity_verify_reports_a_valid_chain() {
        let app = router(test_state());
        for n in 0..3 {
            app.clone()
                .oneshot(post(
                    "/events/canonical",
                    canonical_body("HOME_PHOTO_ADDED", &format!("k{n}")),
                ))
                .await
                .unwrap();
        }

        let response = app
            .oneshot(get_with_key("/integrity/verify?from=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["entries_checked"], 3);
        assert_eq!(body["first_sequence"], 1);
        assert_eq!(body["last_sequence"], 3);
    }

    #[tokio::test]
    async fn subscription_crud_round_trips() {
        let app = router(test_state());
        let created = app
            .clone()
            .oneshot(post(
                "/subscriptions",
                json!({
                    "subscriber_id": "partner-1",
                    "webhook_url": "https://partner.test/hooks",
                    "event_types": ["HOME_PHOTO_ADDED"],
                    "secret": "s3cr3t",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let created = json_body(created).await;
        let id = created["id"].as_str().unwrap().to_string();

        // Duplicate (subscriber, url) registration conflicts.
        let duplicate = app
            .clone()
            .oneshot(post(
                "/subscriptions",
                json!({
                    "subscriber_id": "partner-1",
                    "webhook_url": "https://partner.test/hooks",
                    "secret": "s3cr3t",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let fetched = app
            .clone()
            .oneshot(get_with_key(&format!("/subscriptions/{id}")))
            .await
            .unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);

        let deleted = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/subscriptions/{id}"))
                    .header("x-api-key", API_KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let missing = app
            .oneshot(get_with_key(&format!("/subscriptions/{id}")))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_event_lookup_is_a_404() {
        let app = router(test_state());
        let response = app
            .oneshot(get_with_key(&format!("/events/{}", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"], "EVENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn verification_cache_refreshes_after_relevant_appends() {
        let state = test_state();
        let app = router(state.clone());
        app.clone()
            .oneshot(post(
                "/events/canonical",
                canonical_body("CLAIM_ADDED", "claim-1"),
            ))
            .await
            .unwrap();

        let cached = state.store.verification_cache("A").await.unwrap().unwrap();
        assert_eq!(cached.status, "UNVERIFIED");
    }
}
