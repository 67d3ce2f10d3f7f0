#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **proveniq-store-sqlite** – SQLite persistent storage driver for the
//! Proveniq ledger.
//!
//! Durable backend via sqlx with ACID transactions. The ledger table is
//! append-only at the database level: UPDATE and DELETE are rejected by
//! triggers, so a compromised process cannot quietly rewrite history.
//! Entry insert and webhook fan-out share one transaction, which is what
//! makes at-least-once delivery hold without an outbox cursor.

mod schema;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use proveniq_store_core::prelude::*;
use proveniq_store_core::CLAIM_TIMEOUT_SECS;
use proveniq_types::{EventId, SequenceNumber};

/// Upper bound on pooled connections per instance.
const MAX_CONNECTIONS: u32 = 10;

//─────────────────────────────
//  SQLite storage driver
//─────────────────────────────

/// A persistent ledger store backed by SQLite.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (or creates) a database at the given sqlx URL, e.g.
    /// `sqlite://data/ledger.db?mode=rwc`, and runs migrations.
    pub async fn open(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open database at {database_url}"))?;
        Self::from_pool(pool).await
    }

    /// Opens an in-memory database. Data is lost when the pool closes.
    pub async fn in_memory() -> anyhow::Result<Self> {
        // A single connection keeps every handle on the same in-memory db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool and runs migrations.
    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

//─────────────────────────────
//  Row helpers
//─────────────────────────────

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn opt_ts(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(ts)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(anyhow!("bad timestamp {raw:?}: {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Backend(anyhow!("bad uuid {raw:?}: {e}")))
}

fn parse_opt_uuid(raw: Option<String>) -> Result<Option<Uuid>, StoreError> {
    raw.as_deref().map(parse_uuid).transpose()
}

fn parse_json(raw: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Backend(anyhow!("bad stored json: {e}")))
}

fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        let message = db.message();
        if message.contains("ledger_entries.idempotency_key") {
            return StoreError::DuplicateIdempotencyKey;
        }
        if message.contains("ledger_entries.sequence_number") {
            return StoreError::WriteConflict(message.to_string());
        }
        if message.contains("event_subscriptions.subscriber_id") {
            return StoreError::SubscriptionExists;
        }
    }
    StoreError::Backend(err.into())
}

fn entry_from_row(row: &SqliteRow) -> Result<LedgerEntry, StoreError> {
    let sequence: i64 = row.get("sequence_number");
    Ok(LedgerEntry {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        sequence_number: sequence as SequenceNumber,
        event_type: row.get("event_type"),
        schema_version: row.get("schema_version"),
        source: row.get("source"),
        producer: row.get("producer"),
        correlation_id: row.get("correlation_id"),
        actor_id: row.get("actor_id"),
        asset_id: row.get("asset_id"),
        anchor_id: row.get("anchor_id"),
        payload: parse_json(&row.get::<String, _>("payload"))?,
        payload_hash: row.get("payload_hash"),
        previous_hash: row.get("previous_hash"),
        entry_hash: row.get("entry_hash"),
        asset_state_hash: row.get("asset_state_hash"),
        evidence_set_hash: row.get("evidence_set_hash"),
        ruleset_version: row.get("ruleset_version"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        idempotency_key: row.get("idempotency_key"),
    })
}

fn subscription_from_row(row: &SqliteRow) -> Result<Subscription, StoreError> {
    let event_types: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("event_types"))
            .map_err(|e| StoreError::Backend(anyhow!("bad event_types json: {e}")))?;
    let source_filter: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("source_filter"))
            .map_err(|e| StoreError::Backend(anyhow!("bad source_filter json: {e}")))?;
    Ok(Subscription {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        subscriber_id: row.get("subscriber_id"),
        webhook_url: row.get("webhook_url"),
        event_types,
        source_filter,
        secret: row.get("secret"),
        active: row.get::<i64, _>("active") != 0,
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

fn delivery_from_row(row: &SqliteRow) -> Result<WebhookDelivery, StoreError> {
    let status_raw: String = row.get("status");
    let status = DeliveryStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Backend(anyhow!("unknown delivery status {status_raw:?}")))?;
    Ok(WebhookDelivery {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        subscription_id: parse_uuid(&row.get::<String, _>("subscription_id"))?,
        event_id: parse_uuid(&row.get::<String, _>("event_id"))?,
        status,
        attempts: row.get::<i64, _>("attempts") as u32,
        last_attempt_at: parse_opt_ts(row.get("last_attempt_at"))?,
        next_retry_at: parse_ts(&row.get::<String, _>("next_retry_at"))?,
        claimed_at: parse_opt_ts(row.get("claimed_at"))?,
        last_error: row.get("last_error"),
        response_status: row
            .get::<Option<i64>, _>("response_status")
            .map(|s| s as u16),
        response_body: row.get("response_body"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

fn dead_letter_from_row(row: &SqliteRow) -> Result<DeadLetter, StoreError> {
    Ok(DeadLetter {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        delivery_id: parse_uuid(&row.get::<String, _>("delivery_id"))?,
        subscription_id: parse_uuid(&row.get::<String, _>("subscription_id"))?,
        event_id: parse_uuid(&row.get::<String, _>("event_id"))?,
        event_snapshot: parse_json(&row.get::<String, _>("event_snapshot"))?,
        failure_reason: row.get("failure_reason"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

fn proof_from_row(row: &SqliteRow) -> Result<ProofView, StoreError> {
    Ok(ProofView {
        proof_id: parse_uuid(&row.get::<String, _>("proof_id"))?,
        asset_id: row.get("asset_id"),
        verification_event_id: parse_uuid(&row.get::<String, _>("verification_event_id"))?,
        snapshot_hash: row.get("snapshot_hash"),
        asset_state_hash: row.get("asset_state_hash"),
        evidence_set_hash: row.get("evidence_set_hash"),
        ruleset_version: row.get("ruleset_version"),
        expires_at: parse_opt_ts(row.get("expires_at"))?,
        revoked_at: parse_opt_ts(row.get("revoked_at"))?,
        created_by: row.get("created_by"),
        scope: row.get("scope"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

//─────────────────────────────
//  Ledger
//─────────────────────────────

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO ledger_entries
            (id, sequence_number, event_type, schema_version, source, producer,
             correlation_id, actor_id, asset_id, anchor_id, payload, payload_hash,
             previous_hash, entry_hash, asset_state_hash, evidence_set_hash,
             ruleset_version, created_at, idempotency_key)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.sequence_number as i64)
        .bind(&entry.event_type)
        .bind(&entry.schema_version)
        .bind(&entry.source)
        .bind(&entry.producer)
        .bind(&entry.correlation_id)
        .bind(&entry.actor_id)
        .bind(&entry.asset_id)
        .bind(&entry.anchor_id)
        .bind(entry.payload.to_string())
        .bind(&entry.payload_hash)
        .bind(&entry.previous_hash)
        .bind(&entry.entry_hash)
        .bind(&entry.asset_state_hash)
        .bind(&entry.evidence_set_hash)
        .bind(&entry.ruleset_version)
        .bind(ts(&entry.created_at))
        .bind(&entry.idempotency_key)
        .execute(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        // Fan out deliveries inside the same transaction.
        let subscription_rows = sqlx::query("SELECT * FROM event_subscriptions WHERE active = 1")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        for row in &subscription_rows {
            let subscription = subscription_from_row(row)?;
            if !subscription.matches(&entry.event_type, &entry.source) {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO webhook_deliveries
                (id, subscription_id, event_id, status, attempts, next_retry_at, created_at)
                VALUES (?, ?, ?, 'pending', 0, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(subscription.id.to_string())
            .bind(entry.id.to_string())
            .bind(ts(&entry.created_at))
            .bind(ts(&entry.created_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        }

        tx.commit().await.map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn head(&self) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM ledger_entries ORDER BY sequence_number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entry_by_id(&self, id: &EventId) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query("SELECT * FROM ledger_entries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entry_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query("SELECT * FROM ledger_entries WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entry_at_sequence(
        &self,
        sequence: SequenceNumber,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query("SELECT * FROM ledger_entries WHERE sequence_number = ?")
            .bind(sequence as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entries_in_range(
        &self,
        from: SequenceNumber,
        to: Option<SequenceNumber>,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let to = to.map(|t| t as i64).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT * FROM ledger_entries
            WHERE sequence_number >= ? AND sequence_number <= ?
            ORDER BY sequence_number ASC
            LIMIT ?
            "#,
        )
        .bind(from.max(1) as i64)
        .bind(to)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn entries_for_asset(
        &self,
        asset_id: &str,
        limit: Option<u32>,
        offset: u64,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT * FROM ledger_entries WHERE asset_id = ?
            ORDER BY sequence_number ASC LIMIT ? OFFSET ?
            "#,
        )
        .bind(asset_id)
        .bind(limit)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn entries_for_anchor(
        &self,
        anchor_id: &str,
        limit: Option<u32>,
        offset: u64,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT * FROM ledger_entries WHERE anchor_id = ?
            ORDER BY sequence_number ASC LIMIT ? OFFSET ?
            "#,
        )
        .bind(anchor_id)
        .bind(limit)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn entries_filtered(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        // Dynamic WHERE assembly; every clause binds a value, nothing is
        // interpolated from caller input.
        let mut sql = String::from("SELECT * FROM ledger_entries WHERE 1=1");
        if filter.event_type.is_some() {
            sql.push_str(" AND event_type = ?");
        }
        if filter.source.is_some() {
            sql.push_str(" AND source = ?");
        }
        if filter.correlation_id.is_some() {
            sql.push_str(" AND correlation_id = ?");
        }
        if filter.asset_id.is_some() {
            sql.push_str(" AND asset_id = ?");
        }
        if filter.anchor_id.is_some() {
            sql.push_str(" AND anchor_id = ?");
        }
        if filter.from_sequence.is_some() {
            sql.push_str(" AND sequence_number >= ?");
        }
        sql.push_str(" ORDER BY sequence_number ASC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(v) = &filter.event_type {
            query = query.bind(v);
        }
        if let Some(v) = &filter.source {
            query = query.bind(v);
        }
        if let Some(v) = &filter.correlation_id {
            query = query.bind(v);
        }
        if let Some(v) = &filter.asset_id {
            query = query.bind(v);
        }
        if let Some(v) = &filter.anchor_id {
            query = query.bind(v);
        }
        if let Some(v) = filter.from_sequence {
            query = query.bind(v as i64);
        }
        query = query.bind(filter.limit as i64).bind(filter.offset as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn stats(&self) -> Result<LedgerStats, StoreError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM ledger_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?
            .get("n");
        let head = self.head().await?;
        Ok(LedgerStats {
            total_entries: total as u64,
            head_sequence: head.as_ref().map(|e| e.sequence_number),
            head_entry_hash: head.as_ref().map(|e| e.entry_hash.clone()),
            last_created_at: head.map(|e| e.created_at),
        })
    }
}

//─────────────────────────────
//  Subscriptions
//─────────────────────────────

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let event_types = serde_json::to_string(&subscription.event_types)
            .map_err(|e| StoreError::Backend(anyhow!(e)))?;
        let source_filter = serde_json::to_string(&subscription.source_filter)
            .map_err(|e| StoreError::Backend(anyhow!(e)))?;
        sqlx::query(
            r#"
            INSERT INTO event_subscriptions
            (id, subscriber_id, webhook_url, event_types, source_filter, secret, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(subscription.id.to_string())
        .bind(&subscription.subscriber_id)
        .bind(&subscription.webhook_url)
        .bind(event_types)
        .bind(source_filter)
        .bind(&subscription.secret)
        .bind(subscription.active as i64)
        .bind(ts(&subscription.created_at))
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;
        Ok(())
    }

    async fn subscription(&self, id: &Uuid) -> Result<Option<Subscription>, StoreError> {
        let row = sqlx::query("SELECT * FROM event_subscriptions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query("SELECT * FROM event_subscriptions ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn delete_subscription(&self, id: &Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM event_subscriptions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(result.rows_affected() > 0)
    }
}

//─────────────────────────────
//  Deliveries
//─────────────────────────────

#[async_trait]
impl DeliveryStore for SqliteStore {
    async fn claim_due_deliveries(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let claim_cutoff = now - Duration::seconds(CLAIM_TIMEOUT_SECS);
        let rows = sqlx::query(
            r#"
            UPDATE webhook_deliveries SET claimed_at = ?
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status = 'pending'
                  AND next_retry_at <= ?
                  AND (claimed_at IS NULL OR claimed_at < ?)
                ORDER BY created_at ASC
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(ts(&now))
        .bind(ts(&now))
        .bind(ts(&claim_cutoff))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter().map(delivery_from_row).collect()
    }

    async fn mark_delivered(
        &self,
        id: &Uuid,
        response_status: u16,
        response_body: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'delivered', attempts = attempts + 1, last_attempt_at = ?,
                claimed_at = NULL, response_status = ?, response_body = ?, last_error = NULL
            WHERE id = ?
            "#,
        )
        .bind(ts(&now))
        .bind(response_status as i64)
        .bind(response_body)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: &Uuid,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
        response_status: Option<u16>,
        response_body: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'pending', attempts = ?, last_attempt_at = ?, next_retry_at = ?,
                claimed_at = NULL, last_error = ?, response_status = ?, response_body = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts as i64)
        .bind(ts(&now))
        .bind(ts(&next_retry_at))
        .bind(error)
        .bind(response_status.map(|s| s as i64))
        .bind(response_body)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn mark_dead_letter(
        &self,
        id: &Uuid,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'dead_letter', attempts = ?, last_attempt_at = ?,
                claimed_at = NULL, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts as i64)
        .bind(ts(&now))
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn insert_dead_letter(&self, dead_letter: &DeadLetter) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO dead_letter_queue
            (id, delivery_id, subscription_id, event_id, event_snapshot, failure_reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(dead_letter.id.to_string())
        .bind(dead_letter.delivery_id.to_string())
        .bind(dead_letter.subscription_id.to_string())
        .bind(dead_letter.event_id.to_string())
        .bind(dead_letter.event_snapshot.to_string())
        .bind(&dead_letter.failure_reason)
        .bind(ts(&dead_letter.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn delivery(&self, id: &Uuid) -> Result<Option<WebhookDelivery>, StoreError> {
        let row = sqlx::query("SELECT * FROM webhook_deliveries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.as_ref().map(delivery_from_row).transpose()
    }

    async fn dead_letters(&self, limit: u32, offset: u64)
        -> Result<Vec<DeadLetter>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM dead_letter_queue ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter().map(dead_letter_from_row).collect()
    }

    async fn dead_letter(&self, id: &Uuid) -> Result<Option<DeadLetter>, StoreError> {
        let row = sqlx::query("SELECT * FROM dead_letter_queue WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.as_ref().map(dead_letter_from_row).transpose()
    }

    async fn requeue_dead_letter(
        &self,
        dead_letter_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookDelivery>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let Some(dead_row) = sqlx::query("SELECT * FROM dead_letter_queue WHERE id = ?")
            .bind(dead_letter_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?
        else {
            return Ok(None);
        };
        let dead = dead_letter_from_row(&dead_row)?;

        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'pending', attempts = 0, next_retry_at = ?,
                claimed_at = NULL, last_error = NULL
            WHERE id = ?
            "#,
        )
        .bind(ts(&now))
        .bind(dead.delivery_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        sqlx::query("DELETE FROM dead_letter_queue WHERE id = ?")
            .bind(dead_letter_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let row = sqlx::query("SELECT * FROM webhook_deliveries WHERE id = ?")
            .bind(dead.delivery_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.into()))?;
        row.as_ref().map(delivery_from_row).transpose()
    }

    async fn delivery_stats(&self) -> Result<DeliveryStats, StoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM webhook_deliveries GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        let mut stats = DeliveryStats::default();
        for row in rows {
            let n: i64 = row.get("n");
            match DeliveryStatus::parse(&row.get::<String, _>("status")) {
                Some(DeliveryStatus::Pending) => stats.pending = n as u64,
                Some(DeliveryStatus::Delivered) => stats.delivered = n as u64,
                Some(DeliveryStatus::Failed) => stats.failed = n as u64,
                Some(DeliveryStatus::DeadLetter) => stats.dead_letter = n as u64,
                None => {}
            }
        }
        Ok(stats)
    }
}

//─────────────────────────────
//  Proof views
//─────────────────────────────

#[async_trait]
impl ProofViewStore for SqliteStore {
    async fn insert_proof(&self, proof: &ProofView) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO proof_views
            (proof_id, asset_id, verification_event_id, snapshot_hash, asset_state_hash,
             evidence_set_hash, ruleset_version, expires_at, revoked_at, created_by,
             scope, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(proof.proof_id.to_string())
        .bind(&proof.asset_id)
        .bind(proof.verification_event_id.to_string())
        .bind(&proof.snapshot_hash)
        .bind(&proof.asset_state_hash)
        .bind(&proof.evidence_set_hash)
        .bind(&proof.ruleset_version)
        .bind(opt_ts(&proof.expires_at))
        .bind(opt_ts(&proof.revoked_at))
        .bind(&proof.created_by)
        .bind(&proof.scope)
        .bind(ts(&proof.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn proof(&self, proof_id: &Uuid) -> Result<Option<ProofView>, StoreError> {
        let row = sqlx::query("SELECT * FROM proof_views WHERE proof_id = ?")
            .bind(proof_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.as_ref().map(proof_from_row).transpose()
    }

    async fn revoke_proof(
        &self,
        proof_id: &Uuid,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE proof_views SET revoked_at = ? WHERE proof_id = ?")
            .bind(ts(&revoked_at))
            .bind(proof_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn proofs_for_asset(&self, asset_id: &str) -> Result<Vec<ProofView>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM proof_views WHERE asset_id = ? ORDER BY created_at DESC",
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter().map(proof_from_row).collect()
    }
}

//─────────────────────────────
//  Projections
//─────────────────────────────

#[async_trait]
impl ProjectionStore for SqliteStore {
    async fn upsert_evidence_snapshot(
        &self,
        snapshot: &EvidenceSnapshot,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO evidence_snapshots
            (asset_id, evidence_id, content_hash, storage_ref, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.asset_id)
        .bind(&snapshot.evidence_id)
        .bind(&snapshot.content_hash)
        .bind(&snapshot.storage_ref)
        .bind(snapshot.metadata.to_string())
        .bind(ts(&snapshot.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn evidence_for_asset(
        &self,
        asset_id: &str,
    ) -> Result<Vec<EvidenceSnapshot>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM evidence_snapshots WHERE asset_id = ? ORDER BY created_at ASC",
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter()
            .map(|row| {
                Ok(EvidenceSnapshot {
                    asset_id: row.get("asset_id"),
                    evidence_id: row.get("evidence_id"),
                    content_hash: row.get("content_hash"),
                    storage_ref: row.get("storage_ref"),
                    metadata: parse_json(&row.get::<String, _>("metadata"))?,
                    created_at: parse_ts(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }

    async fn upsert_verification_cache(
        &self,
        row: &VerificationCacheRow,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO verification_cache
            (asset_id, status, confidences, last_verification_event_id, active_freeze,
             ruleset_version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.asset_id)
        .bind(&row.status)
        .bind(row.confidences.to_string())
        .bind(row.last_verification_event_id.map(|u| u.to_string()))
        .bind(row.active_freeze as i64)
        .bind(&row.ruleset_version)
        .bind(ts(&row.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn verification_cache(
        &self,
        asset_id: &str,
    ) -> Result<Option<VerificationCacheRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM verification_cache WHERE asset_id = ?")
            .bind(asset_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.map(|row| {
            Ok(VerificationCacheRow {
                asset_id: row.get("asset_id"),
                status: row.get("status"),
                confidences: parse_json(&row.get::<String, _>("confidences"))?,
                last_verification_event_id: parse_opt_uuid(
                    row.get("last_verification_event_id"),
                )?,
                active_freeze: row.get::<i64, _>("active_freeze") != 0,
                ruleset_version: row.get("ruleset_version"),
                updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
            })
        })
        .transpose()
    }

    async fn truncate_derived(&self) -> Result<(), StoreError> {
        for table in ["evidence_snapshots", "verification_cache", "proof_views"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.into()))?;
        }
        Ok(())
    }
}

//─────────────────────────────
//  Audit and checkpoints
//─────────────────────────────

#[async_trait]
impl AuditStore for SqliteStore {
    async fn record_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO audit_log (id, event_id, action, detail, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.event_id.map(|u| u.to_string()))
        .bind(&record.action)
        .bind(record.detail.to_string())
        .bind(ts(&record.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn audit_log(&self, limit: u32, offset: u64) -> Result<Vec<AuditRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM audit_log ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter()
            .map(|row| {
                Ok(AuditRecord {
                    id: parse_uuid(&row.get::<String, _>("id"))?,
                    event_id: parse_opt_uuid(row.get("event_id"))?,
                    action: row.get("action"),
                    detail: parse_json(&row.get::<String, _>("detail"))?,
                    created_at: parse_ts(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn insert_checkpoint(
        &self,
        checkpoint: &IntegrityCheckpoint,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO integrity_checkpoints
            (id, checkpoint_sequence, checkpoint_hash, entries_count, verified_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.checkpoint_sequence as i64)
        .bind(&checkpoint.checkpoint_hash)
        .bind(checkpoint.entries_count as i64)
        .bind(ts(&checkpoint.verified_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn latest_checkpoint(&self) -> Result<Option<IntegrityCheckpoint>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM integrity_checkpoints ORDER BY verified_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        row.map(|row| {
            Ok(IntegrityCheckpoint {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                checkpoint_sequence: row.get::<i64, _>("checkpoint_sequence") as u64,
                checkpoint_hash: row.get("checkpoint_hash"),
                entries_count: row.get::<i64, _>("entries_count") as u64,
                verified_at: parse_ts(&row.get::<String, _>("verified_at"))?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(sequence: u64, key: &str) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            sequence_number: sequence,
            event_type: "HOME_PHOTO_ADDED".into(),
            schema_version: "1.0".into(),
            source: "home".into(),
            producer: "home-app".into(),
            correlation_id: Some("c1".into()),
            actor_id: None,
            asset_id: Some("A".into()),
            anchor_id: None,
            payload: json!({"p": 1}),
            payload_hash: "ph".into(),
            previous_hash: (sequence > 1).then(|| format!("hash-{}", sequence - 1)),
            entry_hash: format!("hash-{sequence}"),
            asset_state_hash: None,
            evidence_set_hash: None,
            ruleset_version: None,
            created_at: Utc::now(),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn round_trips_an_entry() {
        let store = SqliteStore::in_memory().await.unwrap();
        let e = entry(1, "k1");
        store.append(&e).await.unwrap();

        let fetched = store.entry_by_id(&e.id).await.unwrap().unwrap();
        // created_at is stored at millisecond precision.
        assert_eq!(fetched.id, e.id);
        assert_eq!(fetched.sequence_number, 1);
        assert_eq!(fetched.payload, e.payload);
        assert_eq!(fetched.entry_hash, e.entry_hash);
        assert_eq!(
            fetched.created_at.timestamp_millis(),
            e.created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_maps_to_typed_error() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append(&entry(1, "k1")).await.unwrap();
        let err = store.append(&entry(2, "k1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdempotencyKey));
    }

    #[tokio::test]
    async fn sequence_conflict_maps_to_write_conflict() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append(&entry(1, "k1")).await.unwrap();
        let err = store.append(&entry(1, "k2")).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteConflict(_)));
    }

    #[tokio::test]
    async fn ledger_rows_are_write_once() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append(&entry(1, "k1")).await.unwrap();

        let update = sqlx::query("UPDATE ledger_entries SET payload = '{}' WHERE sequence_number = 1")
            .execute(&store.pool)
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM ledger_entries WHERE sequence_number = 1")
            .execute(&store.pool)
            .await;
        assert!(delete.is_err());
    }

    #[tokio::test]
    async fn fan_out_respects_subscription_filters() {
        let store = SqliteStore::in_memory().await.unwrap();
        let matching = Subscription {
            id: Uuid::new_v4(),
            subscriber_id: "s1".into(),
            webhook_url: "https://example.test/a".into(),
            event_types: vec!["HOME_PHOTO_ADDED".into()],
            source_filter: vec![],
            secret: "sec".into(),
            active: true,
            created_at: Utc::now(),
        };
        let other = Subscription {
            id: Uuid::new_v4(),
            subscriber_id: "s2".into(),
            webhook_url: "https://example.test/b".into(),
            event_types: vec!["SERVICE_VISIT_LOGGED".into()],
            source_filter: vec![],
            secret: "sec".into(),
            active: true,
            created_at: Utc::now(),
        };
        store.create_subscription(&matching).await.unwrap();
        store.create_subscription(&other).await.unwrap();

        store.append(&entry(1, "k1")).await.unwrap();

        let due = store.claim_due_deliveries(10, Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].subscription_id, matching.id);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("ledger.db").display()
        );

        let e = entry(1, "k1");
        {
            let store = SqliteStore::open(&url).await.unwrap();
            store.append(&e).await.unwrap();
            store.close().await;
        }
        {
            let store = SqliteStore::open(&url).await.unwrap();
            let head = store.head().await.unwrap().unwrap();
            assert_eq!(head.id, e.id);
            store.close().await;
        }
    }
}
