//! Table and index definitions.
//!
//! Statements are idempotent and executed in order on every open. The
//! write-once triggers on `ledger_entries` are load-bearing: invariant I3
//! (no mutation of committed entries) is enforced here, not in Rust.

/// Migration statements, executed in order.
pub(crate) const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        id TEXT PRIMARY KEY,
        sequence_number INTEGER NOT NULL UNIQUE,
        event_type TEXT NOT NULL,
        schema_version TEXT NOT NULL,
        source TEXT NOT NULL,
        producer TEXT NOT NULL,
        correlation_id TEXT,
        actor_id TEXT,
        asset_id TEXT,
        anchor_id TEXT,
        payload TEXT NOT NULL,
        payload_hash TEXT NOT NULL,
        previous_hash TEXT,
        entry_hash TEXT NOT NULL,
        asset_state_hash TEXT,
        evidence_set_hash TEXT,
        ruleset_version TEXT,
        created_at TEXT NOT NULL,
        idempotency_key TEXT NOT NULL UNIQUE
    ) STRICT
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS ledger_entries_write_once_update
    BEFORE UPDATE ON ledger_entries
    BEGIN
        SELECT RAISE(ABORT, 'ledger entries are write-once');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS ledger_entries_write_once_delete
    BEFORE DELETE ON ledger_entries
    BEGIN
        SELECT RAISE(ABORT, 'ledger entries are write-once');
    END
    "#,
    "CREATE INDEX IF NOT EXISTS idx_entries_asset ON ledger_entries(asset_id)",
    "CREATE INDEX IF NOT EXISTS idx_entries_anchor ON ledger_entries(anchor_id)",
    "CREATE INDEX IF NOT EXISTS idx_entries_correlation ON ledger_entries(correlation_id)",
    "CREATE INDEX IF NOT EXISTS idx_entries_event_type ON ledger_entries(event_type)",
    "CREATE INDEX IF NOT EXISTS idx_entries_source ON ledger_entries(source)",
    "CREATE INDEX IF NOT EXISTS idx_entries_created_at ON ledger_entries(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS event_subscriptions (
        id TEXT PRIMARY KEY,
        subscriber_id TEXT NOT NULL,
        webhook_url TEXT NOT NULL,
        event_types TEXT NOT NULL,
        source_filter TEXT NOT NULL,
        secret TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        UNIQUE (subscriber_id, webhook_url)
    ) STRICT
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS webhook_deliveries (
        id TEXT PRIMARY KEY,
        subscription_id TEXT NOT NULL,
        event_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_attempt_at TEXT,
        next_retry_at TEXT NOT NULL,
        claimed_at TEXT,
        last_error TEXT,
        response_status INTEGER,
        response_body TEXT,
        created_at TEXT NOT NULL
    ) STRICT
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_deliveries_due
    ON webhook_deliveries(next_retry_at) WHERE status = 'pending'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dead_letter_queue (
        id TEXT PRIMARY KEY,
        delivery_id TEXT NOT NULL,
        subscription_id TEXT NOT NULL,
        event_id TEXT NOT NULL,
        event_snapshot TEXT NOT NULL,
        failure_reason TEXT NOT NULL,
        created_at TEXT NOT NULL
    ) STRICT
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS proof_views (
        proof_id TEXT PRIMARY KEY,
        asset_id TEXT NOT NULL,
        verification_event_id TEXT NOT NULL,
        snapshot_hash TEXT NOT NULL,
        asset_state_hash TEXT NOT NULL,
        evidence_set_hash TEXT NOT NULL,
        ruleset_version TEXT NOT NULL,
        expires_at TEXT,
        revoked_at TEXT,
        created_by TEXT,
        scope TEXT,
        created_at TEXT NOT NULL
    ) STRICT
    "#,
    "CREATE INDEX IF NOT EXISTS idx_proofs_asset ON proof_views(asset_id)",
    r#"
    CREATE TABLE IF NOT EXISTS verification_cache (
        asset_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        confidences TEXT NOT NULL,
        last_verification_event_id TEXT,
        active_freeze INTEGER NOT NULL DEFAULT 0,
        ruleset_version TEXT NOT NULL,
        updated_at TEXT NOT NULL
    ) STRICT
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS evidence_snapshots (
        asset_id TEXT NOT NULL,
        evidence_id TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        storage_ref TEXT,
        metadata TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (asset_id, evidence_id)
    ) STRICT
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS integrity_checkpoints (
        id TEXT PRIMARY KEY,
        checkpoint_sequence INTEGER NOT NULL,
        checkpoint_hash TEXT NOT NULL,
        entries_count INTEGER NOT NULL,
        verified_at TEXT NOT NULL
    ) STRICT
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_log (
        id TEXT PRIMARY KEY,
        event_id TEXT,
        action TEXT NOT NULL,
        detail TEXT NOT NULL,
        created_at TEXT NOT NULL
    ) STRICT
    "#,
    "CREATE INDEX IF NOT EXISTS idx_audit_event ON audit_log(event_id)",
];
