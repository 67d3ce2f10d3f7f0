//! End-to-end chain properties: gapless sequences under producer
//! concurrency, a valid chain after arbitrary interleaving, and
//! tamper detection in the verification pass.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use proveniq_hash::hash_payload;
use proveniq_ledger::{
    record_checkpoint_if_head, verify_range, AppendEngine, EnvelopeValidator, ValidatorConfig,
};
use proveniq_store_core::prelude::*;
use proveniq_store_memory::MemoryStore;
use proveniq_types::envelope::{CanonicalEnvelope, Subject};

fn engine() -> Arc<AppendEngine<MemoryStore>> {
    Arc::new(AppendEngine::new(
        Arc::new(MemoryStore::new()),
        EnvelopeValidator::new(ValidatorConfig::single_version("1.0")),
    ))
}

fn envelope(key: &str, payload: serde_json::Value) -> CanonicalEnvelope {
    CanonicalEnvelope {
        schema_version: "1.0".into(),
        event_type: "HOME_PHOTO_ADDED".into(),
        occurred_at: Utc::now(),
        correlation_id: "corr".into(),
        idempotency_key: key.into(),
        producer: "home-app".into(),
        producer_version: "1.0.0".into(),
        source: None,
        subject: Subject {
            asset_id: Some("A".into()),
            anchor_id: None,
            actor_id: None,
        },
        canonical_hash_hex: hash_payload(&payload),
        payload,
        signatures: vec![],
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_producers_get_gapless_sequences_and_a_valid_chain() {
    const PRODUCERS: usize = 32;
    const EVENTS_PER_PRODUCER: usize = 10;

    let engine = engine();
    let mut handles = Vec::new();
    for producer in 0..PRODUCERS {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let mut sequences = Vec::new();
            for n in 0..EVENTS_PER_PRODUCER {
                let receipt = engine
                    .append(envelope(
                        &format!("p{producer}-e{n}"),
                        json!({"producer": producer, "n": n}),
                    ))
                    .await
                    .expect("append");
                assert!(!receipt.deduped);
                sequences.push(receipt.sequence_number);
            }
            sequences
        }));
    }

    let mut all_sequences = Vec::new();
    for handle in handles {
        all_sequences.extend(handle.await.expect("join"));
    }

    // Gapless and dense from 1.
    all_sequences.sort_unstable();
    let expected: Vec<u64> = (1..=(PRODUCERS * EVENTS_PER_PRODUCER) as u64).collect();
    assert_eq!(all_sequences, expected);

    // Each producer observed sequences in the order of its commits.
    let store = engine.store();
    let entries = store
        .entries_in_range(1, None, (PRODUCERS * EVENTS_PER_PRODUCER) as u32)
        .await
        .unwrap();
    for pair in entries.windows(2) {
        assert_eq!(
            pair[1].previous_hash.as_deref(),
            Some(pair[0].entry_hash.as_str())
        );
    }

    let report = verify_range(store.as_ref(), 1, None, 100_000).await.unwrap();
    assert!(report.valid, "errors: {:?}", report.errors);
    assert_eq!(report.entries_checked, (PRODUCERS * EVENTS_PER_PRODUCER) as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_duplicates_resolve_to_one_entry() {
    const SUBMITTERS: usize = 16;

    let engine = engine();
    let payload = json!({"asset_id": "A"});

    let mut handles = Vec::new();
    for _ in 0..SUBMITTERS {
        let engine = Arc::clone(&engine);
        let payload = payload.clone();
        handles.push(tokio::spawn(async move {
            engine.append(envelope("same-key", payload)).await.expect("append")
        }));
    }

    let mut receipts = Vec::new();
    for handle in handles {
        receipts.push(handle.await.expect("join"));
    }

    assert_eq!(engine.store().entry_count().await, 1);
    let non_deduped = receipts.iter().filter(|r| !r.deduped).count();
    assert_eq!(non_deduped, 1);
    for receipt in &receipts {
        assert_eq!(receipt.sequence_number, receipts[0].sequence_number);
        assert_eq!(receipt.entry_hash, receipts[0].entry_hash);
    }
}

#[tokio::test]
async fn verification_detects_tampered_rows() {
    let store = MemoryStore::new();

    // Hand-build a two-entry chain where the second entry's payload no
    // longer matches its stored hash.
    let payload1 = json!({"asset_id": "A"});
    let created = Utc::now();
    let ph1 = hash_payload(&payload1);
    let ts1 = proveniq_hash::timestamp_string(&created);
    let hash1 = proveniq_hash::hash_entry(&ph1, None, "home", "HOME_ASSET_REGISTERED", &ts1);
    let entry1 = LedgerEntry {
        id: Uuid::new_v4(),
        sequence_number: 1,
        event_type: "HOME_ASSET_REGISTERED".into(),
        schema_version: "1.0".into(),
        source: "home".into(),
        producer: "home-app".into(),
        correlation_id: None,
        actor_id: None,
        asset_id: Some("A".into()),
        anchor_id: None,
        payload: payload1,
        payload_hash: ph1.clone(),
        previous_hash: None,
        entry_hash: hash1.clone(),
        asset_state_hash: None,
        evidence_set_hash: None,
        ruleset_version: None,
        created_at: created,
        idempotency_key: "k1".into(),
    };
    let tampered = LedgerEntry {
        id: Uuid::new_v4(),
        sequence_number: 2,
        event_type: "HOME_PHOTO_ADDED".into(),
        schema_version: "1.0".into(),
        source: "home".into(),
        producer: "home-app".into(),
        correlation_id: None,
        actor_id: None,
        asset_id: Some("A".into()),
        anchor_id: None,
        // Payload was altered after commit; the stored hash is stale.
        payload: json!({"p": "altered"}),
        payload_hash: hash_payload(&json!({"p": "original"})),
        previous_hash: Some(hash1),
        entry_hash: "not-even-a-hash".into(),
        asset_state_hash: None,
        evidence_set_hash: None,
        ruleset_version: None,
        created_at: created,
        idempotency_key: "k2".into(),
    };
    store.append(&entry1).await.unwrap();
    store.append(&tampered).await.unwrap();

    let report = verify_range(&store, 1, None, 100).await.unwrap();
    assert!(!report.valid);
    assert!(report.errors.iter().any(|e| e.contains("payload hash mismatch")));
    assert!(report.errors.iter().any(|e| e.contains("entry hash mismatch")));

    // Invalid passes never checkpoint.
    let checkpoint = record_checkpoint_if_head(&store, &report).await.unwrap();
    assert!(checkpoint.is_none());
}

#[tokio::test]
async fn valid_pass_reaching_head_records_a_checkpoint() {
    let engine = engine();
    for n in 0..5 {
        engine
            .append(envelope(&format!("k{n}"), json!({"n": n})))
            .await
            .unwrap();
    }

    let store = engine.store();
    let report = verify_range(store.as_ref(), 1, None, 100).await.unwrap();
    assert!(report.valid);

    let checkpoint = record_checkpoint_if_head(store.as_ref(), &report)
        .await
        .unwrap()
        .expect("checkpoint recorded");
    assert_eq!(checkpoint.checkpoint_sequence, 5);
    assert_eq!(checkpoint.entries_count, 5);

    let latest = store.latest_checkpoint().await.unwrap().unwrap();
    assert_eq!(latest.checkpoint_sequence, 5);
}
