//! PostgreSQL store integration tests
//!
//! Environment:
//! - TEST_DATABASE_URL: PostgreSQL connection string. Tests are skipped when unset.

use conversation_service::domain::{Actor, DeleteOutcome, OrderBy};
use conversation_service::repository::{ConversationStore, PgConversationStore};
use conversation_service::{ConversationLedger, LedgerError, LedgerSettings};
use futures::future::join_all;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

async fn pg_store() -> Option<PgConversationStore> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&url)
        .await
        .expect("Failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Some(PgConversationStore::new(pool))
}

fn ledger(store: PgConversationStore) -> ConversationLedger {
    ConversationLedger::new(Arc::new(store), LedgerSettings::default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_views_are_atomic() {
    let Some(store) = pg_store().await else {
        return;
    };
    let ledger = ledger(store);
    let conversation = ledger.create(json!({"items": [1]}), None).await.unwrap();

    let tasks = (0..50).map(|_| {
        let ledger = ledger.clone();
        let id = conversation.id;
        tokio::spawn(async move { ledger.record_view(id).await })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(ledger.lookup(conversation.id).await.unwrap().view_count, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_toggles_by_distinct_actors_all_count() {
    let Some(store) = pg_store().await else {
        return;
    };
    let ledger = ledger(store);
    let conversation = ledger.create(json!({"items": [1]}), None).await.unwrap();

    let tasks = (0..20).map(|n| {
        let ledger = ledger.clone();
        let id = conversation.id;
        tokio::spawn(async move {
            let actor = Actor::User(format!("pg-actor-{}-{}", id, n));
            ledger.toggle_save(id, Some(&actor), None).await
        })
    });
    for result in join_all(tasks).await {
        assert!(result.unwrap().unwrap().saved);
    }

    assert_eq!(ledger.lookup(conversation.id).await.unwrap().save_count, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deletes_apply_exactly_once() {
    let Some(store) = pg_store().await else {
        return;
    };
    let ledger = ledger(store);
    let conversation = ledger.create(json!({"items": [1]}), None).await.unwrap();

    let tasks = (0..12).map(|_| {
        let ledger = ledger.clone();
        let id = conversation.id;
        tokio::spawn(async move { ledger.soft_delete(id, None).await })
    });
    let outcomes: Vec<DeleteOutcome> = join_all(tasks)
        .await
        .into_iter()
        .map(|result| result.unwrap().unwrap())
        .collect();

    assert_eq!(
        outcomes
            .iter()
            .filter(|outcome| **outcome == DeleteOutcome::Deleted)
            .count(),
        1
    );
    assert!(matches!(
        ledger.lookup(conversation.id).await,
        Err(LedgerError::Gone(_))
    ));
}

#[tokio::test]
async fn request_keys_are_scoped_per_actor() {
    let Some(store) = pg_store().await else {
        return;
    };
    let ledger = ledger(store);
    let conversation = ledger.create(json!({"items": [1]}), None).await.unwrap();
    let key = format!("pg-shared-{}", conversation.id);

    for n in 0..2 {
        let actor = Actor::User(format!("pg-scoped-{}-{}", conversation.id, n));
        let outcome = ledger
            .toggle_save(conversation.id, Some(&actor), Some(&key))
            .await
            .unwrap();
        assert!(outcome.saved);
    }

    assert_eq!(ledger.lookup(conversation.id).await.unwrap().save_count, 2);
}

#[tokio::test]
async fn toggle_receipt_replays_outcome() {
    let Some(store) = pg_store().await else {
        return;
    };
    let ledger = ledger(store);
    let conversation = ledger.create(json!({"items": [1]}), None).await.unwrap();
    let actor = Actor::User(format!("pg-user-{}", conversation.id));
    let key = format!("pg-key-{}", conversation.id);

    let first = ledger
        .toggle_save(conversation.id, Some(&actor), Some(&key))
        .await
        .unwrap();
    let replay = ledger
        .toggle_save(conversation.id, Some(&actor), Some(&key))
        .await
        .unwrap();

    assert_eq!(first, replay);
    assert_eq!(ledger.lookup(conversation.id).await.unwrap().save_count, 1);
}

#[tokio::test]
async fn delete_is_idempotent_and_blocks_views() {
    let Some(store) = pg_store().await else {
        return;
    };
    let ledger = ledger(store);
    let conversation = ledger.create(json!({"items": [1]}), None).await.unwrap();

    assert_eq!(
        ledger.soft_delete(conversation.id, None).await.unwrap(),
        DeleteOutcome::Deleted
    );
    assert_eq!(
        ledger.soft_delete(conversation.id, None).await.unwrap(),
        DeleteOutcome::AlreadyDeleted
    );
    assert!(matches!(
        ledger.record_view(conversation.id).await,
        Err(LedgerError::Gone(_))
    ));

    let top = ledger.list_top(100, OrderBy::CreatedAt).await.unwrap();
    assert!(top.iter().all(|row| row.id != conversation.id));
}

#[tokio::test]
async fn store_reports_health() {
    let Some(store) = pg_store().await else {
        return;
    };
    store.health_check().await.unwrap();
}
