// Reconciliation tests against the in-memory store: idempotency, the
// exact matching heuristic, batch atomicity.

use chrono::Timelike;

use nightjar_harvest::reconcile::Reconciler;
use nightjar_harvest::testing::{test_event, test_event_at, MemoryStore};

#[tokio::test]
async fn upsert_is_idempotent() {
    let store = MemoryStore::new();
    let batch = vec![
        test_event("Jazz Night", "Club X", (2024, 3, 1)),
        test_event("Open Mic", "Cafe Y", (2024, 3, 2)),
        test_event("Quartet", "Club X", (2024, 3, 3)),
    ];

    let first = Reconciler::new(&store).upsert(batch.clone()).await.unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(first.created(), 3);
    assert_eq!(first.updated, 0);
    assert_eq!(store.len(), 3);

    let second = Reconciler::new(&store).upsert(batch).await.unwrap();
    assert_eq!(second.total, 3);
    assert_eq!(second.created(), 0);
    assert_eq!(second.updated, 3);
    assert_eq!(store.len(), 3, "re-running the same batch creates nothing");
}

#[tokio::test]
async fn same_day_match_overwrites_mutable_fields_and_keeps_identity() {
    let store = MemoryStore::new();

    let mut stored = test_event_at("Jazz Night", "Club X", (2024, 3, 1), 20);
    stored.description = "the old blurb".to_string();
    Reconciler::new(&store).upsert(vec![stored]).await.unwrap();
    let original_id = store.committed()[0].id;

    // Same title and location, same calendar day, later hour, new text.
    let mut harvested = test_event_at("Jazz Night", "Club X", (2024, 3, 1), 23);
    harvested.description = "the new blurb".to_string();
    let stats = Reconciler::new(&store).upsert(vec![harvested]).await.unwrap();

    assert_eq!(stats.updated, 1);
    assert_eq!(stats.created(), 0);
    assert_eq!(store.len(), 1);

    let row = &store.committed()[0];
    assert_eq!(row.id, original_id, "storage identity is preserved");
    assert_eq!(row.event.description, "the new blurb");
    assert_eq!(row.event.start_time.hour(), 23);
}

#[tokio::test]
async fn same_title_on_different_days_stays_distinct() {
    let store = MemoryStore::new();
    let batch = vec![
        test_event("Residency", "Club X", (2024, 3, 1)),
        test_event("Residency", "Club X", (2024, 3, 8)),
    ];

    let stats = Reconciler::new(&store).upsert(batch).await.unwrap();
    assert_eq!(stats.created(), 2);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn exact_matching_means_retitled_events_duplicate() {
    // The heuristic is exact string equality on purpose; a trivial title
    // variation creates a second row rather than an update.
    let store = MemoryStore::new();
    Reconciler::new(&store)
        .upsert(vec![test_event("Jazz Night", "Club X", (2024, 3, 1))])
        .await
        .unwrap();

    let stats = Reconciler::new(&store)
        .upsert(vec![test_event("Jazz Night!", "Club X", (2024, 3, 1))])
        .await
        .unwrap();

    assert_eq!(stats.created(), 1);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn duplicate_fingerprints_within_one_batch_collapse() {
    let store = MemoryStore::new();

    let mut early = test_event_at("Jazz Night", "Club X", (2024, 3, 1), 20);
    early.description = "first sighting".to_string();
    let mut late = test_event_at("Jazz Night", "Club X", (2024, 3, 1), 23);
    late.description = "second sighting".to_string();

    let stats = Reconciler::new(&store).upsert(vec![early, late]).await.unwrap();

    assert_eq!(stats.total, 2);
    assert_eq!(store.len(), 1, "one row per fingerprint");
    assert_eq!(
        store.committed()[0].event.description,
        "second sighting",
        "the later record's values win"
    );
}

#[tokio::test]
async fn a_failed_commit_leaves_the_store_unchanged() {
    let store = MemoryStore::new();
    store.fail_next_commit();

    let result = Reconciler::new(&store)
        .upsert(vec![test_event("Jazz Night", "Club X", (2024, 3, 1))])
        .await;

    assert!(result.is_err());
    assert!(store.is_empty(), "a failed batch writes nothing");

    // The next batch is unaffected by the dropped one.
    let stats = Reconciler::new(&store)
        .upsert(vec![test_event("Open Mic", "Cafe Y", (2024, 3, 2))])
        .await
        .unwrap();
    assert_eq!(stats.created(), 1);
    assert_eq!(store.len(), 1);
}
