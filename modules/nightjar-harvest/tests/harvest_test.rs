// Coordinator tests: fault isolation between sources, the untitled-record
// filter, and the full harvest-then-reconcile path.

use std::sync::Arc;

use nightjar_common::Event;
use nightjar_harvest::feed::auth::{FeedCredentials, TokenCache};
use nightjar_harvest::feed::SocialFeedSource;
use nightjar_harvest::halt::HaltSpec;
use nightjar_harvest::harvester::Harvester;
use nightjar_harvest::reconcile::Reconciler;
use nightjar_harvest::source::EventSource;
use nightjar_harvest::testing::{
    raw_event, test_event, FailingSource, FakeBrowser, FakeLookup, MemoryStore, StaticSource,
};

fn titles(events: &[Event]) -> Vec<&str> {
    events.iter().map(|e| e.title.as_str()).collect()
}

#[tokio::test]
async fn a_failing_source_never_takes_the_others_down() {
    let sources: Vec<Box<dyn EventSource>> = vec![
        Box::new(FailingSource::new(
            "flaky",
            vec![test_event("Before The Crash", "Club X", (2024, 3, 1))],
        )),
        Box::new(StaticSource::new(
            "steady",
            vec![
                test_event("Jazz Night", "Club X", (2024, 3, 2)),
                test_event("Open Mic", "Cafe Y", (2024, 3, 3)),
            ],
        )),
    ];

    let (events, stats) = Harvester::new(sources).harvest().await;

    assert_eq!(
        titles(&events),
        vec!["Before The Crash", "Jazz Night", "Open Mic"],
        "partial output from the failed source is kept, later sources still run"
    );
    assert_eq!(stats.failed_sources, 1);
    assert_eq!(stats.produced, 3);
    assert_eq!(stats.per_source[0], ("flaky".to_string(), 1));
    assert_eq!(stats.per_source[1], ("steady".to_string(), 2));
}

#[tokio::test]
async fn untitled_events_are_filtered_by_the_coordinator() {
    let mut untitled = test_event("placeholder", "Club X", (2024, 3, 1));
    untitled.title = "   ".to_string();

    let sources: Vec<Box<dyn EventSource>> = vec![Box::new(StaticSource::new(
        "mixed",
        vec![untitled, test_event("Jazz Night", "Club X", (2024, 3, 2))],
    ))];

    let (events, stats) = Harvester::new(sources).harvest().await;

    assert_eq!(titles(&events), vec!["Jazz Night"]);
    assert_eq!(stats.discarded_untitled, 1);
    assert_eq!(stats.produced, 1);
}

// A feed that dies on its second transient failure alongside a healthy
// source: the cycle still reconciles everything harvested before and
// around the failure.
#[tokio::test]
async fn feed_failure_still_yields_a_reconciled_batch_from_other_sources() {
    let browser = Arc::new(
        FakeBrowser::new(vec![vec!["https://social.example/events/1"]])
            .with_banner_on_load(1)
            .with_banner_on_load(2),
    );
    let lookup = Arc::new(
        FakeLookup::new()
            .with_valid_token("tok")
            .with_event("1", raw_event("Feed Show", "2024-03-01T20:00:00")),
    );
    let feed = SocialFeedSource::new(
        "https://social.example/venuepage",
        browser,
        lookup,
        FeedCredentials {
            access_token: Some("tok".to_string()),
            login: None,
        },
        None,
        TokenCache::new(),
        HaltSpec::default(),
    )
    .unwrap();

    let sources: Vec<Box<dyn EventSource>> = vec![
        Box::new(feed),
        Box::new(StaticSource::new(
            "steady",
            vec![test_event("Open Mic", "Cafe Y", (2024, 3, 3))],
        )),
    ];

    let (events, stats) = Harvester::new(sources).harvest().await;
    assert_eq!(stats.failed_sources, 1);
    assert_eq!(titles(&events), vec!["Feed Show", "Open Mic"]);

    let store = MemoryStore::new();
    let reconciled = Reconciler::new(&store).upsert(events).await.unwrap();
    assert_eq!(reconciled.created(), 2);
    assert_eq!(store.len(), 2);
}
