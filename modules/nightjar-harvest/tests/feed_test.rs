// Pagination engine tests against the scripted browser and lookup fakes:
// dedup across re-scans, halt handling, transient recovery, and the
// credential expiry/recovery protocol.

use std::sync::Arc;

use futures::StreamExt;

use nightjar_common::Event;
use nightjar_harvest::feed::auth::{FeedCredentials, LoginCredentials, TokenCache};
use nightjar_harvest::feed::SocialFeedSource;
use nightjar_harvest::halt::HaltSpec;
use nightjar_harvest::source::EventSource;
use nightjar_harvest::testing::{raw_event, FakeBrowser, FakeLookup};

const PAGE_URL: &str = "https://social.example/venuepage";
const TOOL_URL: &str = "https://social.example/tools/token";

fn token_credentials(token: &str) -> FeedCredentials {
    FeedCredentials {
        access_token: Some(token.to_string()),
        login: None,
    }
}

fn login_credentials() -> FeedCredentials {
    FeedCredentials {
        access_token: None,
        login: Some(LoginCredentials {
            identity: "harvester@example.com".to_string(),
            secret: "s3cret".to_string(),
        }),
    }
}

fn feed_source(
    browser: Arc<FakeBrowser>,
    lookup: Arc<FakeLookup>,
    credentials: FeedCredentials,
    halt: HaltSpec,
    tokens: TokenCache,
) -> SocialFeedSource {
    SocialFeedSource::new(
        PAGE_URL,
        browser,
        lookup,
        credentials,
        Some(TOOL_URL.to_string()),
        tokens,
        halt,
    )
    .expect("valid feed source")
}

async fn collect(source: &mut SocialFeedSource) -> (Vec<Event>, Option<anyhow::Error>) {
    let mut stream = source.produce();
    let mut events = Vec::new();
    let mut error = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => events.push(event),
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }
    (events, error)
}

fn titles(events: &[Event]) -> Vec<&str> {
    events.iter().map(|e| e.title.as_str()).collect()
}

#[tokio::test]
async fn emits_each_distinct_id_at_most_once_in_feed_order() {
    // Batch one repeats id 1 and carries a non-event link; batch two
    // repeats id 2 with a different URL shape.
    let browser = Arc::new(FakeBrowser::new(vec![
        vec![
            "https://social.example/events/1",
            "https://social.example/events/2",
            "https://social.example/events/upcoming",
            "https://social.example/events/1?ref=feed",
        ],
        vec![
            "https://social.example/events/2/",
            "https://social.example/events/3",
        ],
    ]));
    let lookup = Arc::new(
        FakeLookup::new()
            .with_valid_token("tok")
            .with_event("1", raw_event("Alpha", "2024-03-01T20:00:00"))
            .with_event("2", raw_event("Beta", "2024-03-02T20:00:00"))
            .with_event("3", raw_event("Gamma", "2024-03-03T20:00:00")),
    );

    let mut source = feed_source(
        browser,
        lookup.clone(),
        token_credentials("tok"),
        HaltSpec::default(),
        TokenCache::new(),
    );
    let (events, error) = collect(&mut source).await;

    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(titles(&events), vec!["Alpha", "Beta", "Gamma"]);
    assert_eq!(lookup.calls_for("1"), 1);
    assert_eq!(lookup.calls_for("2"), 1);
    assert_eq!(lookup.calls_for("3"), 1);
}

#[tokio::test]
async fn stops_when_the_halt_condition_fires() {
    let browser = Arc::new(FakeBrowser::new(vec![vec![
        "https://social.example/events/1",
        "https://social.example/events/2",
        "https://social.example/events/3",
    ]]));
    let lookup = Arc::new(
        FakeLookup::new()
            .with_valid_token("tok")
            .with_event("1", raw_event("Alpha", "2024-03-01T20:00:00"))
            .with_event("2", raw_event("Beta", "2024-03-02T20:00:00"))
            .with_event("3", raw_event("Gamma", "2024-03-03T20:00:00")),
    );

    let halt = HaltSpec {
        max_count: Some(2),
        max_start_time: None,
    };
    let mut source = feed_source(
        browser,
        lookup.clone(),
        token_credentials("tok"),
        halt,
        TokenCache::new(),
    );
    let (events, error) = collect(&mut source).await;

    assert!(error.is_none());
    assert_eq!(titles(&events), vec!["Alpha", "Beta"]);
    assert_eq!(lookup.calls_for("3"), 0, "halt must stop before id 3");
}

#[tokio::test]
async fn one_refresh_recovers_from_the_refresh_banner() {
    let browser = Arc::new(
        FakeBrowser::new(vec![
            vec!["https://social.example/events/1"],
            vec!["https://social.example/events/2"],
        ])
        .with_banner_on_load(1),
    );
    let lookup = Arc::new(
        FakeLookup::new()
            .with_valid_token("tok")
            .with_event("1", raw_event("Alpha", "2024-03-01T20:00:00"))
            .with_event("2", raw_event("Beta", "2024-03-02T20:00:00")),
    );

    let mut source = feed_source(
        browser.clone(),
        lookup,
        token_credentials("tok"),
        HaltSpec::default(),
        TokenCache::new(),
    );
    let (events, error) = collect(&mut source).await;

    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(titles(&events), vec!["Alpha", "Beta"]);
    assert_eq!(browser.refresh_count(), 1);
}

#[tokio::test]
async fn a_second_transient_failure_is_fatal_for_the_feed() {
    let browser = Arc::new(
        FakeBrowser::new(vec![vec!["https://social.example/events/1"]])
            .with_banner_on_load(1)
            .with_banner_on_load(2),
    );
    let lookup = Arc::new(
        FakeLookup::new()
            .with_valid_token("tok")
            .with_event("1", raw_event("Alpha", "2024-03-01T20:00:00")),
    );

    let mut source = feed_source(
        browser.clone(),
        lookup,
        token_credentials("tok"),
        HaltSpec::default(),
        TokenCache::new(),
    );
    let (events, error) = collect(&mut source).await;

    // The event harvested before the failure is kept.
    assert_eq!(titles(&events), vec!["Alpha"]);
    let error = error.expect("second transient must be fatal");
    assert!(
        error.to_string().contains("again after a refresh"),
        "unexpected error: {error}"
    );
    assert_eq!(browser.refresh_count(), 1, "only one automatic refresh per run");
}

#[tokio::test(start_paused = true)]
async fn a_hung_loading_indicator_counts_as_transient() {
    let browser = Arc::new(
        FakeBrowser::new(vec![
            vec!["https://social.example/events/1"],
            vec!["https://social.example/events/2"],
        ])
        .with_hang_on_load(1),
    );
    let lookup = Arc::new(
        FakeLookup::new()
            .with_valid_token("tok")
            .with_event("1", raw_event("Alpha", "2024-03-01T20:00:00"))
            .with_event("2", raw_event("Beta", "2024-03-02T20:00:00")),
    );

    let mut source = feed_source(
        browser.clone(),
        lookup,
        token_credentials("tok"),
        HaltSpec::default(),
        TokenCache::new(),
    );
    let (events, error) = collect(&mut source).await;

    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(titles(&events), vec!["Alpha", "Beta"]);
    assert_eq!(browser.refresh_count(), 1);
}

#[tokio::test]
async fn mid_run_token_expiry_recovers_once_and_retries_the_same_id() {
    let browser = Arc::new(
        FakeBrowser::new(vec![vec!["https://social.example/events/1"]])
            .with_token_tool(TOOL_URL, true, vec!["stale", "fresh"]),
    );
    let lookup = Arc::new(
        FakeLookup::new()
            .with_valid_token("fresh")
            .with_event("1", raw_event("Alpha", "2024-03-01T20:00:00")),
    );

    let mut source = feed_source(
        browser.clone(),
        lookup.clone(),
        login_credentials(),
        HaltSpec::default(),
        TokenCache::new(),
    );
    let (events, error) = collect(&mut source).await;

    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(titles(&events), vec!["Alpha"]);

    let calls = lookup.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("1".to_string(), "stale".to_string()),
            ("1".to_string(), "fresh".to_string()),
        ],
        "exactly one retry with the recovered token"
    );
    // Both mints went through the login form.
    let typed = browser.typed();
    let identity_entries = typed
        .iter()
        .filter(|(el, text)| el == "login-identity" && text == "harvester@example.com")
        .count();
    assert_eq!(identity_entries, 2);
}

#[tokio::test]
async fn a_second_auth_failure_for_the_same_id_skips_it_only() {
    let browser = Arc::new(
        FakeBrowser::new(vec![vec![
            "https://social.example/events/1",
            "https://social.example/events/2",
        ]])
        .with_token_tool(TOOL_URL, true, vec!["t1", "t2"]),
    );
    let lookup = Arc::new(
        FakeLookup::new()
            .with_valid_token("t1")
            .with_valid_token("t2")
            .with_auth_failures("1", 2)
            .with_event("1", raw_event("Alpha", "2024-03-01T20:00:00"))
            .with_event("2", raw_event("Beta", "2024-03-02T20:00:00")),
    );

    let mut source = feed_source(
        browser,
        lookup.clone(),
        login_credentials(),
        HaltSpec::default(),
        TokenCache::new(),
    );
    let (events, error) = collect(&mut source).await;

    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(titles(&events), vec!["Beta"], "id 1 is skipped, pagination continues");
    assert_eq!(lookup.calls_for("1"), 2, "id 1 gets exactly one retry");
    assert_eq!(lookup.calls_for("2"), 1);
}

#[tokio::test]
async fn a_rejected_direct_token_is_fatal() {
    let browser = Arc::new(FakeBrowser::new(vec![vec![
        "https://social.example/events/1",
    ]]));
    let lookup = Arc::new(FakeLookup::new().with_event("1", raw_event("Alpha", "2024-03-01T20:00:00")));

    let mut source = feed_source(
        browser,
        lookup,
        token_credentials("expired"),
        HaltSpec::default(),
        TokenCache::new(),
    );
    let (events, error) = collect(&mut source).await;

    assert!(events.is_empty());
    let error = error.expect("direct token rejection must be fatal");
    assert!(
        error.to_string().contains("no way to recover"),
        "unexpected error: {error}"
    );
}

#[tokio::test]
async fn cancelled_events_are_discarded_silently() {
    let mut cancelled = raw_event("Alpha", "2024-03-01T20:00:00");
    cancelled.is_canceled = true;

    let browser = Arc::new(FakeBrowser::new(vec![vec![
        "https://social.example/events/1",
        "https://social.example/events/2",
    ]]));
    let lookup = Arc::new(
        FakeLookup::new()
            .with_valid_token("tok")
            .with_event("1", cancelled)
            .with_event("2", raw_event("Beta", "2024-03-02T20:00:00")),
    );

    let mut source = feed_source(
        browser,
        lookup.clone(),
        token_credentials("tok"),
        HaltSpec::default(),
        TokenCache::new(),
    );
    let (events, error) = collect(&mut source).await;

    assert!(error.is_none());
    assert_eq!(titles(&events), vec!["Beta"]);
    assert_eq!(lookup.calls_for("1"), 1, "cancelled events are still resolved once");
}

#[tokio::test]
async fn a_cached_token_skips_the_mint_flow_on_later_runs() {
    let browser = Arc::new(
        FakeBrowser::new(vec![vec!["https://social.example/events/1"]])
            .with_token_tool(TOOL_URL, true, vec!["t1"]),
    );
    let lookup = Arc::new(
        FakeLookup::new()
            .with_valid_token("t1")
            .with_event("1", raw_event("Alpha", "2024-03-01T20:00:00")),
    );
    let tokens = TokenCache::new();

    let mut source = feed_source(
        browser.clone(),
        lookup.clone(),
        login_credentials(),
        HaltSpec::default(),
        tokens,
    );

    let (first, error) = collect(&mut source).await;
    assert!(error.is_none());
    assert_eq!(first.len(), 1);

    // Second run under the same identity: the cache supplies the token;
    // the tool (whose mint queue is now empty) is never visited again.
    let (second, error) = collect(&mut source).await;
    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(second.len(), 1);

    let tool_visits = browser
        .navigations()
        .iter()
        .filter(|url| url.as_str() == TOOL_URL)
        .count();
    assert_eq!(tool_visits, 1);
}
