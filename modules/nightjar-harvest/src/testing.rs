// Test doubles for the harvest pipeline, matching the trait boundaries:
//
// - MemoryStore (EventStore): staged in-memory store with injectable
//   commit failures
// - FakeBrowser (BrowserSurface): scripted infinite-scroll feed plus a
//   token tool page, recognizing the default selectors
// - FakeLookup (EventLookup): id-to-raw-event map with scriptable auth
//   behavior
// - StaticSource / FailingSource (EventSource): canned adapters
//
// Plus helpers for building events and raw lookup payloads.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use nightjar_common::{Event, SourceTag};
use nightjar_store::StoredEvent;

use crate::browser::{BrowserSurface, Element};
use crate::lookup::{EventLookup, LookupError, RawEvent, RawPlace};
use crate::reconcile::EventStore;
use crate::source::{EventSource, EventStream};

// ---------------------------------------------------------------------------
// Event helpers
// ---------------------------------------------------------------------------

/// An event on the given day at 20:00.
pub fn test_event(title: &str, location: &str, day: (i32, u32, u32)) -> Event {
    test_event_at(title, location, day, 20)
}

pub fn test_event_at(title: &str, location: &str, day: (i32, u32, u32), hour: u32) -> Event {
    Event {
        title: title.to_string(),
        start_time: NaiveDate::from_ymd_opt(day.0, day.1, day.2)
            .expect("valid test date")
            .and_hms_opt(hour, 0, 0)
            .expect("valid test hour"),
        end_time: None,
        location: location.to_string(),
        price: None,
        url: format!("https://example.com/{}", title.to_lowercase().replace(' ', "-")),
        description: format!("{title} description"),
        image_url: None,
        owner: None,
        owner_url: None,
        ticket_url: None,
        source: SourceTag::ShowsApi,
    }
}

/// Raw lookup payload with a title, start time string, and a fixed place.
pub fn raw_event(title: &str, start: &str) -> RawEvent {
    RawEvent {
        name: Some(title.to_string()),
        description: Some(format!("{title} description")),
        start_time: Some(start.to_string()),
        end_time: None,
        place: Some(RawPlace {
            name: Some("Club X".to_string()),
        }),
        ticket_uri: None,
        cover: None,
        owner: None,
        is_canceled: false,
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

enum StagedOp {
    Insert { id: Uuid, values: Event },
    Update { id: Uuid, values: Event },
}

/// In-memory event store with the same staged-commit semantics as the
/// Postgres one.
#[derive(Default)]
pub struct MemoryStore {
    committed: Mutex<Vec<StoredEvent>>,
    staged: Mutex<Vec<StagedOp>>,
    fail_next_commit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail, dropping its batch.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn committed(&self) -> Vec<StoredEvent> {
        self.committed
            .lock()
            .expect("store lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.committed.lock().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn find_matching(
        &self,
        title: &str,
        location: &str,
        day: NaiveDate,
    ) -> Result<Option<StoredEvent>> {
        Ok(self
            .committed
            .lock()
            .expect("store lock poisoned")
            .iter()
            .find(|stored| {
                stored.event.title == title
                    && stored.event.location == location
                    && stored.event.start_day() == day
            })
            .cloned())
    }

    fn stage_insert(&self, values: Event) -> Uuid {
        let id = Uuid::new_v4();
        self.staged
            .lock()
            .expect("store lock poisoned")
            .push(StagedOp::Insert { id, values });
        id
    }

    fn stage_update(&self, id: Uuid, values: Event) {
        self.staged
            .lock()
            .expect("store lock poisoned")
            .push(StagedOp::Update { id, values });
    }

    async fn commit(&self) -> Result<u64> {
        let ops: Vec<StagedOp> = {
            let mut staged = self.staged.lock().expect("store lock poisoned");
            staged.drain(..).collect()
        };

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            bail!("injected commit failure");
        }

        let now = Utc::now();
        let count = ops.len() as u64;
        let mut committed = self.committed.lock().expect("store lock poisoned");
        for op in ops {
            match op {
                StagedOp::Insert { id, values } => committed.push(StoredEvent {
                    id,
                    event: values,
                    first_seen: now,
                    last_seen: now,
                }),
                StagedOp::Update { id, values } => {
                    if let Some(stored) = committed.iter_mut().find(|s| s.id == id) {
                        stored.event = values;
                        stored.last_seen = now;
                    }
                }
            }
        }
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Canned sources
// ---------------------------------------------------------------------------

/// Yields a fixed list of events.
pub struct StaticSource {
    name: &'static str,
    events: Vec<Event>,
}

impl StaticSource {
    pub fn new(name: &'static str, events: Vec<Event>) -> Self {
        Self { name, events }
    }
}

impl EventSource for StaticSource {
    fn name(&self) -> &str {
        self.name
    }

    fn produce(&mut self) -> EventStream<'_> {
        let events = self.events.clone();
        Box::pin(try_stream! {
            for event in events {
                yield event;
            }
        })
    }
}

/// Yields some events and then fails fatally.
pub struct FailingSource {
    name: &'static str,
    events_before_failure: Vec<Event>,
}

impl FailingSource {
    pub fn new(name: &'static str, events_before_failure: Vec<Event>) -> Self {
        Self {
            name,
            events_before_failure,
        }
    }
}

impl EventSource for FailingSource {
    fn name(&self) -> &str {
        self.name
    }

    fn produce(&mut self) -> EventStream<'_> {
        let events = self.events_before_failure.clone();
        Box::pin(try_stream! {
            for event in events {
                yield event;
            }
            Err(anyhow::anyhow!("this source always breaks"))?;
        })
    }
}

// ---------------------------------------------------------------------------
// FakeLookup
// ---------------------------------------------------------------------------

/// Scripted remote lookup. Auth behavior is controlled by a set of valid
/// tokens and optional per-id forced auth failures.
#[derive(Default)]
pub struct FakeLookup {
    events: HashMap<String, RawEvent>,
    valid_tokens: HashSet<String>,
    forced_auth_failures: Mutex<HashMap<String, u32>>,
    /// Every (id, token) resolution attempt, in order.
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, id: &str, raw: RawEvent) -> Self {
        self.events.insert(id.to_string(), raw);
        self
    }

    pub fn with_valid_token(mut self, token: &str) -> Self {
        self.valid_tokens.insert(token.to_string());
        self
    }

    /// Force the next `n` resolutions of `id` to fail auth even under a
    /// valid token.
    pub fn with_auth_failures(self, id: &str, n: u32) -> Self {
        self.forced_auth_failures
            .lock()
            .expect("lookup lock poisoned")
            .insert(id.to_string(), n);
        self
    }

    pub fn calls_for(&self, id: &str) -> usize {
        self.calls
            .lock()
            .expect("lookup lock poisoned")
            .iter()
            .filter(|(called, _)| called == id)
            .count()
    }
}

#[async_trait]
impl EventLookup for FakeLookup {
    async fn resolve(&self, id: &str, token: &str) -> std::result::Result<RawEvent, LookupError> {
        self.calls
            .lock()
            .expect("lookup lock poisoned")
            .push((id.to_string(), token.to_string()));

        {
            let mut forced = self.forced_auth_failures.lock().expect("lookup lock poisoned");
            if let Some(remaining) = forced.get_mut(id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(LookupError::Auth(format!("forced auth failure for {id}")));
                }
            }
        }

        if !self.valid_tokens.contains(token) {
            return Err(LookupError::Auth(format!("token {token} is not valid")));
        }

        self.events
            .get(id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(format!("no event {id}")))
    }
}

// ---------------------------------------------------------------------------
// FakeBrowser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FakeAnchor {
    href: String,
    handled: bool,
}

#[derive(Default)]
struct BrowserState {
    /// Anchor batches; each scroll reveals one more.
    batches: Vec<Vec<FakeAnchor>>,
    revealed: usize,
    /// scroll_to_bottom invocations so far.
    load_calls: usize,
    /// 1-based load indices on which the refresh banner shows instead of
    /// new content.
    banner_loads: HashSet<usize>,
    /// 1-based load indices on which the loading spinner appears and
    /// never clears.
    hang_loads: HashSet<usize>,
    refreshes: usize,
    navigations: Vec<String>,
    typed: Vec<(String, String)>,
    /// Per-tab current URL.
    tab_urls: HashMap<String, String>,
    current_tab: String,
    next_tab: usize,
    // Token tool page
    tool_url: String,
    tool_has_login_form: bool,
    tokens_to_mint: VecDeque<String>,
    minted: Option<String>,
}

/// Scripted browser for the pagination engine. Recognizes the default
/// feed and token tool selectors and models infinite scroll as a list of
/// anchor batches.
pub struct FakeBrowser {
    state: Mutex<BrowserState>,
}

impl FakeBrowser {
    pub fn new(batches: Vec<Vec<&str>>) -> Self {
        let state = BrowserState {
            batches: batches
                .into_iter()
                .map(|batch| {
                    batch
                        .into_iter()
                        .map(|href| FakeAnchor {
                            href: href.to_string(),
                            handled: false,
                        })
                        .collect()
                })
                .collect(),
            revealed: 1,
            current_tab: "tab-0".to_string(),
            ..BrowserState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_banner_on_load(self, load: usize) -> Self {
        self.state
            .lock()
            .expect("browser lock poisoned")
            .banner_loads
            .insert(load);
        self
    }

    pub fn with_hang_on_load(self, load: usize) -> Self {
        self.state
            .lock()
            .expect("browser lock poisoned")
            .hang_loads
            .insert(load);
        self
    }

    /// Configure the token tool page and the tokens it mints, in order.
    pub fn with_token_tool(self, url: &str, has_login_form: bool, tokens: Vec<&str>) -> Self {
        {
            let mut state = self.state.lock().expect("browser lock poisoned");
            state.tool_url = url.to_string();
            state.tool_has_login_form = has_login_form;
            state.tokens_to_mint = tokens.into_iter().map(String::from).collect();
        }
        self
    }

    pub fn refresh_count(&self) -> usize {
        self.state.lock().expect("browser lock poisoned").refreshes
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("browser lock poisoned")
            .navigations
            .clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.state.lock().expect("browser lock poisoned").typed.clone()
    }

    fn on_tool_page(state: &BrowserState) -> bool {
        !state.tool_url.is_empty()
            && state.tab_urls.get(&state.current_tab) == Some(&state.tool_url)
    }
}

#[async_trait]
impl BrowserSurface for FakeBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().expect("browser lock poisoned");
        state.navigations.push(url.to_string());
        let tab = state.current_tab.clone();
        state.tab_urls.insert(tab, url.to_string());
        if !state.tool_url.is_empty() && url == state.tool_url {
            state.minted = None;
        } else {
            // Loading the feed renders a fresh DOM: handled tags are gone
            // and only the first batch is visible.
            for batch in &mut state.batches {
                for anchor in batch {
                    anchor.handled = false;
                }
            }
            state.revealed = 1;
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let state = self.state.lock().expect("browser lock poisoned");
        Ok(state
            .tab_urls
            .get(&state.current_tab)
            .cloned()
            .unwrap_or_default())
    }

    async fn refresh(&self) -> Result<()> {
        let mut state = self.state.lock().expect("browser lock poisoned");
        state.refreshes += 1;
        // A reload re-renders the DOM: handled tags are gone.
        for batch in &mut state.batches {
            for anchor in batch {
                anchor.handled = false;
            }
        }
        Ok(())
    }

    async fn find_element(&self, css: &str) -> Result<Option<Element>> {
        let state = self.state.lock().expect("browser lock poisoned");

        if Self::on_tool_page(&state) {
            return Ok(match css {
                r#"input[type="email"]"# if state.tool_has_login_form => {
                    Some(Element("login-identity".to_string()))
                }
                r#"input[type="password"]"# if state.tool_has_login_form => {
                    Some(Element("login-secret".to_string()))
                }
                r#"button[data-action="generate-token"]"# => Some(Element("generate".to_string())),
                "input[data-token-output]" => Some(Element("token-field".to_string())),
                _ => None,
            });
        }

        if css.contains(":not([data-harvested])") {
            for (bi, batch) in state.batches.iter().take(state.revealed).enumerate() {
                for (ai, anchor) in batch.iter().enumerate() {
                    if !anchor.handled {
                        return Ok(Some(Element(format!("anchor:{bi}:{ai}"))));
                    }
                }
            }
            return Ok(None);
        }

        if css == "[data-feed-spinner]" {
            let present = state.load_calls > 0 && state.hang_loads.contains(&state.load_calls);
            return Ok(present.then(|| Element("spinner".to_string())));
        }

        if css == "[data-feed-error]" {
            let present = state.load_calls > 0 && state.banner_loads.contains(&state.load_calls);
            return Ok(present.then(|| Element("banner".to_string())));
        }

        Ok(None)
    }

    async fn execute_script(&self, _js: &str, _args: Vec<Value>) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn attribute(&self, element: &Element, name: &str) -> Result<Option<String>> {
        let state = self.state.lock().expect("browser lock poisoned");
        if element.0 == "token-field" && name == "value" {
            return Ok(state.minted.clone());
        }
        if name == "href" {
            if let Some((bi, ai)) = parse_anchor_id(&element.0) {
                return Ok(state
                    .batches
                    .get(bi)
                    .and_then(|b| b.get(ai))
                    .map(|a| a.href.clone()));
            }
        }
        Ok(None)
    }

    async fn send_keys(&self, element: &Element, text: &str) -> Result<()> {
        self.state
            .lock()
            .expect("browser lock poisoned")
            .typed
            .push((element.0.clone(), text.to_string()));
        Ok(())
    }

    async fn click(&self, element: &Element) -> Result<()> {
        let mut state = self.state.lock().expect("browser lock poisoned");
        if element.0 == "generate" {
            state.minted = state.tokens_to_mint.pop_front();
        }
        Ok(())
    }

    async fn window_handle(&self) -> Result<String> {
        Ok(self
            .state
            .lock()
            .expect("browser lock poisoned")
            .current_tab
            .clone())
    }

    async fn open_tab(&self) -> Result<String> {
        let mut state = self.state.lock().expect("browser lock poisoned");
        state.next_tab += 1;
        Ok(format!("tab-{}", state.next_tab))
    }

    async fn switch_tab(&self, handle: &str) -> Result<()> {
        self.state.lock().expect("browser lock poisoned").current_tab = handle.to_string();
        Ok(())
    }

    async fn close_tab(&self) -> Result<()> {
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        let mut state = self.state.lock().expect("browser lock poisoned");
        state.load_calls += 1;
        let load = state.load_calls;
        let blocked = state.banner_loads.contains(&load) || state.hang_loads.contains(&load);
        if !blocked && state.revealed < state.batches.len() {
            state.revealed += 1;
        }
        Ok(())
    }

    async fn page_height(&self) -> Result<i64> {
        let state = self.state.lock().expect("browser lock poisoned");
        let anchors: usize = state
            .batches
            .iter()
            .take(state.revealed)
            .map(Vec::len)
            .sum();
        Ok(anchors as i64)
    }

    async fn set_attribute(&self, element: &Element, name: &str, _value: &str) -> Result<()> {
        if name == "data-harvested" {
            if let Some((bi, ai)) = parse_anchor_id(&element.0) {
                let mut state = self.state.lock().expect("browser lock poisoned");
                if let Some(anchor) = state.batches.get_mut(bi).and_then(|b| b.get_mut(ai)) {
                    anchor.handled = true;
                }
            }
        }
        Ok(())
    }
}

fn parse_anchor_id(id: &str) -> Option<(usize, usize)> {
    let mut parts = id.strip_prefix("anchor:")?.split(':');
    let bi = parts.next()?.parse().ok()?;
    let ai = parts.next()?.parse().ok()?;
    Some((bi, ai))
}
