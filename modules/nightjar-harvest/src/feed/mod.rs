// The authenticated pagination engine: drives an infinite-scroll feed
// through the browser surface, extracts unique event ids from anchors,
// resolves each id through the remote lookup, and survives mid-run
// credential expiry. Emission is pull-based and in feed order.

pub mod auth;

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_stream::try_stream;
use regex::Regex;
use tracing::{debug, info, warn};

use nightjar_common::{Event, SourceTag};

use crate::browser::BrowserSurface;
use crate::halt::{HaltSpec, Signal};
use crate::lookup::{normalize_datetime, EventLookup, LookupError, RawEvent};
use crate::source::{EventSource, EventStream};

use auth::{FeedCredentials, LoginCredentials, TokenCache, TokenToolSelectors};

/// Ceiling for the wait on the feed's loading indicator.
const LOAD_MORE_WAIT: Duration = Duration::from_secs(10);

/// Selectors for the feed page, by role.
#[derive(Debug, Clone)]
pub struct FeedSelectors {
    /// Event anchors not yet tagged as handled.
    pub event_anchor: String,
    /// Attribute used to tag handled anchors. Tagging is idempotent, so a
    /// re-scan after a refresh never reprocesses an anchor twice within
    /// one pass.
    pub handled_attr: String,
    pub loading_indicator: String,
    /// The feed's "something went wrong, try refreshing" banner.
    pub refresh_banner: String,
}

impl Default for FeedSelectors {
    fn default() -> Self {
        Self {
            event_anchor: r#"a[href*="/events/"]:not([data-harvested])"#.to_string(),
            handled_attr: "data-harvested".to_string(),
            loading_indicator: "[data-feed-spinner]".to_string(),
            refresh_banner: "[data-feed-error]".to_string(),
        }
    }
}

/// Extract the numeric event id from an anchor URL. Anchors that do not
/// match the `/events/{id}` shape are not event links.
pub fn event_id_from_url(url: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"/events/(?P<id>\d+)($|[/?])").expect("event id pattern is valid")
    });
    re.captures(url).map(|c| c["id"].to_string())
}

/// One authenticated social-feed page as an event source.
pub struct SocialFeedSource {
    name: String,
    page_url: String,
    /// Scheme+host of the feed, for building canonical event URLs.
    origin: String,
    browser: Arc<dyn BrowserSurface>,
    lookup: Arc<dyn EventLookup>,
    credentials: FeedCredentials,
    token_tool_url: Option<String>,
    tokens: TokenCache,
    halt: HaltSpec,
    selectors: FeedSelectors,
    tool_selectors: TokenToolSelectors,
}

impl SocialFeedSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        page_url: &str,
        browser: Arc<dyn BrowserSurface>,
        lookup: Arc<dyn EventLookup>,
        credentials: FeedCredentials,
        token_tool_url: Option<String>,
        tokens: TokenCache,
        halt: HaltSpec,
    ) -> Result<Self> {
        credentials.validate()?;
        if credentials.access_token.is_none() && token_tool_url.is_none() {
            bail!("minting tokens from login credentials needs a token tool URL");
        }

        let parsed = url::Url::parse(page_url).context("invalid feed page URL")?;
        let origin = parsed.origin().ascii_serialization();
        let page_slug = parsed.path().trim_matches('/');
        let name = if page_slug.is_empty() {
            format!("social_feed:{}", parsed.host_str().unwrap_or("feed"))
        } else {
            format!("social_feed:{page_slug}")
        };

        Ok(Self {
            name,
            page_url: page_url.to_string(),
            origin,
            browser,
            lookup,
            credentials,
            token_tool_url,
            tokens,
            halt,
            selectors: FeedSelectors::default(),
            tool_selectors: TokenToolSelectors::default(),
        })
    }

    /// Directly supplied token, else cached, else freshly minted.
    async fn acquire_token(&self) -> Result<String> {
        if let Some(token) = &self.credentials.access_token {
            return Ok(token.clone());
        }
        let login = self
            .credentials
            .login
            .as_ref()
            .expect("validated at construction");
        if let Some(cached) = self.tokens.get(&login.identity) {
            debug!(identity = %login.identity, "using cached access token");
            return Ok(cached);
        }
        self.mint_token(login).await
    }

    async fn mint_token(&self, login: &LoginCredentials) -> Result<String> {
        let tool_url = self
            .token_tool_url
            .as_deref()
            .expect("validated at construction");
        let token =
            auth::scrape_token(self.browser.as_ref(), tool_url, login, &self.tool_selectors)
                .await?;
        self.tokens.put(&login.identity, token.clone());
        Ok(token)
    }

    /// Find the next anchor not yet tagged as handled, tag it, and return
    /// its href. `None` means the currently loaded feed is exhausted.
    async fn next_unhandled_anchor(&self) -> Result<Option<String>> {
        loop {
            let Some(anchor) = self
                .browser
                .find_element(&self.selectors.event_anchor)
                .await?
            else {
                return Ok(None);
            };
            self.browser
                .set_attribute(&anchor, &self.selectors.handled_attr, "true")
                .await?;
            match self.browser.attribute(&anchor, "href").await? {
                Some(href) => return Ok(Some(href)),
                None => {
                    debug!("anchor without an href, skipping");
                    continue;
                }
            }
        }
    }

    /// Resolve one id, recovering once from an auth failure when the
    /// token was minted (not directly supplied). `Ok(None)` means the id
    /// is skipped; `Err` aborts the whole feed run.
    async fn resolve_with_recovery(
        &self,
        id: &str,
        token_slot: &mut Option<String>,
    ) -> Result<Option<RawEvent>> {
        let token = match token_slot {
            Some(token) => token.clone(),
            None => {
                let token = self.acquire_token().await?;
                *token_slot = Some(token.clone());
                token
            }
        };

        match self.lookup.resolve(id, &token).await {
            Ok(raw) => Ok(Some(raw)),
            Err(LookupError::NotFound(msg)) => {
                warn!(id, message = %msg, "event not found, skipping");
                Ok(None)
            }
            Err(LookupError::Api(msg)) => {
                warn!(id, message = %msg, "lookup rejected event, skipping");
                Ok(None)
            }
            Err(LookupError::Network(msg)) => bail!("lookup endpoint unreachable: {msg}"),
            Err(LookupError::Auth(msg)) => {
                if self.credentials.access_token.is_some() {
                    bail!("supplied access token rejected ({msg}); no way to recover");
                }
                warn!(id, message = %msg, "access token rejected mid-run, re-acquiring");
                let login = self
                    .credentials
                    .login
                    .as_ref()
                    .expect("validated at construction");
                self.tokens.invalidate(&login.identity);
                let fresh = self
                    .mint_token(login)
                    .await
                    .context("credential recovery failed")?;
                *token_slot = Some(fresh.clone());

                // Retry the one failed resolution, exactly once.
                match self.lookup.resolve(id, &fresh).await {
                    Ok(raw) => Ok(Some(raw)),
                    Err(LookupError::Network(msg)) => {
                        bail!("lookup endpoint unreachable: {msg}")
                    }
                    Err(e) => {
                        warn!(id, error = %e, "still failing after credential recovery, skipping");
                        Ok(None)
                    }
                }
            }
        }
    }

    fn raw_to_event(&self, id: &str, raw: RawEvent) -> Result<Event> {
        let start = raw.start_time.as_deref().context("event has no start time")?;
        let start_time = normalize_datetime(start)?;
        Ok(Event {
            title: raw.name.unwrap_or_default(),
            start_time,
            end_time: raw.end_time.and_then(|s| normalize_datetime(&s).ok()),
            location: raw.place.and_then(|p| p.name).unwrap_or_default(),
            price: None,
            url: format!("{}/events/{id}", self.origin),
            description: raw.description.unwrap_or_default(),
            image_url: raw.cover.and_then(|c| c.source),
            owner: raw.owner.as_ref().and_then(|o| o.name.clone()),
            owner_url: raw
                .owner
                .and_then(|o| o.id)
                .map(|oid| format!("{}/{oid}", self.origin)),
            ticket_url: raw.ticket_uri,
            source: SourceTag::SocialFeed,
        })
    }

    /// Trigger infinite scroll and report whether more content is coming.
    /// Transient trouble (hung loading indicator, the feed's refresh
    /// banner) consumes the run's single automatic refresh; a second
    /// occurrence is fatal for this source.
    async fn load_more(&self, refresh_used: &mut bool) -> Result<bool> {
        let height_before = self.browser.page_height().await?;
        self.browser.scroll_to_bottom().await?;

        if self
            .browser
            .find_element(&self.selectors.loading_indicator)
            .await?
            .is_some()
        {
            if !self
                .browser
                .wait_until_gone(&self.selectors.loading_indicator, LOAD_MORE_WAIT)
                .await?
            {
                return self
                    .transient(refresh_used, "feed kept loading past the wait ceiling")
                    .await;
            }
            return Ok(true);
        }

        if self
            .browser
            .find_element(&self.selectors.refresh_banner)
            .await?
            .is_some()
        {
            return self
                .transient(refresh_used, "feed surfaced its try-refreshing banner")
                .await;
        }

        let height_after = self.browser.page_height().await?;
        Ok(height_after > height_before)
    }

    async fn transient(&self, refresh_used: &mut bool, what: &str) -> Result<bool> {
        if *refresh_used {
            bail!("{what} again after a refresh; giving up on this feed");
        }
        warn!(page = %self.page_url, what, "transient feed failure, refreshing once");
        *refresh_used = true;
        self.browser.refresh().await?;
        Ok(true)
    }
}

impl EventSource for SocialFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self) -> EventStream<'_> {
        let this = &*self;
        Box::pin(try_stream! {
            info!(page = %this.page_url, "starting feed harvest");
            this.browser
                .navigate(&this.page_url)
                .await
                .context("failed to open feed page")?;

            let mut halt = this.halt.build();
            let mut seen: HashSet<String> = HashSet::new();
            let mut token: Option<String> = None;
            let mut refresh_used = false;

            loop {
                match this.next_unhandled_anchor().await? {
                    Some(href) => {
                        let Some(id) = event_id_from_url(&href) else {
                            debug!(href, "anchor is not an event link, skipping");
                            continue;
                        };
                        // The id enters the seen-set before resolution, so
                        // a failed resolution is never retried by a later
                        // re-scan of the same run.
                        if !seen.insert(id.clone()) {
                            continue;
                        }
                        let raw = match this.resolve_with_recovery(&id, &mut token).await? {
                            Some(raw) => raw,
                            None => continue,
                        };
                        if raw.is_canceled {
                            debug!(id, "event is cancelled, skipping");
                            continue;
                        }
                        let event = match this.raw_to_event(&id, raw) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(id, error = %e, "discarding unparseable event");
                                continue;
                            }
                        };
                        let signal = halt.should_stop(&event);
                        yield event;
                        if let Signal::Stop { reason } = signal {
                            info!(page = %this.page_url, reason, "halt condition met");
                            break;
                        }
                    }
                    None => {
                        if !this.load_more(&mut refresh_used).await? {
                            info!(page = %this.page_url, "reached the end of the feed");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_numeric_event_ids() {
        assert_eq!(
            event_id_from_url("https://social.example/events/123"),
            Some("123".to_string())
        );
        assert_eq!(
            event_id_from_url("https://social.example/events/123?ref=feed"),
            Some("123".to_string())
        );
        assert_eq!(
            event_id_from_url("/events/456/"),
            Some("456".to_string())
        );
    }

    #[test]
    fn rejects_non_event_urls() {
        assert_eq!(event_id_from_url("https://social.example/groups/123"), None);
        assert_eq!(event_id_from_url("/events/soon"), None);
        assert_eq!(event_id_from_url("/events/"), None);
    }

    #[test]
    fn rejects_ids_embedded_in_longer_segments() {
        // The id must terminate the path segment.
        assert_eq!(event_id_from_url("/events/123abc"), None);
    }
}
