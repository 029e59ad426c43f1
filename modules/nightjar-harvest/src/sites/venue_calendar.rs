// Adapter for a venue that renders its calendar month by month through an
// admin-ajax endpoint returning HTML list items. The markup holds no year,
// and day and time are scattered across sub-elements, so each month is
// requested explicitly and the date reassembled.

use std::sync::OnceLock;

use anyhow::{Context, Result};
use async_stream::try_stream;
use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use nightjar_common::{Event, SourceTag};

use crate::source::{EventSource, EventStream};

const MONTHS_BACK: i32 = 3;
const MONTHS_FORWARD: i32 = 13;

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)").expect("number pattern is valid"))
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+):(\d+)").expect("time pattern is valid"))
}

pub struct VenueCalendarSource {
    client: reqwest::Client,
    url: String,
    location: String,
}

impl VenueCalendarSource {
    pub fn new(url: &str, location: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            location: location.to_string(),
        }
    }

    async fn fetch_month(&self, year: i32, month: u32) -> Result<String> {
        let html = self
            .client
            .post(&self.url)
            .form(&[
                ("action", "get_event_showpage".to_string()),
                ("year", year.to_string()),
                // The endpoint counts months from zero.
                ("month", (month - 1).to_string()),
            ])
            .send()
            .await
            .context("calendar endpoint unreachable")?
            .error_for_status()
            .context("calendar endpoint rejected the request")?
            .text()
            .await?;
        Ok(html)
    }

    /// Parse one month page. Single bad elements are dropped; parsing is
    /// fully synchronous so the non-Send DOM never crosses an await.
    fn parse_month(&self, html: &str, year: i32, month: u32) -> Vec<Event> {
        let doc = Html::parse_document(html);
        let li = Selector::parse("li").expect("valid selector");

        doc.select(&li)
            .filter_map(|element| self.element_to_event(element, year, month))
            .collect()
    }

    fn element_to_event(&self, element: ElementRef<'_>, year: i32, month: u32) -> Option<Event> {
        let title = select_text(&element, "h2")?;
        let url = select_attr(&element, "a", "href")?;
        let price = select_text(&element, "b");
        let description = select_text(&element, "p").unwrap_or_default();
        let image_url = select_attr(&element, "img", "src");

        let day_text = select_text(&element, "div.date")?;
        let day: u32 = number_re()
            .captures(&day_text)
            .and_then(|c| c[1].parse().ok())?;

        let times_text = select_text(&element, "div.times")?;
        let (hour, minute) = match time_re().captures(&times_text) {
            Some(c) => (c[1].parse().ok()?, c[2].parse().ok()?),
            None => {
                debug!(title = %title, "event has no readable time, skipping");
                return None;
            }
        };

        let start_time = match NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
        {
            Some(t) => t,
            None => {
                warn!(title = %title, year, month, day, hour, minute, "event has an impossible date, skipping");
                return None;
            }
        };

        Some(Event {
            title,
            start_time,
            end_time: None,
            location: self.location.clone(),
            price,
            url,
            description,
            image_url,
            owner: None,
            owner_url: None,
            ticket_url: None,
            source: SourceTag::VenueCalendar,
        })
    }
}

impl EventSource for VenueCalendarSource {
    fn name(&self) -> &str {
        "venue_calendar"
    }

    fn produce(&mut self) -> EventStream<'_> {
        let this = &*self;
        Box::pin(try_stream! {
            let today = Local::now().date_naive();
            for offset in -MONTHS_BACK..MONTHS_FORWARD {
                let (year, month) = month_with_offset(today, offset);
                let html = match this.fetch_month(year, month).await {
                    Ok(html) => html,
                    Err(e) => {
                        warn!(year, month, error = %e, "month fetch failed, skipping month");
                        continue;
                    }
                };
                for event in this.parse_month(&html, year, month) {
                    yield event;
                }
            }
        })
    }
}

fn select_text(element: &ElementRef<'_>, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).expect("valid selector");
    let text: String = element.select(&sel).next()?.text().collect();
    let text = text.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn select_attr(element: &ElementRef<'_>, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).expect("valid selector");
    element
        .select(&sel)
        .next()?
        .value()
        .attr(attr)
        .map(String::from)
}

/// Shift a date by whole months and return (year, month).
fn month_with_offset(date: NaiveDate, offset: i32) -> (i32, u32) {
    let total = date.year() * 12 + date.month0() as i32 + offset;
    (total.div_euclid(12), total.rem_euclid(12) as u32 + 1)
}
