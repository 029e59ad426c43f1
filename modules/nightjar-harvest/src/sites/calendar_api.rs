// Adapter for a venue whose website exposes its calendar plugin's JSON
// endpoint. The API never carries a price field; most events state the
// price somewhere in the description, so a heuristic digs it out.

use anyhow::{Context, Result};
use async_stream::try_stream;
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::warn;

use nightjar_common::{Event, SourceTag};

use crate::source::{EventSource, EventStream};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SECONDS_IN_MONTH: i64 = 30 * 24 * 60 * 60;
const SECONDS_IN_YEAR: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Deserialize)]
struct CalendarResponse {
    #[serde(rename = "EVENTS", default)]
    events: Vec<CalendarRow>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarRow {
    #[serde(default)]
    title: String,
    #[serde(default)]
    start: String,
    #[serde(default)]
    end: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    image: Vec<String>,
    #[serde(default)]
    url: String,
}

pub struct CalendarApiSource {
    client: reqwest::Client,
    url: String,
    /// The venue itself; the API never repeats it.
    location: String,
    currency: String,
    free_markers: Vec<String>,
}

impl CalendarApiSource {
    pub fn new(url: &str, location: &str, currency: &str, free_markers: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            location: location.to_string(),
            currency: currency.to_string(),
            free_markers: free_markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    /// Three months back to a year forward, one request.
    async fn fetch_all(&self) -> Result<Vec<Event>> {
        let now = Utc::now().timestamp();
        let response: CalendarResponse = self
            .client
            .post(&self.url)
            .query(&[("cal_action", "get_calendar_events"), ("post_type", "events")])
            .form(&[
                ("start", (now - 3 * SECONDS_IN_MONTH).to_string()),
                ("end", (now + SECONDS_IN_YEAR).to_string()),
            ])
            .send()
            .await
            .context("calendar endpoint unreachable")?
            .error_for_status()
            .context("calendar endpoint rejected the request")?
            .json()
            .await
            .context("calendar response is not the expected JSON")?;

        Ok(response
            .events
            .into_iter()
            .filter_map(|row| self.row_to_event(row))
            .collect())
    }

    fn row_to_event(&self, row: CalendarRow) -> Option<Event> {
        let start_time = match parse_api_time(&row.start) {
            Ok(t) => t,
            Err(e) => {
                warn!(title = %row.title, error = %e, "calendar row has an unparseable start, skipping");
                return None;
            }
        };

        let description = strip_line_breaks(&row.description);
        let price = price_from_description(&description, &self.currency, &self.free_markers);
        Some(Event {
            title: row.title,
            start_time,
            end_time: parse_api_time(&row.end).ok(),
            location: self.location.clone(),
            price,
            url: row.url,
            description,
            image_url: row.image.into_iter().find(|i| !i.is_empty()),
            owner: None,
            owner_url: None,
            ticket_url: None,
            source: SourceTag::CalendarApi,
        })
    }
}

impl EventSource for CalendarApiSource {
    fn name(&self) -> &str {
        "calendar_api"
    }

    fn produce(&mut self) -> EventStream<'_> {
        let this = &*self;
        Box::pin(try_stream! {
            let events = this.fetch_all().await?;
            for event in events {
                yield event;
            }
        })
    }
}

/// The API reports wall-clock times in UTC; storage wants naive local.
fn parse_api_time(s: &str) -> Result<NaiveDateTime> {
    let naive =
        NaiveDateTime::parse_from_str(s, TIME_FORMAT).with_context(|| format!("bad time {s:?}"))?;
    Ok(Utc
        .from_utc_datetime(&naive)
        .with_timezone(&Local)
        .naive_local())
}

/// Descriptions come back as rendered HTML fragments; drop the line
/// breaks, keep the text.
fn strip_line_breaks(description: &str) -> String {
    description.replace("<br>\n", "").replace("<br>", "")
}

/// Best-effort price recovery from prose. Free-marker strings mean free;
/// otherwise the number adjacent to the currency symbol, with or without
/// a space between them. Works for most listings; the rest stay unpriced.
fn price_from_description(
    description: &str,
    currency: &str,
    free_markers: &[String],
) -> Option<String> {
    let lowered = description.to_lowercase();
    if free_markers.iter().any(|marker| lowered.contains(marker)) {
        return Some("0".to_string());
    }

    if !description.contains(currency) {
        return None;
    }

    let words: Vec<&str> = description.split_whitespace().collect();
    if let Some(i) = words.iter().position(|w| *w == currency) {
        // Standalone symbol: the price is the word before it.
        return if i > 0 {
            Some(words[i - 1].to_string())
        } else {
            None
        };
    }
    words
        .iter()
        .find(|w| w.contains(currency))
        .map(|w| w.replace(currency, ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn markers() -> Vec<String> {
        vec!["free entry".to_string()]
    }

    #[test]
    fn free_marker_wins() {
        assert_eq!(
            price_from_description("Doors 21:00, FREE ENTRY all night", "$", &markers()),
            Some("0".to_string())
        );
    }

    #[test]
    fn price_attached_to_symbol() {
        assert_eq!(
            price_from_description("Tickets 50$ at the door", "$", &markers()),
            Some("50".to_string())
        );
    }

    #[test]
    fn price_with_space_before_symbol() {
        assert_eq!(
            price_from_description("Entry is 60 $ tonight", "$", &markers()),
            Some("60".to_string())
        );
    }

    #[test]
    fn no_price_information() {
        assert_eq!(
            price_from_description("Doors at nine", "$", &markers()),
            None
        );
    }

    #[test]
    fn strips_html_line_breaks() {
        assert_eq!(
            strip_line_breaks("line one<br>\nline two<br>end"),
            "line oneline twoend"
        );
    }

    #[test]
    fn rows_without_start_are_dropped() {
        let source = CalendarApiSource::new("http://venue.example/wp", "Venue", "$", markers());
        let row = CalendarRow {
            title: "No Time".to_string(),
            ..CalendarRow::default()
        };
        assert!(source.row_to_event(row).is_none());
    }

    #[test]
    fn full_row_maps_to_event() {
        let source = CalendarApiSource::new("http://venue.example/wp", "Venue", "$", markers());
        let row = CalendarRow {
            title: "Trio Night".to_string(),
            start: "2024-03-01 20:00:00".to_string(),
            end: "2024-03-01 23:00:00".to_string(),
            description: "Jazz<br>\n30$ at the door".to_string(),
            image: vec![String::new(), "http://img.example/t.jpg".to_string()],
            url: "http://venue.example/e/9".to_string(),
        };
        let event = source.row_to_event(row).unwrap();
        assert_eq!(event.title, "Trio Night");
        assert_eq!(event.location, "Venue");
        assert_eq!(event.price.as_deref(), Some("30"));
        assert_eq!(event.image_url.as_deref(), Some("http://img.example/t.jpg"));
        // 2024-03-01 20:00 UTC rendered as local wall-clock time.
        let expected = Utc
            .from_utc_datetime(
                &NaiveDate::from_ymd_opt(2024, 3, 1)
                    .unwrap()
                    .and_hms_opt(20, 0, 0)
                    .unwrap(),
            )
            .with_timezone(&Local)
            .naive_local();
        assert_eq!(event.start_time, expected);
    }
}
