// Adapter for a static-JSON show listing (a website disguised as an app):
// two JSONP documents, one for shows and one for artists. Show rows often
// have no image of their own, so the artist image is the fallback.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_stream::try_stream;
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use nightjar_common::{Event, SourceTag};

use crate::source::{EventSource, EventStream};

const SHOWS_PATH: &str = "shows.json";
const ARTISTS_PATH: &str = "artists.json";

const TIME_FORMAT: &str = "%m/%d/%Y %H:%M";

/// Values the backend uses as placeholders in otherwise-empty rows.
const PLACEHOLDER_VALUES: [&str; 2] = ["t", "TRUE"];

#[derive(Debug, Default, Deserialize)]
struct ShowRow {
    #[serde(default)]
    artist: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    time: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    link: String,
}

impl ShowRow {
    fn values(&self) -> [&str; 8] {
        [
            &self.artist,
            &self.date,
            &self.time,
            &self.location,
            &self.price,
            &self.details,
            &self.image,
            &self.link,
        ]
    }

    /// Rows whose every value is empty or a placeholder carry no show.
    fn is_placeholder(&self) -> bool {
        self.values()
            .iter()
            .all(|v| v.is_empty() || PLACEHOLDER_VALUES.contains(v))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ArtistRow {
    #[serde(default)]
    image: String,
}

pub struct ShowsApiSource {
    client: reqwest::Client,
    /// Host root, always with a trailing slash.
    base_url: String,
}

impl ShowsApiSource {
    pub fn new(base_url: &str) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn fetch_all(&self) -> Result<Vec<Event>> {
        let shows: Vec<ShowRow> = self.get_jsonp(SHOWS_PATH).await?;
        let artists: HashMap<String, ArtistRow> = self.get_jsonp(ARTISTS_PATH).await?;

        Ok(shows
            .into_iter()
            .filter_map(|row| self.row_to_event(row, &artists))
            .collect())
    }

    async fn get_jsonp<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let text = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetching {url}"))?
            .error_for_status()
            .with_context(|| format!("fetching {url}"))?
            .text()
            .await?;
        serde_json::from_str(strip_jsonp(&text)).with_context(|| format!("parsing {url}"))
    }

    fn row_to_event(&self, row: ShowRow, artists: &HashMap<String, ArtistRow>) -> Option<Event> {
        if row.is_placeholder() {
            return None;
        }

        let start_time =
            match NaiveDateTime::parse_from_str(&format!("{} {}", row.date, row.time), TIME_FORMAT)
            {
                Ok(t) => t,
                Err(e) => {
                    warn!(artist = %row.artist, error = %e, "show has an unparseable time, skipping");
                    return None;
                }
            };

        let image_url = self.show_image(&row, artists);
        Some(Event {
            title: row.artist,
            start_time,
            end_time: None,
            location: row.location,
            // An empty price means free here.
            price: Some(if row.price.is_empty() {
                "0".to_string()
            } else {
                row.price
            }),
            url: row.link,
            description: row.details,
            image_url,
            owner: None,
            owner_url: None,
            ticket_url: None,
            source: SourceTag::ShowsApi,
        })
    }

    /// The show's own image when present, else the first image among its
    /// artists. Relative artist images live under `pics/` on the host.
    fn show_image(&self, row: &ShowRow, artists: &HashMap<String, ArtistRow>) -> Option<String> {
        if !row.image.is_empty() {
            return Some(row.image.clone());
        }

        for name in row.artist.split(',') {
            let Some(artist) = artists.get(name.trim()) else {
                continue;
            };
            if artist.image.is_empty() {
                continue;
            }
            return Some(if artist.image.starts_with("http") {
                artist.image.clone()
            } else {
                format!("{}pics/{}", self.base_url, artist.image)
            });
        }

        debug!(artist = %row.artist, "no image for show");
        None
    }
}

impl EventSource for ShowsApiSource {
    fn name(&self) -> &str {
        "shows_api"
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

/// Unwrap a JSONP document (`callback([...])`) down to its JSON payload.
/// Plain JSON passes through untouched.
fn strip_jsonp(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return trimmed;
    }
    match (trimmed.find('('), trimmed.rfind(')')) {
        (Some(open), Some(close)) if open < close => &trimmed[open + 1..close],
        _ => trimmed,
    }
}
