// Remote lookup that materializes a feed event id into full event fields.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("event not found: {0}")]
    NotFound(String),

    #[error("lookup failed: {0}")]
    Api(String),

    #[error("lookup endpoint unreachable: {0}")]
    Network(String),
}

/// Raw fields for one event as returned by the lookup API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub place: Option<RawPlace>,
    pub ticket_uri: Option<String>,
    pub cover: Option<RawCover>,
    pub owner: Option<RawOwner>,
    #[serde(default)]
    pub is_canceled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPlace {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCover {
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOwner {
    pub name: Option<String>,
    pub id: Option<String>,
}

#[async_trait]
pub trait EventLookup: Send + Sync {
    /// Resolve a feed event id under the given access token.
    async fn resolve(&self, id: &str, token: &str) -> Result<RawEvent, LookupError>;
}

/// Fields requested from the lookup API.
const LOOKUP_FIELDS: &str =
    "name,description,start_time,end_time,place,ticket_uri,cover,owner,is_canceled";

/// HTTP client for the feed's event-lookup API.
pub struct GraphLookupClient {
    client: reqwest::Client,
    base_url: String,
}

impl GraphLookupClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EventLookup for GraphLookupClient {
    async fn resolve(&self, id: &str, token: &str) -> Result<RawEvent, LookupError> {
        debug!(id, "resolving feed event");

        let resp = self
            .client
            .get(format!("{}/{id}", self.base_url))
            .query(&[("fields", LOOKUP_FIELDS), ("access_token", token)])
            .send()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        if (200..300).contains(&status) {
            return resp
                .json::<RawEvent>()
                .await
                .map_err(|e| LookupError::Api(format!("malformed lookup response: {e}")));
        }

        #[derive(Deserialize)]
        struct ErrorBody {
            error: Option<ErrorDetail>,
        }
        #[derive(Deserialize, Default)]
        struct ErrorDetail {
            #[serde(rename = "type", default)]
            kind: String,
            #[serde(default)]
            message: String,
        }

        let detail = resp
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_default();

        Err(classify_error(status, &detail.kind, detail.message))
    }
}

fn classify_error(status: u16, kind: &str, message: String) -> LookupError {
    if status == 401 || kind == "OAuthException" {
        LookupError::Auth(message)
    } else if status == 404 {
        LookupError::NotFound(message)
    } else {
        LookupError::Api(format!("status {status} ({kind}): {message}"))
    }
}

/// Parse a datetime string from the lookup API and normalize it to a
/// timezone-naive local time. Offsets are converted to local time and
/// then dropped; downstream storage is timezone-naive.
pub fn normalize_datetime(s: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Ok(dt.with_timezone(&Local).naive_local());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    // Date-only events (all-day) start at midnight.
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d.and_hms_opt(0, 0, 0).expect("midnight is valid"));
    }
    bail!("unrecognized datetime format: {s}")
}
