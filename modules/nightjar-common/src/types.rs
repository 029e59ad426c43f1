use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// --- Source tags ---

/// Which kind of source produced a record. Stored alongside each event as a
/// discriminator; a single `Event` type plus this tag replaces per-source
/// subtypes in the persisted model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    SocialFeed,
    ShowsApi,
    CalendarApi,
    VenueCalendar,
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceTag::SocialFeed => write!(f, "social_feed"),
            SourceTag::ShowsApi => write!(f, "shows_api"),
            SourceTag::CalendarApi => write!(f, "calendar_api"),
            SourceTag::VenueCalendar => write!(f, "venue_calendar"),
        }
    }
}

impl std::str::FromStr for SourceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "social_feed" => Ok(SourceTag::SocialFeed),
            "shows_api" => Ok(SourceTag::ShowsApi),
            "calendar_api" => Ok(SourceTag::CalendarApi),
            "venue_calendar" => Ok(SourceTag::VenueCalendar),
            other => Err(format!("unknown source tag: {other}")),
        }
    }
}

// --- The normalized event record ---

/// A normalized event, whatever source it came from.
///
/// Identity is not a source key: two events are considered the same
/// real-world event when title and location match exactly and the start
/// time falls on the same calendar day. All times are timezone-naive
/// local times; offsets from remote APIs are dropped after conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub title: String,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub location: String,
    /// Free-text price. `"0"` means free.
    pub price: Option<String>,
    pub url: String,
    pub description: String,
    pub image_url: Option<String>,
    pub owner: Option<String>,
    pub owner_url: Option<String>,
    pub ticket_url: Option<String>,
    pub source: SourceTag,
}

impl Event {
    /// Calendar day of the start time, the third leg of the matching key.
    pub fn start_day(&self) -> NaiveDate {
        self.start_time.date()
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {} @ {}", self.title, self.location, self.start_time)
    }
}
