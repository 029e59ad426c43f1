use std::env;

/// Application configuration loaded from environment variables.
///
/// Per-source parameters (feed pages, credentials, halt thresholds, venue
/// endpoints) are read here once and threaded into adapters as plain
/// construction arguments.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Browser automation (WebDriver remote end)
    pub webdriver_url: String,

    // Authenticated social feed
    pub feed_page_urls: Vec<String>,
    pub feed_identity: Option<String>,
    pub feed_secret: Option<String>,
    pub feed_access_token: Option<String>,
    /// UI tool that mints access tokens for the feed's lookup API.
    pub token_tool_url: Option<String>,
    /// Base URL of the remote event-lookup API.
    pub lookup_base_url: Option<String>,
    pub max_events_per_page: u64,
    /// Stop a feed run once an event starts more than this many days ahead.
    pub max_start_days_ahead: Option<i64>,

    // Ad-hoc site sources (each skipped when unset)
    pub shows_api_url: Option<String>,
    pub calendar_api_url: Option<String>,
    pub calendar_api_location: Option<String>,
    pub venue_calendar_url: Option<String>,
    pub venue_calendar_location: Option<String>,

    // Price heuristics for sources that bury prices in prose
    pub currency_symbol: String,
    pub free_markers: Vec<String>,

    // Scheduling
    pub harvest_interval_hours: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            webdriver_url: env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| "http://localhost:4444".to_string()),
            feed_page_urls: list_env("FEED_PAGE_URLS"),
            feed_identity: optional_env("FEED_IDENTITY"),
            feed_secret: optional_env("FEED_SECRET"),
            feed_access_token: optional_env("FEED_ACCESS_TOKEN"),
            token_tool_url: optional_env("FEED_TOKEN_TOOL_URL"),
            lookup_base_url: optional_env("FEED_LOOKUP_URL"),
            max_events_per_page: parsed_env("FEED_MAX_EVENTS_PER_PAGE", 100),
            max_start_days_ahead: optional_env("HALT_MAX_START_DAYS")
                .map(|v| v.parse().expect("HALT_MAX_START_DAYS must be a number")),
            shows_api_url: optional_env("SHOWS_API_URL"),
            calendar_api_url: optional_env("CALENDAR_API_URL"),
            calendar_api_location: optional_env("CALENDAR_API_LOCATION"),
            venue_calendar_url: optional_env("VENUE_CALENDAR_URL"),
            venue_calendar_location: optional_env("VENUE_CALENDAR_LOCATION"),
            currency_symbol: env::var("CURRENCY_SYMBOL").unwrap_or_else(|_| "$".to_string()),
            free_markers: {
                let markers = list_env("FREE_MARKERS");
                if markers.is_empty() {
                    vec!["free".to_string()]
                } else {
                    markers
                }
            },
            harvest_interval_hours: parsed_env("HARVEST_INTERVAL_HOURS", 6),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// Comma-separated list env var; empty or missing yields an empty list.
fn list_env(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parsed_env(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|v| v.parse().unwrap_or_else(|_| panic!("{key} must be a number")))
        .unwrap_or(default)
}
