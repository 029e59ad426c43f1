use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nightjar_common::Config;
use nightjar_store::PgEventStore;
use webdriver_client::WebDriverClient;

use nightjar_harvest::browser::BrowserSurface;
use nightjar_harvest::feed::auth::{FeedCredentials, LoginCredentials, TokenCache};
use nightjar_harvest::feed::SocialFeedSource;
use nightjar_harvest::halt::HaltSpec;
use nightjar_harvest::harvester::Harvester;
use nightjar_harvest::lookup::GraphLookupClient;
use nightjar_harvest::scheduler;
use nightjar_harvest::sites::{CalendarApiSource, ShowsApiSource, VenueCalendarSource};
use nightjar_harvest::source::EventSource;

#[derive(Parser)]
#[command(
    name = "nightjar-harvest",
    about = "Harvest events from every configured source and reconcile them into the store"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single harvest-and-reconcile cycle.
    Once,
    /// Re-index on a fixed period until interrupted.
    Forever,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nightjar=info".parse()?))
        .init();

    info!("Nightjar harvester starting...");

    let cli = Cli::parse();
    let config = Config::from_env();

    let store = PgEventStore::connect(&config.database_url)
        .await
        .context("connecting to Postgres")?;
    store.migrate().await.context("running migrations")?;

    let (sources, browser) = build_sources(&config).await?;
    if sources.is_empty() {
        warn!("no sources configured, nothing to do");
        return Ok(());
    }
    let mut harvester = Harvester::new(sources);

    match cli.command.unwrap_or(Command::Once) {
        Command::Once => scheduler::run_cycle(&mut harvester, &store).await?,
        Command::Forever => {
            let period = Duration::from_secs(config.harvest_interval_hours * 3600);
            scheduler::run_forever(&mut harvester, &store, period).await;
        }
    }

    // The feed sources hold browser handles; dropping the harvester frees
    // them so the session can close cleanly.
    drop(harvester);
    if let Some(browser) = browser {
        match Arc::into_inner(browser) {
            Some(client) => {
                if let Err(e) = client.quit().await {
                    warn!(error = %e, "failed to close the browser session");
                }
            }
            None => warn!("browser session still referenced, skipping quit"),
        }
    }

    Ok(())
}

/// Build one adapter per configured source. Misconfigured sources are
/// skipped with a warning; they never block the others.
async fn build_sources(
    config: &Config,
) -> Result<(Vec<Box<dyn EventSource>>, Option<Arc<WebDriverClient>>)> {
    let mut sources: Vec<Box<dyn EventSource>> = Vec::new();

    if let Some(url) = &config.shows_api_url {
        sources.push(Box::new(ShowsApiSource::new(url)));
    }

    match (&config.calendar_api_url, &config.calendar_api_location) {
        (Some(url), Some(location)) => {
            sources.push(Box::new(CalendarApiSource::new(
                url,
                location,
                &config.currency_symbol,
                config.free_markers.clone(),
            )));
        }
        (Some(_), None) => {
            warn!("CALENDAR_API_URL set without CALENDAR_API_LOCATION, skipping source");
        }
        _ => {}
    }

    match (&config.venue_calendar_url, &config.venue_calendar_location) {
        (Some(url), Some(location)) => {
            sources.push(Box::new(VenueCalendarSource::new(url, location)));
        }
        (Some(_), None) => {
            warn!("VENUE_CALENDAR_URL set without VENUE_CALENDAR_LOCATION, skipping source");
        }
        _ => {}
    }

    if config.feed_page_urls.is_empty() {
        return Ok((sources, None));
    }
    let Some(lookup_url) = &config.lookup_base_url else {
        warn!("feed pages configured without FEED_LOOKUP_URL, skipping the social feed");
        return Ok((sources, None));
    };

    let credentials = FeedCredentials {
        access_token: config.feed_access_token.clone(),
        login: match (&config.feed_identity, &config.feed_secret) {
            (Some(identity), Some(secret)) => Some(LoginCredentials {
                identity: identity.clone(),
                secret: secret.clone(),
            }),
            _ => None,
        },
    };

    let client = Arc::new(
        WebDriverClient::connect(&config.webdriver_url)
            .await
            .context("connecting to the WebDriver remote end")?,
    );
    let lookup = Arc::new(GraphLookupClient::new(lookup_url));
    let tokens = TokenCache::new();
    let halt = HaltSpec {
        max_count: Some(config.max_events_per_page),
        max_start_time: config
            .max_start_days_ahead
            .map(|days| (chrono::Local::now() + chrono::Duration::days(days)).naive_local()),
    };

    for page_url in &config.feed_page_urls {
        let surface: Arc<dyn BrowserSurface> = client.clone();
        match SocialFeedSource::new(
            page_url,
            surface,
            lookup.clone(),
            credentials.clone(),
            config.token_tool_url.clone(),
            tokens.clone(),
            halt.clone(),
        ) {
            Ok(source) => sources.push(Box::new(source)),
            Err(e) => warn!(page = %page_url, error = %e, "skipping misconfigured feed source"),
        }
    }

    Ok((sources, Some(client)))
}
