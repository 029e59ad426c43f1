// Session credentials for the feed's lookup API: a process-wide token
// cache plus the UI flow that mints a fresh token when none is supplied.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::browser::BrowserSurface;

/// W3C keystroke for the Enter key.
const ENTER_KEY: &str = "\u{E007}";

/// Cache of access tokens keyed by owning identity, shared by every feed
/// adapter built from the same cache handle. Repeated runs under one
/// identity skip the mint flow; writers are last-writer-wins.
#[derive(Clone, Default)]
pub struct TokenCache {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("token cache lock poisoned")
            .get(identity)
            .cloned()
    }

    pub fn put(&self, identity: &str, token: String) {
        self.inner
            .lock()
            .expect("token cache lock poisoned")
            .insert(identity.to_string(), token);
    }

    /// Drop a token the remote end has rejected.
    pub fn invalidate(&self, identity: &str) {
        self.inner
            .lock()
            .expect("token cache lock poisoned")
            .remove(identity);
    }
}

/// Identity/secret pair for the token tool's login form.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub identity: String,
    pub secret: String,
}

/// How a feed adapter authorizes its lookups: a directly supplied token
/// (no recovery possible when it gets rejected), or login credentials for
/// minting tokens through the token-tool UI.
#[derive(Debug, Clone, Default)]
pub struct FeedCredentials {
    pub access_token: Option<String>,
    pub login: Option<LoginCredentials>,
}

impl FeedCredentials {
    pub fn validate(&self) -> Result<()> {
        if self.access_token.is_none() && self.login.is_none() {
            bail!("expecting an access token or login credentials");
        }
        Ok(())
    }
}

/// Selectors for the token tool page, by role.
#[derive(Debug, Clone)]
pub struct TokenToolSelectors {
    pub identity_input: String,
    pub secret_input: String,
    pub generate_button: String,
    pub token_field: String,
}

impl Default for TokenToolSelectors {
    fn default() -> Self {
        Self {
            identity_input: r#"input[type="email"]"#.to_string(),
            secret_input: r#"input[type="password"]"#.to_string(),
            generate_button: r#"button[data-action="generate-token"]"#.to_string(),
            token_field: "input[data-token-output]".to_string(),
        }
    }
}

/// Drive the token tool in its own tab and return the minted token. The
/// browser is left back on the tab it was on, so an in-progress feed scan
/// keeps its page state.
pub async fn scrape_token(
    browser: &dyn BrowserSurface,
    tool_url: &str,
    login: &LoginCredentials,
    selectors: &TokenToolSelectors,
) -> Result<String> {
    let feed_tab = browser.window_handle().await?;
    let tool_tab = browser.open_tab().await?;
    browser.switch_tab(&tool_tab).await?;

    let result = mint_in_current_tab(browser, tool_url, login, selectors).await;

    if let Err(e) = browser.close_tab().await {
        warn!(error = %e, "failed to close token tool tab");
    }
    browser
        .switch_tab(&feed_tab)
        .await
        .context("could not return to the feed tab")?;

    result
}

async fn mint_in_current_tab(
    browser: &dyn BrowserSurface,
    tool_url: &str,
    login: &LoginCredentials,
    selectors: &TokenToolSelectors,
) -> Result<String> {
    browser.navigate(tool_url).await?;

    // A login form means we are not authenticated yet.
    if let Some(identity_input) = browser.find_element(&selectors.identity_input).await? {
        debug!("token tool shows a login form, signing in");
        browser.send_keys(&identity_input, &login.identity).await?;
        let secret_input = browser
            .find_element(&selectors.secret_input)
            .await?
            .context("login form has no secret field")?;
        browser.send_keys(&secret_input, &login.secret).await?;
        browser.send_keys(&secret_input, ENTER_KEY).await?;

        let landed = browser.current_url().await?;
        if !landed.starts_with(tool_url) {
            bail!("login did not land back on the token tool; identity or secret look wrong");
        }
    }

    if let Some(generate) = browser.find_element(&selectors.generate_button).await? {
        browser.click(&generate).await?;
    }

    let field = browser
        .find_element(&selectors.token_field)
        .await?
        .context("token field not found on the token tool page")?;
    let token = browser
        .attribute(&field, "value")
        .await?
        .filter(|t| !t.is_empty())
        .context("token field is empty")?;

    info!("minted a fresh access token");
    Ok(token)
}
