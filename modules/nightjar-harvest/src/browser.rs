// Explicit capability surface over browser automation. The pagination
// engine depends on exactly these operations, which keeps it testable
// against a scripted fake instead of a live driver.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use webdriver_client::{ElementRef, WebDriverClient};

/// Driver-agnostic element handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element(pub String);

/// How often the default bounded wait re-checks for an element.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[async_trait]
pub trait BrowserSurface: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn refresh(&self) -> Result<()>;

    /// First element matching a CSS selector, or `None`.
    async fn find_element(&self, css: &str) -> Result<Option<Element>>;

    async fn execute_script(&self, js: &str, args: Vec<Value>) -> Result<Value>;

    async fn attribute(&self, element: &Element, name: &str) -> Result<Option<String>>;

    async fn send_keys(&self, element: &Element, text: &str) -> Result<()>;

    async fn click(&self, element: &Element) -> Result<()>;

    async fn window_handle(&self) -> Result<String>;

    /// Open a new tab and return its handle without switching to it.
    async fn open_tab(&self) -> Result<String>;

    async fn switch_tab(&self, handle: &str) -> Result<()>;

    /// Close the current tab. Callers must switch to another handle next.
    async fn close_tab(&self) -> Result<()>;

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.execute_script("window.scrollBy(0, document.body.scrollHeight);", vec![])
            .await?;
        Ok(())
    }

    async fn page_height(&self) -> Result<i64> {
        let value = self
            .execute_script("return document.body.scrollHeight;", vec![])
            .await?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .context("page height script returned a non-number")
    }

    /// Tag an element so later scans can recognize it as handled.
    async fn set_attribute(&self, element: &Element, name: &str, value: &str) -> Result<()> {
        self.execute_script(
            "arguments[0].setAttribute(arguments[1], arguments[2]);",
            vec![
                json!({ "element-6066-11e4-a52e-4f735466cecf": element.0 }),
                json!(name),
                json!(value),
            ],
        )
        .await?;
        Ok(())
    }

    /// Bounded wait for every match of `css` to disappear. Returns whether
    /// the page got there before the deadline; never waits past it.
    async fn wait_until_gone(&self, css: &str, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.find_element(css).await?.is_none() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl BrowserSurface for WebDriverClient {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.goto(url).await.context("navigate failed")
    }

    async fn current_url(&self) -> Result<String> {
        Ok(WebDriverClient::current_url(self).await?)
    }

    async fn refresh(&self) -> Result<()> {
        Ok(WebDriverClient::refresh(self).await?)
    }

    async fn find_element(&self, css: &str) -> Result<Option<Element>> {
        let found = WebDriverClient::find_element(self, css).await?;
        Ok(found.map(|el| Element(el.0)))
    }

    async fn execute_script(&self, js: &str, args: Vec<Value>) -> Result<Value> {
        Ok(self.execute(js, args).await?)
    }

    async fn attribute(&self, element: &Element, name: &str) -> Result<Option<String>> {
        let el = ElementRef(element.0.clone());
        Ok(self.element_attribute(&el, name).await?)
    }

    async fn send_keys(&self, element: &Element, text: &str) -> Result<()> {
        let el = ElementRef(element.0.clone());
        Ok(WebDriverClient::send_keys(self, &el, text).await?)
    }

    async fn click(&self, element: &Element) -> Result<()> {
        let el = ElementRef(element.0.clone());
        Ok(WebDriverClient::click(self, &el).await?)
    }

    async fn window_handle(&self) -> Result<String> {
        Ok(WebDriverClient::window_handle(self).await?)
    }

    async fn open_tab(&self) -> Result<String> {
        Ok(self.new_window().await?)
    }

    async fn switch_tab(&self, handle: &str) -> Result<()> {
        Ok(self.switch_window(handle).await?)
    }

    async fn close_tab(&self) -> Result<()> {
        Ok(self.close_window().await?)
    }

    async fn set_attribute(&self, element: &Element, name: &str, value: &str) -> Result<()> {
        let el = ElementRef(element.0.clone());
        self.execute(
            "arguments[0].setAttribute(arguments[1], arguments[2]);",
            vec![el.to_wire(), json!(name), json!(value)],
        )
        .await?;
        Ok(())
    }
}
