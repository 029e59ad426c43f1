pub mod error;

pub use error::{Result, WebDriverError};

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

/// W3C element identifier key in wire payloads.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Opaque reference to an element within the current browsing context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

impl ElementRef {
    /// Encode for use as a script argument or element-typed payload field.
    pub fn to_wire(&self) -> Value {
        json!({ ELEMENT_KEY: self.0 })
    }
}

/// Client for one WebDriver session against a remote end (chromedriver,
/// geckodriver, a Selenium grid). Protocol plumbing only; no harvesting
/// logic lives here.
pub struct WebDriverClient {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl WebDriverClient {
    /// Open a new session. `base_url` is the remote end root, e.g.
    /// `http://localhost:4444`.
    pub async fn connect(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| WebDriverError::Network(e.to_string()))?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let body = json!({ "capabilities": { "alwaysMatch": {} } });

        let resp = client
            .post(format!("{base_url}/session"))
            .json(&body)
            .send()
            .await?;
        let value = unwrap_value(resp).await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| WebDriverError::Protocol("missing sessionId".to_string()))?
            .to_string();

        debug!(session_id, "WebDriver session opened");
        Ok(Self {
            client,
            base_url,
            session_id,
        })
    }

    /// End the session. The remote end closes all its windows.
    pub async fn quit(self) -> Result<()> {
        let resp = self
            .client
            .delete(self.session_url(""))
            .send()
            .await?;
        unwrap_value(resp).await?;
        Ok(())
    }

    // --- Navigation ---

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String> {
        let value = self.get("/url").await?;
        as_string(value, "current url")
    }

    pub async fn refresh(&self) -> Result<()> {
        self.post("/refresh", json!({})).await?;
        Ok(())
    }

    // --- Elements ---

    /// Find the first element matching a CSS selector. A wire-level
    /// "no such element" maps to `Ok(None)`.
    pub async fn find_element(&self, css: &str) -> Result<Option<ElementRef>> {
        let body = json!({ "using": "css selector", "value": css });
        match self.post("/element", body).await {
            Ok(value) => {
                let id = value
                    .get(ELEMENT_KEY)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        WebDriverError::Protocol("element response missing id".to_string())
                    })?;
                Ok(Some(ElementRef(id.to_string())))
            }
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Attribute value, or `None` when the attribute is absent.
    pub async fn element_attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>> {
        let value = self
            .get(&format!("/element/{}/attribute/{name}", element.0))
            .await?;
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Err(WebDriverError::Protocol(format!(
                "attribute value is not a string: {other}"
            ))),
        }
    }

    pub async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<()> {
        self.post(
            &format!("/element/{}/value", element.0),
            json!({ "text": text }),
        )
        .await?;
        Ok(())
    }

    pub async fn click(&self, element: &ElementRef) -> Result<()> {
        self.post(&format!("/element/{}/click", element.0), json!({}))
            .await?;
        Ok(())
    }

    // --- Script execution ---

    /// Execute synchronous script in the page. Element arguments are
    /// wire-encoded with `ElementRef::to_wire`.
    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.post("/execute/sync", json!({ "script": script, "args": args }))
            .await
    }

    // --- Windows ---

    pub async fn window_handle(&self) -> Result<String> {
        let value = self.get("/window").await?;
        as_string(value, "window handle")
    }

    /// Open a new tab. Returns its handle; the session stays on the
    /// current window until `switch_window`.
    pub async fn new_window(&self) -> Result<String> {
        let value = self.post("/window/new", json!({ "type": "tab" })).await?;
        let handle = value
            .get("handle")
            .and_then(Value::as_str)
            .ok_or_else(|| WebDriverError::Protocol("missing window handle".to_string()))?;
        Ok(handle.to_string())
    }

    pub async fn switch_window(&self, handle: &str) -> Result<()> {
        self.post("/window", json!({ "handle": handle })).await?;
        Ok(())
    }

    /// Close the current window. The session must switch to another
    /// handle afterwards.
    pub async fn close_window(&self) -> Result<()> {
        let resp = self
            .client
            .delete(self.session_url("/window"))
            .send()
            .await?;
        unwrap_value(resp).await?;
        Ok(())
    }

    // --- Wire helpers ---

    fn session_url(&self, path: &str) -> String {
        format!("{}/session/{}{path}", self.base_url, self.session_id)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self
            .client
            .post(self.session_url(path))
            .json(&body)
            .send()
            .await?;
        unwrap_value(resp).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let resp = self.client.get(self.session_url(path)).send().await?;
        unwrap_value(resp).await
    }
}

/// Unwrap the `value` field of a WebDriver response, mapping wire errors
/// to `WebDriverError::Api`.
async fn unwrap_value(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status().as_u16();
    let body: Value = resp
        .json()
        .await
        .map_err(|e| WebDriverError::Protocol(format!("non-JSON response: {e}")))?;

    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if !(200..300).contains(&status) {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(WebDriverError::Api {
            status,
            error,
            message,
        });
    }

    Ok(value)
}

fn as_string(value: Value, what: &str) -> Result<String> {
    value
        .as_str()
        .map(String::from)
        .ok_or_else(|| WebDriverError::Protocol(format!("{what} is not a string")))
}
