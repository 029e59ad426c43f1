use thiserror::Error;

pub type Result<T> = std::result::Result<T, WebDriverError>;

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("WebDriver error '{error}' (status {status}): {message}")]
    Api {
        status: u16,
        error: String,
        message: String,
    },

    #[error("Unexpected WebDriver response: {0}")]
    Protocol(String),
}

impl WebDriverError {
    /// Whether this is the wire-level "no such element" error, which
    /// callers usually want to treat as an absent element, not a failure.
    pub fn is_no_such_element(&self) -> bool {
        matches!(self, WebDriverError::Api { error, .. } if error == "no such element")
    }
}

impl From<reqwest::Error> for WebDriverError {
    fn from(err: reqwest::Error) -> Self {
        WebDriverError::Network(err.to_string())
    }
}
