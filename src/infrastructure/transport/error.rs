//! Transport error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP request failed with status {status}: {url}")]
    Http { status: u16, url: String },

    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("Cross-origin request refused: {url} is outside {origin}")]
    CrossOrigin { url: String, origin: String },

    #[error("Loaded document stayed empty: {url}")]
    EmptyDocument { url: String },

    #[error("Timed out after {timeout_ms} ms loading {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Sub-document loader failed: {0}")]
    Loader(String),
}

impl TransportError {
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn network(url: &url::Url, error: &reqwest::Error) -> Self {
        Self::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
