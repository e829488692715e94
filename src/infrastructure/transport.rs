//! Page transports for review listing pages
//!
//! A transport turns a URL into page markup. The direct transport issues a
//! credentialed GET; the sandboxed transport renders the page in an isolated
//! sub-document and waits for it to fill in; the fallback transport tries the
//! first and falls back to the second. All of them honour a
//! [`CancellationToken`] so a superseded analytics session stops its network
//! work promptly.

pub mod browserless;
pub mod direct;
pub mod error;
pub mod fallback;
pub mod sandboxed;

// Re-export public types
pub use browserless::BrowserlessLoader;
pub use direct::DirectTransport;
pub use error::TransportError;
pub use fallback::FallbackTransport;
pub use sandboxed::{SandboxedTransport, SubDocument, SubDocumentLoader, settle_first};

use async_trait::async_trait;
use scraper::Html;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Markup of one fetched page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Final URL after redirects, base for relative links
    pub url: Url,
    pub body: String,
}

impl FetchedPage {
    pub fn new(url: Url, body: impl Into<String>) -> Self {
        Self { url, body: body.into() }
    }

    pub fn parse(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

/// A strategy for loading one page
#[async_trait]
pub trait PageTransport: Send + Sync {
    /// Short strategy name for logs
    fn name(&self) -> &'static str;

    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<FetchedPage, TransportError>;
}
