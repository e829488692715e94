//! Context carried into page parsers.

use url::Url;

/// Context for parsing one review listing page
#[derive(Debug, Clone)]
pub struct ReviewPageContext {
    /// Final URL of the fetched page, base for relative links
    pub page_url: Url,

    /// 1-based position of the page within the crawl
    pub page_number: u32,
}

impl ReviewPageContext {
    pub const fn new(page_url: Url, page_number: u32) -> Self {
        Self { page_url, page_number }
    }
}
