//! Direct HTTP transport
//!
//! Credentialed GET through reqwest with a cookie store, so review pages are
//! fetched with the same session a signed-in shopper would have.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::{Origin, Url};

use super::{FetchedPage, PageTransport, TransportError};
use crate::infrastructure::config::TransportConfig;

pub struct DirectTransport {
    client: Client,
    pinned_origin: Option<Origin>,
}

impl DirectTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("uk,ru;q=0.9,en;q=0.8"));

        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .default_headers(headers)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        let pinned_origin = config
            .pinned_origin
            .as_deref()
            .map(|origin| Url::parse(origin).map(|u| u.origin()))
            .transpose()
            .context("Invalid pinned origin")?;

        Ok(Self { client, pinned_origin })
    }

    /// Refuse every URL whose origin differs from `origin`'s.
    #[must_use]
    pub fn pinned_to(mut self, origin: &Url) -> Self {
        self.pinned_origin = Some(origin.origin());
        self
    }

    fn check_origin(&self, url: &Url) -> Result<(), TransportError> {
        match &self.pinned_origin {
            Some(origin) if &url.origin() != origin => Err(TransportError::CrossOrigin {
                url: url.to_string(),
                origin: origin.ascii_serialization(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PageTransport for DirectTransport {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<FetchedPage, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.check_origin(url)?;

        debug!("Fetching review page: {}", url);

        let response = tokio::select! {
            result = self.client.get(url.clone()).send() => {
                result.map_err(|e| TransportError::network(url, &e))?
            },
            () = cancel.cancelled() => {
                warn!("HTTP request cancelled for URL: {}", url);
                return Err(TransportError::Cancelled);
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let final_url = response.url().clone();

        let body = tokio::select! {
            result = response.text() => {
                result.map_err(|e| TransportError::network(url, &e))?
            },
            () = cancel.cancelled() => {
                warn!("Response reading cancelled for URL: {}", url);
                return Err(TransportError::Cancelled);
            }
        };

        debug!("Fetched {} ({} chars)", final_url, body.len());
        Ok(FetchedPage::new(final_url, body))
    }
}
