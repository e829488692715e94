//! Sandboxed transport
//!
//! Some storefront pages only fill in after client-side rendering. This
//! transport opens the page in an isolated sub-document (a hidden frame, a
//! headless browser tab, a rendering service) and waits until its body holds
//! at least one element. Readiness is checked on a fixed poll and whenever
//! the sub-document reports a change; an absolute timeout bounds the wait.
//! Whatever happens first settles the load exactly once, and the
//! sub-document is always torn down afterwards.

#![allow(clippy::uninlined_format_args)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use super::{FetchedPage, PageTransport, TransportError};
use crate::infrastructure::config::TransportConfig;

static BODY: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("body").ok());

/// Opens sub-documents
#[async_trait]
pub trait SubDocumentLoader: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Box<dyn SubDocument>, TransportError>;
}

/// A page loading in isolation
#[async_trait]
pub trait SubDocument: Send + Sync {
    /// Current markup; `None` until anything has been loaded
    fn snapshot(&self) -> Option<String>;

    /// Ticks whenever the sub-document's content changes
    fn changes(&self) -> watch::Receiver<u64>;

    /// A terminal failure reported by the loader, if any
    fn failure(&self) -> Option<TransportError> {
        None
    }

    /// Location after redirects, when the loader knows it
    fn final_url(&self) -> Option<Url> {
        None
    }

    async fn teardown(&mut self);
}

/// True once the document's `<body>` holds at least one element.
pub fn body_has_elements(markup: &str) -> bool {
    let Some(body_selector) = BODY.as_ref() else {
        return false;
    };
    let html = Html::parse_document(markup);
    html.select(body_selector)
        .next()
        .is_some_and(|body| body.children().any(|c| c.value().is_element()))
}

/// Race `work` against cancellation and an absolute deadline; the first
/// outcome wins and is the only one reported. `budget` is the whole
/// allowance the deadline was derived from, reported on timeout.
pub async fn settle_first<T, F>(
    work: F,
    cancel: &CancellationToken,
    deadline: Instant,
    budget: Duration,
    url: &Url,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TransportError::Cancelled),
        outcome = tokio::time::timeout_at(deadline, work) => outcome.unwrap_or_else(|_| {
            Err(TransportError::Timeout {
                url: url.to_string(),
                timeout_ms: budget.as_millis() as u64,
            })
        }),
    }
}

pub struct SandboxedTransport {
    loader: Arc<dyn SubDocumentLoader>,
    poll_interval: Duration,
    max_attempts: u32,
    timeout: Duration,
}

impl SandboxedTransport {
    pub fn new(loader: Arc<dyn SubDocumentLoader>, config: &TransportConfig) -> Self {
        Self {
            loader,
            poll_interval: config.poll_interval(),
            max_attempts: config.poll_max_attempts,
            timeout: config.fallback_timeout(),
        }
    }

    fn ready_markup(document: &dyn SubDocument) -> Option<String> {
        document.snapshot().filter(|markup| body_has_elements(markup))
    }

    async fn wait_ready(&self, document: &dyn SubDocument, url: &Url) -> Result<String, TransportError> {
        let mut changes = document.changes();
        let mut observing = true;
        let mut poll = tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u32;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    attempts += 1;
                    if let Some(failure) = document.failure() {
                        return Err(failure);
                    }
                    if let Some(markup) = Self::ready_markup(document) {
                        trace!("Sub-document ready after {} polls", attempts);
                        return Ok(markup);
                    }
                    if attempts > self.max_attempts {
                        return Err(TransportError::EmptyDocument { url: url.to_string() });
                    }
                }
                changed = changes.changed(), if observing => {
                    if changed.is_err() {
                        // Loader went away; keep polling until the attempts run out
                        observing = false;
                        continue;
                    }
                    if let Some(failure) = document.failure() {
                        return Err(failure);
                    }
                    if let Some(markup) = Self::ready_markup(document) {
                        trace!("Sub-document ready on change notification");
                        return Ok(markup);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PageTransport for SandboxedTransport {
    fn name(&self) -> &'static str {
        "sandboxed"
    }

    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<FetchedPage, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        debug!("Loading {} in a sandboxed sub-document", url);

        // Opening and waiting share one budget
        let deadline = Instant::now() + self.timeout;
        let mut document = settle_first(self.loader.open(url), cancel, deadline, self.timeout, url).await?;
        let outcome = settle_first(
            self.wait_ready(document.as_ref(), url),
            cancel,
            deadline,
            self.timeout,
            url,
        )
        .await;
        let final_url = document.final_url();
        document.teardown().await;

        let body = outcome?;
        Ok(FetchedPage::new(final_url.unwrap_or_else(|| url.clone()), body))
    }
}
