//! Review analytics sessions
//!
//! One session crawls a product's review listing page by page and folds the
//! dated entries into a [`MonthlyAggregate`]. Sessions are cheap to abandon:
//! the registry sequence is checked around every fetch, and the transport
//! sees the session's cancellation token.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scraper::ElementRef;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::session_registry::SessionRegistry;
use super::sweeper::TileId;
use crate::domain::MonthlyAggregate;
use crate::infrastructure::parsing::{ContextualParser, ParsingError, ReviewPageContext, ReviewPageParser};
use crate::infrastructure::transport::{PageTransport, TransportError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Could not locate reviews: {0}")]
    Resolution(#[from] ParsingError),

    #[error("Failed to load reviews: {0}")]
    Transport(TransportError),

    #[error("Session superseded")]
    Cancelled,
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        if error.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Transport(error)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Resolving,
    Fetching { page: u32 },
    Aggregating,
    Done,
    Errored,
    Cancelled,
}

impl SessionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsReport {
    pub tile: TileId,
    pub listing_url: Url,
    pub aggregate: MonthlyAggregate,
    pub pages_fetched: u32,
    /// The page cap was reached with more pages left
    pub truncated: bool,
    pub completed_at: DateTime<Utc>,
}

/// Shared, long-lived parts every session of a service uses.
#[derive(Clone)]
pub struct SessionDeps {
    pub registry: Arc<SessionRegistry>,
    pub transport: Arc<dyn PageTransport>,
    pub parser: Arc<ReviewPageParser>,
    pub max_pages: u32,
}

pub struct AnalyticsSession {
    tile: TileId,
    sequence: u64,
    deps: SessionDeps,
    cancel: CancellationToken,
    state: SessionState,
    pages_fetched: u32,
}

impl AnalyticsSession {
    /// Start a session for `tile`, superseding whatever ran for it before.
    pub fn start(tile: TileId, deps: SessionDeps) -> Self {
        let sequence = deps.registry.bump(tile);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        deps.registry
            .add_cancel(tile, sequence, Box::new(move || token.cancel()));
        debug!("{}: analytics session {} started", tile, sequence);
        Self {
            tile,
            sequence,
            deps,
            cancel,
            state: SessionState::Idle,
            pages_fetched: 0,
        }
    }

    pub const fn tile(&self) -> TileId {
        self.tile
    }

    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub const fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_current(&self) -> bool {
        !self.cancel.is_cancelled() && self.deps.registry.is_current(self.tile, self.sequence)
    }

    fn ensure_current(&self) -> Result<(), SessionError> {
        if self.is_current() { Ok(()) } else { Err(SessionError::Cancelled) }
    }

    /// Locate the review listing for the tile element.
    pub fn resolve(&mut self, tile: ElementRef<'_>, page_url: &Url) -> Result<Url, SessionError> {
        self.state = SessionState::Resolving;
        match self.deps.parser.resolve_listing_url(tile, page_url) {
            Ok(url) => Ok(url),
            Err(error) => {
                warn!("{}: {}", self.tile, error);
                self.state = SessionState::Errored;
                Err(error.into())
            }
        }
    }

    /// Crawl the listing and aggregate it. The final state reflects the outcome.
    pub async fn run(&mut self, listing: Url) -> Result<AnalyticsReport, SessionError> {
        let outcome = self.crawl(listing).await;
        self.state = match &outcome {
            Ok(_) => SessionState::Done,
            Err(SessionError::Cancelled) => SessionState::Cancelled,
            Err(_) => SessionState::Errored,
        };
        match &outcome {
            Ok(report) => info!(
                "{}: {} reviews over {} months from {} pages",
                self.tile,
                report.aggregate.total_reviews(),
                report.aggregate.len(),
                report.pages_fetched
            ),
            Err(SessionError::Cancelled) => debug!("{}: session {} cancelled", self.tile, self.sequence),
            Err(error) => warn!("{}: session failed: {}", self.tile, error),
        }
        outcome
    }

    async fn crawl(&mut self, listing: Url) -> Result<AnalyticsReport, SessionError> {
        let mut aggregate = MonthlyAggregate::new();
        let mut visited = HashSet::new();
        let mut next = Some(listing.clone());
        let mut truncated = false;

        while let Some(url) = next.take() {
            if self.pages_fetched >= self.deps.max_pages {
                debug!("{}: page cap {} reached", self.tile, self.deps.max_pages);
                truncated = true;
                break;
            }
            if !visited.insert(url.clone()) {
                debug!("{}: pagination loops back to {}, stopping", self.tile, url);
                break;
            }

            self.ensure_current()?;
            self.state = SessionState::Fetching {
                page: self.pages_fetched + 1,
            };
            let page = self.deps.transport.fetch(&url, &self.cancel).await?;
            self.ensure_current()?;
            self.pages_fetched += 1;

            self.state = SessionState::Aggregating;
            let context = ReviewPageContext::new(page.url.clone(), self.pages_fetched);
            let parsed = self.deps.parser.parse_with_context(&page.parse(), &context);
            for (month, stars) in parsed.dated_entries() {
                aggregate.record(month, stars);
            }
            next = parsed.next_page;
        }

        Ok(AnalyticsReport {
            tile: self.tile,
            listing_url: listing,
            aggregate,
            pages_fetched: self.pages_fetched,
            truncated,
            completed_at: Utc::now(),
        })
    }
}
