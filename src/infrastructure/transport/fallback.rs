//! Primary-then-fallback transport composition

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::{FetchedPage, PageTransport, TransportError};

/// Tries `primary` first. Any failure other than cancellation is retried once
/// through `fallback`; cancellation is returned as is.
pub struct FallbackTransport {
    primary: Arc<dyn PageTransport>,
    fallback: Arc<dyn PageTransport>,
}

impl FallbackTransport {
    pub fn new(primary: Arc<dyn PageTransport>, fallback: Arc<dyn PageTransport>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl PageTransport for FallbackTransport {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<FetchedPage, TransportError> {
        match self.primary.fetch(url, cancel).await {
            Ok(page) => Ok(page),
            Err(error) if error.is_cancelled() || cancel.is_cancelled() => {
                debug!("Fetch of {} cancelled, not falling back", url);
                Err(TransportError::Cancelled)
            }
            Err(error) => {
                warn!(
                    "{} transport failed for {}: {}; retrying with {}",
                    self.primary.name(),
                    url,
                    error,
                    self.fallback.name()
                );
                self.fallback.fetch(url, cancel).await
            }
        }
    }
}
