//! Browserless-backed sub-documents
//!
//! Renders a page through a Browserless `/content` endpoint. The request runs
//! in a background task; the sub-document fills in when it completes, and
//! teardown aborts the task if it is still running.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::TransportError;
use super::sandboxed::{SubDocument, SubDocumentLoader};
use crate::infrastructure::config::TransportConfig;

#[derive(Debug, Serialize)]
struct ContentRequest<'a> {
    url: &'a str,
}

pub struct BrowserlessLoader {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl BrowserlessLoader {
    pub fn new(endpoint: &str, token: Option<String>, config: &TransportConfig) -> Result<Self> {
        let mut endpoint =
            Url::parse(endpoint).with_context(|| format!("Invalid Browserless endpoint '{endpoint}'"))?;
        // `join` replaces the last segment unless the base ends in a slash
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let client = Client::builder()
            .timeout(config.fallback_timeout())
            .build()
            .context("Failed to create Browserless HTTP client")?;
        Ok(Self { client, endpoint, token })
    }

    /// Loader for the configured endpoint, `None` when none is configured.
    pub fn from_config(config: &TransportConfig) -> Result<Option<Self>> {
        config
            .browserless_endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, config.browserless_token.clone(), config))
            .transpose()
    }

    pub fn content_url(&self) -> Result<Url, TransportError> {
        let mut url = self
            .endpoint
            .join("content")
            .map_err(|e| TransportError::Loader(format!("Bad content endpoint: {e}")))?;
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

#[derive(Default)]
struct LoadState {
    markup: Mutex<Option<String>>,
    failure: Mutex<Option<TransportError>>,
}

struct BrowserlessDocument {
    state: Arc<LoadState>,
    changes: watch::Receiver<u64>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl SubDocumentLoader for BrowserlessLoader {
    async fn open(&self, url: &Url) -> Result<Box<dyn SubDocument>, TransportError> {
        let content_url = self.content_url()?;
        let request = self.client.post(content_url).json(&ContentRequest { url: url.as_str() });
        let state = Arc::new(LoadState::default());
        let (tx, rx) = watch::channel(0u64);

        let target = url.clone();
        let task_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            let outcome = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    response.text().await.map_err(|e| TransportError::network(&target, &e))
                }
                Ok(response) => Err(TransportError::Http {
                    status: response.status().as_u16(),
                    url: target.to_string(),
                }),
                Err(e) => Err(TransportError::network(&target, &e)),
            };
            match outcome {
                Ok(markup) => {
                    debug!("Browserless rendered {} ({} chars)", target, markup.len());
                    *task_state.markup.lock().unwrap_or_else(|p| p.into_inner()) = Some(markup);
                }
                Err(error) => {
                    warn!("Browserless render failed for {}: {}", target, error);
                    *task_state.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(error);
                }
            }
            let _ = tx.send(1);
        });

        Ok(Box::new(BrowserlessDocument {
            state,
            changes: rx,
            task: Some(task),
        }))
    }
}

#[async_trait]
impl SubDocument for BrowserlessDocument {
    fn snapshot(&self) -> Option<String> {
        self.state.markup.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }

    fn failure(&self) -> Option<TransportError> {
        self.state.failure.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    async fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
