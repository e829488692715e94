//! Catalog service
//!
//! Owns the live document, the filter settings, the sweep schedules and the
//! panel presenter for one catalog page. Hosts either drive it directly
//! (`handle_event`, `sweep`, `drain_patches`) or [`CatalogService::spawn`] it
//! onto the runtime and talk to it through a [`ServiceHandle`].

#![allow(clippy::uninlined_format_args)]

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::analytics::{AnalyticsSession, SessionDeps, SessionError};
use super::presenter::{LayoutProvider, PanelContent, PanelPresenter, PanelSurface, PointerEvent};
use super::session_registry::SessionRegistry;
use super::sweeper::{SweepReport, Sweeper, TileId, TileRegistry};
use super::watcher::ChangeWatcher;
use crate::domain::{FilterConfig, Lexicon, SettingsAck, SettingsMessage, SettingsPatch};
use crate::infrastructure::config::{AppConfig, TransportConfig};
use crate::infrastructure::dom::{CatalogDocument, DomMutation, TilePatch};
use crate::infrastructure::parsing::{ParsingError, ReviewPageParser, TileExtractor};
use crate::infrastructure::settings_store::{SettingsStore, StorageArea, StorageChange};
use crate::infrastructure::transport::{
    BrowserlessLoader, DirectTransport, FallbackTransport, PageTransport, SandboxedTransport,
};

/// Everything the host reports about the page
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    /// Structural change seen by the host's mutation observer
    Mutation(DomMutation),
    /// Full page load; all node ids handed out so far become invalid
    Reload { url: Url, markup: String },
    Scroll,
    Resize,
    /// Client-side navigation (history push/replace/pop)
    Navigation(Url),
    Pointer(PointerEvent),
    /// The user clicked the analytics trigger of a tile
    AnalyticsRequested(TileId),
    /// The user closed a tile's panel
    ClosePanel(TileId),
}

enum ServiceCommand {
    Event(PageEvent),
    Settings {
        message: SettingsMessage,
        reply: oneshot::Sender<Result<SettingsAck>>,
    },
}

/// Direct transport, falling back to a Browserless-rendered sub-document when
/// an endpoint is configured. Unless an origin is configured explicitly, the
/// direct side only fetches from `page`'s origin.
pub fn default_transport(config: &TransportConfig, page: &Url) -> Result<Arc<dyn PageTransport>> {
    let mut direct = DirectTransport::new(config)?;
    if config.pinned_origin.is_none() {
        direct = direct.pinned_to(page);
    }
    let direct: Arc<dyn PageTransport> = Arc::new(direct);
    let Some(loader) = BrowserlessLoader::from_config(config)? else {
        warn!("No Browserless endpoint configured; review pages are fetched directly with no rendering fallback");
        return Ok(direct);
    };
    let sandboxed = Arc::new(SandboxedTransport::new(Arc::new(loader), config));
    Ok(Arc::new(FallbackTransport::new(direct, sandboxed)))
}

fn lock(presenter: &Mutex<PanelPresenter>) -> MutexGuard<'_, PanelPresenter> {
    presenter.lock().unwrap_or_else(|p| p.into_inner())
}

async fn next_storage_change(
    changes: &mut Option<broadcast::Receiver<StorageChange>>,
) -> Result<StorageChange, RecvError> {
    match changes {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

pub struct CatalogService {
    config: AppConfig,
    document: CatalogDocument,
    tiles: TileRegistry,
    sweeper: Sweeper,
    watcher: ChangeWatcher,
    /// Settings as last written by the editor, before normalization
    settings: FilterConfig,
    filter: FilterConfig,
    store: Arc<dyn SettingsStore>,
    storage_changes: Option<broadcast::Receiver<StorageChange>>,
    deps: SessionDeps,
    presenter: Arc<Mutex<PanelPresenter>>,
    sessions: Vec<AbortHandle>,
}

impl CatalogService {
    pub fn new(
        config: AppConfig,
        document: CatalogDocument,
        store: Arc<dyn SettingsStore>,
        transport: Arc<dyn PageTransport>,
        layout: Arc<dyn LayoutProvider>,
        surface: Box<dyn PanelSurface>,
    ) -> Result<Self> {
        Self::with_lexicon(config, document, store, transport, layout, surface, Lexicon::default())
    }

    /// Service on the stock transport stack for the document's origin.
    pub fn with_default_transport(
        config: AppConfig,
        document: CatalogDocument,
        store: Arc<dyn SettingsStore>,
        layout: Arc<dyn LayoutProvider>,
        surface: Box<dyn PanelSurface>,
    ) -> Result<Self> {
        let transport = default_transport(&config.transport, document.url())?;
        Self::new(config, document, store, transport, layout, surface)
    }

    pub fn with_lexicon(
        config: AppConfig,
        document: CatalogDocument,
        store: Arc<dyn SettingsStore>,
        transport: Arc<dyn PageTransport>,
        layout: Arc<dyn LayoutProvider>,
        surface: Box<dyn PanelSurface>,
        lexicon: Lexicon,
    ) -> Result<Self> {
        config.validate().context("Invalid catalog service configuration")?;
        let lexicon = Arc::new(lexicon);
        let extractor = TileExtractor::new(Arc::clone(&lexicon))?;
        let parser = ReviewPageParser::new(lexicon)?;
        let presenter = PanelPresenter::new(config.presenter.clone(), layout, surface);

        Ok(Self {
            watcher: ChangeWatcher::new(&config.watcher, Instant::now()),
            deps: SessionDeps {
                registry: Arc::new(SessionRegistry::new()),
                transport,
                parser: Arc::new(parser),
                max_pages: config.analytics.max_pages,
            },
            config,
            document,
            tiles: TileRegistry::new(),
            sweeper: Sweeper::new(Arc::new(extractor)),
            settings: FilterConfig::default(),
            filter: FilterConfig::default(),
            store,
            storage_changes: None,
            presenter: Arc::new(Mutex::new(presenter)),
            sessions: Vec::new(),
        })
    }

    /// Load settings, subscribe to their changes, start the schedules and run
    /// the first sweep. A failing store leaves the defaults in place.
    pub async fn init(&mut self) -> SweepReport {
        self.storage_changes = Some(self.store.subscribe());
        let defaults = FilterConfig::default().to_storage_map();
        match self.store.get(&defaults).await {
            Ok(stored) => {
                self.settings = FilterConfig::from_storage_map(&stored);
                self.filter = self.settings.clone();
            }
            Err(e) => warn!("Failed to load filter settings, using defaults: {:#}", e),
        }
        self.watcher = ChangeWatcher::new(&self.config.watcher, Instant::now());
        info!("Catalog service started for {} (filter enabled: {})", self.document.url(), self.filter.enabled);
        self.sweep()
    }

    /// Stop everything: in-flight sessions, panels, the trigger and the
    /// settings subscription.
    pub fn teardown(&mut self) {
        self.deps.registry.cancel_all();
        for session in self.sessions.drain(..) {
            session.abort();
        }
        {
            let mut presenter = lock(&self.presenter);
            presenter.close_all();
            presenter.hide_trigger_now();
        }
        self.storage_changes = None;
        info!("Catalog service stopped");
    }

    pub const fn document(&self) -> &CatalogDocument {
        &self.document
    }

    pub const fn filter(&self) -> &FilterConfig {
        &self.filter
    }

    pub const fn tiles(&self) -> &TileRegistry {
        &self.tiles
    }

    pub fn presenter(&self) -> MutexGuard<'_, PanelPresenter> {
        lock(&self.presenter)
    }

    pub fn sweep(&mut self) -> SweepReport {
        let report = self.sweeper.sweep(&mut self.document, &mut self.tiles, &self.filter);
        self.release_forgotten_tiles();
        report
    }

    /// Sessions and panels of tiles that left the page can never be reached again.
    fn release_forgotten_tiles(&mut self) {
        let forgotten = self.tiles.take_forgotten();
        if forgotten.is_empty() {
            return;
        }
        let mut presenter = lock(&self.presenter);
        for tile in &forgotten {
            self.deps.registry.forget(*tile);
            presenter.close(*tile);
        }
        trace!("Released state of {} removed tiles", forgotten.len());
    }

    pub fn drain_patches(&mut self) -> Vec<TilePatch> {
        self.document.drain_patches()
    }

    pub fn handle_event(&mut self, event: PageEvent) {
        let now = Instant::now();
        match event {
            PageEvent::Mutation(mutation) => {
                if let Err(e) = self.document.apply(mutation) {
                    debug!("Ignoring mutation: {}", e);
                }
                self.on_activity(now);
                self.presenter().reposition_all();
            }
            PageEvent::Reload { url, markup } => {
                self.close_all_panels();
                self.document.replace_document(url, &markup);
                self.watcher.on_navigation(now);
            }
            PageEvent::Scroll => {
                self.on_activity(now);
                self.presenter().reposition_all();
            }
            PageEvent::Resize => self.presenter().reposition_all(),
            PageEvent::Navigation(url) => {
                debug!("Navigated to {}", url);
                self.close_all_panels();
                self.document.set_url(url);
                self.watcher.on_navigation(now);
            }
            PageEvent::Pointer(pointer) => self.presenter().on_pointer(pointer, now),
            PageEvent::AnalyticsRequested(tile) => {
                self.start_analytics(tile);
            }
            PageEvent::ClosePanel(tile) => {
                self.deps.registry.cancel_inflight(tile);
                self.presenter().close(tile);
            }
        }
    }

    fn on_activity(&mut self, now: Instant) {
        if self.watcher.on_activity(now) {
            self.sweep();
        }
    }

    fn close_all_panels(&mut self) {
        self.deps.registry.cancel_all();
        let mut presenter = lock(&self.presenter);
        presenter.close_all();
        presenter.hide_trigger_now();
    }

    /// Earliest instant at which [`Self::on_timer`] has work to do.
    pub fn next_deadline(&self) -> Instant {
        let watcher = self.watcher.next_deadline();
        self.presenter().hover_deadline().map_or(watcher, |hover| hover.min(watcher))
    }

    pub fn on_timer(&mut self, now: Instant) {
        if let Some(cause) = self.watcher.poll(now) {
            trace!("Scheduled sweep ({:?})", cause);
            self.sweep();
        }
        self.presenter().poll_hover(now);
    }

    /// Supersede any running session for `tile` and start a new one.
    /// Returns the crawl task, `None` when the listing could not be located.
    pub fn start_analytics(&mut self, tile: TileId) -> Option<JoinHandle<()>> {
        let mut session = AnalyticsSession::start(tile, self.deps.clone());
        let sequence = session.sequence();
        let registry = Arc::clone(&self.deps.registry);
        let presenter = Arc::clone(&self.presenter);
        registry.render_if_current(tile, sequence, || lock(&presenter).render(tile, PanelContent::Loading));

        let element = self.tiles.node_of(tile).and_then(|node| self.document.element(node));
        let listing = match element {
            Some(element) => session.resolve(element, self.document.url()),
            None => Err(SessionError::Resolution(ParsingError::NoReviewSource)),
        };
        let listing = match listing {
            Ok(listing) => listing,
            Err(error) => {
                let content = PanelContent::Error {
                    reason: error.to_string(),
                };
                registry.render_if_current(tile, sequence, || lock(&presenter).render(tile, content));
                return None;
            }
        };

        debug!("{}: crawling reviews from {}", tile, listing);
        let handle = tokio::spawn(async move {
            let outcome = session.run(listing).await;
            if let Some(content) = PanelContent::from_outcome(&outcome) {
                registry.render_if_current(tile, sequence, || lock(&presenter).render(tile, content));
            }
        });
        self.sessions.retain(|s| !s.is_finished());
        self.sessions.push(handle.abort_handle());
        Some(handle)
    }

    fn set_settings(&mut self, settings: FilterConfig) -> bool {
        let filter = settings.clone().normalized();
        self.settings = settings;
        if filter == self.filter {
            return false;
        }
        info!("Filter settings changed: {:?}", filter);
        self.filter = filter;
        self.sweep();
        true
    }

    /// Apply an editor update: merge, normalize, persist, re-sweep, acknowledge.
    pub async fn apply_settings(&mut self, message: SettingsMessage) -> Result<SettingsAck> {
        let SettingsMessage::UpdateSettings(patch) = message;
        let mut settings = self.settings.clone();
        patch.apply_to(&mut settings);
        let normalized = settings.normalized();

        let persisted = self.store.set(normalized.to_storage_map()).await;
        self.set_settings(normalized);
        persisted.context("Failed to persist filter settings")?;
        Ok(SettingsAck { ok: true })
    }

    /// Raw editor message, as JSON
    pub async fn handle_message(&mut self, message: Value) -> Result<SettingsAck> {
        let message: SettingsMessage = serde_json::from_value(message).context("Unsupported message")?;
        self.apply_settings(message).await
    }

    /// React to a settings store change. Only the sync area carries settings.
    pub fn apply_storage_change(&mut self, change: &StorageChange) -> bool {
        if change.area != StorageArea::Sync {
            trace!("Ignoring {:?} storage change for {}", change.area, change.key);
            return false;
        }
        let patch = SettingsPatch::from_storage_pairs([(change.key.as_str(), &change.new_value)]);
        if patch.is_empty() {
            return false;
        }
        let mut settings = self.settings.clone();
        patch.apply_to(&mut settings);
        self.set_settings(settings)
    }

    async fn reload_settings(&mut self) {
        let defaults = FilterConfig::default().to_storage_map();
        match self.store.get(&defaults).await {
            Ok(stored) => {
                self.set_settings(FilterConfig::from_storage_map(&stored));
            }
            Err(e) => warn!("Failed to reload filter settings: {:#}", e),
        }
    }

    /// Run on the current runtime until the handle shuts it down or is dropped.
    pub fn spawn(mut self) -> ServiceHandle {
        let (commands_tx, commands_rx) = mpsc::channel(self.config.watcher.event_buffer);
        let (patches_tx, patches_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let task = tokio::spawn(async move {
            self.init().await;
            self.run(commands_rx, patches_tx, token).await;
            self.teardown();
        });

        ServiceHandle {
            commands: commands_tx,
            patches: patches_rx,
            shutdown,
            task,
        }
    }

    async fn run(
        &mut self,
        mut commands: mpsc::Receiver<ServiceCommand>,
        patches: mpsc::UnboundedSender<Vec<TilePatch>>,
        shutdown: CancellationToken,
    ) {
        loop {
            if self.document.has_pending_patches() && patches.send(self.drain_patches()).is_err() {
                debug!("Patch receiver dropped");
            }
            let deadline = self.next_deadline();

            tokio::select! {
                () = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(ServiceCommand::Event(event)) => self.handle_event(event),
                    Some(ServiceCommand::Settings { message, reply }) => {
                        let ack = self.apply_settings(message).await;
                        let _ = reply.send(ack);
                    }
                    None => break,
                },
                change = next_storage_change(&mut self.storage_changes) => match change {
                    Ok(change) => {
                        self.apply_storage_change(&change);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} settings changes, reloading", skipped);
                        self.reload_settings().await;
                    }
                    Err(RecvError::Closed) => self.storage_changes = None,
                },
                () = tokio::time::sleep_until(deadline) => self.on_timer(Instant::now()),
            }
        }
        if self.document.has_pending_patches() {
            let _ = patches.send(self.drain_patches());
        }
    }
}

/// Host side of a spawned [`CatalogService`].
pub struct ServiceHandle {
    commands: mpsc::Sender<ServiceCommand>,
    patches: mpsc::UnboundedReceiver<Vec<TilePatch>>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServiceHandle {
    pub async fn send(&self, event: PageEvent) -> Result<()> {
        self.commands
            .send(ServiceCommand::Event(event))
            .await
            .map_err(|_| anyhow!("Catalog service has stopped"))
    }

    pub async fn update_settings(&self, message: SettingsMessage) -> Result<SettingsAck> {
        let (reply, ack) = oneshot::channel();
        self.commands
            .send(ServiceCommand::Settings { message, reply })
            .await
            .map_err(|_| anyhow!("Catalog service has stopped"))?;
        ack.await.context("Catalog service dropped the settings update")?
    }

    /// Raw editor message, as JSON
    pub async fn handle_message(&self, message: Value) -> Result<SettingsAck> {
        let message: SettingsMessage = serde_json::from_value(message).context("Unsupported message")?;
        self.update_settings(message).await
    }

    /// Next batch of tile patches to mirror onto the page
    pub async fn next_patches(&mut self) -> Option<Vec<TilePatch>> {
        self.patches.recv().await
    }

    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await.context("Catalog service task failed")
    }
}
