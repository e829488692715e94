//! Application layer - catalog sweeps, analytics sessions and panels
//!
//! This module coordinates the domain logic against the live document:
//! the sweep pipeline, the change watcher schedules, per-tile analytics
//! sessions and the floating panels, all driven by [`CatalogService`].

pub mod analytics;
pub mod presenter;
pub mod service;
pub mod session_registry;
pub mod sweeper;
pub mod watcher;

// Re-export commonly used items
pub use analytics::{AnalyticsReport, AnalyticsSession, SessionDeps, SessionError, SessionState};
pub use presenter::{
    LayoutProvider, PanelContent, PanelPresenter, PanelSurface, Point, PointerEvent, Rect, RecordingSurface,
    SurfaceCall, Viewport,
};
pub use service::{CatalogService, PageEvent, ServiceHandle, default_transport};
pub use session_registry::SessionRegistry;
pub use sweeper::{SweepReport, Sweeper, TileId, TileRegistry};
pub use watcher::{ChangeWatcher, SweepCause};
