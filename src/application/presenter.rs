//! Analytics panels and the floating trigger
//!
//! Panels are placed under their tile in page coordinates and clamped to the
//! viewport horizontally. The trigger follows the hovered tile. Layout comes
//! from the host through [`LayoutProvider`]; output goes out through
//! [`PanelSurface`].

#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::analytics::{AnalyticsReport, SessionError};
use super::sweeper::TileId;
use crate::domain::MonthKey;
use crate::infrastructure::config::PresenterConfig;

/// Element box in viewport coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub width: f64,
    pub height: f64,
}

/// Position in page coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Geometry of the live page, answered by the host.
pub trait LayoutProvider: Send + Sync {
    fn viewport(&self) -> Viewport;

    /// `None` when the tile is not rendered
    fn tile_rect(&self, tile: TileId) -> Option<Rect>;

    /// Rendered width of the tile's panel
    fn panel_width(&self, tile: TileId) -> f64;
}

/// Where panels and the trigger are drawn.
pub trait PanelSurface: Send {
    fn show_panel(&mut self, tile: TileId, html: &str, at: Point);
    fn move_panel(&mut self, tile: TileId, at: Point);
    fn close_panel(&mut self, tile: TileId);
    fn show_trigger(&mut self, tile: TileId, at: Point);
    fn hide_trigger(&mut self);
}

pub fn panel_position(rect: Rect, viewport: Viewport, panel_width: f64, config: &PresenterConfig) -> Point {
    let margin = config.viewport_margin_px;
    let right_limit = viewport.scroll_x + viewport.width - panel_width - margin;
    Point {
        // Lower bound wins on viewports narrower than the panel
        x: (viewport.scroll_x + rect.left).min(right_limit).max(margin),
        y: viewport.scroll_y + rect.bottom() + config.panel_gap_px,
    }
}

pub fn trigger_position(rect: Rect, viewport: Viewport, config: &PresenterConfig) -> Point {
    Point {
        x: viewport.scroll_x + rect.left + config.trigger_inset_px,
        y: viewport.scroll_y + rect.bottom() - config.trigger_lift_px,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerEvent {
    EnterTile(TileId),
    LeaveTile(TileId),
    EnterTrigger,
    LeaveTrigger,
}

/// Delayed hiding of the trigger so the pointer can travel from the tile to it.
#[derive(Debug, Clone)]
pub struct HoverIntent {
    tile_leave_delay: Duration,
    trigger_leave_delay: Duration,
    attached: Option<TileId>,
    hide_at: Option<Instant>,
}

impl HoverIntent {
    pub fn new(config: &PresenterConfig) -> Self {
        Self {
            tile_leave_delay: Duration::from_millis(config.tile_leave_hide_ms),
            trigger_leave_delay: Duration::from_millis(config.trigger_leave_hide_ms),
            attached: None,
            hide_at: None,
        }
    }

    pub const fn attached(&self) -> Option<TileId> {
        self.attached
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.hide_at
    }

    /// Feed a pointer event. Returns the tile the trigger should move to, if any.
    pub fn on_pointer(&mut self, event: PointerEvent, now: Instant) -> Option<TileId> {
        match event {
            PointerEvent::EnterTile(tile) => {
                self.hide_at = None;
                self.attached = Some(tile);
                return Some(tile);
            }
            PointerEvent::LeaveTile(tile) if self.attached == Some(tile) => {
                self.hide_at = Some(now + self.tile_leave_delay);
            }
            PointerEvent::LeaveTile(_) => {}
            PointerEvent::EnterTrigger => self.hide_at = None,
            PointerEvent::LeaveTrigger => self.hide_at = Some(now + self.trigger_leave_delay),
        }
        None
    }

    /// Hide immediately, as on navigation.
    pub fn hide_now(&mut self) -> Option<TileId> {
        self.hide_at = None;
        self.attached.take()
    }

    /// Returns `true` when a pending hide came due.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        match self.hide_at {
            Some(at) if now >= at => {
                self.hide_at = None;
                self.attached = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthRow {
    pub month: MonthKey,
    pub review_count: u32,
    pub average: f64,
}

/// What a panel shows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PanelContent {
    Loading,
    Report { rows: Vec<MonthRow>, pages_fetched: u32 },
    Empty { pages_fetched: u32 },
    Error { reason: String },
}

impl PanelContent {
    pub fn from_report(report: &AnalyticsReport) -> Self {
        if report.aggregate.is_empty() {
            return Self::Empty {
                pages_fetched: report.pages_fetched,
            };
        }
        let rows = report
            .aggregate
            .newest_first()
            .map(|(month, stats)| MonthRow {
                month: *month,
                review_count: stats.review_count,
                average: stats.average(),
            })
            .collect();
        Self::Report {
            rows,
            pages_fetched: report.pages_fetched,
        }
    }

    /// `None` for outcomes that must not be shown (cancellation).
    pub fn from_outcome(outcome: &Result<AnalyticsReport, SessionError>) -> Option<Self> {
        match outcome {
            Ok(report) => Some(Self::from_report(report)),
            Err(SessionError::Cancelled) => None,
            Err(error) => Some(Self::Error {
                reason: error.to_string(),
            }),
        }
    }

    pub fn to_html(&self) -> String {
        match self {
            Self::Loading => r#"<div class="rz-analytics-loading">Собираю отзывы по месяцам…</div>"#.to_string(),
            Self::Empty { pages_fetched } => format!(
                r#"<div class="rz-analytics-error">Не удалось найти даты отзывов ({} стр.).</div>"#,
                pages_fetched
            ),
            Self::Error { reason } => format!(r#"<div class="rz-analytics-error">Ошибка: {}</div>"#, escape_html(reason)),
            Self::Report { rows, pages_fetched } => {
                let mut html = format!(
                    r#"<div class="rz-analytics-title">Отзывов и средняя ★ по месяцам <small>(страниц: {})</small></div>"#,
                    pages_fetched
                );
                html.push_str("<table><thead><tr><th>Месяц</th><th>Кол-во</th><th>Средняя ★</th></tr></thead><tbody>");
                for row in rows {
                    let _ = write!(
                        html,
                        "<tr><td>{}</td><td>{}</td><td>{:.2}★</td></tr>",
                        row.month, row.review_count, row.average
                    );
                }
                html.push_str("</tbody></table>");
                html
            }
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelEntry {
    pub content: PanelContent,
    pub position: Point,
    pub opened_at: DateTime<Utc>,
}

pub struct PanelPresenter {
    config: PresenterConfig,
    layout: Arc<dyn LayoutProvider>,
    surface: Box<dyn PanelSurface>,
    panels: HashMap<TileId, PanelEntry>,
    hover: HoverIntent,
}

impl PanelPresenter {
    pub fn new(config: PresenterConfig, layout: Arc<dyn LayoutProvider>, surface: Box<dyn PanelSurface>) -> Self {
        let hover = HoverIntent::new(&config);
        Self {
            config,
            layout,
            surface,
            panels: HashMap::new(),
            hover,
        }
    }

    fn place(&self, tile: TileId) -> Point {
        let viewport = self.layout.viewport();
        match self.layout.tile_rect(tile) {
            Some(rect) => panel_position(rect, viewport, self.layout.panel_width(tile), &self.config),
            None => self.panels.get(&tile).map(|p| p.position).unwrap_or_default(),
        }
    }

    /// Show `content` in the tile's panel, opening it when needed.
    pub fn render(&mut self, tile: TileId, content: PanelContent) {
        let position = self.place(tile);
        let html = content.to_html();
        trace!("{}: rendering {:?} at {:?}", tile, content, position);
        self.surface.show_panel(tile, &html, position);
        let opened_at = self.panels.get(&tile).map_or_else(Utc::now, |p| p.opened_at);
        self.panels.insert(
            tile,
            PanelEntry {
                content,
                position,
                opened_at,
            },
        );
    }

    pub fn close(&mut self, tile: TileId) -> bool {
        if self.panels.remove(&tile).is_none() {
            return false;
        }
        self.surface.close_panel(tile);
        true
    }

    /// Close every panel; returns the tiles that had one.
    pub fn close_all(&mut self) -> Vec<TileId> {
        let tiles: Vec<TileId> = self.panels.keys().copied().collect();
        for tile in &tiles {
            self.close(*tile);
        }
        if !tiles.is_empty() {
            debug!("Closed {} analytics panels", tiles.len());
        }
        tiles
    }

    /// Follow scroll, resize and layout changes.
    pub fn reposition_all(&mut self) {
        let tiles: Vec<TileId> = self.panels.keys().copied().collect();
        for tile in tiles {
            let position = self.place(tile);
            let Some(entry) = self.panels.get_mut(&tile) else { continue };
            if entry.position != position {
                entry.position = position;
                self.surface.move_panel(tile, position);
            }
        }
        if let Some(tile) = self.hover.attached() {
            self.show_trigger_for(tile);
        }
    }

    pub fn is_open(&self, tile: TileId) -> bool {
        self.panels.contains_key(&tile)
    }

    pub fn panel(&self, tile: TileId) -> Option<&PanelEntry> {
        self.panels.get(&tile)
    }

    pub fn open_panels(&self) -> Vec<TileId> {
        self.panels.keys().copied().collect()
    }

    fn show_trigger_for(&mut self, tile: TileId) {
        if let Some(rect) = self.layout.tile_rect(tile) {
            let at = trigger_position(rect, self.layout.viewport(), &self.config);
            self.surface.show_trigger(tile, at);
        }
    }

    /// The tile the trigger is attached to
    pub fn trigger_tile(&self) -> Option<TileId> {
        self.hover.attached()
    }

    pub fn on_pointer(&mut self, event: PointerEvent, now: Instant) {
        if let Some(tile) = self.hover.on_pointer(event, now) {
            self.show_trigger_for(tile);
        }
    }

    pub fn hover_deadline(&self) -> Option<Instant> {
        self.hover.deadline()
    }

    pub fn poll_hover(&mut self, now: Instant) {
        if self.hover.fire_due(now) {
            self.surface.hide_trigger();
        }
    }

    pub fn hide_trigger_now(&mut self) {
        if self.hover.hide_now().is_some() {
            self.surface.hide_trigger();
        }
    }
}

/// Surface that records every call; handy for hosts that batch output.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    ShowPanel { tile: TileId, html: String, at: Point },
    MovePanel { tile: TileId, at: Point },
    ClosePanel { tile: TileId },
    ShowTrigger { tile: TileId, at: Point },
    HideTrigger,
}

/// A [`PanelSurface`] that queues calls for the host to drain.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    calls: Arc<std::sync::Mutex<Vec<SurfaceCall>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<SurfaceCall> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(|p| p.into_inner()))
    }

    fn push(&self, call: SurfaceCall) {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(call);
    }
}

impl PanelSurface for RecordingSurface {
    fn show_panel(&mut self, tile: TileId, html: &str, at: Point) {
        self.push(SurfaceCall::ShowPanel {
            tile,
            html: html.to_string(),
            at,
        });
    }

    fn move_panel(&mut self, tile: TileId, at: Point) {
        self.push(SurfaceCall::MovePanel { tile, at });
    }

    fn close_panel(&mut self, tile: TileId) {
        self.push(SurfaceCall::ClosePanel { tile });
    }

    fn show_trigger(&mut self, tile: TileId, at: Point) {
        self.push(SurfaceCall::ShowTrigger { tile, at });
    }

    fn hide_trigger(&mut self) {
        self.push(SurfaceCall::HideTrigger);
    }
}
