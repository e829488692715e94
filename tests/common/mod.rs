//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use catalog_lens::application::{LayoutProvider, Rect, RecordingSurface, TileId, Viewport};
use catalog_lens::infrastructure::config::AppConfig;
use catalog_lens::infrastructure::{CatalogDocument, FetchedPage, PageTransport, SettingsStore, TransportError};
use catalog_lens::CatalogService;
use ego_tree::NodeId;
use scraper::Selector;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const PAGE_URL: &str = "https://shop.example/mobile-phones/c80003/";

/// Every tile sits at the same spot of a 1280x800 viewport.
pub struct FixedLayout;

impl LayoutProvider for FixedLayout {
    fn viewport(&self) -> Viewport {
        Viewport {
            width: 1280.0,
            height: 800.0,
            ..Viewport::default()
        }
    }

    fn tile_rect(&self, _tile: TileId) -> Option<Rect> {
        Some(Rect::new(40.0, 100.0, 220.0, 360.0))
    }

    fn panel_width(&self, _tile: TileId) -> f64 {
        300.0
    }
}

/// Serves canned pages by exact URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct StaticPages {
    pages: HashMap<String, String>,
    fetched: Mutex<Vec<String>>,
}

impl StaticPages {
    pub fn with(mut self, url: &str, body: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), body.into());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageTransport for StaticPages {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch(&self, url: &Url, _cancel: &CancellationToken) -> Result<FetchedPage, TransportError> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.pages
            .get(url.as_str())
            .map(|body| FetchedPage::new(url.clone(), body.clone()))
            .ok_or_else(|| TransportError::Http {
                status: 404,
                url: url.to_string(),
            })
    }
}

/// Builder for one catalog tile's markup
pub struct TileMarkup {
    id: String,
    stars: Option<String>,
    reviews: Option<u32>,
    price: Option<u64>,
    top: bool,
}

pub fn tile(id: &str) -> TileMarkup {
    TileMarkup {
        id: id.to_string(),
        stars: None,
        reviews: None,
        price: None,
        top: false,
    }
}

impl TileMarkup {
    pub fn stars(mut self, fill: &str) -> Self {
        self.stars = Some(fill.to_string());
        self
    }

    pub fn reviews(mut self, count: u32) -> Self {
        self.reviews = Some(count);
        self
    }

    pub fn price(mut self, price: u64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn top(mut self) -> Self {
        self.top = true;
        self
    }

    pub fn render(&self) -> String {
        let id = &self.id;
        let mut inner = format!(r#"<a class="goods-tile__heading" href="/phone-{id}/p{id}/">Phone {id}</a>"#);
        if self.top {
            inner.push_str(r#"<span class="goods-tile__label promo-label promo-label_type_popularity">ТОП ПРОДАЖ</span>"#);
        }
        if let Some(fill) = &self.stars {
            inner.push_str(&format!(r#"<div data-testid="stars-rating" class="stars__rating" style="width: {fill}"></div>"#));
        }
        if let Some(count) = self.reviews {
            inner.push_str(&format!(r#"<div class="goods-tile__rating rating-block"><span>{count} відгуків</span></div>"#));
        }
        if let Some(price) = self.price {
            inner.push_str(&format!(r#"<span class="goods-tile__price-value">{price}</span>"#));
        }
        format!(r#"<li class="catalog-grid__cell" id="tile-{id}"><div class="goods-tile">{inner}</div></li>"#)
    }
}

pub fn catalog(tiles: &[TileMarkup]) -> String {
    let cells: String = tiles.iter().map(TileMarkup::render).collect();
    format!(r#"<html><body><main><ul class="catalog-grid" id="grid">{cells}</ul></main></body></html>"#)
}

pub fn build_service(
    store: Arc<dyn SettingsStore>,
    transport: Arc<dyn PageTransport>,
    markup: &str,
) -> (CatalogService, RecordingSurface) {
    let document = CatalogDocument::parse(Url::parse(PAGE_URL).unwrap(), markup);
    let surface = RecordingSurface::new();
    let service = CatalogService::new(
        AppConfig::default(),
        document,
        store,
        transport,
        Arc::new(FixedLayout),
        Box::new(surface.clone()),
    )
    .unwrap();
    (service, surface)
}

pub fn node_by_id(document: &CatalogDocument, id: &str) -> NodeId {
    let selector = Selector::parse(&format!("#{id}")).unwrap();
    document.html().root_element().select(&selector).next().unwrap().id()
}

pub fn tile_id(service: &CatalogService, id: &str) -> TileId {
    service
        .tiles()
        .get(node_by_id(service.document(), &format!("tile-{id}")))
        .unwrap()
}

pub fn is_hidden(service: &CatalogService, id: &str) -> bool {
    service
        .document()
        .is_hidden(node_by_id(service.document(), &format!("tile-{id}")))
}
