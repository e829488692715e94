//! Review analytics through the service: crawling, aggregation and panel rendering
mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use catalog_lens::application::{PageEvent, PanelContent, SurfaceCall};
use catalog_lens::infrastructure::{FetchedPage, MemorySettingsStore, PageTransport, TransportError};
use common::{StaticPages, build_service, catalog, tile, tile_id};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use url::Url;

const LISTING: &str = "https://shop.example/phone-1/p1/comments/";

fn entry(date: &str, fill: Option<&str>) -> String {
    let stars = fill
        .map(|f| format!(r#"<div data-testid="stars-rating" style="width: {f}"></div>"#))
        .unwrap_or_default();
    format!(
        r#"<li class="comment-list__item"><article><time data-testid="replay-header-date">{date}</time>{stars}<p>Text</p></article></li>"#
    )
}

fn listing_page(entries: &[String], next: Option<&str>) -> String {
    let next = next
        .map(|href| format!(r#"<a rel="next" href="{href}">Далі</a>"#))
        .unwrap_or_default();
    format!(
        r#"<html><body><ul class="comment-list">{}</ul><nav class="pagination">{next}</nav></body></html>"#,
        entries.concat()
    )
}

fn shown_html(calls: &[SurfaceCall]) -> Vec<String> {
    calls
        .iter()
        .filter_map(|call| match call {
            SurfaceCall::ShowPanel { html, .. } => Some(html.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn single_page_report_counts_unrated_reviews() {
    let pages = Arc::new(StaticPages::default().with(
        LISTING,
        listing_page(
            &[entry("15 March 2024", Some("80%")), entry("2 March 2024", None)],
            None,
        ),
    ));
    let (mut service, surface) = build_service(
        Arc::new(MemorySettingsStore::new()),
        pages.clone(),
        &catalog(&[tile("1").stars("90%").reviews(2)]),
    );
    service.init().await;
    let tile = tile_id(&service, "1");

    service.start_analytics(tile).unwrap().await.unwrap();

    assert_eq!(pages.fetched(), vec![LISTING.to_string()]);
    let shown = shown_html(&surface.drain());
    assert!(shown[0].contains("Собираю отзывы"));
    let report = shown.last().unwrap();
    assert!(report.contains("(страниц: 1)"));
    assert!(report.contains("<td>2024-03</td><td>2</td><td>4.00★</td>"));
}

#[tokio::test]
async fn pagination_is_followed_and_months_sorted_newest_first() {
    let page_two = format!("{LISTING}page=2/");
    let pages = Arc::new(
        StaticPages::default()
            .with(
                LISTING,
                listing_page(
                    &[entry("3 квітня 2024", Some("100%")), entry("28 березня 2024", Some("60%"))],
                    Some("page=2/"),
                ),
            )
            .with(&page_two, listing_page(&[entry("1 лютого 2024", Some("20%"))], None)),
    );
    let (mut service, _) = build_service(
        Arc::new(MemorySettingsStore::new()),
        pages.clone(),
        &catalog(&[tile("1").stars("80%")]),
    );
    service.init().await;
    let tile = tile_id(&service, "1");

    service.start_analytics(tile).unwrap().await.unwrap();

    assert_eq!(pages.fetched(), vec![LISTING.to_string(), page_two]);
    let presenter = service.presenter();
    let PanelContent::Report { rows, pages_fetched } = &presenter.panel(tile).unwrap().content else {
        panic!("expected a report");
    };
    assert_eq!(*pages_fetched, 2);
    let months: Vec<String> = rows.iter().map(|row| row.month.to_string()).collect();
    assert_eq!(months, ["2024-04", "2024-03", "2024-02"]);
}

#[tokio::test]
async fn listing_without_dates_reports_empty() {
    let pages = Arc::new(StaticPages::default().with(LISTING, listing_page(&[], None)));
    let (mut service, surface) = build_service(
        Arc::new(MemorySettingsStore::new()),
        pages,
        &catalog(&[tile("1").stars("80%")]),
    );
    service.init().await;
    let tile = tile_id(&service, "1");

    service.start_analytics(tile).unwrap().await.unwrap();
    let shown = shown_html(&surface.drain());
    assert!(shown.last().unwrap().contains("Не удалось найти даты отзывов (1 стр.)."));
}

/// Parks the first fetch until released and ignores cancellation, so a
/// superseded session still gets its (stale) page back.
struct GatedPages {
    calls: AtomicUsize,
    started: Notify,
    release: Notify,
}

#[async_trait]
impl PageTransport for GatedPages {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn fetch(&self, url: &Url, _cancel: &CancellationToken) -> Result<FetchedPage, TransportError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.started.notify_one();
            self.release.notified().await;
            return Ok(FetchedPage::new(
                url.clone(),
                listing_page(&[entry("10 January 2020", Some("20%"))], None),
            ));
        }
        Ok(FetchedPage::new(
            url.clone(),
            listing_page(&[entry("10 March 2024", Some("100%"))], None),
        ))
    }
}

#[tokio::test]
async fn superseded_session_never_renders() {
    let transport = Arc::new(GatedPages {
        calls: AtomicUsize::new(0),
        started: Notify::new(),
        release: Notify::new(),
    });
    let (mut service, surface) = build_service(
        Arc::new(MemorySettingsStore::new()),
        transport.clone(),
        &catalog(&[tile("1").stars("80%")]),
    );
    service.init().await;
    let tile = tile_id(&service, "1");

    let first = service.start_analytics(tile).unwrap();
    transport.started.notified().await;

    let second = service.start_analytics(tile).unwrap();
    second.await.unwrap();
    transport.release.notify_one();
    first.await.unwrap();

    let shown = shown_html(&surface.drain());
    assert!(shown.iter().all(|html| !html.contains("2020-01")));
    assert!(shown.last().unwrap().contains("2024-03"));
}

#[tokio::test]
async fn closing_a_panel_discards_the_running_session() {
    let transport = Arc::new(GatedPages {
        calls: AtomicUsize::new(0),
        started: Notify::new(),
        release: Notify::new(),
    });
    let (mut service, surface) = build_service(
        Arc::new(MemorySettingsStore::new()),
        transport.clone(),
        &catalog(&[tile("1").stars("80%")]),
    );
    service.init().await;
    let tile = tile_id(&service, "1");

    let running = service.start_analytics(tile).unwrap();
    transport.started.notified().await;
    service.handle_event(PageEvent::ClosePanel(tile));
    transport.release.notify_one();
    running.await.unwrap();

    assert!(!service.presenter().is_open(tile));
    let shown = shown_html(&surface.drain());
    assert_eq!(shown.len(), 1, "only the loading state was shown: {shown:?}");
}
