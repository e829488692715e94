//! Review listing parser.
//!
//! Turns one fetched review page into dated entries plus the URL of the next
//! page, and resolves where a tile's review listing lives in the first place.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use scraper::{ElementRef, Html};
use tracing::{debug, trace};
use url::Url;

use super::selectors::SelectorSet;
use super::text::{Patterns, element_text};
use super::{ContextualParser, ParsingError, ParsingResult, ReviewPageContext};
use crate::domain::constants::{facts, reviews, tiles};
use crate::domain::{Lexicon, MonthKey};

/// One review as found on a listing page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReviewEntry {
    /// `None` when the timestamp text could not be read
    pub month: Option<MonthKey>,
    pub stars: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReviewPage {
    pub entries: Vec<ReviewEntry>,
    pub next_page: Option<Url>,
}

impl ReviewPage {
    pub fn dated_entries(&self) -> impl Iterator<Item = (MonthKey, Option<f64>)> + '_ {
        self.entries.iter().filter_map(|e| e.month.map(|m| (m, e.stars)))
    }
}

pub struct ReviewPageParser {
    patterns: Patterns,
    lexicon: Arc<Lexicon>,
    timestamp: SelectorSet,
    entry: SelectorSet,
    stars: SelectorSet,
    next_rel: SelectorSet,
    forward_direction: SelectorSet,
    labelled_anchor: SelectorSet,
    active_page: SelectorSet,
    list_item: SelectorSet,
    href_anchor: SelectorSet,
    card_scope: SelectorSet,
    rated_comments_link: SelectorSet,
    comments_link: SelectorSet,
    product_link: SelectorSet,
}

impl ReviewPageParser {
    pub fn new(lexicon: Arc<Lexicon>) -> Result<Self> {
        Ok(Self {
            patterns: Patterns::new().context("Failed to compile review text patterns")?,
            lexicon,
            timestamp: SelectorSet::compile(reviews::TIMESTAMP),
            entry: SelectorSet::compile(reviews::ENTRY),
            stars: SelectorSet::compile(facts::STARS),
            next_rel: SelectorSet::compile(reviews::NEXT_REL),
            forward_direction: SelectorSet::compile(reviews::FORWARD_DIRECTION),
            labelled_anchor: SelectorSet::compile(reviews::LABELLED_ANCHOR),
            active_page: SelectorSet::compile(reviews::ACTIVE_PAGE),
            list_item: SelectorSet::compile("li"),
            href_anchor: SelectorSet::compile("a[href]"),
            card_scope: SelectorSet::compile(tiles::CARD_SCOPE),
            rated_comments_link: SelectorSet::compile(reviews::RATED_COMMENTS_LINK),
            comments_link: SelectorSet::compile(reviews::COMMENTS_LINK),
            product_link: SelectorSet::compile(reviews::PRODUCT_HEADING_LINK),
        })
    }

    /// `day month-word year` to a month bucket. Unknown month words are a miss.
    pub fn parse_date(&self, text: &str) -> Option<MonthKey> {
        let normalized = text.replace('\u{a0}', " ").trim().to_lowercase();
        let (_day, word, year) = self.patterns.review_date(&normalized)?;
        let month = self.lexicon.month(word)?;
        MonthKey::new(year, month)
    }

    /// Review entries in document order, one per distinct entry element.
    pub fn entries(&self, html: &Html) -> Vec<ReviewEntry> {
        let root = html.root_element();
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for stamp in self.timestamp.select_in(root) {
            let container = self
                .entry
                .closest(stamp)
                .or_else(|| stamp.parent().and_then(ElementRef::wrap));
            let Some(container) = container else { continue };
            if !seen.insert(container.id()) {
                continue;
            }

            let month = self
                .timestamp
                .first_in(container)
                .and_then(|t| self.parse_date(&element_text(t)));
            let stars = self
                .stars
                .first_in(container)
                .and_then(|s| self.patterns.stars_from_style(s.value().attr("style").unwrap_or_default()));
            entries.push(ReviewEntry { month, stars });
        }
        entries
    }

    /// The next listing page, resolved against `base`.
    pub fn next_page_url(&self, html: &Html, base: &Url) -> Option<Url> {
        let root = html.root_element();
        let link = self
            .next_rel
            .first_in(root)
            .or_else(|| self.forward_link(root))
            .or_else(|| self.link_after_active_page(root))?;
        let href = link.value().attr("href")?;
        base.join(href).ok()
    }

    fn forward_link<'a>(&self, root: ElementRef<'a>) -> Option<ElementRef<'a>> {
        root.descendants().filter_map(ElementRef::wrap).find(|el| {
            self.forward_direction.matches(el)
                || (self.labelled_anchor.matches(el)
                    && el
                        .value()
                        .attr("aria-label")
                        .is_some_and(|label| self.lexicon.is_next_label(label)))
        })
    }

    fn link_after_active_page<'a>(&self, root: ElementRef<'a>) -> Option<ElementRef<'a>> {
        let active = self.active_page.first_in(root)?;
        let item = self.list_item.closest(active)?;
        let next_item = item.next_siblings().find_map(ElementRef::wrap)?;
        self.href_anchor.first_in(next_item)
    }

    /// Where a tile's review listing lives: its comments link, else the
    /// product link with `comments/` appended to the path.
    pub fn resolve_listing_url(&self, tile: ElementRef<'_>, page_url: &Url) -> ParsingResult<Url> {
        let scope = self.card_scope.first_in(tile).unwrap_or(tile);

        let comments = self
            .rated_comments_link
            .first_in(scope)
            .or_else(|| self.comments_link.first_in(scope))
            .and_then(|a| a.value().attr("href"));
        if let Some(href) = comments {
            if let Ok(url) = page_url.join(href) {
                trace!("Review listing from comments link: {}", url);
                return Ok(url);
            }
        }

        let href = self
            .product_link
            .first_in(scope)
            .and_then(|a| a.value().attr("href"))
            .ok_or(ParsingError::NoReviewSource)?;
        let mut url = page_url.join(href).map_err(|e| ParsingError::UrlResolutionFailed {
            url: href.to_string(),
            reason: e.to_string(),
        })?;
        url.set_fragment(None);
        let mut path = url.path().to_string();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(reviews::COMMENTS_SEGMENT);
        url.set_path(&path);
        trace!("Review listing derived from product link: {}", url);
        Ok(url)
    }
}

impl ContextualParser for ReviewPageParser {
    type Output = ReviewPage;
    type Context = ReviewPageContext;

    fn parse_with_context(&self, html: &Html, context: &Self::Context) -> Self::Output {
        let entries = self.entries(html);
        let next_page = self.next_page_url(html, &context.page_url);
        debug!(
            "Review page {} ({}): {} entries, next: {:?}",
            context.page_number,
            context.page_url,
            entries.len(),
            next_page.as_ref().map(Url::as_str)
        );
        ReviewPage { entries, next_page }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    fn parser() -> ReviewPageParser {
        ReviewPageParser::new(Arc::new(Lexicon::default())).unwrap()
    }

    fn base() -> Url {
        Url::parse("https://shop.example/phone/p123/comments/").unwrap()
    }

    fn review(date: &str, stars: Option<&str>) -> String {
        let stars = stars
            .map(|s| format!(r#"<div data-testid="stars-rating" class="stars__rating" style="width: {s}"></div>"#))
            .unwrap_or_default();
        format!(
            r#"<li class="comment-list__item"><div class="comment"><time data-testid="replay-header-date">{date}</time>{stars}<p>text</p></div></li>"#
        )
    }

    #[test]
    fn dates_parse_in_every_locale() {
        let p = parser();
        assert_eq!(p.parse_date("15 марта 2024"), MonthKey::new(2024, 3));
        assert_eq!(p.parse_date("2\u{a0}березня 2024"), MonthKey::new(2024, 3));
        assert_eq!(p.parse_date(" 7 December 2023 "), MonthKey::new(2023, 12));
        assert_eq!(p.parse_date("15 smarch 2024"), None);
        assert_eq!(p.parse_date("вчора"), None);
    }

    #[test]
    fn entries_carry_month_and_stars() {
        let html = Html::parse_document(&format!(
            "<ul>{}{}{}</ul>",
            review("15 March 2024", Some("calc(80% - 2px)")),
            review("2 March 2024", None),
            review("someday", Some("100%")),
        ));
        let entries = parser().entries(&html);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].month, MonthKey::new(2024, 3));
        assert_eq!(entries[0].stars, Some(4.0));
        assert_eq!(entries[1].stars, None);
        assert_eq!(entries[2].month, None);
    }

    #[test]
    fn one_entry_per_container() {
        let html = Html::parse_document(
            r#"<article><div><time data-testid="replay-header-date">1 травня 2024</time>
               <time data-testid="edit-date">3 травня 2024</time></div></article>"#,
        );
        assert_eq!(parser().entries(&html).len(), 1);
    }

    #[test]
    fn next_page_prefers_rel_next() {
        let html = Html::parse_document(
            r#"<a class="pagination__direction--forward" href="page=9/">fwd</a><a rel="next" href="page=2/">2</a>"#,
        );
        let next = parser().next_page_url(&html, &base()).unwrap();
        assert_eq!(next.as_str(), "https://shop.example/phone/p123/comments/page=2/");
    }

    #[test]
    fn next_page_by_aria_label() {
        let html = Html::parse_document(r#"<nav><a aria-label="Далі" href="?page=3">›</a></nav>"#);
        let next = parser().next_page_url(&html, &base()).unwrap();
        assert_eq!(next.query(), Some("page=3"));
    }

    #[test]
    fn next_page_after_active_item() {
        let html = Html::parse_document(
            r#"<ul class="pagination">
                 <li><a href="/phone/p123/comments/">1</a></li>
                 <li class="active"><a href="/phone/p123/comments/page=2/">2</a></li>
                 <li><a href="/phone/p123/comments/page=3/">3</a></li>
               </ul>"#,
        );
        let next = parser().next_page_url(&html, &base()).unwrap();
        assert_eq!(next.path(), "/phone/p123/comments/page=3/");
    }

    #[test]
    fn last_page_has_no_next() {
        let html = Html::parse_document(&review("1 May 2024", None));
        assert_eq!(parser().next_page_url(&html, &base()), None);
    }

    fn tile(markup: &str) -> Html {
        Html::parse_fragment(&format!(r#"<div class="goods-tile">{markup}</div>"#))
    }

    fn resolve(html: &Html) -> ParsingResult<Url> {
        let tile = html.select(&Selector::parse(".goods-tile").unwrap()).next().unwrap();
        let page = Url::parse("https://shop.example/phones/c80003/").unwrap();
        parser().resolve_listing_url(tile, &page)
    }

    #[test]
    fn listing_prefers_rating_link() {
        let html = tile(
            r#"<a href="/phone/p123/comments/?sort=new">other</a>
               <a class="rating-block-rating" href="/phone/p123/comments/">12</a>"#,
        );
        assert_eq!(resolve(&html).unwrap().as_str(), "https://shop.example/phone/p123/comments/");
    }

    #[test]
    fn listing_derived_from_product_link() {
        let html = tile(r##"<a class="goods-tile__heading" href="/phone/p123#photos">Phone</a>"##);
        assert_eq!(resolve(&html).unwrap().as_str(), "https://shop.example/phone/p123/comments/");
    }

    #[test]
    fn listing_missing_is_an_error() {
        let html = tile("<span>Banner</span>");
        assert_eq!(resolve(&html), Err(ParsingError::NoReviewSource));
    }
}
