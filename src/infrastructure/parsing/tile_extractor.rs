//! Product tile fact extraction.
//!
//! Best-effort heuristics over the storefront's tile markup. Every fact is
//! extracted independently and degrades to "unknown" on its own; nothing in
//! here returns an error or panics on odd markup.

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;

use anyhow::{Context, Result};
use scraper::ElementRef;
use tracing::trace;

use super::selectors::SelectorSet;
use super::text::{Patterns, collapse_whitespace, element_text, round2};
use crate::domain::constants::{facts, tiles};
use crate::domain::{Lexicon, TileFacts};

/// Maps a tile element to [`TileFacts`].
pub struct TileExtractor {
    patterns: Patterns,
    lexicon: Arc<Lexicon>,
    card_scope: SelectorSet,
    product_link: SelectorSet,
    stars: SelectorSet,
    stars_any: SelectorSet,
    review_icon: SelectorSet,
    rating_block_content: SelectorSet,
    rating_blocks: SelectorSet,
    no_reviews_candidates: SelectorSet,
    prices: SelectorSet,
    price_values: SelectorSet,
    top_badge: SelectorSet,
    labels: SelectorSet,
}

impl TileExtractor {
    pub fn new(lexicon: Arc<Lexicon>) -> Result<Self> {
        Ok(Self {
            patterns: Patterns::new().context("Failed to compile tile text patterns")?,
            lexicon,
            card_scope: SelectorSet::compile(tiles::CARD_SCOPE),
            product_link: SelectorSet::compile(tiles::PRODUCT_LINK),
            stars: SelectorSet::compile(facts::STARS),
            stars_any: SelectorSet::compile(facts::STARS_ANY),
            review_icon: SelectorSet::compile(facts::REVIEW_ICON),
            rating_block_content: SelectorSet::compile(facts::RATING_BLOCK_CONTENT),
            rating_blocks: SelectorSet::compile(facts::RATING_BLOCKS),
            no_reviews_candidates: SelectorSet::compile(facts::NO_REVIEWS_CANDIDATES),
            prices: SelectorSet::compile(facts::PRICES),
            price_values: SelectorSet::compile(facts::PRICE_VALUES),
            top_badge: SelectorSet::compile(facts::TOP_BADGE),
            labels: SelectorSet::compile(facts::LABELS),
        })
    }

    /// The tile's content region: the first card-scope descendant, else the tile.
    pub fn content_region<'a>(&self, tile: ElementRef<'a>) -> ElementRef<'a> {
        self.card_scope.first_in(tile).unwrap_or(tile)
    }

    /// Whether a content region holds anything product-like at all.
    pub fn looks_like_product(&self, region: ElementRef<'_>) -> bool {
        self.product_link.first_in(region).is_some()
            || self.stars_any.first_in(region).is_some()
            || self.price_values.first_in(region).is_some()
    }

    pub fn extract(&self, tile: ElementRef<'_>) -> TileFacts {
        self.extract_region(self.content_region(tile))
    }

    /// Extract from an already resolved content region.
    pub fn extract_region(&self, region: ElementRef<'_>) -> TileFacts {
        let review_count = self.review_count(region);
        let explicit_no_reviews = review_count.is_none() && self.says_no_reviews(region);
        let facts = TileFacts {
            rating: self.rating(region),
            review_count,
            price: self.price(region),
            is_top_seller: self.is_top_seller(region),
            has_reviews: TileFacts::presence_from(review_count, explicit_no_reviews),
        };
        trace!("Extracted tile facts: {:?}", facts);
        facts
    }

    pub fn rating(&self, region: ElementRef<'_>) -> Option<f64> {
        let stars = self.stars.first_in(region)?;
        let style = stars.value().attr("style").unwrap_or_default();
        self.patterns.stars_from_style(style).map(round2)
    }

    pub fn review_count(&self, region: ElementRef<'_>) -> Option<u32> {
        self.count_near_review_icon(region)
            .or_else(|| self.count_in_rating_blocks(region))
            .or_else(|| self.count_next_to_stars(region))
    }

    fn count_near_review_icon(&self, region: ElementRef<'_>) -> Option<u32> {
        let icon = self.review_icon.first_in(region)?;
        let container = self
            .rating_block_content
            .closest(icon)
            .or_else(|| icon.parent().and_then(ElementRef::wrap))?;
        self.patterns
            .leading_count(&collapse_whitespace(&element_text(container)))
    }

    fn count_in_rating_blocks(&self, region: ElementRef<'_>) -> Option<u32> {
        self.rating_blocks
            .select_in(region)
            .into_iter()
            .find_map(|block| self.patterns.bounded_count(&collapse_whitespace(&element_text(block))))
    }

    fn count_next_to_stars(&self, region: ElementRef<'_>) -> Option<u32> {
        let stars = self.stars_any.first_in(region)?;
        let parent = stars.parent().and_then(ElementRef::wrap)?;
        self.patterns.parenthesised_count(element_text(parent).trim())
    }

    pub fn says_no_reviews(&self, region: ElementRef<'_>) -> bool {
        self.no_reviews_candidates
            .select_in(region)
            .into_iter()
            .any(|el| self.lexicon.says_no_reviews(&element_text(el)))
    }

    /// Lowest current price; struck-through and "old" prices are ignored.
    pub fn price(&self, region: ElementRef<'_>) -> Option<u64> {
        self.prices
            .select_in(region)
            .into_iter()
            .filter(|el| {
                let class = el.value().attr("class").unwrap_or_default();
                !self.patterns.is_stale_price_class(class)
            })
            .filter_map(|el| {
                let digits: String = element_text(el).chars().filter(char::is_ascii_digit).collect();
                digits.parse::<u64>().ok()
            })
            .min()
    }

    pub fn is_top_seller(&self, region: ElementRef<'_>) -> bool {
        self.top_badge.first_in(region).is_some()
            || self
                .labels
                .select_in(region)
                .into_iter()
                .any(|el| self.lexicon.is_top_seller_label(&element_text(el)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReviewPresence;
    use rstest::rstest;
    use scraper::{Html, Selector};

    fn extractor() -> TileExtractor {
        TileExtractor::new(Arc::new(Lexicon::default())).unwrap()
    }

    fn facts_of(markup: &str) -> TileFacts {
        let html = Html::parse_fragment(&format!(r#"<div class="tile-root">{markup}</div>"#));
        let root = html.select(&Selector::parse(".tile-root").unwrap()).next().unwrap();
        extractor().extract(root)
    }

    #[rstest]
    #[case(r#"<div data-testid="stars-rating" class="stars__rating" style="width: calc(90% - 2px)"></div>"#, Some(4.5))]
    #[case(r#"<div data-testid="stars-rating" style="width: 0%"></div>"#, Some(0.0))]
    #[case(r#"<div data-testid="stars-rating" style="width: calc(86% - 1px)"></div>"#, Some(4.3))]
    #[case(r#"<div data-testid="stars-rating" style="width: 140%"></div>"#, Some(5.0))]
    #[case(r#"<div data-testid="stars-rating" style="width: auto"></div>"#, None)]
    #[case(r#"<div data-testid="stars-rating"></div>"#, None)]
    #[case(r#"<span class="title">No stars here</span>"#, None)]
    fn rating_from_star_fill(#[case] markup: &str, #[case] expected: Option<f64>) {
        assert_eq!(facts_of(markup).rating, expected);
    }

    #[rstest]
    #[case(
        r#"<span class="rating-block-content"><svg><use href="/sprite.svg#icon-review"></use></svg> 37 </span>"#,
        Some(37)
    )]
    #[case(r#"<div class="goods-tile__rating rating-block"><span>12 відгуків</span></div>"#, Some(12))]
    #[case(r#"<div><div data-testid="stars-rating" style="width: 80%"></div> (15)</div>"#, Some(15))]
    #[case(r#"<a href="/p123/">Phone</a>"#, None)]
    fn review_count_fallbacks(#[case] markup: &str, #[case] expected: Option<u32>) {
        assert_eq!(facts_of(markup).review_count, expected);
    }

    #[test]
    fn review_count_presence() {
        let none = facts_of(
            r#"<span class="rating-block-content"><svg><use href="/sprite.svg#icon-review"></use></svg> 0 </span>"#,
        );
        assert_eq!(none.has_reviews, ReviewPresence::Absent);

        let explicit = facts_of(r#"<a href="/p1/comments/">Залишити відгук</a>"#);
        assert_eq!(explicit.review_count, None);
        assert_eq!(explicit.has_reviews, ReviewPresence::Absent);

        let unknown = facts_of(r#"<a href="/p1/">Phone</a>"#);
        assert_eq!(unknown.has_reviews, ReviewPresence::Unknown);
    }

    #[test]
    fn review_icon_matches_sprite_fragments() {
        let icons = SelectorSet::compile(facts::REVIEW_ICON);
        let html = Html::parse_fragment(
            r##"<svg><use href="/sprite.svg#Icon-Review"></use></svg><svg><use rziconname="icon-review"></use></svg><svg><use href="#icon-cart"></use></svg>"##,
        );
        assert_eq!(icons.select_in(html.root_element()).len(), 2);
    }

    #[rstest]
    #[case(
        r#"<div class="goods-tile__price--old price">500</div><div class="goods-tile__price-value">350</div>"#,
        Some(350)
    )]
    #[case(r#"<p class="price">1&nbsp;299&thinsp;₴</p>"#, Some(1299))]
    #[case(r#"<p class="price line-through">999</p>"#, None)]
    #[case(r#"<p class="price">Немає в наявності</p>"#, None)]
    fn lowest_current_price(#[case] markup: &str, #[case] expected: Option<u64>) {
        assert_eq!(facts_of(markup).price, expected);
    }

    #[rstest]
    #[case(r#"<span class="promo-label promo-label_type_popularity">🔥</span>"#, true)]
    #[case(r#"<span class="goods-tile__label">Топ продаж</span>"#, true)]
    #[case(r#"<span class="goods-tile__label">ТОП&nbsp;ПРОДАЖІВ</span>"#, true)]
    #[case(r#"<span class="goods-tile__label">Новинка</span>"#, false)]
    fn top_seller_detection(#[case] markup: &str, #[case] expected: bool) {
        assert_eq!(facts_of(markup).is_top_seller, expected);
    }

    #[test]
    fn content_region_prefers_card_scope() {
        let html = Html::parse_fragment(
            r#"<li class="catalog-grid__cell"><div class="goods-tile__inner"><a href="/p1/">x</a></div></li>"#,
        );
        let cell = html.select(&Selector::parse("li").unwrap()).next().unwrap();
        let ex = extractor();
        let region = ex.content_region(cell);
        assert!(region.value().classes().any(|c| c == "goods-tile__inner"));
        assert!(ex.looks_like_product(region));
    }

    #[test]
    fn banners_do_not_look_like_products() {
        let html = Html::parse_fragment(r#"<div class="item"><img src="/banner.png"></div>"#);
        let item = html.select(&Selector::parse("div.item").unwrap()).next().unwrap();
        let ex = extractor();
        assert!(!ex.looks_like_product(ex.content_region(item)));
    }
}
