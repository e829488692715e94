//! Catalog markup constants
//!
//! Selector lists and mark names for the catalog storefront this crate targets.
//! Selectors are kept as string lists so they can be compiled with fallbacks
//! in the parsing layer.

/// Marks written onto tiles
pub mod marks {
    /// The single visibility class toggled on filtered tiles
    pub const HIDDEN_CLASS: &str = "rz-hidden";

    pub const ATTR_RATING: &str = "data-rz-rating";
    pub const ATTR_REVIEWS: &str = "data-rz-reviews";
    pub const ATTR_PRICE: &str = "data-rz-price";
    pub const ATTR_TOP: &str = "data-rz-top";
}

/// Tile discovery
pub mod tiles {
    /// Everything that may be (part of) a product tile
    pub const TILE_ROOTS: &[&str] = &[
        "li.catalog-grid__cell",
        ".catalog-grid__cell",
        "rz-catalog-tile",
        "app-goods-tile-default",
        "rz-product-tile",
        ".goods-tile",
        ".product-card",
        "div.item",
    ];

    /// Canonical container resolution, highest priority first
    pub const CONTAINERS: &[&str] = &[
        "li.catalog-grid__cell, .catalog-grid__cell",
        "div.item",
        "rz-catalog-tile, app-goods-tile-default, rz-product-tile",
        ".goods-tile, .product-card",
    ];

    /// Content region inside a container
    pub const CARD_SCOPE: &str =
        ".goods-tile__inner, .goods-tile, .content, .tile, .tile-image-host, .tile-title, .price-wrap";

    pub const PRODUCT_LINK: &str = r#"a[href*="/p"]"#;
}

/// Facts inside a tile
pub mod facts {
    pub const STARS: &str = r#"[data-testid="stars-rating"].stars__rating, .stars__rating[data-testid="stars-rating"], [data-testid="stars-rating"]"#;
    pub const STARS_ANY: &str = r#"[data-testid="stars-rating"], .stars__rating"#;

    pub const REVIEW_ICON: &str =
        r##"use[rziconname="icon-review"], use[rzIconName="icon-review"], use[href*="#icon-review" i]"##;
    pub const RATING_BLOCK_CONTENT: &str = ".rating-block-content";
    pub const RATING_BLOCKS: &str = r#".rating-block-content, [class*="rating-block"]"#;

    pub const NO_REVIEWS_CANDIDATES: &str = "a, span, div, button";

    pub const PRICES: &str = r#".goods-tile__price-value, .price.color-red, [class*="price__value"], [class*="price-value"], .goods-tile__price, .price"#;
    pub const PRICE_VALUES: &str =
        r#".goods-tile__price-value, .price.color-red, [class*="price__value"], [class*="price-value"]"#;

    pub const TOP_BADGE: &str = r#".promo-label_type_popularity, [class*="promo-label_type_popularity"]"#;
    pub const LABELS: &str = r#".goods-tile__label, .promo-label, [class*="label"]"#;
}

/// Review listing pages
pub mod reviews {
    /// Comments link next to the rating, preferred over any other comments link
    pub const RATED_COMMENTS_LINK: &str =
        r#"a.rating-block-rating[href*="/comments/"], a.black-link.rating-block-rating[href*="/comments/"]"#;
    pub const COMMENTS_LINK: &str = r#"a[href*="/comments/"]"#;
    pub const PRODUCT_HEADING_LINK: &str = r#"a.goods-tile__heading[href], a[href*="/p"]"#;

    /// Appended to the product URL when the tile has no comments link
    pub const COMMENTS_SEGMENT: &str = "comments/";

    pub const TIMESTAMP: &str = r#"time[data-testid="replay-header-date"], time[data-testid*="date"]"#;
    pub const ENTRY: &str = "article, li, div, .comment-list__item";

    pub const NEXT_REL: &str = r#"a[rel="next"]"#;
    pub const FORWARD_DIRECTION: &str = "a.pagination__direction--forward, a.pagination__direction_next";
    pub const LABELLED_ANCHOR: &str = "a[aria-label]";
    pub const ACTIVE_PAGE: &str = ".pagination__link_state_active, .pagination__link--active, li.active a";
}
