//! HTML parsing for catalog tiles and review listing pages
//!
//! Selector lists are compiled leniently (see [`selectors::SelectorSet`]) and
//! every heuristic degrades to "unknown" instead of failing.

pub mod context;
pub mod error;
pub mod review_parser;
pub mod selectors;
pub mod text;
pub mod tile_extractor;

// Re-export public types
pub use context::ReviewPageContext;
pub use error::{ParsingError, ParsingResult};
pub use review_parser::{ReviewEntry, ReviewPage, ReviewPageParser};
pub use selectors::SelectorSet;
pub use tile_extractor::TileExtractor;

use scraper::Html;

/// Parser over an already parsed document with per-call context
pub trait ContextualParser {
    type Output;
    type Context;

    fn parse_with_context(&self, html: &Html, context: &Self::Context) -> Self::Output;
}
