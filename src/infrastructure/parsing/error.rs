//! Parsing error types.
//!
//! Extraction misses are `Option`s, not errors. The only parsing step that
//! fails loudly is resolving where a product's reviews live.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParsingError {
    #[error("No review listing link found in tile")]
    NoReviewSource,

    #[error("URL resolution failed: {url} - {reason}")]
    UrlResolutionFailed { url: String, reason: String },
}

pub type ParsingResult<T> = Result<T, ParsingError>;
