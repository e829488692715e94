//! Structured facts extracted from one product tile.

use serde::{Deserialize, Serialize};

/// Tri-state answer to "does this product have reviews?"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReviewPresence {
    #[default]
    Unknown,
    Present,
    Absent,
}

/// Facts for one tile. Every field degrades independently to unknown.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TileFacts {
    /// Star rating in `[0, 5]`, two decimals
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    /// Lowest current (non-struck-through) price, in whole currency units
    pub price: Option<u64>,
    pub is_top_seller: bool,
    pub has_reviews: ReviewPresence,
}

impl TileFacts {
    /// Derive the review presence from a known count or an explicit
    /// "no reviews yet" marker. A known count always wins.
    pub fn presence_from(review_count: Option<u32>, explicit_no_reviews: bool) -> ReviewPresence {
        match review_count {
            Some(0) => ReviewPresence::Absent,
            Some(_) => ReviewPresence::Present,
            None if explicit_no_reviews => ReviewPresence::Absent,
            None => ReviewPresence::Unknown,
        }
    }
}
