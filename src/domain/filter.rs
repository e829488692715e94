//! Filter configuration and the hide/show predicate.
//!
//! The predicate fails open: a fact that could not be extracted never causes
//! a tile to be hidden.

use serde::{Deserialize, Serialize};

use super::facts::{ReviewPresence, TileFacts};

/// An optionally enabled `[min, max]` range. `None` on either side is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bound {
    pub enabled: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bound {
    pub const fn new(enabled: bool, min: Option<f64>, max: Option<f64>) -> Self {
        Self { enabled, min, max }
    }

    /// Swap inverted bounds so that `min <= max` whenever both are set.
    #[must_use]
    pub fn normalized(self) -> Self {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min > max => Self {
                enabled: self.enabled,
                min: Some(max),
                max: Some(min),
            },
            _ => self,
        }
    }

    /// True when the bound is active, the value is known, and it falls outside.
    pub fn rejects(&self, value: Option<f64>) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(value) = value else {
            return false;
        };
        self.min.is_some_and(|min| value < min) || self.max.is_some_and(|max| value > max)
    }
}

/// User filter, shared by the sweep loop and read on every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    pub enabled: bool,
    pub enable_top_only: bool,
    pub hide_no_reviews: bool,
    pub rating: Bound,
    pub reviews: Bound,
    pub price: Bound,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_top_only: false,
            hide_no_reviews: false,
            rating: Bound::default(),
            reviews: Bound::default(),
            price: Bound::default(),
        }
    }
}

impl FilterConfig {
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            rating: self.rating.normalized(),
            reviews: self.reviews.normalized(),
            price: self.price.normalized(),
            ..self
        }
    }
}

/// Decide whether a tile with `facts` must be hidden under `config`.
pub fn should_hide(facts: &TileFacts, config: &FilterConfig) -> bool {
    if !config.enabled {
        return false;
    }

    let not_top = config.enable_top_only && !facts.is_top_seller;
    let no_reviews = config.hide_no_reviews && facts.has_reviews == ReviewPresence::Absent;
    let rating = config.rating.rejects(facts.rating);
    let reviews = config.reviews.rejects(facts.review_count.map(f64::from));
    let price = config.price.rejects(facts.price.map(|p| p as f64));

    not_top || no_reviews || rating || reviews || price
}
