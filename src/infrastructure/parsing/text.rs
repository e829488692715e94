//! Text patterns shared by the tile extractor and the review page parser.

use regex::Regex;
use scraper::ElementRef;

/// Compiled regular expressions for the storefront's text conventions.
#[derive(Debug, Clone)]
pub struct Patterns {
    calc_percent: Regex,
    bare_percent: Regex,
    leading_count: Regex,
    bounded_count: Regex,
    parenthesised_count: Regex,
    review_date: Regex,
    stale_price_class: Regex,
}

impl Patterns {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            calc_percent: Regex::new(r"(?i)calc\(\s*(\d+(?:\.\d+)?)%\s*[-+]")?,
            bare_percent: Regex::new(r"(\d+(?:\.\d+)?)%")?,
            leading_count: Regex::new(r"(\d{1,6})\b")?,
            bounded_count: Regex::new(r"(?:^|\D)(\d{1,6})(?:\D|$)")?,
            parenthesised_count: Regex::new(r"\((\d+)\)")?,
            review_date: Regex::new(r"(\d{1,2})\s+(\p{L}+)\s+(\d{4})")?,
            stale_price_class: Regex::new(r"(?i)old|strike|line-through")?,
        })
    }

    /// Star fill from an inline style, `calc(P% - x)` first, then a bare `P%`.
    pub fn fill_percent(&self, style: &str) -> Option<f64> {
        let captures = self
            .calc_percent
            .captures(style)
            .or_else(|| self.bare_percent.captures(style))?;
        captures.get(1)?.as_str().parse::<f64>().ok()
    }

    /// Stars in `[0, 5]` for a fill percentage style, unrounded.
    pub fn stars_from_style(&self, style: &str) -> Option<f64> {
        self.fill_percent(style).map(|pct| (pct / 20.0).clamp(0.0, 5.0))
    }

    /// First 1-6 digit run ending at a word boundary.
    pub fn leading_count(&self, text: &str) -> Option<u32> {
        first_group(&self.leading_count, text)
    }

    /// First 1-6 digit number not embedded in a longer digit run.
    pub fn bounded_count(&self, text: &str) -> Option<u32> {
        first_group(&self.bounded_count, text)
    }

    /// `(N)`, as printed next to star indicators.
    pub fn parenthesised_count(&self, text: &str) -> Option<u32> {
        first_group(&self.parenthesised_count, text)
    }

    /// `(day, month word, year)` from a review timestamp, already lower-cased.
    pub fn review_date<'t>(&self, text: &'t str) -> Option<(u32, &'t str, i32)> {
        let captures = self.review_date.captures(text)?;
        let day = captures.get(1)?.as_str().parse().ok()?;
        let month = captures.get(2)?.as_str();
        let year = captures.get(3)?.as_str().parse().ok()?;
        Some((day, month, year))
    }

    pub fn is_stale_price_class(&self, class: &str) -> bool {
        self.stale_price_class.is_match(class)
    }
}

fn first_group(regex: &Regex, text: &str) -> Option<u32> {
    regex.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Concatenated descendant text of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect()
}

/// Collapse whitespace runs (NBSP included) into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
