//! Multilingual phrase tables used by the heuristics.
//!
//! The catalog this was built for renders in Russian and Ukrainian; English
//! entries are included so the same tables work on English storefront skins.
//! Tables are plain data, so hosts can extend them without touching the
//! extractor.

use std::collections::HashMap;

const MONTHS: &[(&str, u32)] = &[
    // ru, genitive and nominative
    ("января", 1), ("январь", 1), ("февраля", 2), ("февраль", 2),
    ("марта", 3), ("март", 3), ("апреля", 4), ("апрель", 4),
    ("мая", 5), ("май", 5), ("июня", 6), ("июнь", 6),
    ("июля", 7), ("июль", 7), ("августа", 8), ("август", 8),
    ("сентября", 9), ("сентябрь", 9), ("октября", 10), ("октябрь", 10),
    ("ноября", 11), ("ноябрь", 11), ("декабря", 12), ("декабрь", 12),
    // uk, genitive and nominative
    ("січня", 1), ("січень", 1), ("лютого", 2), ("лютий", 2),
    ("березня", 3), ("березень", 3), ("квітня", 4), ("квітень", 4),
    ("травня", 5), ("травень", 5), ("червня", 6), ("червень", 6),
    ("липня", 7), ("липень", 7), ("серпня", 8), ("серпень", 8),
    ("вересня", 9), ("вересень", 9), ("жовтня", 10), ("жовтень", 10),
    ("листопада", 11), ("листопад", 11), ("грудня", 12), ("грудень", 12),
    // en
    ("january", 1), ("february", 2), ("march", 3), ("april", 4),
    ("may", 5), ("june", 6), ("july", 7), ("august", 8),
    ("september", 9), ("october", 10), ("november", 11), ("december", 12),
];

/// Matched against whitespace-stripped, lower-cased label text.
const TOP_SELLER: &[&str] = &["топпродаж", "топродаж", "хітпродаж", "хитпродаж", "topseller", "bestseller"];

/// Matched against lower-cased element text.
const NO_REVIEWS: &[&str] = &[
    "оставить отзыв",
    "отзывов пока нет",
    "будьте первым",
    "залишити відгук",
    "відгуків ще немає",
    "будьте першим",
    "leave a review",
    "no reviews yet",
    "be the first",
];

/// Matched against lower-cased `aria-label` values of pagination anchors.
const NEXT_PAGE: &[&str] = &["след", "далі", "вперед", "next"];

#[derive(Debug, Clone)]
pub struct Lexicon {
    months: HashMap<String, u32>,
    top_seller: Vec<String>,
    no_reviews: Vec<String>,
    next_page: Vec<String>,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self {
            months: MONTHS.iter().map(|(w, m)| ((*w).to_string(), *m)).collect(),
            top_seller: TOP_SELLER.iter().map(ToString::to_string).collect(),
            no_reviews: NO_REVIEWS.iter().map(ToString::to_string).collect(),
            next_page: NEXT_PAGE.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Lexicon {
    /// An empty lexicon, for hosts that want full control.
    pub fn empty() -> Self {
        Self {
            months: HashMap::new(),
            top_seller: Vec::new(),
            no_reviews: Vec::new(),
            next_page: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_month(mut self, word: &str, month: u32) -> Self {
        if (1..=12).contains(&month) {
            self.months.insert(word.to_lowercase(), month);
        }
        self
    }

    #[must_use]
    pub fn with_top_seller_phrase(mut self, phrase: &str) -> Self {
        self.top_seller.push(strip_whitespace(&phrase.to_lowercase()));
        self
    }

    #[must_use]
    pub fn with_no_reviews_phrase(mut self, phrase: &str) -> Self {
        self.no_reviews.push(phrase.to_lowercase());
        self
    }

    #[must_use]
    pub fn with_next_label(mut self, label: &str) -> Self {
        self.next_page.push(label.to_lowercase());
        self
    }

    pub fn month(&self, word: &str) -> Option<u32> {
        self.months.get(&word.to_lowercase()).copied()
    }

    pub fn is_top_seller_label(&self, text: &str) -> bool {
        let normalized = strip_whitespace(&text.to_lowercase());
        !normalized.is_empty() && self.top_seller.iter().any(|p| normalized.contains(p.as_str()))
    }

    pub fn says_no_reviews(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.no_reviews.iter().any(|p| lowered.contains(p.as_str()))
    }

    pub fn is_next_label(&self, label: &str) -> bool {
        let lowered = label.to_lowercase();
        self.next_page.iter().any(|p| lowered.contains(p.as_str()))
    }
}

/// Drops every whitespace char, NBSP included.
pub fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}
