//! Month-by-month review statistics.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A `YYYY-MM` bucket. Ordering is chronological. Serializes as its
/// `YYYY-MM` string so it can key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    /// `None` unless `month` is 1..=12.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for MonthKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (year, month) = value
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got '{value}'"))?;
        let year = year.parse().map_err(|_| format!("bad year in '{value}'"))?;
        let month = month.parse().map_err(|_| format!("bad month in '{value}'"))?;
        Self::new(year, month).ok_or_else(|| format!("month out of range in '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MonthStats {
    pub review_count: u32,
    pub star_sum: f64,
    pub rated_count: u32,
}

impl MonthStats {
    pub fn average(&self) -> f64 {
        if self.rated_count > 0 {
            self.star_sum / f64::from(self.rated_count)
        } else {
            0.0
        }
    }
}

/// Accumulate-only aggregate; nothing is ever decremented.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    months: BTreeMap<MonthKey, MonthStats>,
}

impl MonthlyAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one review; stars only contribute when they were parseable.
    pub fn record(&mut self, month: MonthKey, stars: Option<f64>) {
        let stats = self.months.entry(month).or_default();
        stats.review_count += 1;
        if let Some(stars) = stars {
            stats.star_sum += stars;
            stats.rated_count += 1;
        }
    }

    pub fn get(&self, month: &MonthKey) -> Option<&MonthStats> {
        self.months.get(month)
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    pub fn len(&self) -> usize {
        self.months.len()
    }

    /// Months newest first.
    pub fn newest_first(&self) -> impl Iterator<Item = (&MonthKey, &MonthStats)> {
        self.months.iter().rev()
    }

    pub fn total_reviews(&self) -> u32 {
        self.months.values().map(|s| s.review_count).sum()
    }
}
