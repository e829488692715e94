//! Settings wire format: storage keys, the update message, and conversions
//! between the flat key/value form and [`FilterConfig`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::filter::{Bound, FilterConfig};

/// Storage keys, as written by the settings editor.
pub mod keys {
    pub const ENABLED: &str = "rzEnabled";
    pub const ENABLE_RATING: &str = "rzEnableRating";
    pub const RATING_MIN: &str = "rzRatingMin";
    pub const RATING_MAX: &str = "rzRatingMax";
    pub const ENABLE_REVIEWS: &str = "rzEnableReviews";
    pub const REVIEWS_MIN: &str = "rzReviewsMin";
    pub const REVIEWS_MAX: &str = "rzReviewsMax";
    pub const HIDE_NO_REVIEWS: &str = "rzHideNoReviews";
    pub const ENABLE_PRICE: &str = "rzEnablePrice";
    pub const PRICE_MIN: &str = "rzPriceMin";
    pub const PRICE_MAX: &str = "rzPriceMax";
    pub const ENABLE_TOP_ONLY: &str = "rzEnableTopOnly";

    pub const ALL: [&str; 12] = [
        ENABLED,
        ENABLE_RATING,
        RATING_MIN,
        RATING_MAX,
        ENABLE_REVIEWS,
        REVIEWS_MIN,
        REVIEWS_MAX,
        HIDE_NO_REVIEWS,
        ENABLE_PRICE,
        PRICE_MIN,
        PRICE_MAX,
        ENABLE_TOP_ONLY,
    ];
}

/// Partial settings update. Field names follow the editor's payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub enabled: Option<bool>,
    pub enable_top_only: Option<bool>,
    pub hide_no_reviews: Option<bool>,
    pub enable_rating: Option<bool>,
    #[serde(deserialize_with = "lenient_number")]
    pub rating_min: Option<Option<f64>>,
    #[serde(deserialize_with = "lenient_number")]
    pub rating_max: Option<Option<f64>>,
    pub enable_reviews: Option<bool>,
    #[serde(deserialize_with = "lenient_number")]
    pub reviews_min: Option<Option<f64>>,
    #[serde(deserialize_with = "lenient_number")]
    pub reviews_max: Option<Option<f64>>,
    pub enable_price: Option<bool>,
    #[serde(deserialize_with = "lenient_number")]
    pub price_min: Option<Option<f64>>,
    #[serde(deserialize_with = "lenient_number")]
    pub price_max: Option<Option<f64>>,
}

/// Messages accepted from the settings editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SettingsMessage {
    #[serde(rename = "UPDATE_SETTINGS", alias = "RZ_UPDATE_SETTINGS")]
    UpdateSettings(SettingsPatch),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsAck {
    pub ok: bool,
}

/// Present-but-null and present-but-blank both mean "clear the bound".
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(Some(number_from_value(&value)))
}

/// Coerce a stored value into an optional number: numbers pass through,
/// numeric strings are parsed, `""`, `null` and garbage become `None`.
pub fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
            }
        }
        _ => None,
    }
}

fn bool_from_value(value: &Value, fallback: bool) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => fallback,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => fallback,
    }
}

fn number_to_value(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merge into `config`. The caller normalizes afterwards.
    pub fn apply_to(&self, config: &mut FilterConfig) {
        fn set<T: Copy>(target: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *target = v;
            }
        }
        set(&mut config.enabled, self.enabled);
        set(&mut config.enable_top_only, self.enable_top_only);
        set(&mut config.hide_no_reviews, self.hide_no_reviews);
        set(&mut config.rating.enabled, self.enable_rating);
        set(&mut config.rating.min, self.rating_min);
        set(&mut config.rating.max, self.rating_max);
        set(&mut config.reviews.enabled, self.enable_reviews);
        set(&mut config.reviews.min, self.reviews_min);
        set(&mut config.reviews.max, self.reviews_max);
        set(&mut config.price.enabled, self.enable_price);
        set(&mut config.price.min, self.price_min);
        set(&mut config.price.max, self.price_max);
    }

    /// Build a patch from storage change pairs. Unknown keys are ignored.
    pub fn from_storage_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let defaults = FilterConfig::default();
        let mut patch = Self::default();
        for (key, value) in pairs {
            match key {
                keys::ENABLED => patch.enabled = Some(bool_from_value(value, defaults.enabled)),
                keys::ENABLE_TOP_ONLY => patch.enable_top_only = Some(bool_from_value(value, false)),
                keys::HIDE_NO_REVIEWS => patch.hide_no_reviews = Some(bool_from_value(value, false)),
                keys::ENABLE_RATING => patch.enable_rating = Some(bool_from_value(value, false)),
                keys::RATING_MIN => patch.rating_min = Some(number_from_value(value)),
                keys::RATING_MAX => patch.rating_max = Some(number_from_value(value)),
                keys::ENABLE_REVIEWS => patch.enable_reviews = Some(bool_from_value(value, false)),
                keys::REVIEWS_MIN => patch.reviews_min = Some(number_from_value(value)),
                keys::REVIEWS_MAX => patch.reviews_max = Some(number_from_value(value)),
                keys::ENABLE_PRICE => patch.enable_price = Some(bool_from_value(value, false)),
                keys::PRICE_MIN => patch.price_min = Some(number_from_value(value)),
                keys::PRICE_MAX => patch.price_max = Some(number_from_value(value)),
                _ => {}
            }
        }
        patch
    }
}

impl FilterConfig {
    /// Flat storage form, one entry per key in [`keys::ALL`].
    pub fn to_storage_map(&self) -> Map<String, Value> {
        fn dimension(map: &mut Map<String, Value>, bound: &Bound, enable: &str, min: &str, max: &str) {
            map.insert(enable.to_string(), Value::Bool(bound.enabled));
            map.insert(min.to_string(), number_to_value(bound.min));
            map.insert(max.to_string(), number_to_value(bound.max));
        }

        let mut map = Map::new();
        map.insert(keys::ENABLED.to_string(), Value::Bool(self.enabled));
        map.insert(keys::ENABLE_TOP_ONLY.to_string(), Value::Bool(self.enable_top_only));
        map.insert(keys::HIDE_NO_REVIEWS.to_string(), Value::Bool(self.hide_no_reviews));
        dimension(&mut map, &self.rating, keys::ENABLE_RATING, keys::RATING_MIN, keys::RATING_MAX);
        dimension(&mut map, &self.reviews, keys::ENABLE_REVIEWS, keys::REVIEWS_MIN, keys::REVIEWS_MAX);
        dimension(&mut map, &self.price, keys::ENABLE_PRICE, keys::PRICE_MIN, keys::PRICE_MAX);
        map
    }

    /// Rebuild a normalized config from a fully populated storage map.
    pub fn from_storage_map(map: &Map<String, Value>) -> Self {
        let mut config = Self::default();
        SettingsPatch::from_storage_pairs(map.iter().map(|(k, v)| (k.as_str(), v))).apply_to(&mut config);
        config.normalized()
    }
}
