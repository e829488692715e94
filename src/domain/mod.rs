//! Domain module - core catalog filtering and review analytics logic
//!
//! Everything in here is pure: no I/O, no timers, no document access.

pub mod aggregate;
pub mod constants;
pub mod facts;
pub mod filter;
pub mod lexicon;
pub mod settings;

// Re-export commonly used items
pub use aggregate::{MonthKey, MonthStats, MonthlyAggregate};
pub use facts::{ReviewPresence, TileFacts};
pub use filter::{Bound, FilterConfig, should_hide};
pub use lexicon::Lexicon;
pub use settings::{SettingsAck, SettingsMessage, SettingsPatch};
