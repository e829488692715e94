//! Infrastructure layer for the live document, parsing, transports and settings
//!
//! Everything that touches markup, the network, the filesystem or the
//! settings substrate lives here; the application layer only sees the traits
//! and types re-exported below.

pub mod config; // Application configuration and defaults
pub mod dom; // Live catalog document and tile mark overlay
pub mod logging; // Logging infrastructure
pub mod parsing; // Tile extraction and review page parsing
pub mod settings_store; // Filter settings persistence
pub mod transport; // Review page transports

// Re-export commonly used items
pub use config::{AppConfig, ConfigManager};
pub use dom::{CatalogDocument, DomError, DomMutation, MarkChange, TilePatch};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use parsing::{ContextualParser, ReviewPageParser, TileExtractor};
pub use settings_store::{JsonFileSettingsStore, MemorySettingsStore, SettingsStore, StorageArea, StorageChange};
pub use transport::{FetchedPage, PageTransport, TransportError};
