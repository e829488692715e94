//! Catalog Lens - live product-tile filtering and review analytics
//!
//! This crate augments a continuously mutating e-commerce catalog page.
//! It extracts facts (rating, review count, price, top-seller badge) from
//! every product tile, hides tiles that violate the user's filter as the page
//! changes, and on demand crawls a product's review pages to build a
//! month-by-month rating report.
//!
//! The host environment feeds page markup and events in through
//! [`application::CatalogService`] and mirrors the produced tile marks and
//! panels back onto the real page.

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;

// Re-export the service surface for easier access
pub use application::{CatalogService, PageEvent, ServiceHandle};
pub use domain::{FilterConfig, TileFacts};
