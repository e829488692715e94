//! Lenient selector compilation.
//!
//! Selector lists are compiled once. A list that fails as a whole is split
//! into its comma-separated parts and every part that compiles is kept, so a
//! single exotic selector never disables a whole extractor.

use scraper::{ElementRef, Selector};
use tracing::{debug, warn};

/// One or more compiled selectors tried as a union.
#[derive(Debug, Clone)]
pub struct SelectorSet {
    selectors: Vec<Selector>,
}

impl SelectorSet {
    pub fn compile(list: &str) -> Self {
        if let Ok(selector) = Selector::parse(list) {
            return Self { selectors: vec![selector] };
        }

        let mut selectors = Vec::new();
        let mut errors = Vec::new();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match Selector::parse(part) {
                Ok(selector) => selectors.push(selector),
                Err(e) => errors.push(format!("'{part}': {e}")),
            }
        }

        if selectors.is_empty() {
            warn!("No valid selectors compiled from '{}': {}", list, errors.join(", "));
        } else if !errors.is_empty() {
            debug!("Some selectors failed to compile: {}", errors.join(", "));
        }
        Self { selectors }
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn matches(&self, element: &ElementRef<'_>) -> bool {
        self.selectors.iter().any(|s| s.matches(element))
    }

    /// Descendants of `scope` matching any selector, in document order, without duplicates.
    pub fn select_in<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        if let [only] = self.selectors.as_slice() {
            return scope.select(only).collect();
        }
        scope
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .filter(|el| self.matches(el))
            .collect()
    }

    pub fn first_in<'a>(&self, scope: ElementRef<'a>) -> Option<ElementRef<'a>> {
        if let [only] = self.selectors.as_slice() {
            return scope.select(only).next();
        }
        scope
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .find(|el| self.matches(el))
    }

    /// Nearest ancestor-or-self matching the set, like DOM `closest`.
    pub fn closest<'a>(&self, element: ElementRef<'a>) -> Option<ElementRef<'a>> {
        if self.matches(&element) {
            return Some(element);
        }
        element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| self.matches(el))
    }
}
