//! Tile discovery and filtering passes
//!
//! A sweep walks the live document, resolves every tile-like element to its
//! canonical container, extracts facts from it and writes the filter verdict
//! back as marks. Sweeps are idempotent: running one twice over an unchanged
//! document queues no patches the second time.

#![allow(clippy::uninlined_format_args)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use ego_tree::NodeId;
use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::domain::constants::{marks, tiles};
use crate::domain::{FilterConfig, TileFacts, should_hide};
use crate::infrastructure::dom::CatalogDocument;
use crate::infrastructure::parsing::{SelectorSet, TileExtractor};

/// Opaque per-element tile token. Never reused within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId(pub u64);

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile#{}", self.0)
    }
}

/// Identity-keyed side table from document nodes to tile tokens.
#[derive(Debug, Default)]
pub struct TileRegistry {
    ids: HashMap<NodeId, TileId>,
    generation: u64,
    next: u64,
    /// Tokens dropped since the last `take_forgotten`
    forgotten: Vec<TileId>,
}

impl TileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `node`, assigning a fresh one the first time it is seen.
    /// A new document generation invalidates every earlier assignment.
    pub fn identify(&mut self, node: NodeId, generation: u64) -> TileId {
        if generation != self.generation {
            debug!("Document generation {} -> {}, resetting tile registry", self.generation, generation);
            self.forget_all();
            self.generation = generation;
        }
        *self.ids.entry(node).or_insert_with(|| {
            self.next += 1;
            TileId(self.next)
        })
    }

    pub fn get(&self, node: NodeId) -> Option<TileId> {
        self.ids.get(&node).copied()
    }

    pub fn node_of(&self, tile: TileId) -> Option<NodeId> {
        self.ids.iter().find(|(_, id)| **id == tile).map(|(node, _)| *node)
    }

    /// Forget elements that are no longer reachable from the document root.
    pub fn prune(&mut self, document: &CatalogDocument) -> usize {
        if document.generation() != self.generation {
            let dropped = self.ids.len();
            self.forget_all();
            self.generation = document.generation();
            return dropped;
        }
        let before = self.forgotten.len();
        let forgotten = &mut self.forgotten;
        self.ids.retain(|node, tile| {
            let keep = document.is_attached(*node);
            if !keep {
                forgotten.push(*tile);
            }
            keep
        });
        self.forgotten.len() - before
    }

    fn forget_all(&mut self) {
        self.forgotten.extend(self.ids.drain().map(|(_, tile)| tile));
    }

    /// Tokens whose elements left the page, so per-tile state can be released.
    pub fn take_forgotten(&mut self) -> Vec<TileId> {
        std::mem::take(&mut self.forgotten)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Distinct canonical containers found
    pub tiles_seen: usize,
    pub tiles_hidden: usize,
    /// Tiles whose hover wiring was attached during this sweep
    pub newly_wired: usize,
    /// Containers without anything product-like in them
    pub skipped: usize,
}

pub struct Sweeper {
    extractor: Arc<TileExtractor>,
    roots: SelectorSet,
    containers: Vec<SelectorSet>,
}

impl Sweeper {
    pub fn new(extractor: Arc<TileExtractor>) -> Self {
        Self {
            extractor,
            roots: SelectorSet::compile(&tiles::TILE_ROOTS.join(", ")),
            containers: tiles::CONTAINERS.iter().map(|list| SelectorSet::compile(list)).collect(),
        }
    }

    pub fn extractor(&self) -> &TileExtractor {
        &self.extractor
    }

    /// Nearest ancestor-or-self container, by container priority.
    pub fn canonical<'a>(&self, element: ElementRef<'a>) -> ElementRef<'a> {
        self.containers
            .iter()
            .find_map(|set| set.closest(element))
            .unwrap_or(element)
    }

    /// Canonical containers of every tile-like element, in document order.
    /// Nested matches resolve to the same container and appear repeatedly.
    pub fn discover(&self, document: &CatalogDocument) -> Vec<NodeId> {
        let root = document.html().root_element();
        self.roots
            .select_in(root)
            .into_iter()
            .map(|element| self.canonical(element).id())
            .collect()
    }

    /// Facts for an accepted tile, `None` when it fails the sanity filter.
    fn inspect(&self, document: &CatalogDocument, node: NodeId) -> Option<TileFacts> {
        let element = document.element(node)?;
        let region = self.extractor.content_region(element);
        if !self.extractor.looks_like_product(region) {
            return None;
        }
        Some(self.extractor.extract_region(region))
    }

    /// One full pass: discover, extract, mark, hide, wire.
    pub fn sweep(
        &self,
        document: &mut CatalogDocument,
        registry: &mut TileRegistry,
        config: &FilterConfig,
    ) -> SweepReport {
        let pruned = document.prune_detached() + registry.prune(document);
        if pruned > 0 {
            trace!("Pruned {} stale tile entries", pruned);
        }

        let generation = document.generation();
        let mut report = SweepReport::default();
        let mut seen = HashSet::new();

        for node in self.discover(document) {
            let tile = registry.identify(node, generation);
            if !seen.insert(tile) {
                continue;
            }
            report.tiles_seen += 1;

            let Some(facts) = self.inspect(document, node) else {
                report.skipped += 1;
                continue;
            };

            write_fact_marks(document, node, &facts);
            let hide = should_hide(&facts, config);
            document.set_hidden(node, hide);
            if hide {
                report.tiles_hidden += 1;
            }
            if document.wire_hover(node) {
                report.newly_wired += 1;
            }
            trace!("{} hide={} {:?}", tile, hide, facts);
        }

        debug!(
            "Sweep: {} tiles, {} hidden, {} newly wired, {} skipped",
            report.tiles_seen, report.tiles_hidden, report.newly_wired, report.skipped
        );
        report
    }
}

fn write_fact_marks(document: &mut CatalogDocument, node: NodeId, facts: &TileFacts) {
    let rating = facts.rating.map(|r| r.to_string());
    let reviews = facts.review_count.map(|r| r.to_string());
    let price = facts.price.map(|p| p.to_string());

    document.set_mark(node, marks::ATTR_RATING, rating.as_deref());
    document.set_mark(node, marks::ATTR_REVIEWS, reviews.as_deref());
    document.set_mark(node, marks::ATTR_PRICE, price.as_deref());
    document.set_mark(node, marks::ATTR_TOP, Some(if facts.is_top_seller { "1" } else { "0" }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bound, Lexicon};
    use crate::infrastructure::dom::{DomMutation, MarkChange};
    use scraper::Selector;
    use url::Url;

    fn sweeper() -> Sweeper {
        let extractor = TileExtractor::new(Arc::new(Lexicon::default())).unwrap();
        Sweeper::new(Arc::new(extractor))
    }

    fn tile(id: &str, fill: &str, price: &str) -> String {
        format!(
            r#"<li class="catalog-grid__cell" id="cell-{id}">
                 <rz-catalog-tile><div class="goods-tile"><div class="goods-tile__inner">
                   <a class="goods-tile__heading" href="/item/p{id}/">Item</a>
                   <div data-testid="stars-rating" class="stars__rating" style="width: {fill}"></div>
                   <span class="goods-tile__price-value">{price}</span>
                 </div></div></rz-catalog-tile>
               </li>"#
        )
    }

    fn document(cells: &str) -> CatalogDocument {
        let url = Url::parse("https://shop.example/phones/c80003/").unwrap();
        CatalogDocument::parse(url, &format!(r#"<html><body><ul class="catalog-grid">{cells}</ul></body></html>"#))
    }

    fn node(document: &CatalogDocument, css: &str) -> NodeId {
        let selector = Selector::parse(css).unwrap();
        document.html().root_element().select(&selector).next().unwrap().id()
    }

    fn rating_min(min: f64) -> FilterConfig {
        FilterConfig {
            rating: Bound::new(true, Some(min), None),
            ..FilterConfig::default()
        }
    }

    #[test]
    fn nested_matches_resolve_to_one_tile() {
        let mut document = document(&tile("1", "90%", "1 000"));
        let sweeper = sweeper();
        let cells = sweeper.discover(&document);
        // The cell, the component tag and the card all resolve to the cell
        assert_eq!(cells.len(), 3);
        assert!(cells.iter().all(|n| *n == node(&document, "#cell-1")));

        let mut registry = TileRegistry::new();
        let report = sweeper.sweep(&mut document, &mut registry, &FilterConfig::default());
        assert_eq!(report.tiles_seen, 1);
        assert_eq!(document.attr(node(&document, "#cell-1"), marks::ATTR_PRICE), Some("1000"));
    }

    #[test]
    fn rating_bound_hides_low_tiles_only() {
        let mut document = document(&format!("{}{}", tile("1", "90%", "500"), tile("2", "78%", "400")));
        let mut registry = TileRegistry::new();

        let report = sweeper().sweep(&mut document, &mut registry, &rating_min(4.0));
        assert_eq!(report.tiles_seen, 2);
        assert_eq!(report.tiles_hidden, 1);
        assert_eq!(report.newly_wired, 2);
        assert!(!document.is_hidden(node(&document, "#cell-1")));
        assert!(document.is_hidden(node(&document, "#cell-2")));
        assert_eq!(document.attr(node(&document, "#cell-2"), marks::ATTR_RATING), Some("3.9"));
        assert_eq!(document.attr(node(&document, "#cell-1"), marks::ATTR_TOP), Some("0"));
    }

    #[test]
    fn second_sweep_is_quiet() {
        let mut document = document(&tile("1", "90%", "500"));
        let mut registry = TileRegistry::new();
        let sweeper = sweeper();

        sweeper.sweep(&mut document, &mut registry, &FilterConfig::default());
        assert!(document.has_pending_patches());
        document.drain_patches();

        let report = sweeper.sweep(&mut document, &mut registry, &FilterConfig::default());
        assert_eq!(report.newly_wired, 0);
        assert!(!document.has_pending_patches());
    }

    #[test]
    fn loosening_the_filter_unhides() {
        let mut document = document(&tile("1", "60%", "500"));
        let mut registry = TileRegistry::new();
        let sweeper = sweeper();

        sweeper.sweep(&mut document, &mut registry, &rating_min(4.0));
        document.drain_patches();
        sweeper.sweep(&mut document, &mut registry, &FilterConfig::default());

        let patches = document.drain_patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].changes, vec![MarkChange::RemoveClass(marks::HIDDEN_CLASS.into())]);
    }

    #[test]
    fn non_product_containers_are_skipped() {
        let mut document = document(r#"<li class="catalog-grid__cell"><div class="banner">Sale!</div></li>"#);
        let mut registry = TileRegistry::new();

        let report = sweeper().sweep(&mut document, &mut registry, &rating_min(4.0));
        assert_eq!(report, SweepReport { tiles_seen: 1, skipped: 1, ..SweepReport::default() });
        assert!(!document.has_pending_patches());
    }

    #[test]
    fn registry_forgets_removed_tiles() {
        let mut document = document(&format!("{}{}", tile("1", "90%", "500"), tile("2", "90%", "400")));
        let mut registry = TileRegistry::new();
        let sweeper = sweeper();
        sweeper.sweep(&mut document, &mut registry, &FilterConfig::default());
        assert_eq!(registry.len(), 2);

        let second = node(&document, "#cell-2");
        let second_id = registry.get(second).unwrap();
        document.apply(DomMutation::Remove { node: second }).unwrap();
        sweeper.sweep(&mut document, &mut registry, &FilterConfig::default());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.node_of(second_id), None);
        assert_eq!(registry.take_forgotten(), vec![second_id]);
        assert!(registry.take_forgotten().is_empty());
    }

    #[test]
    fn in_place_price_edit_flips_visibility() {
        let mut document = document(&tile("1", "90%", "500"));
        let mut registry = TileRegistry::new();
        let sweeper = sweeper();
        let config = FilterConfig {
            price: Bound::new(true, None, Some(1000.0)),
            ..FilterConfig::default()
        };

        sweeper.sweep(&mut document, &mut registry, &config);
        let cell = node(&document, "#cell-1");
        let tile = registry.get(cell).unwrap();
        assert!(!document.is_hidden(cell));
        document.drain_patches();

        let price = node(&document, ".goods-tile__price-value");
        let text = document.html().tree.get(price).unwrap().first_child().unwrap().id();
        document
            .apply(DomMutation::SetText {
                node: text,
                text: "4 500".into(),
            })
            .unwrap();
        let report = sweeper.sweep(&mut document, &mut registry, &config);

        assert_eq!(report.newly_wired, 0);
        assert_eq!(registry.get(cell), Some(tile));
        assert!(document.is_hidden(cell));
        let patches = document.drain_patches();
        assert_eq!(patches.len(), 1);
        assert!(!patches[0].changes.contains(&MarkChange::WireHover));
        assert!(patches[0].changes.contains(&MarkChange::AddClass(marks::HIDDEN_CLASS.into())));
        assert_eq!(document.attr(cell, marks::ATTR_PRICE), Some("4500"));
    }

    #[test]
    fn ids_are_not_reused_across_generations() {
        let mut registry = TileRegistry::new();
        let document = document(&tile("1", "90%", "500"));
        let cell = node(&document, "#cell-1");

        let first = registry.identify(cell, 0);
        assert_eq!(registry.identify(cell, 0), first);
        let after_reload = registry.identify(cell, 1);
        assert_ne!(after_reload, first);
    }
}
