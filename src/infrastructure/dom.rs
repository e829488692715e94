//! Live catalog document.
//!
//! The host hands over the page markup once and then streams structural
//! mutations as the storefront re-renders. The tree is kept as a
//! `scraper::Html` so the extractor and the review parser share one selector
//! engine with the network side.
//!
//! Writes made by this crate (tile marks, the hidden class, hover wiring) are
//! never applied to the parsed tree. They are kept in an overlay keyed by node
//! identity and queued as [`TilePatch`]es that the host drains and mirrors
//! onto the real page.

use std::collections::{BTreeMap, HashMap, HashSet};

use ego_tree::{NodeId, NodeRef, Tree};
use html5ever::tendril::StrTendril;
use html5ever::{Attribute, LocalName, Namespace, QualName};
use scraper::node::{Element, Text};
use scraper::{ElementRef, Html, Node};
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use crate::domain::constants::marks;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("Node {0:?} does not exist in the document")]
    UnknownNode(NodeId),

    #[error("Node {0:?} is no longer attached to the document")]
    Detached(NodeId),

    #[error("The document root cannot be {0}")]
    RootMutation(&'static str),

    #[error("Node {0:?} cannot take {1}")]
    WrongKind(NodeId, &'static str),
}

/// Changes reported by the host's mutation observer. Structural edits mint
/// new nodes; attribute and text edits keep the node's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomMutation {
    /// Parse `html` as a fragment and append it under `parent`
    AppendHtml { parent: NodeId, html: String },
    /// Drop all children of `parent` and insert the parsed fragment
    ReplaceChildren { parent: NodeId, html: String },
    /// Swap `node` for the parsed fragment, in place
    ReplaceNode { node: NodeId, html: String },
    Remove { node: NodeId },
    SetAttribute { node: NodeId, name: String, value: String },
    RemoveAttribute { node: NodeId, name: String },
    /// New data for a text node, or the sole text content of an element
    SetText { node: NodeId, text: String },
}

/// One change to mirror onto the host element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkChange {
    SetAttribute { name: String, value: String },
    RemoveAttribute { name: String },
    AddClass(String),
    RemoveClass(String),
    /// Attach pointer listeners for the analytics trigger
    WireHover,
}

/// Pending changes for one element. `path` locates the element by
/// element-child indices from the document element, as of the drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePatch {
    pub node: NodeId,
    pub path: Vec<usize>,
    pub changes: Vec<MarkChange>,
}

/// Marks currently written on one element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileMarks {
    pub attrs: BTreeMap<String, String>,
    pub hidden: bool,
    pub hover_wired: bool,
}

/// Queued changes; located only when drained.
#[derive(Debug)]
struct PendingMarks {
    node: NodeId,
    changes: Vec<MarkChange>,
}

pub struct CatalogDocument {
    html: Html,
    url: Url,
    generation: u64,
    overlay: HashMap<NodeId, TileMarks>,
    pending: Vec<PendingMarks>,
    detached: usize,
}

impl CatalogDocument {
    pub fn parse(url: Url, markup: &str) -> Self {
        Self {
            html: Html::parse_document(markup),
            url,
            generation: 0,
            overlay: HashMap::new(),
            pending: Vec::new(),
            detached: 0,
        }
    }

    /// The parsed tree. Removed nodes stay in its arena, so query through
    /// `root_element()` rather than `Html::select`.
    pub const fn html(&self) -> &Html {
        &self.html
    }

    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Bumped whenever node identities from before are meaningless.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Client-side navigation: same tree, new location.
    pub fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    /// Full reload. Every previously handed out `NodeId` is invalidated.
    pub fn replace_document(&mut self, url: Url, markup: &str) {
        self.html = Html::parse_document(markup);
        self.url = url;
        self.generation += 1;
        self.overlay.clear();
        self.pending.clear();
        self.detached = 0;
        debug!("Document replaced (generation {})", self.generation);
    }

    pub fn root_element_id(&self) -> NodeId {
        self.html.root_element().id()
    }

    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        let root = self.html.tree.root().id();
        self.html
            .tree
            .get(id)
            .is_some_and(|node| node.id() == root || node.ancestors().last().is_some_and(|a| a.id() == root))
    }

    /// Element-child index path from the document element, `None` when detached.
    pub fn path_of(&self, id: NodeId) -> Option<Vec<usize>> {
        if !self.is_attached(id) {
            return None;
        }
        let top = self.root_element_id();
        let mut path = Vec::new();
        let mut current = self.html.tree.get(id)?;
        while current.id() != top {
            let parent = current.parent()?;
            let index = parent
                .children()
                .filter(|c| c.value().is_element())
                .position(|c| c.id() == current.id())?;
            path.push(index);
            current = parent;
        }
        path.reverse();
        Some(path)
    }

    pub fn node_at_path(&self, path: &[usize]) -> Option<NodeId> {
        let mut current = self.html.root_element();
        for &index in path {
            current = current.children().filter_map(ElementRef::wrap).nth(index)?;
        }
        Some(current.id())
    }

    /// Apply one host mutation to the tree.
    pub fn apply(&mut self, mutation: DomMutation) -> Result<(), DomError> {
        match mutation {
            DomMutation::AppendHtml { parent, html } => {
                self.require_attached(parent)?;
                graft_fragment(&mut self.html.tree, parent, &html);
            }
            DomMutation::ReplaceChildren { parent, html } => {
                self.require_attached(parent)?;
                let children: Vec<NodeId> = self
                    .html
                    .tree
                    .get(parent)
                    .map(|p| p.children().map(|c| c.id()).collect())
                    .unwrap_or_default();
                for child in children {
                    self.detach(child);
                }
                graft_fragment(&mut self.html.tree, parent, &html);
            }
            DomMutation::ReplaceNode { node, html } => {
                self.require_replaceable(node, "replaced")?;
                let fragment = Html::parse_fragment(&html);
                for source in fragment_nodes(&fragment) {
                    copy_before(&mut self.html.tree, node, source);
                }
                self.detach(node);
            }
            DomMutation::Remove { node } => {
                self.require_replaceable(node, "removed")?;
                self.detach(node);
            }
            DomMutation::SetAttribute { node, name, value } => {
                self.require_attached(node)?;
                let name = name.to_ascii_lowercase();
                self.rewrite_attributes(node, |attrs| {
                    let value = StrTendril::from_slice(&value);
                    match attrs.iter_mut().find(|a| *a.name.local == *name) {
                        Some(existing) => existing.value = value,
                        None => attrs.push(Attribute {
                            name: QualName::new(None, Namespace::from(""), LocalName::from(name.as_str())),
                            value,
                        }),
                    }
                })?;
            }
            DomMutation::RemoveAttribute { node, name } => {
                self.require_attached(node)?;
                let name = name.to_ascii_lowercase();
                self.rewrite_attributes(node, |attrs| attrs.retain(|a| *a.name.local != *name))?;
            }
            DomMutation::SetText { node, text } => {
                self.require_attached(node)?;
                self.set_text(node, &text)?;
            }
        }
        Ok(())
    }

    /// Rebuild an element with edited attributes. Rebuilding rather than
    /// editing `attrs` in place resets the element's cached id and classes.
    fn rewrite_attributes(&mut self, id: NodeId, edit: impl FnOnce(&mut Vec<Attribute>)) -> Result<(), DomError> {
        let mut node = self.html.tree.get_mut(id).ok_or(DomError::UnknownNode(id))?;
        let Node::Element(element) = node.value() else {
            return Err(DomError::WrongKind(id, "attributes"));
        };
        let mut attrs: Vec<Attribute> = element
            .attrs
            .iter()
            .map(|(name, value)| Attribute {
                name: name.clone(),
                value: StrTendril::from_slice(value),
            })
            .collect();
        edit(&mut attrs);
        *element = Element::new(element.name.clone(), attrs);
        Ok(())
    }

    fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), DomError> {
        let children: Vec<NodeId> = {
            let mut node = self.html.tree.get_mut(id).ok_or(DomError::UnknownNode(id))?;
            match node.value() {
                Node::Text(current) => {
                    current.text = scraper::StrTendril::from(text);
                    return Ok(());
                }
                Node::Element(_) => {}
                _ => return Err(DomError::WrongKind(id, "text")),
            }
            self.html
                .tree
                .get(id)
                .map(|n| n.children().map(|c| c.id()).collect())
                .unwrap_or_default()
        };
        for child in children {
            self.detach(child);
        }
        if let Some(mut node) = self.html.tree.get_mut(id) {
            node.append(Node::Text(Text { text: text.into() }));
        }
        Ok(())
    }

    fn require_attached(&self, id: NodeId) -> Result<(), DomError> {
        if self.html.tree.get(id).is_none() {
            return Err(DomError::UnknownNode(id));
        }
        if !self.is_attached(id) {
            return Err(DomError::Detached(id));
        }
        Ok(())
    }

    fn require_replaceable(&self, id: NodeId, action: &'static str) -> Result<(), DomError> {
        self.require_attached(id)?;
        if id == self.html.tree.root().id() {
            return Err(DomError::RootMutation(action));
        }
        Ok(())
    }

    /// Unlink a subtree and release its payload. The arena keeps the slots,
    /// so ids handed out earlier stay valid but resolve to nothing.
    fn detach(&mut self, id: NodeId) {
        let Some(mut node) = self.html.tree.get_mut(id) else {
            return;
        };
        node.detach();
        let subtree: Vec<NodeId> = self
            .html
            .tree
            .get(id)
            .map(|n| n.descendants().map(|d| d.id()).collect())
            .unwrap_or_default();
        self.detached += subtree.len();
        for node in subtree {
            if let Some(mut node) = self.html.tree.get_mut(node) {
                *node.value() = Node::Fragment;
            }
        }
    }

    /// Nodes unlinked by mutations since the last full load.
    pub const fn detached_nodes(&self) -> usize {
        self.detached
    }

    /// Drop overlay entries and pending patches for nodes no longer in the page.
    pub fn prune_detached(&mut self) -> usize {
        let gone: HashSet<NodeId> = self.overlay.keys().copied().filter(|id| !self.is_attached(*id)).collect();
        if gone.is_empty() {
            return 0;
        }
        self.overlay.retain(|id, _| !gone.contains(id));
        self.pending.retain(|patch| !gone.contains(&patch.node));
        gone.len()
    }

    pub fn marks(&self, id: NodeId) -> Option<&TileMarks> {
        self.overlay.get(&id)
    }

    /// Current value of `name`: our overlay first, then the parsed element.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.overlay
            .get(&id)
            .and_then(|m| m.attrs.get(name).map(String::as_str))
            .or_else(|| self.element(id).and_then(|el| el.value().attr(name)))
    }

    /// Set (`Some`) or remove (`None`) a mark attribute. Returns whether anything changed.
    pub fn set_mark(&mut self, id: NodeId, name: &str, value: Option<&str>) -> bool {
        let marks = self.overlay.entry(id).or_default();
        let change = match value {
            Some(value) if marks.attrs.get(name).map(String::as_str) != Some(value) => {
                marks.attrs.insert(name.to_string(), value.to_string());
                MarkChange::SetAttribute {
                    name: name.to_string(),
                    value: value.to_string(),
                }
            }
            None if marks.attrs.remove(name).is_some() => MarkChange::RemoveAttribute { name: name.to_string() },
            _ => return false,
        };
        self.queue(id, change);
        true
    }

    /// Toggle the hidden class. Returns whether anything changed.
    pub fn set_hidden(&mut self, id: NodeId, hidden: bool) -> bool {
        let marks = self.overlay.entry(id).or_default();
        if marks.hidden == hidden {
            return false;
        }
        marks.hidden = hidden;
        let class = marks::HIDDEN_CLASS.to_string();
        self.queue(
            id,
            if hidden {
                MarkChange::AddClass(class)
            } else {
                MarkChange::RemoveClass(class)
            },
        );
        true
    }

    pub fn is_hidden(&self, id: NodeId) -> bool {
        self.overlay.get(&id).is_some_and(|m| m.hidden)
    }

    /// Wire hover once. Returns `true` only the first time for this element.
    pub fn wire_hover(&mut self, id: NodeId) -> bool {
        let marks = self.overlay.entry(id).or_default();
        if marks.hover_wired {
            return false;
        }
        marks.hover_wired = true;
        self.queue(id, MarkChange::WireHover);
        true
    }

    fn queue(&mut self, id: NodeId, change: MarkChange) {
        if let Some(patch) = self.pending.iter_mut().find(|p| p.node == id) {
            patch.changes.push(change);
            return;
        }
        if !self.is_attached(id) {
            trace!("Skipping mark on detached node {:?}", id);
            return;
        }
        self.pending.push(PendingMarks {
            node: id,
            changes: vec![change],
        });
    }

    pub fn has_pending_patches(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Hand queued patches to the host, oldest first. Paths are taken from
    /// the tree as it is now; patches for nodes removed since are dropped.
    pub fn drain_patches(&mut self) -> Vec<TilePatch> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter_map(|PendingMarks { node, changes }| {
                let Some(path) = self.path_of(node) else {
                    trace!("Dropping patch for removed node {:?}", node);
                    return None;
                };
                Some(TilePatch { node, path, changes })
            })
            .collect()
    }
}

/// Top-level nodes of a parsed fragment (children of its synthetic `<html>`).
fn fragment_nodes(fragment: &Html) -> Vec<NodeRef<'_, Node>> {
    fragment.root_element().children().collect()
}

fn graft_fragment(tree: &mut Tree<Node>, parent: NodeId, html: &str) {
    let fragment = Html::parse_fragment(html);
    for source in fragment_nodes(&fragment) {
        copy_subtree(tree, parent, source);
    }
}

fn copy_subtree(tree: &mut Tree<Node>, parent: NodeId, source: NodeRef<'_, Node>) {
    let Some(mut parent_node) = tree.get_mut(parent) else {
        return;
    };
    let id = parent_node.append(source.value().clone()).id();
    for child in source.children() {
        copy_subtree(tree, id, child);
    }
}

fn copy_before(tree: &mut Tree<Node>, sibling: NodeId, source: NodeRef<'_, Node>) {
    let Some(mut sibling_node) = tree.get_mut(sibling) else {
        return;
    };
    let id = sibling_node.insert_before(source.value().clone()).id();
    for child in source.children() {
        copy_subtree(tree, id, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    fn doc(body: &str) -> CatalogDocument {
        let url = Url::parse("https://shop.example/catalog/").unwrap();
        CatalogDocument::parse(url, &format!("<html><body>{body}</body></html>"))
    }

    fn find(doc: &CatalogDocument, css: &str) -> NodeId {
        let selector = Selector::parse(css).unwrap();
        doc.html().root_element().select(&selector).next().unwrap().id()
    }

    fn count(doc: &CatalogDocument, css: &str) -> usize {
        let selector = Selector::parse(css).unwrap();
        doc.html().root_element().select(&selector).count()
    }

    #[test]
    fn append_html_adds_parsed_nodes() {
        let mut doc = doc(r#"<ul id="grid"><li class="cell">a</li></ul>"#);
        let grid = find(&doc, "#grid");
        doc.apply(DomMutation::AppendHtml {
            parent: grid,
            html: r#"<li class="cell">b</li><li class="cell">c</li>"#.into(),
        })
        .unwrap();
        assert_eq!(count(&doc, "li.cell"), 3);
    }

    #[test]
    fn removed_nodes_are_detached_and_unselectable() {
        let mut doc = doc(r#"<ul><li id="a">a</li><li id="b">b</li></ul>"#);
        let a = find(&doc, "#a");
        doc.apply(DomMutation::Remove { node: a }).unwrap();

        assert!(!doc.is_attached(a));
        assert_eq!(count(&doc, "li"), 1);
        assert_eq!(
            doc.apply(DomMutation::Remove { node: a }),
            Err(DomError::Detached(a))
        );
    }

    #[test]
    fn replace_node_keeps_position() {
        let mut doc = doc(r#"<ul><li id="a">a</li><li id="b">b</li><li id="c">c</li></ul>"#);
        let b = find(&doc, "#b");
        doc.apply(DomMutation::ReplaceNode {
            node: b,
            html: r#"<li id="b2">b2</li>"#.into(),
        })
        .unwrap();

        let ids: Vec<&str> = doc
            .html()
            .root_element()
            .select(&Selector::parse("li").unwrap())
            .filter_map(|li| li.value().attr("id"))
            .collect();
        assert_eq!(ids, vec!["a", "b2", "c"]);
    }

    #[test]
    fn replace_children_swaps_content() {
        let mut doc = doc(r#"<div id="host"><span>old</span></div>"#);
        let host = find(&doc, "#host");
        doc.apply(DomMutation::ReplaceChildren {
            parent: host,
            html: "<em>new</em>".into(),
        })
        .unwrap();
        assert_eq!(count(&doc, "#host span"), 0);
        assert_eq!(count(&doc, "#host em"), 1);
    }

    #[test]
    fn unchanged_marks_produce_no_patch() {
        let mut doc = doc(r#"<div id="t"></div>"#);
        let t = find(&doc, "#t");

        assert!(doc.set_mark(t, "data-rz-rating", Some("4.5")));
        assert!(doc.set_hidden(t, true));
        assert_eq!(doc.drain_patches().len(), 1);

        assert!(!doc.set_mark(t, "data-rz-rating", Some("4.5")));
        assert!(!doc.set_hidden(t, true));
        assert!(!doc.set_mark(t, "data-rz-price", None));
        assert!(doc.drain_patches().is_empty());
        assert_eq!(doc.attr(t, "data-rz-rating"), Some("4.5"));
    }

    #[test]
    fn hover_is_wired_once() {
        let mut doc = doc(r#"<div id="t"></div>"#);
        let t = find(&doc, "#t");
        assert!(doc.wire_hover(t));
        assert!(!doc.wire_hover(t));

        let patches = doc.drain_patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].changes, vec![MarkChange::WireHover]);
    }

    #[test]
    fn paths_round_trip() {
        let doc = doc(r#"<ul><li>a</li><li><span id="deep">b</span></li></ul>"#);
        let deep = find(&doc, "#deep");
        let path = doc.path_of(deep).unwrap();
        assert_eq!(doc.node_at_path(&path), Some(deep));
    }

    #[test]
    fn attribute_edits_keep_identity() {
        let mut doc = doc(r#"<div id="t" class="old"></div>"#);
        let t = find(&doc, "#t");
        assert_eq!(find(&doc, ".old"), t);

        doc.apply(DomMutation::SetAttribute {
            node: t,
            name: "class".into(),
            value: "new".into(),
        })
        .unwrap();
        doc.apply(DomMutation::SetAttribute {
            node: t,
            name: "ID".into(),
            value: "u".into(),
        })
        .unwrap();
        assert_eq!(count(&doc, ".old"), 0);
        assert_eq!(find(&doc, ".new"), t);
        assert_eq!(find(&doc, "#u"), t);

        doc.apply(DomMutation::RemoveAttribute {
            node: t,
            name: "class".into(),
        })
        .unwrap();
        assert_eq!(count(&doc, ".new"), 0);
        assert_eq!(doc.attr(t, "id"), Some("u"));
    }

    #[test]
    fn text_edits_keep_identity() {
        let mut doc = doc(r#"<span id="price">1 000</span>"#);
        let price = find(&doc, "#price");
        let text = doc.html().tree.get(price).unwrap().first_child().unwrap().id();

        doc.apply(DomMutation::SetText {
            node: text,
            text: "2 500".into(),
        })
        .unwrap();
        assert_eq!(doc.element(price).unwrap().text().collect::<String>(), "2 500");

        doc.apply(DomMutation::SetText {
            node: price,
            text: "990".into(),
        })
        .unwrap();
        assert_eq!(find(&doc, "#price"), price);
        assert_eq!(doc.element(price).unwrap().text().collect::<String>(), "990");

        let text = doc.html().tree.get(price).unwrap().first_child().unwrap().id();
        assert_eq!(
            doc.apply(DomMutation::SetAttribute {
                node: text,
                name: "class".into(),
                value: "x".into(),
            }),
            Err(DomError::WrongKind(text, "attributes"))
        );
    }

    #[test]
    fn paths_are_taken_at_drain_time() {
        let mut doc = doc(r#"<ul><li id="x"></li><li id="a"></li><li id="b"></li></ul>"#);
        let x = find(&doc, "#x");
        let a = find(&doc, "#a");
        let b = find(&doc, "#b");
        doc.set_hidden(a, true);
        doc.set_hidden(b, true);

        doc.apply(DomMutation::ReplaceNode {
            node: x,
            html: "<li></li><li></li>".into(),
        })
        .unwrap();
        doc.apply(DomMutation::Remove { node: b }).unwrap();

        let patches = doc.drain_patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].node, a);
        assert_eq!(doc.node_at_path(&patches[0].path), Some(a));
    }

    #[test]
    fn removed_subtrees_release_their_payload() {
        let mut doc = doc(r#"<ul><li id="a"><b>a</b></li></ul>"#);
        let a = find(&doc, "#a");
        doc.apply(DomMutation::Remove { node: a }).unwrap();

        assert!(doc.element(a).is_none());
        // li, b and the text node
        assert_eq!(doc.detached_nodes(), 3);
        assert_eq!(
            doc.apply(DomMutation::SetText {
                node: a,
                text: "x".into(),
            }),
            Err(DomError::Detached(a))
        );
    }

    #[test]
    fn pruning_drops_marks_of_removed_nodes() {
        let mut doc = doc(r#"<div id="keep"></div><div id="gone"></div>"#);
        let keep = find(&doc, "#keep");
        let gone = find(&doc, "#gone");
        doc.set_hidden(keep, true);
        doc.set_hidden(gone, true);
        doc.apply(DomMutation::Remove { node: gone }).unwrap();

        assert_eq!(doc.prune_detached(), 1);
        assert!(doc.marks(gone).is_none());
        assert!(doc.is_hidden(keep));
        assert_eq!(doc.drain_patches().len(), 1);
    }
}
