//! In-memory host document.
//!
//! The engine treats the page as an opaque tree it does not own: it queries
//! nodes with simple selectors, observes structural mutations, navigation,
//! clicks and media playback, and inserts its own nodes beside host content.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use super::EngineError;

/// Arena slot plus generation; an id outlives its node only as a stale,
/// detached handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PlaybackTick {
    pub(crate) position: f64,
    pub(crate) duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DomSignal {
    /// Child list changed somewhere in the tree.
    Mutation,
    /// Location changed without a document reload.
    Navigation(String),
    Click(NodeId),
}

#[derive(Debug, Default)]
struct Node {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Node,
}

pub(crate) type SharedDocument = Arc<Mutex<Document>>;

/// Never hold the guard across an `.await`.
pub(crate) fn lock(doc: &SharedDocument) -> MutexGuard<'_, Document> {
    doc.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Document {
    slots: Vec<Slot>,
    free: Vec<usize>,
    tombstone: Node,
    root: NodeId,
    body: NodeId,
    location: String,
    observers: Vec<mpsc::UnboundedSender<DomSignal>>,
    media_listeners: HashMap<NodeId, Vec<mpsc::UnboundedSender<PlaybackTick>>>,
    mutations: u64,
}

impl Document {
    pub(crate) fn new(location: &str) -> Self {
        let placeholder = NodeId {
            index: 0,
            generation: 0,
        };
        let mut doc = Self {
            slots: Vec::new(),
            free: Vec::new(),
            tombstone: Node::default(),
            root: placeholder,
            body: placeholder,
            location: location.to_string(),
            observers: Vec::new(),
            media_listeners: HashMap::new(),
            mutations: 0,
        };
        doc.root = doc.create_element("html");
        doc.body = doc.create_element("body");
        doc.attach(doc.root, doc.body, None);
        doc
    }

    pub(crate) fn into_shared(self) -> SharedDocument {
        Arc::new(Mutex::new(self))
    }

    pub(crate) fn body(&self) -> NodeId {
        self.body
    }

    pub(crate) fn location(&self) -> &str {
        &self.location
    }

    /// History-API style navigation: the tree stays, the location changes.
    pub(crate) fn navigate(&mut self, url: &str) {
        self.location = url.to_string();
        self.notify(DomSignal::Navigation(url.to_string()));
    }

    fn node(&self, id: NodeId) -> &Node {
        match self.slots.get(id.index) {
            Some(slot) if slot.generation == id.generation => &slot.node,
            _ => &self.tombstone,
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .map(|slot| &mut slot.node)
    }

    fn is_live(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index)
            .is_some_and(|slot| slot.generation == id.generation)
    }

    /// Reuses a discarded slot when one is free.
    pub(crate) fn create_element(&mut self, tag: &str) -> NodeId {
        let node = Node {
            tag: tag.to_ascii_lowercase(),
            ..Node::default()
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = node;
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node,
                });
                NodeId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn live_nodes(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn tag(&self, node: NodeId) -> &str {
        &self.node(node).tag
    }

    pub(crate) fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.node(node).attrs.get(name).map(String::as_str)
    }

    pub(crate) fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(data) = self.node_mut(node) {
            data.attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub(crate) fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.attr(node, "class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    pub(crate) fn text(&self, node: NodeId) -> &str {
        &self.node(node).text
    }

    pub(crate) fn set_text(&mut self, node: NodeId, text: &str) {
        if let Some(data) = self.node_mut(node) {
            data.text = text.to_string();
        }
    }

    pub(crate) fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).parent
    }

    pub(crate) fn children(&self, node: NodeId) -> &[NodeId] {
        &self.node(node).children
    }

    pub(crate) fn is_connected(&self, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == self.root {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub(crate) fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.attach(parent, child, None);
        self.structural_change();
    }

    /// Inserts before `reference`, or appends when it is `None` or not a
    /// child of `parent`.
    pub(crate) fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        self.attach(parent, child, reference);
        self.structural_change();
    }

    /// Detaches `node`; it stays allocated and can be inserted again.
    pub(crate) fn remove(&mut self, node: NodeId) {
        if self.detach(node) {
            self.structural_change();
        }
    }

    /// Removes `node` for good and frees its whole subtree for reuse.
    pub(crate) fn discard(&mut self, node: NodeId) {
        if node == self.root || node == self.body {
            return;
        }
        self.remove(node);
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let Some(slot) = self
                .slots
                .get_mut(current.index)
                .filter(|slot| slot.generation == current.generation)
            else {
                continue;
            };
            let freed = std::mem::take(&mut slot.node);
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(current.index);
            self.media_listeners.remove(&current);
            stack.extend(freed.children);
        }
    }

    /// Moves every child of `from` to the end of `to`, keeping their order.
    pub(crate) fn move_children(&mut self, from: NodeId, to: NodeId) {
        if !self.is_live(to) {
            return;
        }
        let Some(moved) = self
            .node_mut(from)
            .map(|data| std::mem::take(&mut data.children))
        else {
            return;
        };
        if moved.is_empty() {
            return;
        }
        for &child in &moved {
            if let Some(data) = self.node_mut(child) {
                data.parent = Some(to);
            }
        }
        if let Some(data) = self.node_mut(to) {
            data.children.extend(moved);
        }
        self.structural_change();
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        if !self.is_live(parent) || !self.is_live(child) {
            return;
        }
        self.detach(child);
        if let Some(data) = self.node_mut(parent) {
            let index = reference
                .and_then(|r| data.children.iter().position(|&c| c == r))
                .unwrap_or(data.children.len());
            data.children.insert(index, child);
        }
        if let Some(data) = self.node_mut(child) {
            data.parent = Some(parent);
        }
    }

    fn detach(&mut self, node: NodeId) -> bool {
        let Some(parent) = self.node_mut(node).and_then(|data| data.parent.take()) else {
            return false;
        };
        if let Some(data) = self.node_mut(parent) {
            data.children.retain(|&c| c != node);
        }
        true
    }

    fn structural_change(&mut self) {
        self.mutations += 1;
        self.notify(DomSignal::Mutation);
    }

    fn notify(&mut self, signal: DomSignal) {
        self.observers.retain(|tx| tx.send(signal.clone()).is_ok());
    }

    /// Subtree-wide observation of structure, navigation and clicks.
    pub(crate) fn observe(&mut self) -> mpsc::UnboundedReceiver<DomSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    pub(crate) fn mutation_count(&self) -> u64 {
        self.mutations
    }

    pub(crate) fn click(&mut self, node: NodeId) {
        self.notify(DomSignal::Click(node));
    }

    pub(crate) fn add_media_listener(&mut self, node: NodeId) -> mpsc::UnboundedReceiver<PlaybackTick> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.media_listeners.entry(node).or_default().push(tx);
        rx
    }

    /// Host-side playback progress on a media element.
    pub(crate) fn dispatch_playback(&mut self, node: NodeId, position: f64, duration: f64) {
        let tick = PlaybackTick { position, duration };
        if let Some(listeners) = self.media_listeners.get_mut(&node) {
            listeners.retain(|tx| tx.send(tick).is_ok());
        }
    }

    pub(crate) fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        let mut parts = selector.parts.iter().rev();
        let Some(last) = parts.next() else {
            return false;
        };
        if !self.matches_compound(node, last) {
            return false;
        }
        let mut cursor = self.parent(node);
        for part in parts {
            loop {
                let Some(ancestor) = cursor else {
                    return false;
                };
                cursor = self.parent(ancestor);
                if self.matches_compound(ancestor, part) {
                    break;
                }
            }
        }
        true
    }

    fn matches_compound(&self, node: NodeId, compound: &Compound) -> bool {
        if compound
            .tag
            .as_deref()
            .is_some_and(|tag| tag != "*" && tag != self.tag(node))
        {
            return false;
        }
        if compound
            .id
            .as_deref()
            .is_some_and(|id| self.attr(node, "id") != Some(id))
        {
            return false;
        }
        compound.classes.iter().all(|class| self.has_class(node, class))
    }

    /// Descendants of `scope` matching `selector`, in document order.
    pub(crate) fn query_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = self.children(scope).iter().rev().copied().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            if self.matches(node, selector) {
                found.push(node);
            }
            stack.extend(self.children(node).iter().rev().copied());
        }
        found
    }

    pub(crate) fn query(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        let mut stack = self.children(scope).iter().rev().copied().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            if self.matches(node, selector) {
                return Some(node);
            }
            stack.extend(self.children(node).iter().rev().copied());
        }
        None
    }

    pub(crate) fn query_document(&self, selector: &Selector) -> Option<NodeId> {
        self.query(self.root, selector)
    }

    pub(crate) fn query_document_all(&self, selector: &Selector) -> Vec<NodeId> {
        self.query_all(self.root, selector)
    }

    pub(crate) fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        let data = self.node(node);
        out.push('<');
        out.push_str(&data.tag);
        for (name, value) in &data.attrs {
            out.push_str(&format!(" {name}=\"{}\"", escape_html(value)));
        }
        out.push('>');
        out.push_str(&escape_html(&data.text));
        for &child in &data.children {
            self.write_html(child, out);
        }
        out.push_str("</");
        out.push_str(&data.tag);
        out.push('>');
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

/// Descendant-combinator selectors over `tag`, `#id` and `.class`
/// compounds, e.g. `ytd-playlist-panel-renderer #items`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Selector {
    source: String,
    parts: Vec<Compound>,
}

impl Selector {
    pub(crate) fn parse(raw: &str) -> Self {
        let parts = raw.split_whitespace().map(parse_compound).collect();
        Self {
            source: raw.trim().to_string(),
            parts,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_compound(raw: &str) -> Compound {
    let mut compound = Compound::default();
    let tag_end = raw.find(['#', '.']).unwrap_or(raw.len());
    if tag_end > 0 {
        compound.tag = Some(raw[..tag_end].to_ascii_lowercase());
    }
    let mut rest = &raw[tag_end..];
    while let Some(marker) = rest.chars().next() {
        let body = &rest[1..];
        let end = body.find(['#', '.']).unwrap_or(body.len());
        let name = &body[..end];
        if !name.is_empty() {
            match marker {
                '#' => compound.id = Some(name.to_string()),
                _ => compound.classes.push(name.to_string()),
            }
        }
        rest = &body[end..];
    }
    compound
}

pub(crate) async fn wait_for_element(
    doc: &SharedDocument,
    selector: &Selector,
    timeout: Duration,
) -> Result<NodeId, EngineError> {
    let mut rx = {
        let mut guard = lock(doc);
        if let Some(found) = guard.query_document(selector) {
            return Ok(found);
        }
        guard.observe()
    };

    let search = async {
        while let Some(signal) = rx.recv().await {
            if !matches!(signal, DomSignal::Mutation) {
                continue;
            }
            let found = lock(doc).query_document(selector);
            if found.is_some() {
                return found;
            }
        }
        None
    };

    match tokio::time::timeout(timeout, search).await {
        Ok(Some(found)) => Ok(found),
        Ok(None) | Err(_) => Err(EngineError::Timeout {
            selector: selector.to_string(),
            waited: timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn element(doc: &mut Document, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let node = doc.create_element(tag);
        for (name, value) in attrs {
            doc.set_attr(node, name, value);
        }
        doc.append_child(parent, node);
        node
    }

    #[test]
    fn selector_parses_compounds_and_descendants() {
        let selector = Selector::parse("ytd-playlist-panel-renderer #items a.yt-simple-endpoint.big");
        assert_eq!(selector.parts.len(), 3);
        assert_eq!(selector.parts[1].id.as_deref(), Some("items"));
        assert_eq!(selector.parts[2].tag.as_deref(), Some("a"));
        assert_eq!(selector.parts[2].classes, vec!["yt-simple-endpoint", "big"]);
        assert_eq!(selector.to_string(), "ytd-playlist-panel-renderer #items a.yt-simple-endpoint.big");
    }

    #[test]
    fn query_all_respects_descendant_context_and_order() {
        let mut doc = Document::new("https://example.test/");
        let body = doc.body();
        let panel = element(&mut doc, body, "ytd-playlist-panel-renderer", &[]);
        let items = element(&mut doc, panel, "div", &[("id", "items")]);
        let first = element(&mut doc, items, "a", &[("class", "yt-simple-endpoint x")]);
        let second = element(&mut doc, items, "a", &[("class", "yt-simple-endpoint")]);
        let _outside = element(&mut doc, body, "a", &[("class", "yt-simple-endpoint")]);

        let selector = Selector::parse("ytd-playlist-panel-renderer #items a.yt-simple-endpoint");
        assert_eq!(doc.query_document_all(&selector), vec![first, second]);
        assert_eq!(doc.query(items, &Selector::parse("a.x")), Some(first));
    }

    #[test]
    fn structural_changes_notify_observers_but_attributes_do_not() {
        let mut doc = Document::new("https://example.test/");
        let mut rx = doc.observe();
        let body = doc.body();
        let node = doc.create_element("div");

        doc.set_attr(node, "class", "a");
        doc.append_child(body, node);
        doc.set_text(node, "hello");
        doc.remove(node);
        doc.remove(node);

        assert_eq!(rx.try_recv().ok(), Some(DomSignal::Mutation));
        assert_eq!(rx.try_recv().ok(), Some(DomSignal::Mutation));
        assert!(rx.try_recv().is_err());
        assert_eq!(doc.mutation_count(), 2);
        assert!(!doc.is_connected(node));
    }

    #[test]
    fn move_children_preserves_order() {
        let mut doc = Document::new("https://example.test/");
        let body = doc.body();
        let host = element(&mut doc, body, "li", &[]);
        let a = element(&mut doc, host, "img", &[]);
        let b = element(&mut doc, host, "span", &[]);
        let wrapper = doc.create_element("div");

        doc.move_children(host, wrapper);
        doc.append_child(host, wrapper);

        assert_eq!(doc.children(host), &[wrapper]);
        assert_eq!(doc.children(wrapper), &[a, b]);
        assert_eq!(doc.parent(a), Some(wrapper));
    }

    #[test]
    fn discarded_subtree_frees_slots_and_leaves_stale_ids_detached() {
        let mut doc = Document::new("https://example.test/");
        let body = doc.body();
        let badge = element(&mut doc, body, "span", &[("class", "badge")]);
        let inner = element(&mut doc, badge, "b", &[]);
        let before = doc.live_nodes();

        doc.discard(badge);
        assert_eq!(doc.live_nodes(), before - 2);
        assert!(!doc.is_connected(badge));
        assert_eq!(doc.attr(badge, "class"), None);
        assert!(doc.children(body).is_empty());

        let reused = doc.create_element("i");
        assert!(reused != badge && reused != inner);
        assert_eq!(doc.live_nodes(), before - 1);
        doc.set_attr(inner, "class", "ghost");
        assert_eq!(doc.attr(reused, "class"), None);

        doc.discard(body);
        assert!(doc.is_connected(body));
    }

    #[test]
    fn insert_before_places_node_first() {
        let mut doc = Document::new("https://example.test/");
        let body = doc.body();
        let existing = element(&mut doc, body, "p", &[]);
        let inserted = doc.create_element("div");
        doc.insert_before(body, inserted, Some(existing));
        assert_eq!(doc.children(body), &[inserted, existing]);
    }

    #[test]
    fn outer_html_escapes_and_sorts_attributes() {
        let mut doc = Document::new("https://example.test/");
        let body = doc.body();
        let node = element(&mut doc, body, "span", &[("title", "a\"b"), ("class", "c")]);
        doc.set_text(node, "<ok>");
        assert_eq!(
            doc.outer_html(node),
            "<span class=\"c\" title=\"a&quot;b\">&lt;ok&gt;</span>"
        );
    }

    #[test]
    fn media_listeners_receive_ticks() {
        let mut doc = Document::new("https://example.test/");
        let body = doc.body();
        let video = element(&mut doc, body, "video", &[]);
        let mut rx = doc.add_media_listener(video);
        doc.dispatch_playback(video, 5.0, 10.0);
        assert_eq!(
            rx.try_recv().ok(),
            Some(PlaybackTick {
                position: 5.0,
                duration: 10.0
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_element_resolves_when_node_appears() {
        let doc = Document::new("https://example.test/").into_shared();
        let inserter = {
            let doc = doc.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                let mut guard = lock(&doc);
                let body = guard.body();
                let node = guard.create_element("ytd-playlist-panel-renderer");
                guard.append_child(body, node);
                node
            }
        };
        let selector = Selector::parse("ytd-playlist-panel-renderer");
        let (found, inserted) = tokio::join!(
            wait_for_element(&doc, &selector, Duration::from_secs(10)),
            inserter
        );
        assert_eq!(found.expect("element should appear"), inserted);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_element_times_out() {
        let doc = Document::new("https://example.test/").into_shared();
        let selector = Selector::parse("video");
        let err = wait_for_element(&doc, &selector, Duration::from_secs(10))
            .await
            .expect_err("nothing is inserted");
        assert!(matches!(err, EngineError::Timeout { .. }));
        assert!(err.to_string().contains("video"));
    }
}
