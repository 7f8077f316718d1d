use std::sync::Arc;

use tracing::debug;

use crate::config::{EngineConfig, ListSource, OverlayStyle};

use super::EngineError;
use super::dom::{Document, NodeId, Selector, SharedDocument, lock};
use super::ids::{CollectionId, ItemId, resolve_item_id};
use super::store::{ProgressRecord, ProgressStore};

pub(crate) const PANEL_ID: &str = "yt-progress-panel";
pub(crate) const INFO_ID: &str = "yt-progress-info";
pub(crate) const BAR_ID: &str = "yt-progress-bar-inner";
pub(crate) const CHECK_CLASS: &str = "yt-playlist-progress-check";
pub(crate) const ROW_CLASS: &str = "yt-playlist-item-row";
pub(crate) const CONTROL_CLASS: &str = "yt-progress-button-container";
pub(crate) const DONE_BUTTON_CLASS: &str = "yt-green-tick-btn";
pub(crate) const TODO_BUTTON_CLASS: &str = "yt-red-cross-btn";

const ANNOTATION_ATTR: &str = "data-yt-progress";
const ITEM_ATTR: &str = "data-item-id";
const STATE_ATTR: &str = "data-state";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Summary {
    pub(crate) completed: usize,
    pub(crate) total: usize,
}

impl Summary {
    pub(crate) fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed as f64 / self.total as f64) * 100.0).round() as u32
    }

    pub(crate) fn label(&self) -> String {
        format!(
            "{} / {} videos completed ({}%)",
            self.completed,
            self.total,
            self.percent()
        )
    }

    pub(crate) fn bar_width(&self) -> String {
        format!("{}%", self.percent())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ReconcileReport {
    pub(crate) summary: Summary,
    pub(crate) patched: usize,
    pub(crate) unchanged: usize,
    pub(crate) skipped: usize,
    pub(crate) failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Annotation {
    Check,
    Control { completed: bool },
}

impl Annotation {
    fn kind(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Control { .. } => "control",
        }
    }

    fn state(self) -> &'static str {
        match self {
            Self::Check | Self::Control { completed: true } => "complete",
            Self::Control { completed: false } => "incomplete",
        }
    }
}

enum ItemOutcome {
    Unchanged { completed: bool },
    Patched { completed: bool },
    Unresolved,
}

/// Sole writer of overlay nodes. Reads the store, never writes it.
pub(crate) struct Reconciler {
    store: Arc<ProgressStore>,
    doc: SharedDocument,
    config: EngineConfig,
}

impl Reconciler {
    pub(crate) fn new(store: Arc<ProgressStore>, doc: SharedDocument, config: EngineConfig) -> Self {
        Self { store, doc, config }
    }

    pub(crate) async fn reconcile(&self, collection: Option<&CollectionId>) -> ReconcileReport {
        // One read per pass: badges and summary must agree.
        let record = match collection {
            Some(collection) => self.store.get(collection).await,
            None => ProgressRecord::default(),
        };

        let mut doc = lock(&self.doc);
        let base = doc.location().to_string();
        let mut report = ReconcileReport::default();

        for source in &self.config.sources {
            for item in doc.query_document_all(&source.item) {
                match self.patch_item(&mut doc, item, source, &record, &base) {
                    Ok(ItemOutcome::Unchanged { completed }) => {
                        report.unchanged += 1;
                        report.summary.total += 1;
                        report.summary.completed += usize::from(completed);
                    }
                    Ok(ItemOutcome::Patched { completed }) => {
                        report.patched += 1;
                        report.summary.total += 1;
                        report.summary.completed += usize::from(completed);
                    }
                    Ok(ItemOutcome::Unresolved) => report.skipped += 1,
                    Err(err) => {
                        debug!(?item, "item skipped: {err}");
                        report.failed += 1;
                    }
                }
            }
        }

        apply_summary(&mut doc, &self.config.container, report.summary);
        debug!(
            collection = ?collection,
            patched = report.patched,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "reconciled"
        );
        report
    }

    fn desired(&self, completed: bool) -> Option<Annotation> {
        match self.config.style {
            OverlayStyle::Checkmark => completed.then_some(Annotation::Check),
            OverlayStyle::Toggle => Some(Annotation::Control { completed }),
        }
    }

    fn patch_item(
        &self,
        doc: &mut Document,
        item: NodeId,
        source: &ListSource,
        record: &ProgressRecord,
        base: &str,
    ) -> Result<ItemOutcome, EngineError> {
        if !doc.is_connected(item) {
            return Err(EngineError::Detached);
        }
        let anchor = self
            .config
            .anchors
            .iter()
            .find_map(|selector| doc.query(item, selector));
        let resolved = anchor
            .and_then(|anchor| doc.attr(anchor, "href"))
            .and_then(|href| resolve_item_id(href, base));
        let Some(item_id) = resolved else {
            // A row that no longer names an item must not keep a badge the summary ignores.
            for stale in annotations(doc, item) {
                doc.discard(stale);
            }
            return match anchor {
                Some(_) => Ok(ItemOutcome::Unresolved),
                None => Err(EngineError::MissingAnchor),
            };
        };

        let completed = record.contains(&item_id);
        let desired = self.desired(completed);
        let existing = annotations(doc, item);
        if annotation_is_current(doc, &existing, desired, &item_id) {
            return Ok(ItemOutcome::Unchanged { completed });
        }

        for stale in existing {
            doc.discard(stale);
        }
        match desired {
            Some(Annotation::Check) => insert_check(doc, item, source, &item_id),
            Some(control @ Annotation::Control { .. }) => insert_control(doc, item, control, &item_id),
            None => {}
        }
        Ok(ItemOutcome::Patched { completed })
    }
}

fn annotations(doc: &Document, item: NodeId) -> Vec<NodeId> {
    let mut found = Vec::new();
    let mut stack = doc.children(item).to_vec();
    while let Some(node) = stack.pop() {
        if doc.attr(node, ANNOTATION_ATTR).is_some() {
            found.push(node);
        } else {
            stack.extend_from_slice(doc.children(node));
        }
    }
    found
}

fn annotation_is_current(
    doc: &Document,
    existing: &[NodeId],
    desired: Option<Annotation>,
    item_id: &ItemId,
) -> bool {
    match (existing, desired) {
        ([], None) => true,
        ([node], Some(annotation)) => {
            doc.attr(*node, ANNOTATION_ATTR) == Some(annotation.kind())
                && doc.attr(*node, STATE_ATTR) == Some(annotation.state())
                && doc.attr(*node, ITEM_ATTR) == Some(item_id.as_str())
        }
        _ => false,
    }
}

fn mark_annotation(doc: &mut Document, node: NodeId, annotation: Annotation, item_id: &ItemId) {
    doc.set_attr(node, ANNOTATION_ATTR, annotation.kind());
    doc.set_attr(node, STATE_ATTR, annotation.state());
    doc.set_attr(node, ITEM_ATTR, item_id.as_str());
}

/// Wraps the item's children once; later passes reuse the wrapper.
fn ensure_row_wrapper(doc: &mut Document, item: NodeId) -> NodeId {
    let selector = Selector::parse(&format!(".{ROW_CLASS}"));
    if let Some(wrapper) = doc.query(item, &selector) {
        return wrapper;
    }
    let wrapper = doc.create_element("div");
    doc.set_attr(wrapper, "class", ROW_CLASS);
    doc.move_children(item, wrapper);
    doc.append_child(item, wrapper);
    wrapper
}

fn insert_check(doc: &mut Document, item: NodeId, source: &ListSource, item_id: &ItemId) {
    let target = if source.wrap_children {
        ensure_row_wrapper(doc, item)
    } else {
        source
            .badge_anchor
            .as_ref()
            .and_then(|selector| doc.query(item, selector))
            .unwrap_or(item)
    };
    let check = doc.create_element("span");
    doc.set_attr(check, "class", CHECK_CLASS);
    doc.set_attr(check, "title", "Completed");
    doc.set_text(check, "✓");
    mark_annotation(doc, check, Annotation::Check, item_id);
    doc.append_child(target, check);
}

fn insert_control(doc: &mut Document, item: NodeId, control: Annotation, item_id: &ItemId) {
    let completed = matches!(control, Annotation::Control { completed: true });
    let container = doc.create_element("div");
    doc.set_attr(container, "class", CONTROL_CLASS);
    mark_annotation(doc, container, control, item_id);

    let button = doc.create_element("button");
    let (class, label) = if completed {
        (DONE_BUTTON_CLASS, "✔")
    } else {
        (TODO_BUTTON_CLASS, "✗")
    };
    doc.set_attr(button, "class", class);
    doc.set_text(button, label);
    doc.append_child(container, button);

    let first = doc.children(item).first().copied();
    doc.insert_before(item, container, first);
}

fn ensure_panel(doc: &mut Document, container: &Selector) -> Option<(NodeId, NodeId)> {
    let info = doc.query_document(&Selector::parse(&format!("#{INFO_ID}")));
    let bar = doc.query_document(&Selector::parse(&format!("#{BAR_ID}")));
    if let (Some(info), Some(bar)) = (info, bar) {
        return Some((info, bar));
    }

    let anchor = doc.query_document(container)?;
    let parent = doc.parent(anchor)?;
    if let Some(stale) = doc.query_document(&Selector::parse(&format!("#{PANEL_ID}"))) {
        doc.discard(stale);
    }

    let panel = doc.create_element("div");
    doc.set_attr(panel, "id", PANEL_ID);
    let title = doc.create_element("div");
    doc.set_attr(title, "class", "yt-progress-title");
    doc.set_text(title, "Playlist Progress");
    let info = doc.create_element("div");
    doc.set_attr(info, "id", INFO_ID);
    let track = doc.create_element("div");
    doc.set_attr(track, "class", "yt-progress-bar-track");
    let bar = doc.create_element("div");
    doc.set_attr(bar, "id", BAR_ID);

    doc.append_child(track, bar);
    doc.append_child(panel, title);
    doc.append_child(panel, info);
    doc.append_child(panel, track);
    doc.insert_before(parent, panel, Some(anchor));
    Some((info, bar))
}

fn apply_summary(doc: &mut Document, container: &Selector, summary: Summary) {
    let Some((info, bar)) = ensure_panel(doc, container) else {
        return;
    };
    let label = summary.label();
    if doc.text(info) != label {
        doc.set_text(info, &label);
    }
    let width = format!("width: {}", summary.bar_width());
    if doc.attr(bar, "style") != Some(width.as_str()) {
        doc.set_attr(bar, "style", &width);
    }
}

/// Item behind a clicked "not done" control, if that is what was clicked.
pub(crate) fn incomplete_control_target(doc: &Document, clicked: NodeId) -> Option<ItemId> {
    let mut cursor = Some(clicked);
    while let Some(node) = cursor {
        if doc.attr(node, ANNOTATION_ATTR) == Some(Annotation::Control { completed: false }.kind()) {
            if doc.attr(node, STATE_ATTR) != Some("incomplete") {
                return None;
            }
            return doc.attr(node, ITEM_ATTR).and_then(ItemId::new);
        }
        cursor = doc.parent(node);
    }
    None
}

/// Text and bar width currently shown in the summary panel.
pub(crate) fn rendered_summary(doc: &Document) -> Option<(String, String)> {
    let info = doc.query_document(&Selector::parse(&format!("#{INFO_ID}")))?;
    let bar = doc.query_document(&Selector::parse(&format!("#{BAR_ID}")))?;
    let width = doc
        .attr(bar, "style")
        .and_then(|style| style.strip_prefix("width: "))
        .unwrap_or_default()
        .to_string();
    Some((doc.text(info).to_string(), width))
}
