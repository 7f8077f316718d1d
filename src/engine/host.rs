//! Host-side rendering of playlist markup, shaped like the pages the
//! overlay is installed on. Page fixtures and tests build documents here.

use serde::Deserialize;

use super::dom::{Document, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Layout {
    /// Watch page: side panel next to the player.
    #[default]
    Panel,
    /// Playlist page: full-width list, no player.
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct HostItem {
    pub(crate) video_id: String,
    #[serde(default)]
    pub(crate) title: String,
}

impl HostItem {
    pub(crate) fn new(video_id: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            title: format!("Video {video_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HostPage {
    pub(crate) layout: Layout,
    pub(crate) items_container: NodeId,
}

fn element(doc: &mut Document, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
    let node = doc.create_element(tag);
    for (name, value) in attrs {
        doc.set_attr(node, name, value);
    }
    doc.append_child(parent, node);
    node
}

pub(crate) fn render_playlist(
    doc: &mut Document,
    layout: Layout,
    collection: &str,
    items: &[HostItem],
) -> HostPage {
    let body = doc.body();
    let page = match layout {
        Layout::Panel => {
            let player_host = element(doc, body, "div", &[("id", "movie_player")]);
            element(doc, player_host, "video", &[("class", "html5-main-video")]);
            let secondary = element(doc, body, "div", &[("id", "secondary")]);
            let renderer = element(doc, secondary, "ytd-playlist-panel-renderer", &[]);
            let items_container = element(doc, renderer, "div", &[("id", "items")]);
            HostPage {
                layout,
                items_container,
            }
        }
        Layout::List => {
            let renderer = element(doc, body, "ytd-playlist-video-list-renderer", &[]);
            let items_container = element(doc, renderer, "div", &[("id", "contents")]);
            HostPage {
                layout,
                items_container,
            }
        }
    };
    for (index, item) in items.iter().enumerate() {
        render_item(doc, &page, collection, index, item);
    }
    page
}

pub(crate) fn render_item(
    doc: &mut Document,
    page: &HostPage,
    collection: &str,
    index: usize,
    item: &HostItem,
) -> NodeId {
    let href = format!(
        "/watch?v={}&list={collection}&index={}",
        item.video_id,
        index + 1
    );
    match page.layout {
        Layout::Panel => {
            let row = element(doc, page.items_container, "ytd-playlist-panel-video-renderer", &[]);
            let index_label = element(doc, row, "span", &[("id", "index")]);
            doc.set_text(index_label, &(index + 1).to_string());
            let anchor = element(
                doc,
                row,
                "a",
                &[("id", "wc-endpoint"), ("class", "yt-simple-endpoint"), ("href", href.as_str())],
            );
            let title = element(doc, anchor, "span", &[("id", "video-title")]);
            doc.set_text(title, &item.title);
            row
        }
        Layout::List => {
            let row = element(doc, page.items_container, "ytd-playlist-video-renderer", &[]);
            let content = element(doc, row, "div", &[("id", "content")]);
            let anchor = element(
                doc,
                content,
                "a",
                &[("id", "video-title"), ("class", "yt-simple-endpoint"), ("href", href.as_str())],
            );
            doc.set_text(anchor, &item.title);
            element(doc, content, "div", &[("id", "meta")]);
            row
        }
    }
}

/// Host re-render: every row is thrown away and rebuilt, taking any
/// overlay annotations with it.
pub(crate) fn rerender_items(
    doc: &mut Document,
    page: &HostPage,
    collection: &str,
    items: &[HostItem],
) {
    let stale = doc.children(page.items_container).to_vec();
    for node in stale {
        doc.discard(node);
    }
    for (index, item) in items.iter().enumerate() {
        render_item(doc, page, collection, index, item);
    }
}

/// Virtualized recycling: an existing row starts showing another video.
pub(crate) fn recycle_row(doc: &mut Document, row: NodeId, collection: &str, item: &HostItem) {
    let href = format!("/watch?v={}&list={collection}", item.video_id);
    let anchor = doc
        .children(row)
        .iter()
        .copied()
        .find(|&child| doc.tag(child) == "a")
        .or_else(|| {
            doc.children(row)
                .iter()
                .flat_map(|&child| doc.children(child).iter().copied())
                .find(|&child| doc.tag(child) == "a")
        });
    if let Some(anchor) = anchor {
        doc.set_attr(anchor, "href", &href);
    }
}

pub(crate) fn item_rows(doc: &Document, page: &HostPage) -> Vec<NodeId> {
    doc.children(page.items_container).to_vec()
}
