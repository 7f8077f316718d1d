use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{EngineConfig, OverlayStyle};
use crate::engine::Engine;
use crate::engine::dom::{Document, Selector, SharedDocument, lock};
use crate::engine::host::{
    HostItem, HostPage, Layout, item_rows, recycle_row, render_playlist, rerender_items,
};
use crate::engine::ids::{resolve_collection_id, resolve_item_id};
use crate::engine::reconcile::{CONTROL_CLASS, rendered_summary};
use crate::engine::store::ProgressStore;

use super::display::{ProgressSnapshot, count_items, request_reset, snapshot};

/// A scripted page: initial markup plus the user and host activity that
/// happens on it.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PageFixture {
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) layout: Layout,
    /// Style the page was captured with; the command line wins over it.
    #[serde(default)]
    pub(crate) style: Option<OverlayStyle>,
    pub(crate) items: Vec<HostItem>,
    #[serde(default)]
    pub(crate) events: Vec<PageEvent>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum PageEvent {
    Wait {
        ms: u64,
    },
    Playback {
        position: f64,
        duration: f64,
    },
    /// Clicks the overlay control on an item.
    Click {
        item: String,
    },
    Navigate {
        url: String,
    },
    /// Host reuses an existing row to show another video.
    Recycle {
        row: usize,
        video_id: String,
    },
    /// Host throws the list away and renders it again.
    Rerender {
        #[serde(default)]
        items: Option<Vec<HostItem>>,
    },
    Reset,
}

impl PageFixture {
    pub(crate) fn parse(raw: &str) -> Result<Self> {
        let fixture: Self = serde_json::from_str(raw).context("invalid page fixture")?;
        if resolve_collection_id(&fixture.url).is_none() {
            bail!("page url has no playlist: {}", fixture.url);
        }
        Ok(fixture)
    }

    pub(crate) fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read page fixture {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("in {}", path.display()))
    }

    /// Builds the host document as first served.
    pub(crate) fn render(&self) -> (Document, HostPage) {
        let mut doc = Document::new(&self.url);
        let collection = resolve_collection_id(&self.url)
            .map(|id| id.as_str().to_string())
            .unwrap_or_default();
        let page = render_playlist(&mut doc, self.layout, &collection, &self.items);
        (doc, page)
    }
}

pub(crate) struct SessionOutcome {
    pub(crate) snapshot: ProgressSnapshot,
    /// Label and bar width of the in-page summary, when one was inserted.
    pub(crate) panel: Option<(String, String)>,
    pub(crate) passes: usize,
    pub(crate) html: String,
}

/// Runs the engine on the fixture page, plays its events, and reports what
/// the page shows afterwards.
pub(crate) async fn run_session(
    fixture: &PageFixture,
    config: EngineConfig,
    store: Arc<ProgressStore>,
) -> Result<SessionOutcome> {
    let (doc, page) = fixture.render();
    let doc = doc.into_shared();
    let settle = config.debounce + Duration::from_millis(100);

    let (report_tx, mut reports) = mpsc::unbounded_channel();
    let engine = Engine::new(config.clone(), doc.clone(), store.clone()).with_report_sink(report_tx);
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(engine.run(shutdown.clone()));
    // A failing event must not leave the engine running.
    let _stop_on_error = shutdown.clone().drop_guard();
    tokio::time::sleep(settle).await;

    for event in &fixture.events {
        debug!(?event, "page event");
        apply_event(&doc, &page, &config, &store, event).await?;
        tokio::time::sleep(settle).await;
    }

    shutdown.cancel();
    task.await.context("engine task failed")?;

    let mut passes = 0;
    while reports.try_recv().is_ok() {
        passes += 1;
    }

    let (location, total, panel, html) = {
        let doc = lock(&doc);
        debug!(mutations = doc.mutation_count(), passes, "session finished");
        (
            doc.location().to_string(),
            count_items(&doc, &config),
            rendered_summary(&doc),
            doc.outer_html(page.items_container),
        )
    };
    Ok(SessionOutcome {
        snapshot: snapshot(&store, &location, Some(total)).await,
        panel,
        passes,
        html,
    })
}

async fn apply_event(
    doc: &SharedDocument,
    page: &HostPage,
    config: &EngineConfig,
    store: &ProgressStore,
    event: &PageEvent,
) -> Result<()> {
    match event {
        PageEvent::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        PageEvent::Playback { position, duration } => {
            let mut doc = lock(doc);
            let Some(player) = doc.query_document(&config.media) else {
                bail!("page has no media element to play");
            };
            doc.dispatch_playback(player, *position, *duration);
        }
        PageEvent::Click { item } => {
            let mut doc = lock(doc);
            let Some(control) = doc
                .query_document_all(&Selector::parse(&format!(".{CONTROL_CLASS}")))
                .into_iter()
                .find(|&node| doc.attr(node, "data-item-id") == Some(item.as_str()))
            else {
                bail!("no overlay control for item {item}; is the toggle style on?");
            };
            let target = doc.children(control).first().copied().unwrap_or(control);
            doc.click(target);
        }
        PageEvent::Navigate { url } => lock(doc).navigate(url),
        PageEvent::Recycle { row, video_id } => {
            let mut doc = lock(doc);
            let Some(&node) = item_rows(&doc, page).get(*row) else {
                bail!("page has no row {row} to recycle");
            };
            let collection = resolve_collection_id(doc.location())
                .map(|id| id.as_str().to_string())
                .unwrap_or_default();
            recycle_row(&mut doc, node, &collection, &HostItem::new(video_id));
        }
        PageEvent::Rerender { items } => {
            let mut doc = lock(doc);
            let collection = resolve_collection_id(doc.location())
                .map(|id| id.as_str().to_string())
                .unwrap_or_default();
            let current;
            let items = match items {
                Some(items) => items.as_slice(),
                None => {
                    current = current_items(&doc, page);
                    current.as_slice()
                }
            };
            rerender_items(&mut doc, page, &collection, items);
        }
        PageEvent::Reset => {
            let location = lock(doc).location().to_string();
            let Some(collection) = resolve_collection_id(&location) else {
                bail!("reset requested on a page without a playlist");
            };
            if !request_reset(store, &collection).await {
                warn!(%collection, "reset did not complete");
            }
        }
    }
    Ok(())
}

/// Items the host currently shows, read back from the row titles and links.
fn current_items(doc: &Document, page: &HostPage) -> Vec<HostItem> {
    let anchor = Selector::parse("a");
    doc.children(page.items_container)
        .iter()
        .filter_map(|&row| doc.query(row, &anchor))
        .filter_map(|anchor| {
            let href = doc.attr(anchor, "href")?;
            let item = resolve_item_id(href, doc.location())?;
            let mut host_item = HostItem::new(item.as_str());
            let title = doc
                .query(anchor, &Selector::parse("#video-title"))
                .map_or_else(|| doc.text(anchor), |title| doc.text(title));
            if !title.is_empty() {
                host_item.title = title.to_string();
            }
            Some(host_item)
        })
        .collect()
}
