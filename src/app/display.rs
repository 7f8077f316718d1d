use crate::config::EngineConfig;
use crate::engine::dom::Document;
use crate::engine::ids::{CollectionId, resolve_collection_id};
use crate::engine::reconcile::Summary;
use crate::engine::store::ProgressStore;

/// What a display client shows for the playlist open in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProgressSnapshot {
    pub(crate) collection: Option<CollectionId>,
    pub(crate) completed: usize,
    /// Unknown when no page is available to count items on.
    pub(crate) total: Option<usize>,
}

impl ProgressSnapshot {
    pub(crate) fn describe(&self) -> String {
        match (&self.collection, self.total) {
            (None, _) => "Open a playlist page to see progress.".to_string(),
            (Some(_), Some(total)) => Summary {
                completed: self.completed,
                total,
            }
            .label(),
            (Some(_), None) => format!("{} videos completed", self.completed),
        }
    }
}

/// Items on the page: the side panel when it has any, otherwise the first
/// other list that does.
pub(crate) fn count_items(doc: &Document, config: &EngineConfig) -> usize {
    config
        .sources
        .iter()
        .map(|source| doc.query_document_all(&source.item).len())
        .find(|&count| count > 0)
        .unwrap_or(0)
}

pub(crate) async fn snapshot(
    store: &ProgressStore,
    location: &str,
    total: Option<usize>,
) -> ProgressSnapshot {
    let Some(collection) = resolve_collection_id(location) else {
        return ProgressSnapshot {
            collection: None,
            completed: 0,
            total: None,
        };
    };
    let completed = store.get(&collection).await.len();
    ProgressSnapshot {
        collection: Some(collection),
        completed,
        total,
    }
}

/// Clears the collection and tells every open page to repaint.
pub(crate) async fn request_reset(store: &ProgressStore, collection: &CollectionId) -> bool {
    let cleared = store.clear(collection).await;
    if cleared {
        store.notifier().reset_requested(collection);
    }
    cleared
}
