use std::future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};
use tracing::{debug, info};

use super::dom::DomSignal;
use super::ids::{CollectionId, resolve_collection_id};

/// Trailing-edge debounce with one owned, resettable deadline.
pub(crate) struct Debouncer {
    window: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl Debouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Restarts the window; a pending deadline is replaced, not stacked.
    pub(crate) fn signal(&mut self) {
        let at = Instant::now() + self.window;
        match self.deadline.as_mut() {
            Some(sleep) => sleep.as_mut().reset(at),
            None => self.deadline = Some(Box::pin(tokio::time::sleep_until(at))),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once the window passes without a new signal.
    pub(crate) async fn fired(&mut self) {
        match self.deadline.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.deadline = None;
            }
            None => future::pending().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContextChange {
    pub(crate) previous: Option<CollectionId>,
    pub(crate) current: Option<CollectionId>,
}

/// Collapses mutation and navigation bursts into one reconciliation and
/// tracks which collection the page currently shows.
pub(crate) struct ChangeDetector {
    debouncer: Debouncer,
    collection: Option<CollectionId>,
    burst: usize,
}

impl ChangeDetector {
    pub(crate) fn new(window: Duration, location: &str) -> Self {
        Self {
            debouncer: Debouncer::new(window),
            collection: resolve_collection_id(location),
            burst: 0,
        }
    }

    pub(crate) fn collection(&self) -> Option<&CollectionId> {
        self.collection.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub(crate) fn on_signal(&mut self, signal: &DomSignal) -> Option<ContextChange> {
        let change = match signal {
            DomSignal::Mutation => None,
            DomSignal::Navigation(url) => self.renavigate(url),
            DomSignal::Click(_) => return None,
        };
        self.burst += 1;
        self.debouncer.signal();
        change
    }

    fn renavigate(&mut self, url: &str) -> Option<ContextChange> {
        let current = resolve_collection_id(url);
        if current == self.collection {
            return None;
        }
        let previous = std::mem::replace(&mut self.collection, current.clone());
        info!(?previous, ?current, "collection changed");
        Some(ContextChange { previous, current })
    }

    /// Resolves at the trailing edge of a burst with the number of signals
    /// it coalesced.
    pub(crate) async fn settled(&mut self) -> usize {
        self.debouncer.fired().await;
        let burst = std::mem::take(&mut self.burst);
        debug!(burst, "change burst settled");
        burst
    }
}
