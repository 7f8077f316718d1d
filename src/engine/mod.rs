//! Progress synchronization engine: keeps completion overlays on a host
//! playlist in step with the progress store.

pub(crate) mod detector;
pub(crate) mod dom;
pub(crate) mod host;
pub(crate) mod ids;
pub(crate) mod notify;
pub(crate) mod playback;
pub(crate) mod reconcile;
pub(crate) mod store;


use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

use self::detector::ChangeDetector;
use self::dom::{DomSignal, NodeId, PlaybackTick, SharedDocument, lock, wait_for_element};
use self::ids::resolve_playing_item;
use self::notify::{Signal, SignalReceiver};
use self::playback::{AttachRetry, PlaybackTracker};
use self::reconcile::{ReconcileReport, Reconciler, incomplete_control_target};
use self::store::ProgressStore;

#[derive(Debug, thiserror::Error)]
pub(crate) enum EngineError {
    #[error("timed out after {waited:?} waiting for `{selector}`")]
    Timeout { selector: String, waited: Duration },
    #[error("node is no longer attached to the document")]
    Detached,
    #[error("item has no link to resolve")]
    MissingAnchor,
}

type ContainerWait = Pin<Box<dyn Future<Output = Result<NodeId, EngineError>> + Send>>;

pub(crate) struct Engine {
    config: EngineConfig,
    doc: SharedDocument,
    store: Arc<ProgressStore>,
    reconciler: Reconciler,
    detector: ChangeDetector,
    tracker: PlaybackTracker,
    retry: Option<AttachRetry>,
    container_wait: Option<ContainerWait>,
    dom_rx: mpsc::UnboundedReceiver<DomSignal>,
    signals: SignalReceiver,
    reports: Option<mpsc::UnboundedSender<ReconcileReport>>,
}

impl Engine {
    pub(crate) fn new(config: EngineConfig, doc: SharedDocument, store: Arc<ProgressStore>) -> Self {
        let (dom_rx, location) = {
            let mut guard = lock(&doc);
            (guard.observe(), guard.location().to_string())
        };
        Self {
            reconciler: Reconciler::new(store.clone(), doc.clone(), config.clone()),
            detector: ChangeDetector::new(config.debounce, &location),
            tracker: PlaybackTracker::new(config.threshold),
            retry: None,
            container_wait: None,
            dom_rx,
            signals: store.subscribe(),
            reports: None,
            config,
            doc,
            store,
        }
    }

    /// Every reconciliation report is also sent to `sink`.
    pub(crate) fn with_report_sink(mut self, sink: mpsc::UnboundedSender<ReconcileReport>) -> Self {
        self.reports = Some(sink);
        self
    }

    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        self.bootstrap().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                signal = self.dom_rx.recv() => match signal {
                    Some(signal) => self.on_dom_signal(signal).await,
                    None => break,
                },
                _ = self.detector.settled() => {
                    self.reconcile().await;
                    self.try_attach();
                }
                tick = self.tracker.next_tick() => self.on_tick(tick).await,
                attempt = next_retry(&mut self.retry) => self.on_retry(attempt),
                found = next_container(&mut self.container_wait) => {
                    self.container_wait = None;
                    match found {
                        Ok(_) => self.reconcile().await,
                        Err(err) => warn!("playlist overlay unavailable on this page: {err}"),
                    }
                }
                Some(signal) = self.signals.recv() => self.on_cross_context(signal).await,
            }
        }
        debug!("engine stopped");
    }

    async fn bootstrap(&mut self) {
        let doc = self.doc.clone();
        let container = self.config.container.clone();
        let timeout = self.config.element_timeout;
        self.container_wait = Some(Box::pin(async move {
            wait_for_element(&doc, &container, timeout).await
        }));

        self.reconcile().await;
        if !self.try_attach() {
            self.retry = Some(AttachRetry::start(
                self.config.attach_retry_interval,
                self.config.attach_budget,
            ));
        }
    }

    async fn reconcile(&mut self) {
        let collection = self.detector.collection().cloned();
        let report = self.reconciler.reconcile(collection.as_ref()).await;
        if let Some(sink) = &self.reports
            && sink.send(report).is_err()
        {
            self.reports = None;
        }
    }

    fn try_attach(&mut self) -> bool {
        let mut doc = lock(&self.doc);
        self.tracker.try_attach(&mut doc, &self.config.media)
    }

    async fn on_dom_signal(&mut self, signal: DomSignal) {
        match signal {
            DomSignal::Click(node) => self.on_click(node).await,
            other => {
                if let Some(change) = self.detector.on_signal(&other) {
                    info!(
                        previous = ?change.previous,
                        current = ?change.current,
                        "switching overlay to new collection"
                    );
                }
            }
        }
    }

    async fn on_click(&mut self, node: NodeId) {
        let target = {
            let doc = lock(&self.doc);
            incomplete_control_target(&doc, node)
        };
        let (Some(item), Some(collection)) = (target, self.detector.collection().cloned()) else {
            return;
        };
        if self.store.mark_complete(&collection, &item).await {
            self.reconcile().await;
        }
    }

    async fn on_tick(&mut self, tick: PlaybackTick) {
        let location = lock(&self.doc).location().to_string();
        let Some((collection, item)) = self.tracker.on_tick(tick, resolve_playing_item(&location))
        else {
            return;
        };
        info!(%collection, %item, "playback crossed completion threshold");
        if self.store.mark_complete(&collection, &item).await {
            self.reconcile().await;
        }
    }

    fn on_retry(&mut self, attempt: bool) {
        if !attempt {
            debug!("media element not found within attach budget");
            self.retry = None;
            return;
        }
        if self.try_attach() {
            self.retry = None;
        }
    }

    async fn on_cross_context(&mut self, signal: Signal) {
        if signal.concerns(self.detector.collection()) {
            debug!(?signal, "store changed elsewhere; re-reading");
            self.reconcile().await;
        }
    }
}

async fn next_retry(retry: &mut Option<AttachRetry>) -> bool {
    match retry {
        Some(retry) => retry.next_attempt().await,
        None => future::pending().await,
    }
}

async fn next_container(wait: &mut Option<ContainerWait>) -> Result<NodeId, EngineError> {
    match wait {
        Some(wait) => wait.as_mut().await,
        None => future::pending().await,
    }
}
