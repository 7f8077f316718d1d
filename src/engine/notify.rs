use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use super::ids::CollectionId;

const CHANNEL_CAPACITY: usize = 64;

/// Signals carry only the collection key. Receivers re-read the store
/// instead of trusting any payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Signal {
    StoreChanged(CollectionId),
    ResetRequested(CollectionId),
    /// Produced locally when a receiver fell behind and missed signals.
    Resync,
}

impl Signal {
    /// Whether a context showing `active` must re-read the store.
    pub(crate) fn concerns(&self, active: Option<&CollectionId>) -> bool {
        match self {
            Self::StoreChanged(id) | Self::ResetRequested(id) => Some(id) == active,
            Self::Resync => true,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    tx: broadcast::Sender<Signal>,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn publish(&self, signal: Signal) {
        // No live receivers is fine: nobody needs to re-render.
        if self.tx.send(signal).is_err() {
            debug!("signal dropped: no subscribers");
        }
    }

    pub(crate) fn store_changed(&self, collection: &CollectionId) {
        self.publish(Signal::StoreChanged(collection.clone()));
    }

    pub(crate) fn reset_requested(&self, collection: &CollectionId) {
        self.publish(Signal::ResetRequested(collection.clone()));
    }

    pub(crate) fn subscribe(&self) -> SignalReceiver {
        SignalReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct SignalReceiver {
    rx: broadcast::Receiver<Signal>,
}

impl SignalReceiver {
    /// Returns `None` once every sender is gone.
    pub(crate) async fn recv(&mut self) -> Option<Signal> {
        match self.rx.recv().await {
            Ok(signal) => Some(signal),
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "signal receiver lagged; forcing resync");
                Some(Signal::Resync)
            }
            Err(RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> CollectionId {
        CollectionId::new(raw).expect("valid id")
    }

    #[tokio::test]
    async fn every_subscriber_sees_each_signal() {
        let notifier = Notifier::new();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.store_changed(&id("PL1"));
        notifier.reset_requested(&id("PL1"));

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.recv().await, Some(Signal::StoreChanged(id("PL1"))));
            assert_eq!(rx.recv().await, Some(Signal::ResetRequested(id("PL1"))));
        }
    }

    #[tokio::test]
    async fn lagging_receiver_gets_resync() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        for _ in 0..(CHANNEL_CAPACITY + 5) {
            notifier.store_changed(&id("PL1"));
        }
        assert_eq!(rx.recv().await, Some(Signal::Resync));
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        Notifier::new().store_changed(&id("PL1"));
    }

    #[test]
    fn concerns_matches_active_collection_only() {
        let active = id("PL1");
        assert!(Signal::StoreChanged(id("PL1")).concerns(Some(&active)));
        assert!(!Signal::ResetRequested(id("PL2")).concerns(Some(&active)));
        assert!(!Signal::StoreChanged(id("PL1")).concerns(None));
        assert!(Signal::Resync.concerns(None));
    }
}
