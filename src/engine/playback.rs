use std::future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::dom::{Document, NodeId, PlaybackTick, Selector};
use super::ids::{CollectionId, ItemId};

pub(crate) const ATTACHED_MARKER: &str = "data-yt-progress-attached";

pub(crate) type TrackedPair = (CollectionId, ItemId);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrackerState {
    Unattached,
    Attached,
    Monitoring(TrackedPair),
    CompletionSignaled(TrackedPair),
}

/// Watches one media element and signals completion once per
/// (collection, item) pair.
pub(crate) struct PlaybackTracker {
    threshold: f64,
    state: TrackerState,
    element: Option<NodeId>,
    ticks: Option<mpsc::UnboundedReceiver<PlaybackTick>>,
}

impl PlaybackTracker {
    pub(crate) fn new(threshold: f64) -> Self {
        Self {
            threshold,
            state: TrackerState::Unattached,
            element: None,
            ticks: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &TrackerState {
        &self.state
    }

    pub(crate) fn is_attached(&self, doc: &Document) -> bool {
        self.element.is_some_and(|node| doc.is_connected(node)) && self.ticks.is_some()
    }

    /// Attaches to the first media element not yet carrying the marker.
    /// Returns `true` when a new listener was registered.
    pub(crate) fn try_attach(&mut self, doc: &mut Document, media: &Selector) -> bool {
        if self.is_attached(doc) {
            return false;
        }
        let Some(node) = doc.query_document(media) else {
            return false;
        };
        if doc.attr(node, ATTACHED_MARKER).is_some() {
            return false;
        }
        doc.set_attr(node, ATTACHED_MARKER, "1");
        self.ticks = Some(doc.add_media_listener(node));
        self.element = Some(node);
        // Signaling is per pair, so a swapped player keeps the pair state.
        if self.state == TrackerState::Unattached {
            self.state = TrackerState::Attached;
        }
        info!(?node, "attached to media element");
        true
    }

    /// Next playback tick from the attached element; pending while detached.
    pub(crate) async fn next_tick(&mut self) -> PlaybackTick {
        if let Some(rx) = self.ticks.as_mut() {
            if let Some(tick) = rx.recv().await {
                return tick;
            }
            self.ticks = None;
        }
        future::pending().await
    }

    /// Feeds one playback position update. Returns the pair to mark
    /// complete when the threshold is crossed for the first time.
    pub(crate) fn on_tick(
        &mut self,
        tick: PlaybackTick,
        playing: Option<TrackedPair>,
    ) -> Option<TrackedPair> {
        if self.state == TrackerState::Unattached {
            return None;
        }
        if !tick.duration.is_finite() || tick.duration <= 0.0 || !tick.position.is_finite() {
            return None;
        }
        let pair = playing?;

        match &self.state {
            TrackerState::Monitoring(current) | TrackerState::CompletionSignaled(current)
                if *current == pair => {}
            _ => {
                debug!(collection = %pair.0, item = %pair.1, "monitoring playback");
                self.state = TrackerState::Monitoring(pair.clone());
            }
        }

        if matches!(self.state, TrackerState::CompletionSignaled(_)) {
            return None;
        }
        if tick.position / tick.duration >= self.threshold {
            self.state = TrackerState::CompletionSignaled(pair.clone());
            return Some(pair);
        }
        None
    }
}

/// Bounded attach schedule: one attempt per `every` until `budget` has
/// elapsed since start.
pub(crate) struct AttachRetry {
    interval: Interval,
    next: Instant,
    deadline: Instant,
}

impl AttachRetry {
    pub(crate) fn start(every: Duration, budget: Duration) -> Self {
        let start = Instant::now();
        let mut interval = tokio::time::interval_at(start + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            next: start + every,
            deadline: start + budget,
        }
    }

    /// `true` for every attempt inside the budget. Resolves `false` without
    /// waiting once the next attempt would land past the deadline.
    pub(crate) async fn next_attempt(&mut self) -> bool {
        if self.next > self.deadline {
            return false;
        }
        let scheduled = self.interval.tick().await;
        self.next = scheduled + self.interval.period();
        true
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn pair(collection: &str, item: &str) -> TrackedPair {
        (
            CollectionId::new(collection).expect("collection"),
            ItemId::new(item).expect("item"),
        )
    }

    fn tick(position: f64, duration: f64) -> PlaybackTick {
        PlaybackTick { position, duration }
    }

    fn attached_tracker() -> PlaybackTracker {
        let mut tracker = PlaybackTracker::new(0.9);
        tracker.state = TrackerState::Attached;
        tracker
    }

    #[test]
    fn unattached_tracker_ignores_ticks() {
        let mut tracker = PlaybackTracker::new(0.9);
        assert_eq!(tracker.on_tick(tick(99.0, 100.0), Some(pair("PL", "a"))), None);
        assert_eq!(tracker.state(), &TrackerState::Unattached);
    }

    #[test]
    fn unknown_duration_is_ignored() {
        let mut tracker = attached_tracker();
        assert_eq!(tracker.on_tick(tick(5.0, 0.0), Some(pair("PL", "a"))), None);
        assert_eq!(tracker.on_tick(tick(5.0, f64::NAN), Some(pair("PL", "a"))), None);
        assert_eq!(tracker.state(), &TrackerState::Attached);
    }

    #[test]
    fn threshold_crossing_signals_exactly_once_per_pair() {
        let mut tracker = attached_tracker();
        let playing = pair("PL", "a");

        assert_eq!(tracker.on_tick(tick(10.0, 100.0), Some(playing.clone())), None);
        assert_eq!(tracker.state(), &TrackerState::Monitoring(playing.clone()));
        assert_eq!(
            tracker.on_tick(tick(90.0, 100.0), Some(playing.clone())),
            Some(playing.clone())
        );
        for position in [91.0, 99.0, 100.0] {
            assert_eq!(tracker.on_tick(tick(position, 100.0), Some(playing.clone())), None);
        }
        assert_eq!(tracker.state(), &TrackerState::CompletionSignaled(playing));
    }

    #[test]
    fn pair_change_resets_to_monitoring() {
        let mut tracker = attached_tracker();
        tracker.on_tick(tick(95.0, 100.0), Some(pair("PL", "a")));

        assert_eq!(tracker.on_tick(tick(1.0, 100.0), Some(pair("PL", "b"))), None);
        assert_eq!(tracker.state(), &TrackerState::Monitoring(pair("PL", "b")));
        assert_eq!(
            tracker.on_tick(tick(95.0, 100.0), Some(pair("PL", "b"))),
            Some(pair("PL", "b"))
        );
    }

    #[test]
    fn unresolvable_pair_is_ignored() {
        let mut tracker = attached_tracker();
        assert_eq!(tracker.on_tick(tick(95.0, 100.0), None), None);
        assert_eq!(tracker.state(), &TrackerState::Attached);
    }

    #[test]
    fn try_attach_marks_element_and_never_attaches_twice() {
        let mut doc = Document::new("https://www.youtube.com/watch?v=a&list=PL");
        let body = doc.body();
        let video = doc.create_element("video");
        doc.append_child(body, video);
        let media = Selector::parse("video");

        let mut tracker = PlaybackTracker::new(0.9);
        assert!(tracker.try_attach(&mut doc, &media));
        assert_eq!(doc.attr(video, ATTACHED_MARKER), Some("1"));
        assert!(!tracker.try_attach(&mut doc, &media));

        let mut other = PlaybackTracker::new(0.9);
        assert!(!other.try_attach(&mut doc, &media));
        assert_eq!(other.state(), &TrackerState::Unattached);
    }

    #[test]
    fn try_attach_follows_swapped_player() {
        let mut doc = Document::new("https://www.youtube.com/watch?v=a&list=PL");
        let body = doc.body();
        let first = doc.create_element("video");
        doc.append_child(body, first);
        let media = Selector::parse("video");
        let mut tracker = PlaybackTracker::new(0.9);
        tracker.try_attach(&mut doc, &media);
        tracker.on_tick(tick(95.0, 100.0), Some(pair("PL", "a")));

        doc.remove(first);
        let second = doc.create_element("video");
        doc.append_child(body, second);

        assert!(tracker.try_attach(&mut doc, &media));
        assert_eq!(tracker.state(), &TrackerState::CompletionSignaled(pair("PL", "a")));
        assert_eq!(tracker.on_tick(tick(99.0, 100.0), Some(pair("PL", "a"))), None);
    }

    #[tokio::test(start_paused = true)]
    async fn attach_retry_stops_after_budget() {
        let started = Instant::now();
        let mut retry = AttachRetry::start(Duration::from_secs(1), Duration::from_secs(10));
        let mut attempts = 0;
        while retry.next_attempt().await {
            attempts += 1;
        }
        assert_eq!(attempts, 10);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn attach_retry_with_budget_below_period_never_fires() {
        let started = Instant::now();
        let mut retry = AttachRetry::start(Duration::from_secs(1), Duration::from_millis(500));
        assert!(!retry.next_attempt().await);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
