use std::env;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;

use crate::engine::dom::Selector;

pub(crate) const DEBOUNCE_ENV: &str = "PLPROG_DEBOUNCE_MS";
pub(crate) const THRESHOLD_ENV: &str = "PLPROG_THRESHOLD";
pub(crate) const STYLE_ENV: &str = "PLPROG_STYLE";

/// How completion is drawn on list items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum OverlayStyle {
    /// Badge on completed items only.
    #[default]
    Checkmark,
    /// Clickable done/not-done button on every item.
    Toggle,
}

/// One kind of list the host renders.
#[derive(Debug, Clone)]
pub(crate) struct ListSource {
    pub(crate) item: Selector,
    /// Where a checkmark goes when the item's children are not wrapped.
    pub(crate) badge_anchor: Option<Selector>,
    pub(crate) wrap_children: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EngineConfig {
    pub(crate) debounce: Duration,
    pub(crate) threshold: f64,
    pub(crate) attach_retry_interval: Duration,
    pub(crate) attach_budget: Duration,
    pub(crate) element_timeout: Duration,
    pub(crate) style: OverlayStyle,
    pub(crate) container: Selector,
    pub(crate) media: Selector,
    pub(crate) anchors: Vec<Selector>,
    pub(crate) sources: Vec<ListSource>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(400),
            threshold: 0.9,
            attach_retry_interval: Duration::from_millis(1000),
            attach_budget: Duration::from_secs(10),
            element_timeout: Duration::from_secs(10),
            style: OverlayStyle::Checkmark,
            container: Selector::parse("ytd-playlist-panel-renderer"),
            media: Selector::parse("video"),
            anchors: vec![
                Selector::parse("a#video-title"),
                Selector::parse("a.yt-simple-endpoint"),
                Selector::parse("a"),
            ],
            sources: vec![
                ListSource {
                    item: Selector::parse("ytd-playlist-panel-video-renderer"),
                    badge_anchor: None,
                    wrap_children: true,
                },
                ListSource {
                    item: Selector::parse("ytd-playlist-video-renderer"),
                    badge_anchor: Some(Selector::parse("#meta")),
                    wrap_children: false,
                },
            ],
        }
    }
}

impl EngineConfig {
    pub(crate) fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Invalid values keep the current setting.
    pub(crate) fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(debounce) = parse_debounce_ms(lookup(DEBOUNCE_ENV)) {
            self.debounce = debounce;
        }
        if let Some(threshold) = parse_threshold(lookup(THRESHOLD_ENV)) {
            self.threshold = threshold;
        }
        if let Some(style) = parse_style(lookup(STYLE_ENV)) {
            self.style = style;
        }
        self
    }
}

pub(crate) fn parse_debounce_ms(raw: Option<String>) -> Option<Duration> {
    let millis = raw?.trim().parse::<u64>().ok()?;
    (millis > 0).then(|| Duration::from_millis(millis))
}

pub(crate) fn parse_threshold(raw: Option<String>) -> Option<f64> {
    let value = raw?.trim().parse::<f64>().ok()?;
    (value > 0.0 && value <= 1.0).then_some(value)
}

pub(crate) fn parse_style(raw: Option<String>) -> Option<OverlayStyle> {
    OverlayStyle::from_str(raw?.trim(), true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_host_behaviour() {
        let config = EngineConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(400));
        assert_eq!(config.threshold, 0.9);
        assert_eq!(config.attach_budget, Duration::from_secs(10));
        assert_eq!(config.style, OverlayStyle::Checkmark);
        assert_eq!(config.sources.len(), 2);
    }

    #[test]
    fn overrides_apply_valid_values_only() {
        let config = EngineConfig::default().with_overrides(|key| match key {
            DEBOUNCE_ENV => Some("250".to_string()),
            THRESHOLD_ENV => Some("1.5".to_string()),
            STYLE_ENV => Some("Toggle".to_string()),
            _ => None,
        });
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.threshold, 0.9);
        assert_eq!(config.style, OverlayStyle::Toggle);
    }

    #[test]
    fn parse_helpers_reject_garbage() {
        assert_eq!(parse_debounce_ms(Some("0".to_string())), None);
        assert_eq!(parse_debounce_ms(Some("abc".to_string())), None);
        assert_eq!(parse_debounce_ms(None), None);
        assert_eq!(parse_threshold(Some("0.75".to_string())), Some(0.75));
        assert_eq!(parse_threshold(Some("-1".to_string())), None);
        assert_eq!(parse_style(Some("sparkles".to_string())), None);
    }
}
