use std::fmt;

use url::Url;

const COLLECTION_PARAM: &str = "list";
const ITEM_PARAM: &str = "v";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CollectionId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ItemId(String);

impl CollectionId {
    /// Accepts the raw key as typed by a user or stored in the database.
    pub(crate) fn new(raw: &str) -> Option<Self> {
        non_empty(raw).map(Self)
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl ItemId {
    pub(crate) fn new(raw: &str) -> Option<Self> {
        non_empty(raw).map(Self)
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| non_empty(&value))
}

pub(crate) fn resolve_collection_id(current_url: &str) -> Option<CollectionId> {
    let url = Url::parse(current_url.trim()).ok()?;
    query_param(&url, COLLECTION_PARAM).map(CollectionId)
}

/// Resolves an anchor href, which the host often renders relative
/// (`/watch?v=...`), against the page URL.
pub(crate) fn resolve_item_id(anchor_href: &str, base_url: &str) -> Option<ItemId> {
    let href = anchor_href.trim();
    if href.is_empty() {
        return None;
    }
    let url = match Url::parse(href) {
        Ok(url) => url,
        Err(_) => Url::parse(base_url.trim()).ok()?.join(href).ok()?,
    };
    query_param(&url, ITEM_PARAM).map(ItemId)
}

pub(crate) fn resolve_playing_item(current_url: &str) -> Option<(CollectionId, ItemId)> {
    let url = Url::parse(current_url.trim()).ok()?;
    let collection = query_param(&url, COLLECTION_PARAM)?;
    let item = query_param(&url, ITEM_PARAM)?;
    Some((CollectionId(collection), ItemId(item)))
}

/// Accepts either a bare collection id or a page URL carrying one.
pub(crate) fn collection_from_user_input(raw: &str) -> Option<CollectionId> {
    let trimmed = raw.trim();
    if trimmed.contains("://") {
        return resolve_collection_id(trimmed);
    }
    CollectionId::new(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WATCH: &str = "https://www.youtube.com/watch?v=abc123&list=PL42&index=3";

    #[test]
    fn resolve_collection_id_reads_list_param() {
        let id = resolve_collection_id(WATCH).expect("collection should resolve");
        assert_eq!(id.as_str(), "PL42");
    }

    #[test]
    fn resolve_collection_id_is_absent_without_list_param() {
        assert!(resolve_collection_id("https://www.youtube.com/watch?v=abc123").is_none());
        assert!(resolve_collection_id("https://www.youtube.com/watch?v=abc&list=").is_none());
    }

    #[test]
    fn resolve_collection_id_tolerates_malformed_urls() {
        assert!(resolve_collection_id("not a url").is_none());
        assert!(resolve_collection_id("").is_none());
        assert!(resolve_collection_id("/watch?list=PL42").is_none());
    }

    #[test]
    fn resolve_item_id_resolves_relative_href_against_base() {
        let id = resolve_item_id("/watch?v=vid-7&list=PL42&index=7", WATCH)
            .expect("relative href should resolve");
        assert_eq!(id.as_str(), "vid-7");
    }

    #[test]
    fn resolve_item_id_accepts_absolute_href() {
        let id = resolve_item_id("https://www.youtube.com/watch?v=xyz", "garbage base")
            .expect("absolute href needs no base");
        assert_eq!(id.as_str(), "xyz");
    }

    #[test]
    fn resolve_item_id_is_absent_for_unusable_input() {
        assert!(resolve_item_id("", WATCH).is_none());
        assert!(resolve_item_id("/channel/UC123", WATCH).is_none());
        assert!(resolve_item_id("/watch?v=", WATCH).is_none());
        assert!(resolve_item_id("/watch?v=abc", "::not a base::").is_none());
    }

    #[test]
    fn resolve_playing_item_needs_both_params() {
        let (collection, item) = resolve_playing_item(WATCH).expect("pair should resolve");
        assert_eq!(collection.as_str(), "PL42");
        assert_eq!(item.as_str(), "abc123");
        assert!(resolve_playing_item("https://www.youtube.com/playlist?list=PL42").is_none());
    }

    #[test]
    fn collection_from_user_input_accepts_url_or_bare_id() {
        assert_eq!(
            collection_from_user_input(WATCH).map(|id| id.to_string()),
            Some("PL42".to_string())
        );
        assert_eq!(
            collection_from_user_input("  PLbare ").map(|id| id.to_string()),
            Some("PLbare".to_string())
        );
        assert!(collection_from_user_input("   ").is_none());
    }
}
