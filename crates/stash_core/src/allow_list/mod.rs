//! Allow-list filtering.
//!
//! Every path that produces visible content goes through a [`ContentFilter`].
//! Filters fail closed: an empty or missing allow-list lets nothing through.
//!
//! - [`AllowList`]: immutable set loaded once from configuration
//! - [`RefreshableAllowList`]: domain-fetched variant with timed refresh and a
//!   remote -> disk -> built-in fallback order

mod refresh;

use std::collections::{BTreeSet, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use compact_str::CompactString;

use crate::types::{Bundle, Cluster, Item};

pub use refresh::{AllowListFetcher, AllowListOrigin, AllowListState, RefreshableAllowList};

/// Membership test and filtering against a set of allowed item identifiers.
pub trait ContentFilter: Send + Sync + Debug {
    fn is_allowed(&self, id: &str) -> bool;

    /// The full allow-list, in a stable order. Drives fallback synthesis.
    fn allowed_identifiers(&self) -> BTreeSet<CompactString>;

    /// The stable-order subsequence of `items` whose identifiers are allowed.
    fn filter_items(&self, items: &[Item]) -> Vec<Item> {
        items
            .iter()
            .filter(|item| self.is_allowed(item.id()))
            .cloned()
            .collect()
    }

    /// Filter a cluster's items, keeping its cursor and identity.
    fn filter_cluster(&self, cluster: Cluster) -> Cluster {
        cluster.retain_items(|item| self.is_allowed(item.id()))
    }

    /// Filter the items of every cluster in a bundle.
    fn filter_bundle(&self, bundle: Bundle) -> Bundle {
        bundle.map_clusters(|cluster| self.filter_cluster(cluster))
    }
}

/// Immutable allow-list, cheap to clone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    ids: Arc<HashSet<CompactString>>,
}

impl AllowList {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        Self {
            ids: Arc::new(ids.into_iter().map(Into::into).collect()),
        }
    }

    /// The fail-closed list: allows nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<S: Into<CompactString>> FromIterator<S> for AllowList {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl ContentFilter for AllowList {
    fn is_allowed(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn allowed_identifiers(&self) -> BTreeSet<CompactString> {
        self.ids.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClusterId, StreamCursor};
    use pretty_assertions::assert_eq;

    fn items(ids: &[&str]) -> Vec<Item> {
        ids.iter().map(|id| Item::new(*id, *id)).collect()
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(Item::id).collect()
    }

    #[test]
    fn test_filter_items_is_stable_subsequence() {
        let list = AllowList::new(["pkg.c", "pkg.a"]);
        let input = items(&["pkg.a", "pkg.b", "pkg.c", "pkg.a"]);

        let filtered = list.filter_items(&input);

        assert_eq!(ids(&filtered), vec!["pkg.a", "pkg.c", "pkg.a"]);
        assert!(filtered.iter().all(|item| list.is_allowed(item.id())));
        // input untouched
        assert_eq!(input.len(), 4);
    }

    #[test]
    fn test_filter_items_is_idempotent() {
        let list = AllowList::new(["x", "z"]);
        let input = items(&["w", "x", "y", "z"]);

        let once = list.filter_items(&input);
        let twice = list.filter_items(&once);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_list_fails_closed() {
        let list = AllowList::empty();
        assert!(list.is_empty());
        assert!(!list.is_allowed("pkg.a"));
        assert!(list.filter_items(&items(&["pkg.a", "pkg.b"])).is_empty());
        assert!(list.allowed_identifiers().is_empty());
    }

    #[test]
    fn test_allowed_identifiers_sorted() {
        let list: AllowList = ["pkg.b", "pkg.a", "pkg.b"].into_iter().collect();
        let all: Vec<CompactString> = list.allowed_identifiers().into_iter().collect();
        assert_eq!(all, vec!["pkg.a", "pkg.b"]);
    }

    #[test]
    fn test_filter_bundle_keeps_cursors() {
        let list = AllowList::new(["keep"]);
        let bundle = Bundle::new("b")
            .with_cursor(StreamCursor::new("bundle-next"))
            .with_cluster(
                Cluster::new(ClusterId::Source(1), "one")
                    .with_cursor(StreamCursor::new("c2"))
                    .with_items(items(&["drop", "keep"])),
            )
            .with_cluster(Cluster::new(ClusterId::Source(2), "two").with_items(items(&["drop"])));

        let filtered = list.filter_bundle(bundle);

        assert_eq!(filtered.cursor().as_str(), "bundle-next");
        let one = filtered.cluster(ClusterId::Source(1)).unwrap();
        assert_eq!(ids(one.items()), vec!["keep"]);
        assert_eq!(one.cursor().as_str(), "c2");
        assert!(filtered.cluster(ClusterId::Source(2)).unwrap().items().is_empty());
    }
}
