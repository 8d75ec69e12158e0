//! Value types held by the stash: categories, items, clusters and bundles.
//!
//! Everything here is a plain value. The stash keeps bundles behind `Arc` and
//! mutates them copy-on-write, so a snapshot handed to a caller never changes
//! underneath it.

use std::collections::BTreeMap;
use std::fmt;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Caller-supplied key partitioning the stash (e.g. a top-level content section)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(CompactString);

impl Category {
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Opaque continuation token for the next page.
///
/// The empty cursor means the stream is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamCursor(pub String);

impl StreamCursor {
    pub fn new(cursor: impl Into<String>) -> Self {
        Self(cursor.into())
    }

    /// The terminal cursor: no further pages.
    pub fn exhausted() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_exhausted(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StreamCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One discoverable content unit.
///
/// Fields are only reachable through accessors; an item never changes after
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    id: CompactString,
    name: String,
    /// Source-specific payload, opaque to the stash
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    metadata: JsonValue,
}

impl Item {
    pub fn new(id: impl Into<CompactString>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            metadata: JsonValue::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &JsonValue {
        &self.metadata
    }
}

/// Identifier of a cluster within its bundle.
///
/// Source-assigned clusters carry the source's integer id. The curated
/// fallback cluster has its own variant, so it can never collide with an
/// organic id. On the wire this is either a number or the string `"curated"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ClusterKey", into = "ClusterKey")]
pub enum ClusterId {
    Source(u32),
    Curated,
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source(id) => write!(f, "{id}"),
            Self::Curated => f.write_str(CURATED_KEY),
        }
    }
}

impl From<u32> for ClusterId {
    fn from(id: u32) -> Self {
        Self::Source(id)
    }
}

const CURATED_KEY: &str = "curated";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ClusterKey {
    Number(u32),
    Name(String),
}

impl TryFrom<ClusterKey> for ClusterId {
    type Error = String;

    fn try_from(key: ClusterKey) -> Result<Self, Self::Error> {
        match key {
            ClusterKey::Number(id) => Ok(Self::Source(id)),
            ClusterKey::Name(name) if name == CURATED_KEY => Ok(Self::Curated),
            ClusterKey::Name(name) => Err(format!(
                "unknown cluster id '{name}', expected an integer or \"{CURATED_KEY}\""
            )),
        }
    }
}

impl From<ClusterId> for ClusterKey {
    fn from(id: ClusterId) -> Self {
        match id {
            ClusterId::Source(id) => Self::Number(id),
            ClusterId::Curated => Self::Name(CURATED_KEY.to_string()),
        }
    }
}

/// Pagination state of a single cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// Not present in the stash
    Unloaded,
    Populated { has_more: bool },
}

/// An ordered, named, independently paginated sub-stream of items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    id: ClusterId,
    title: String,
    #[serde(default)]
    subtitle: String,
    #[serde(default)]
    cursor: StreamCursor,
    #[serde(default)]
    items: Vec<Item>,
}

impl Cluster {
    /// A cluster with no items and an exhausted cursor.
    pub fn new(id: impl Into<ClusterId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            subtitle: String::new(),
            cursor: StreamCursor::exhausted(),
            items: Vec::new(),
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = subtitle.into();
        self
    }

    pub fn with_cursor(mut self, cursor: StreamCursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_items(mut self, items: impl IntoIterator<Item = Item>) -> Self {
        self.items = items.into_iter().collect();
        self
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn subtitle(&self) -> &str {
        &self.subtitle
    }

    pub fn cursor(&self) -> &StreamCursor {
        &self.cursor
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Whether another page can be requested for this cluster.
    pub fn has_more(&self) -> bool {
        !self.cursor.is_exhausted()
    }

    pub fn state(&self) -> ClusterState {
        ClusterState::Populated {
            has_more: self.has_more(),
        }
    }

    /// Keep only the items matching `keep`, preserving order.
    pub(crate) fn retain_items(mut self, keep: impl Fn(&Item) -> bool) -> Self {
        self.items.retain(|item| keep(item));
        self
    }

    /// Fold a fetched page into this cluster.
    ///
    /// The page cursor replaces ours and its items are appended after the ones
    /// already shown. Identity, title and subtitle stay as they are. Returns the
    /// number of appended items.
    pub(crate) fn merge_page(&mut self, page: Cluster) -> usize {
        let appended = page.items.len();
        self.cursor = page.cursor;
        self.items.extend(page.items);
        appended
    }
}

/// The per-category aggregate of every cluster known so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BundleRepr", into = "BundleRepr")]
pub struct Bundle {
    title: String,
    clusters: BTreeMap<ClusterId, Cluster>,
    /// Cursor for discovering new clusters, distinct from each cluster's own
    cursor: StreamCursor,
}

impl Bundle {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Add a cluster, replacing any existing cluster with the same id.
    pub fn with_cluster(mut self, cluster: Cluster) -> Self {
        self.clusters.insert(cluster.id, cluster);
        self
    }

    pub fn with_cursor(mut self, cursor: StreamCursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn cursor(&self) -> &StreamCursor {
        &self.cursor
    }

    pub fn has_cluster(&self) -> bool {
        !self.clusters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(&id)
    }

    pub fn cluster_state(&self, id: ClusterId) -> ClusterState {
        self.cluster(id)
            .map_or(ClusterState::Unloaded, Cluster::state)
    }

    /// Clusters in id order
    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    pub(crate) fn cluster_mut(&mut self, id: ClusterId) -> Option<&mut Cluster> {
        self.clusters.get_mut(&id)
    }

    pub(crate) fn map_clusters(mut self, f: impl Fn(Cluster) -> Cluster) -> Self {
        self.clusters = std::mem::take(&mut self.clusters)
            .into_values()
            .map(|cluster| {
                let cluster = f(cluster);
                (cluster.id, cluster)
            })
            .collect();
        self
    }

    /// Fold a fetched bundle page into this bundle.
    ///
    /// The page's bundle cursor replaces ours. Clusters we already know get the
    /// page merged into them; unknown clusters are inserted as-is. An empty
    /// title is filled from the page.
    pub(crate) fn merge_page(&mut self, page: Bundle) {
        if self.title.is_empty() {
            self.title = page.title;
        }
        self.cursor = page.cursor;
        for (id, cluster) in page.clusters {
            match self.clusters.get_mut(&id) {
                Some(existing) => {
                    existing.merge_page(cluster);
                }
                None => {
                    self.clusters.insert(id, cluster);
                }
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct BundleRepr {
    #[serde(default)]
    title: String,
    #[serde(default)]
    clusters: Vec<Cluster>,
    #[serde(default)]
    cursor: StreamCursor,
}

impl From<BundleRepr> for Bundle {
    fn from(repr: BundleRepr) -> Self {
        Self {
            title: repr.title,
            clusters: repr
                .clusters
                .into_iter()
                .map(|cluster| (cluster.id, cluster))
                .collect(),
            cursor: repr.cursor,
        }
    }
}

impl From<Bundle> for BundleRepr {
    fn from(bundle: Bundle) -> Self {
        Self {
            title: bundle.title,
            clusters: bundle.clusters.into_values().collect(),
            cursor: bundle.cursor,
        }
    }
}
