//! In-memory content source backed by a serde-described catalog.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use super::ContentSource;
use crate::Result;
use crate::error::{ConfigError, SourceError, StashError};
use crate::types::{Bundle, Category, Cluster, Item, StreamCursor};

/// A fixed catalog: first pages per category, follow-up pages keyed by cursor,
/// and an item-detail table.
///
/// ```json
/// {
///   "first_pages": { "games": { "title": "Games", "clusters": [ ... ] } },
///   "pages": { "games-top-p2": { "id": 0, "title": "Top", "items": [ ... ] } },
///   "items": { "pkg.a": { "id": "pkg.a", "name": "A" } }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    first_pages: HashMap<Category, Bundle>,
    #[serde(default)]
    pages: HashMap<String, Cluster>,
    #[serde(default)]
    items: HashMap<CompactString, Item>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_first_page(mut self, category: impl Into<Category>, bundle: Bundle) -> Self {
        self.first_pages.insert(category.into(), bundle);
        self
    }

    pub fn with_page(mut self, cursor: impl Into<String>, page: Cluster) -> Self {
        self.pages.insert(cursor.into(), page);
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.insert(CompactString::from(item.id()), item);
        self
    }

    /// Load a catalog from a JSON file
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            StashError::configuration(
                path.display().to_string(),
                "file",
                "readable JSON catalog",
                ConfigError::Io(e.to_string()),
            )
        })?;

        serde_json::from_str(&content).map_err(|e| {
            StashError::configuration(
                path.display().to_string(),
                "content",
                "catalog with first_pages, pages and items",
                ConfigError::JsonParse(e.to_string()),
            )
        })
    }
}

#[async_trait]
impl ContentSource for StaticCatalog {
    async fn fetch_first_page(
        &self,
        category: &Category,
    ) -> std::result::Result<Bundle, SourceError> {
        self.first_pages
            .get(category)
            .cloned()
            .ok_or_else(|| SourceError::new(format!("no first page for category '{category}'")))
    }

    async fn fetch_next_page(
        &self,
        cursor: &StreamCursor,
    ) -> std::result::Result<Cluster, SourceError> {
        self.pages
            .get(cursor.as_str())
            .cloned()
            .ok_or_else(|| SourceError::new(format!("unknown page cursor '{cursor}'")))
    }

    async fn fetch_item_detail(&self, id: &str) -> std::result::Result<Item, SourceError> {
        self.items
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::new(format!("no details for item '{id}'")))
    }
}
