//! Content sources - where bundles, pages and item details come from.
//!
//! The stash only depends on the [`ContentSource`] trait. Transport, retries
//! and timeouts belong to the implementation; any error it returns is treated
//! as "this attempt failed".

mod catalog;

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::{Bundle, Category, Cluster, Item, StreamCursor};

pub use catalog::StaticCatalog;

/// Remote supplier of paginated, categorized content.
#[async_trait]
pub trait ContentSource: Send + Sync + Debug {
    /// First page of a category's stream
    async fn fetch_first_page(&self, category: &Category) -> Result<Bundle, SourceError>;

    /// Next page of a single cluster, addressed by that cluster's cursor
    async fn fetch_next_page(&self, cursor: &StreamCursor) -> Result<Cluster, SourceError>;

    /// Full details for one item
    async fn fetch_item_detail(&self, id: &str) -> Result<Item, SourceError>;
}
