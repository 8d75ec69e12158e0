//! Shared fakes for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::SourceError;
use crate::source::ContentSource;
use crate::types::{Bundle, Category, Cluster, Item, StreamCursor};

/// Content source with scripted responses and call counters.
///
/// Anything not scripted fails. `delay` is applied before every response so
/// tests can race or cancel in-flight calls.
#[derive(Debug, Default)]
pub struct FakeSource {
    pub first_pages: Mutex<HashMap<Category, Bundle>>,
    pub pages: Mutex<HashMap<String, Cluster>>,
    pub items: Mutex<HashMap<String, Item>>,
    pub delay: Option<Duration>,
    pub first_page_calls: AtomicUsize,
    pub next_page_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_item(self, id: &str, name: &str) -> Self {
        self.items.lock().insert(id.to_string(), Item::new(id, name));
        self
    }

    pub fn with_first_page(self, category: &str, bundle: Bundle) -> Self {
        self.first_pages.lock().insert(Category::new(category), bundle);
        self
    }

    pub fn with_page(self, cursor: &str, page: Cluster) -> Self {
        self.pages.lock().insert(cursor.to_string(), page);
        self
    }

    pub fn first_page_calls(&self) -> usize {
        self.first_page_calls.load(Ordering::SeqCst)
    }

    pub fn next_page_calls(&self) -> usize {
        self.next_page_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn fetch_first_page(&self, category: &Category) -> Result<Bundle, SourceError> {
        self.first_page_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.first_pages
            .lock()
            .get(category)
            .cloned()
            .ok_or_else(|| SourceError::new("first page unavailable"))
    }

    async fn fetch_next_page(&self, cursor: &StreamCursor) -> Result<Cluster, SourceError> {
        self.next_page_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.pages
            .lock()
            .get(cursor.as_str())
            .cloned()
            .ok_or_else(|| SourceError::new("next page unavailable"))
    }

    async fn fetch_item_detail(&self, id: &str) -> Result<Item, SourceError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.items
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::new(format!("lookup failed for {id}")))
    }
}

pub fn items(ids: &[&str]) -> Vec<Item> {
    ids.iter().map(|id| Item::new(*id, id.to_uppercase())).collect()
}

pub fn item_ids(items: &[Item]) -> Vec<&str> {
    items.iter().map(Item::id).collect()
}
