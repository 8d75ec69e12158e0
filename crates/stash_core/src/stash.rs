//! The stream stash: per-category bundle cache and page merge engine.
//!
//! One async mutex guards the whole category -> bundle map. Every operation
//! holds it from "decide what to store" through "store it", including the
//! synthesis or network call in between, and reads take it too. Mutation only
//! happens after the last await of an operation, so a cancelled call leaves
//! the stash exactly as it found it.
//!
//! Bundles are kept as `Arc<Bundle>` and changed through `Arc::make_mut`, so a
//! [`BundleSnapshot`] returned to a caller is never touched by later merges.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast};

use crate::allow_list::ContentFilter;
use crate::config::StashConfig;
use crate::error::{ConfigError, Result, StashError};
use crate::fallback::{FallbackProvider, FallbackSynthesizer};
use crate::source::ContentSource;
use crate::types::{Bundle, Category, ClusterId};

type Bundles = HashMap<Category, Arc<Bundle>>;

/// Read-only copy of the whole stash at the moment an operation returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleSnapshot {
    bundles: Bundles,
}

impl BundleSnapshot {
    fn capture(bundles: &Bundles) -> Self {
        Self {
            bundles: bundles.clone(),
        }
    }

    pub fn get(&self, category: &Category) -> Option<&Bundle> {
        self.bundles.get(category).map(Arc::as_ref)
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.bundles.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Category, &Bundle)> {
        self.bundles
            .iter()
            .map(|(category, bundle)| (category, bundle.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

/// Where a category's first content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationOrigin {
    Fallback,
    Source,
}

/// State transitions broadcast to observers
#[derive(Debug, Clone, PartialEq)]
pub enum StashEvent {
    /// A category went from nothing cached to a stored bundle
    Populated {
        category: Category,
        origin: PopulationOrigin,
        clusters: usize,
    },
    /// A fetched page was folded into a cached cluster
    PageMerged {
        category: Category,
        cluster: ClusterId,
        appended: usize,
        has_more: bool,
    },
    /// The cluster has no further pages
    ClusterExhausted {
        category: Category,
        cluster: ClusterId,
    },
    /// A page request named a category or cluster that is not cached
    StaleMerge {
        category: Category,
        cluster: ClusterId,
    },
    RequestFailed { category: Category, reason: String },
}

/// Per-category cache of stream bundles.
#[derive(Debug)]
pub struct StreamStash {
    bundles: Mutex<Bundles>,
    source: Arc<dyn ContentSource>,
    filter: Arc<dyn ContentFilter>,
    fallback: Arc<dyn FallbackProvider>,
    events: broadcast::Sender<StashEvent>,
}

impl StreamStash {
    pub fn builder() -> StashBuilder {
        StashBuilder::default()
    }

    /// Stash with the default allow-list fallback synthesizer
    pub fn new(
        source: Arc<dyn ContentSource>,
        filter: Arc<dyn ContentFilter>,
        config: &StashConfig,
    ) -> Result<Self> {
        Self::builder()
            .source(source)
            .filter(filter)
            .config(config.clone())
            .build()
    }

    /// Subscribe to state transitions. Events sent with no subscriber are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<StashEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StashEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    /// Current contents of the whole stash
    pub async fn snapshot(&self) -> BundleSnapshot {
        BundleSnapshot::capture(&*self.bundles.lock().await)
    }

    /// Current bundle for one category, if any
    pub async fn bundle(&self, category: &Category) -> Option<Arc<Bundle>> {
        self.bundles.lock().await.get(category).cloned()
    }

    /// Give the caller something to show for `category`.
    ///
    /// Cache-first: once a category holds at least one cluster it is served
    /// as-is and never re-synthesized. Otherwise the fallback bundle is
    /// synthesized, filtered and stored. If synthesis errors or nothing in it
    /// survives the filter, the source's first page is fetched exactly once,
    /// filtered, and stored. If that fails too the stash is left untouched and
    /// `ContentUnavailable` is returned.
    #[tracing::instrument(skip_all, fields(%category))]
    pub async fn request(&self, category: &Category) -> Result<BundleSnapshot> {
        let mut bundles = self.bundles.lock().await;

        if bundles.get(category).is_some_and(|bundle| bundle.has_cluster()) {
            tracing::debug!("Serving cached bundle");
            return Ok(BundleSnapshot::capture(&bundles));
        }

        let synthesized = self
            .fallback
            .synthesize(category)
            .await
            .map(|bundle| self.filter.filter_bundle(bundle));
        let fallback_failure = match synthesized {
            Ok(bundle) if bundle.clusters().any(|cluster| !cluster.items().is_empty()) => {
                let clusters = bundle.len();
                bundles.insert(category.clone(), Arc::new(bundle));
                tracing::info!(clusters, "Populated category from fallback");
                self.emit(StashEvent::Populated {
                    category: category.clone(),
                    origin: PopulationOrigin::Fallback,
                    clusters,
                });
                return Ok(BundleSnapshot::capture(&bundles));
            }
            Ok(_) => "fallback produced no allowed items".to_string(),
            Err(e) => e.to_string(),
        };

        tracing::warn!(
            reason = %fallback_failure,
            "Fallback unusable, fetching first page from source"
        );

        match self.source.fetch_first_page(category).await {
            Ok(page) => {
                let page = self.filter.filter_bundle(page);
                let mut bundle = bundles
                    .get(category)
                    .map(|cached| Bundle::clone(cached))
                    .unwrap_or_default();
                bundle.merge_page(page);

                let clusters = bundle.len();
                bundles.insert(category.clone(), Arc::new(bundle));
                tracing::info!(clusters, "Populated category from source");
                self.emit(StashEvent::Populated {
                    category: category.clone(),
                    origin: PopulationOrigin::Source,
                    clusters,
                });
                Ok(BundleSnapshot::capture(&bundles))
            }
            Err(cause) => {
                tracing::error!(
                    fallback = %fallback_failure,
                    error = %cause,
                    "No content available"
                );
                self.emit(StashEvent::RequestFailed {
                    category: category.clone(),
                    reason: cause.to_string(),
                });
                Err(StashError::ContentUnavailable {
                    category: category.to_string(),
                    fallback: fallback_failure,
                    cause,
                })
            }
        }
    }

    /// Fetch and merge the next page of an already visible cluster.
    ///
    /// An exhausted cluster is a no-op that never contacts the source. A
    /// cluster that is not cached is a stale request, also a no-op. A fetched
    /// page is filtered, its cursor replaces the cached one and its items are
    /// appended. A failed fetch leaves the cached cluster untouched.
    #[tracing::instrument(skip_all, fields(%category, %cluster))]
    pub async fn page_forward(
        &self,
        category: &Category,
        cluster: ClusterId,
    ) -> Result<BundleSnapshot> {
        let mut bundles = self.bundles.lock().await;

        let Some(cached) = bundles
            .get(category)
            .and_then(|bundle| bundle.cluster(cluster))
        else {
            tracing::debug!("Page request for a cluster that is not cached");
            self.emit(StashEvent::StaleMerge {
                category: category.clone(),
                cluster,
            });
            return Ok(BundleSnapshot::capture(&bundles));
        };

        if !cached.has_more() {
            tracing::debug!("Cluster exhausted, nothing to fetch");
            self.emit(StashEvent::ClusterExhausted {
                category: category.clone(),
                cluster,
            });
            return Ok(BundleSnapshot::capture(&bundles));
        }

        let cursor = cached.cursor().clone();
        let page = match self.source.fetch_next_page(&cursor).await {
            Ok(page) => self.filter.filter_cluster(page),
            Err(cause) => {
                tracing::warn!(%cursor, error = %cause, "Next page fetch failed");
                self.emit(StashEvent::RequestFailed {
                    category: category.clone(),
                    reason: cause.to_string(),
                });
                return Err(StashError::PageFetchFailed {
                    category: category.to_string(),
                    cluster,
                    cause,
                });
            }
        };

        // still cached: the lock has been held since the lookup above
        if let Some(target) = bundles
            .get_mut(category)
            .and_then(|bundle| Arc::make_mut(bundle).cluster_mut(cluster))
        {
            let appended = target.merge_page(page);
            let has_more = target.has_more();
            tracing::info!(appended, has_more, "Merged page into cluster");
            self.emit(StashEvent::PageMerged {
                category: category.clone(),
                cluster,
                appended,
                has_more,
            });
            if !has_more {
                self.emit(StashEvent::ClusterExhausted {
                    category: category.clone(),
                    cluster,
                });
            }
        }

        Ok(BundleSnapshot::capture(&bundles))
    }
}

/// Builder for [`StreamStash`]
#[derive(Debug, Default)]
pub struct StashBuilder {
    source: Option<Arc<dyn ContentSource>>,
    filter: Option<Arc<dyn ContentFilter>>,
    fallback: Option<Arc<dyn FallbackProvider>>,
    config: StashConfig,
}

impl StashBuilder {
    pub fn source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn ContentFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Replace the default [`FallbackSynthesizer`]
    pub fn fallback(mut self, fallback: Arc<dyn FallbackProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn config(mut self, config: StashConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<StreamStash> {
        let source = self.source.ok_or_else(|| missing("source"))?;
        let filter = self.filter.ok_or_else(|| missing("filter"))?;
        self.config.validate().map_err(|cause| {
            StashError::configuration("<builder>", "config", "a valid stash configuration", cause)
        })?;

        let fallback = self.fallback.unwrap_or_else(|| {
            Arc::new(FallbackSynthesizer::new(
                source.clone(),
                filter.clone(),
                self.config.fallback.clone(),
            ))
        });
        let (events, _) = broadcast::channel(self.config.events.capacity);

        Ok(StreamStash {
            bundles: Mutex::new(HashMap::new()),
            source,
            filter,
            fallback,
            events,
        })
    }
}

fn missing(field: &str) -> StashError {
    StashError::configuration(
        "<builder>",
        field,
        format!("a {field} set on the builder"),
        ConfigError::MissingField(field.to_string()),
    )
}
