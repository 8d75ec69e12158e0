//! Fallback synthesis: a presentable bundle built straight from the allow-list.
//!
//! Used when a category has no organic content cached yet. Each allowed
//! identifier is looked up individually through the content source; failed
//! lookups are logged and skipped, never aborting the batch.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::Result;
use crate::allow_list::ContentFilter;
use crate::config::FallbackConfig;
use crate::source::ContentSource;
use crate::types::{Bundle, Category, Cluster, ClusterId};

/// Produces the default bundle for a category with nothing cached.
///
/// An empty bundle means "nothing to show yet"; an error means synthesis
/// itself broke. The stash treats both as a reason to try the content source.
#[async_trait]
pub trait FallbackProvider: Send + Sync + Debug {
    async fn synthesize(&self, category: &Category) -> Result<Bundle>;
}

/// Builds a single curated cluster out of the allow-list.
#[derive(Debug, Clone)]
pub struct FallbackSynthesizer {
    source: Arc<dyn ContentSource>,
    filter: Arc<dyn ContentFilter>,
    config: FallbackConfig,
}

impl FallbackSynthesizer {
    pub fn new(
        source: Arc<dyn ContentSource>,
        filter: Arc<dyn ContentFilter>,
        config: FallbackConfig,
    ) -> Self {
        Self {
            source,
            filter,
            config,
        }
    }
}

#[async_trait]
impl FallbackProvider for FallbackSynthesizer {
    async fn synthesize(&self, category: &Category) -> Result<Bundle> {
        let identifiers = self.filter.allowed_identifiers();
        if identifiers.is_empty() {
            tracing::debug!(%category, "Allow-list empty, nothing to synthesize");
            return Ok(Bundle::default());
        }

        let requested = identifiers.len();
        let lookups: Vec<_> = stream::iter(identifiers)
            .map(|id| async move {
                let lookup = self.source.fetch_item_detail(&id).await;
                (id, lookup)
            })
            .buffered(self.config.lookup_concurrency.max(1))
            .collect()
            .await;

        let mut items = Vec::with_capacity(requested);
        for (id, lookup) in lookups {
            match lookup {
                // the source may answer with a different item; it still has to pass the filter
                Ok(item) if self.filter.is_allowed(item.id()) => items.push(item),
                Ok(item) => {
                    tracing::warn!(
                        %category,
                        requested = %id,
                        returned = item.id(),
                        "Detail lookup returned an item outside the allow-list, skipping"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        %category,
                        item = %id,
                        error = %e,
                        "Detail lookup failed, skipping item"
                    );
                }
            }
        }

        if items.is_empty() {
            tracing::warn!(%category, requested, "Every detail lookup failed");
            return Ok(Bundle::default());
        }

        tracing::debug!(%category, requested, found = items.len(), "Synthesized fallback bundle");

        let cluster = Cluster::new(ClusterId::Curated, &self.config.cluster_title)
            .with_subtitle(&self.config.cluster_subtitle)
            .with_items(items);
        Ok(Bundle::new(&self.config.bundle_title).with_cluster(cluster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allow_list::AllowList;
    use crate::test_helpers::{FakeSource, item_ids};
    use crate::types::ClusterState;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn synthesizer(source: Arc<FakeSource>, allowed: &[&str]) -> FallbackSynthesizer {
        FallbackSynthesizer::new(
            source,
            Arc::new(AllowList::new(allowed.iter().copied())),
            FallbackConfig::default(),
        )
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_lookup_is_skipped() {
        let source = Arc::new(FakeSource::new().with_item("pkg.a", "A"));
        let synth = synthesizer(source.clone(), &["pkg.a", "pkg.b"]);

        let bundle = synth.synthesize(&"apps".into()).await.unwrap();

        assert_eq!(bundle.title(), "Recommended");
        assert_eq!(bundle.len(), 1);
        let cluster = bundle.cluster(ClusterId::Curated).unwrap();
        assert_eq!(item_ids(cluster.items()), vec!["pkg.a"]);
        assert_eq!(cluster.items()[0].name(), "A");
        assert_eq!(cluster.title(), "Curated picks");
        assert_eq!(cluster.state(), ClusterState::Populated { has_more: false });
        assert_eq!(source.detail_calls(), 2);
        assert!(logs_contain("Detail lookup failed, skipping item"));
    }

    #[tokio::test]
    async fn test_empty_allow_list_yields_empty_bundle() {
        let source = Arc::new(FakeSource::new().with_item("pkg.a", "A"));
        let synth = synthesizer(source.clone(), &[]);

        let bundle = synth.synthesize(&"apps".into()).await.unwrap();

        assert!(!bundle.has_cluster());
        assert_eq!(source.detail_calls(), 0);
    }

    #[tokio::test]
    async fn test_all_lookups_failing_yields_empty_bundle() {
        let source = Arc::new(FakeSource::new());
        let synth = synthesizer(source.clone(), &["pkg.a", "pkg.b", "pkg.c"]);

        let bundle = synth.synthesize(&"apps".into()).await.unwrap();

        assert!(!bundle.has_cluster());
        assert_eq!(source.detail_calls(), 3);
    }

    #[tokio::test]
    async fn test_items_follow_allow_list_order() {
        let source = Arc::new(
            FakeSource::new()
                .with_item("pkg.c", "C")
                .with_item("pkg.a", "A")
                .with_item("pkg.b", "B"),
        );
        let synth = FallbackSynthesizer::new(
            source,
            Arc::new(AllowList::new(["pkg.c", "pkg.a", "pkg.b"])),
            FallbackConfig {
                lookup_concurrency: 2,
                ..FallbackConfig::default()
            },
        );

        let bundle = synth.synthesize(&"apps".into()).await.unwrap();

        let cluster = bundle.cluster(ClusterId::Curated).unwrap();
        assert_eq!(item_ids(cluster.items()), vec!["pkg.a", "pkg.b", "pkg.c"]);
    }
}
