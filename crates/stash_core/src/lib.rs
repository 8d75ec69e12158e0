//! Stash Core - Stream Cache and Merge Engine
//!
//! This crate owns the paginated, categorized content that a catalog client
//! shows: a per-category cache of bundles, the merge of incremental pages into
//! what was already shown, a curated fallback synthesized from the allow-list
//! when nothing organic is cached, and allow-list filtering on every path that
//! produces visible content.
//!
//! Transport, rendering and navigation live elsewhere; they plug in through
//! [`ContentSource`] and consume [`BundleSnapshot`]s.

pub mod allow_list;
pub mod config;
pub mod error;
pub mod fallback;
pub mod source;
pub mod stash;
pub mod types;

#[cfg(test)]
pub mod test_helpers;

pub use allow_list::{
    AllowList, AllowListFetcher, AllowListOrigin, AllowListState, ContentFilter,
    RefreshableAllowList,
};
pub use config::{StashConfig, load_config, load_config_or_default, save_config};
pub use error::{ConfigError, Result, SourceError, StashError};
pub use fallback::{FallbackProvider, FallbackSynthesizer};
pub use source::{ContentSource, StaticCatalog};
pub use stash::{BundleSnapshot, PopulationOrigin, StashBuilder, StashEvent, StreamStash};
pub use types::{Bundle, Category, Cluster, ClusterId, ClusterState, Item, StreamCursor};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        AllowList, Bundle, BundleSnapshot, Category, Cluster, ClusterId, ContentFilter,
        ContentSource, Item, Result, SourceError, StashConfig, StashError, StreamCursor,
        StreamStash,
    };
}
