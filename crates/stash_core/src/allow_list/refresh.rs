//! Domain-fetched allow-list with timed refresh.
//!
//! State machine: `Cached(set, fetched_at) -> Stale -> Refreshing -> Cached`.
//! Reads go through a `parking_lot::RwLock` that is never held across an
//! await, so filtering never waits on a refresh in flight. Refreshes are
//! serialized by their own async mutex, separate from the stash lock.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use compact_str::CompactString;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{AllowList, ContentFilter};
use crate::config::AllowListConfig;
use crate::error::SourceError;

/// Remote supplier of the allow-list
#[async_trait]
pub trait AllowListFetcher: Send + Sync + Debug {
    async fn fetch_allow_list(&self) -> Result<Vec<String>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowListState {
    /// Fresh enough to use without refreshing
    Cached,
    /// Older than the staleness threshold
    Stale,
    /// A refresh is in flight; reads still see the previous set
    Refreshing,
}

/// Which layer supplied the current set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowListOrigin {
    Remote,
    Disk,
    BuiltIn,
}

#[derive(Debug, Clone)]
struct CachedSet {
    list: AllowList,
    fetched_at: DateTime<Utc>,
    origin: AllowListOrigin,
}

/// On-disk cache entry
#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    identifiers: Vec<String>,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RefreshableAllowList {
    current: RwLock<CachedSet>,
    refreshing: AtomicBool,
    refresh_lock: tokio::sync::Mutex<()>,
    fetcher: Option<Arc<dyn AllowListFetcher>>,
    cache_path: Option<PathBuf>,
    builtin: AllowList,
    stale_after: TimeDelta,
}

/// Clears the refreshing flag even if the refresh future is dropped mid-way.
struct RefreshingFlag<'a>(&'a AtomicBool);

impl<'a> RefreshingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RefreshingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RefreshableAllowList {
    /// Build from configuration, seeding from the disk cache when one exists.
    ///
    /// Without a disk cache the built-in set is used, timestamped at the epoch
    /// so it reads as stale straight away.
    pub async fn load(
        config: &AllowListConfig,
        fetcher: Option<Arc<dyn AllowListFetcher>>,
    ) -> Self {
        let builtin = config.builtin();
        let cache_path = config.cache_path.clone();

        let initial = match cache_path.as_deref() {
            Some(path) => read_disk_cache(path).await,
            None => None,
        }
        .unwrap_or_else(|| CachedSet {
            list: builtin.clone(),
            fetched_at: DateTime::<Utc>::UNIX_EPOCH,
            origin: AllowListOrigin::BuiltIn,
        });

        tracing::debug!(
            origin = ?initial.origin,
            identifiers = initial.list.len(),
            "Allow-list loaded"
        );

        Self {
            current: RwLock::new(initial),
            refreshing: AtomicBool::new(false),
            refresh_lock: tokio::sync::Mutex::new(()),
            fetcher,
            cache_path,
            builtin,
            stale_after: config.stale_after(),
        }
    }

    pub fn state(&self) -> AllowListState {
        if self.refreshing.load(Ordering::SeqCst) {
            AllowListState::Refreshing
        } else if self.is_stale() {
            AllowListState::Stale
        } else {
            AllowListState::Cached
        }
    }

    pub fn origin(&self) -> AllowListOrigin {
        self.current.read().origin
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.current.read().fetched_at
    }

    /// Snapshot of the current set
    pub fn current(&self) -> AllowList {
        self.current.read().list.clone()
    }

    fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at() > self.stale_after
    }

    /// Refresh only when the cached set is past its staleness threshold.
    ///
    /// Callers racing on a stale list wait for the first refresh and then find
    /// the list fresh.
    pub async fn refresh_if_stale(&self) -> AllowListOrigin {
        let _guard = self.refresh_lock.lock().await;
        if !self.is_stale() {
            return self.origin();
        }
        self.refresh_locked().await
    }

    /// Refresh unconditionally: remote, then disk cache, then built-in default.
    pub async fn refresh(&self) -> AllowListOrigin {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> AllowListOrigin {
        let _flag = RefreshingFlag::raise(&self.refreshing);

        let next = match self.fetch_remote().await {
            Some(remote) => remote,
            None => match self.read_disk().await {
                Some(disk) => disk,
                None => {
                    tracing::warn!(
                        identifiers = self.builtin.len(),
                        "Allow-list refresh fell back to built-in default"
                    );
                    // epoch: stays stale so the next refresh_if_stale retries remote
                    CachedSet {
                        list: self.builtin.clone(),
                        fetched_at: DateTime::<Utc>::UNIX_EPOCH,
                        origin: AllowListOrigin::BuiltIn,
                    }
                }
            },
        };

        let origin = next.origin;
        tracing::info!(
            origin = ?origin,
            identifiers = next.list.len(),
            "Allow-list refreshed"
        );
        *self.current.write() = next;
        origin
    }

    async fn fetch_remote(&self) -> Option<CachedSet> {
        let fetcher = self.fetcher.as_ref()?;
        match fetcher.fetch_allow_list().await {
            Ok(identifiers) => {
                let fetched_at = Utc::now();
                if let Some(path) = &self.cache_path {
                    let entry = DiskEntry {
                        identifiers: identifiers.clone(),
                        fetched_at,
                    };
                    if let Err(e) = write_disk_cache(path, &entry).await {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to write allow-list cache"
                        );
                    }
                }
                Some(CachedSet {
                    list: AllowList::new(identifiers),
                    fetched_at,
                    origin: AllowListOrigin::Remote,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Remote allow-list fetch failed");
                None
            }
        }
    }

    async fn read_disk(&self) -> Option<CachedSet> {
        read_disk_cache(self.cache_path.as_deref()?).await
    }
}

impl ContentFilter for RefreshableAllowList {
    fn is_allowed(&self, id: &str) -> bool {
        self.current.read().list.is_allowed(id)
    }

    fn allowed_identifiers(&self) -> BTreeSet<CompactString> {
        self.current.read().list.allowed_identifiers()
    }
}

async fn read_disk_cache(path: &Path) -> Option<CachedSet> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read allow-list cache");
            return None;
        }
    };

    match serde_json::from_str::<DiskEntry>(&content) {
        Ok(entry) => Some(CachedSet {
            list: AllowList::new(entry.identifiers),
            fetched_at: entry.fetched_at,
            origin: AllowListOrigin::Disk,
        }),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt allow-list cache ignored");
            None
        }
    }
}

async fn write_disk_cache(path: &Path, entry: &DiskEntry) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(entry)?;
    tokio::fs::write(path, json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    #[derive(Debug, Default)]
    struct FakeFetcher {
        identifiers: Option<Vec<String>>,
        calls: AtomicUsize,
    }

    impl FakeFetcher {
        fn ok(ids: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                identifiers: Some(ids.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    #[async_trait]
    impl AllowListFetcher for FakeFetcher {
        async fn fetch_allow_list(&self) -> Result<Vec<String>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.identifiers
                .clone()
                .ok_or_else(|| SourceError::new("allow-list endpoint unreachable"))
        }
    }

    fn config(dir: &Path, builtin: &[&str]) -> AllowListConfig {
        AllowListConfig {
            identifiers: builtin.iter().map(|s| s.to_string()).collect(),
            cache_path: Some(dir.join("allow_list.json")),
            stale_after_secs: 3600,
        }
    }

    #[tokio::test]
    async fn test_load_without_cache_is_builtin_and_stale() {
        let dir = tempfile::tempdir().unwrap();
        let list = RefreshableAllowList::load(&config(dir.path(), &["pkg.default"]), None).await;

        assert_eq!(list.origin(), AllowListOrigin::BuiltIn);
        assert_eq!(list.state(), AllowListState::Stale);
        assert!(list.is_allowed("pkg.default"));
    }

    #[tokio::test]
    async fn test_remote_refresh_updates_set_and_disk_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), &["pkg.default"]);
        let fetcher = FakeFetcher::ok(&["pkg.remote"]);
        let list = RefreshableAllowList::load(&cfg, Some(fetcher.clone())).await;

        assert_eq!(list.refresh().await, AllowListOrigin::Remote);
        assert_eq!(list.state(), AllowListState::Cached);
        assert!(list.is_allowed("pkg.remote"));
        assert!(!list.is_allowed("pkg.default"));

        // a fresh instance picks up the disk cache written by the refresh
        let reloaded = RefreshableAllowList::load(&cfg, None).await;
        assert_eq!(reloaded.origin(), AllowListOrigin::Disk);
        assert!(reloaded.is_allowed("pkg.remote"));
    }

    #[tokio::test]
    async fn test_failed_remote_falls_back_to_disk_then_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), &["pkg.default"]);

        let list = RefreshableAllowList::load(&cfg, Some(FakeFetcher::failing())).await;
        assert_eq!(list.refresh().await, AllowListOrigin::BuiltIn);
        assert!(list.is_allowed("pkg.default"));

        let entry = DiskEntry {
            identifiers: vec!["pkg.disk".to_string()],
            fetched_at: Utc::now(),
        };
        write_disk_cache(cfg.cache_path.as_deref().unwrap(), &entry)
            .await
            .unwrap();

        assert_eq!(list.refresh().await, AllowListOrigin::Disk);
        assert!(list.is_allowed("pkg.disk"));
        assert!(!list.is_allowed("pkg.default"));
    }

    #[tokio::test]
    async fn test_refresh_if_stale_skips_fresh_list() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::ok(&["pkg.remote"]);
        let list =
            RefreshableAllowList::load(&config(dir.path(), &[]), Some(fetcher.clone())).await;

        list.refresh_if_stale().await;
        list.refresh_if_stale().await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(list.state(), AllowListState::Cached);
    }

    #[tokio::test]
    async fn test_builtin_fallback_stays_stale_and_retries_remote() {
        let cfg = AllowListConfig {
            identifiers: vec!["pkg.default".to_string()],
            cache_path: None,
            stale_after_secs: 3600,
        };
        let fetcher = FakeFetcher::failing();
        let list = RefreshableAllowList::load(&cfg, Some(fetcher.clone())).await;

        assert_eq!(list.refresh_if_stale().await, AllowListOrigin::BuiltIn);
        assert_eq!(list.state(), AllowListState::Stale);
        assert!(list.is_allowed("pkg.default"));

        list.refresh_if_stale().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    /// Fetcher that parks until released, so a refresh can be observed in flight.
    #[derive(Debug, Default)]
    struct GatedFetcher {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl AllowListFetcher for GatedFetcher {
        async fn fetch_allow_list(&self) -> Result<Vec<String>, SourceError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(vec!["pkg.new".to_string()])
        }
    }

    #[tokio::test]
    async fn test_reads_use_previous_set_while_refreshing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(GatedFetcher::default());
        let list = Arc::new(
            RefreshableAllowList::load(&config(dir.path(), &["pkg.old"]), Some(fetcher.clone()))
                .await,
        );

        let refresh = tokio::spawn({
            let list = list.clone();
            async move { list.refresh().await }
        });
        fetcher.started.notified().await;

        assert_eq!(list.state(), AllowListState::Refreshing);
        assert!(list.is_allowed("pkg.old"));
        assert!(!list.is_allowed("pkg.new"));
        assert_eq!(list.origin(), AllowListOrigin::BuiltIn);

        fetcher.release.notify_one();
        assert_eq!(refresh.await.unwrap(), AllowListOrigin::Remote);
        assert_eq!(list.state(), AllowListState::Cached);
        assert!(list.is_allowed("pkg.new"));
        assert!(!list.is_allowed("pkg.old"));
    }

    #[tokio::test]
    async fn test_corrupt_disk_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), &["pkg.default"]);
        tokio::fs::write(cfg.cache_path.as_deref().unwrap(), "{not json")
            .await
            .unwrap();

        let list = RefreshableAllowList::load(&cfg, None).await;

        assert_eq!(list.origin(), AllowListOrigin::BuiltIn);
        assert!(list.is_allowed("pkg.default"));
    }

    #[tokio::test]
    async fn test_everything_missing_fails_closed() {
        let cfg = AllowListConfig {
            identifiers: Vec::new(),
            cache_path: None,
            stale_after_secs: 60,
        };
        let list = RefreshableAllowList::load(&cfg, Some(FakeFetcher::failing())).await;

        assert_eq!(list.refresh().await, AllowListOrigin::BuiltIn);
        assert!(list.allowed_identifiers().is_empty());
        assert!(!list.is_allowed("anything"));
    }
}
