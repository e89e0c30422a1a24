//! Download-URL cache
//!
//! Provider-issued download URLs are pre-authenticated and expire after a
//! while. When a direct download comes back unauthorized mid-stream, the
//! collection consults this cache for a newer URL before paying a full
//! item re-fetch.
//!
//! The cache is read-mostly and shared across all fetch tasks of a
//! collection; refresh writes are last-write-wins, which is fine since any
//! valid provider URL for an item is interchangeable.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use cloudvault_core::domain::ItemId;

/// One cached download URL with its freshness bookkeeping
#[derive(Debug, Clone)]
pub struct CachedUrl {
    pub url: String,
    /// The provider reported the item deleted when this entry was written
    pub deleted: bool,
    refreshed_at: DateTime<Utc>,
}

/// Concurrency-safe map of last-known-good download URLs
#[derive(Debug)]
pub struct DownloadUrlCache {
    entries: DashMap<ItemId, CachedUrl>,
    staleness: Duration,
}

impl DownloadUrlCache {
    /// Creates a cache whose entries go stale after `staleness`.
    pub fn new(staleness: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            staleness,
        }
    }

    /// Records a fresh URL for `item`.
    pub fn store(&self, item: ItemId, url: impl Into<String>) {
        self.entries.insert(
            item,
            CachedUrl {
                url: url.into(),
                deleted: false,
                refreshed_at: Utc::now(),
            },
        );
    }

    /// Records that the provider reported `item` deleted.
    pub fn store_deleted(&self, item: ItemId) {
        self.entries.insert(
            item,
            CachedUrl {
                url: String::new(),
                deleted: true,
                refreshed_at: Utc::now(),
            },
        );
    }

    /// Returns a non-stale entry for `item`, if one exists.
    ///
    /// Stale entries are treated as misses; the caller re-fetches the item
    /// and stores the fresh URL.
    pub fn get(&self, item: &ItemId) -> Option<CachedUrl> {
        let entry = self.entries.get(item)?;
        let age = Utc::now().signed_duration_since(entry.refreshed_at);
        if age.to_std().unwrap_or(Duration::MAX) > self.staleness {
            return None;
        }
        Some(entry.value().clone())
    }

    /// Number of cached entries, stale or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
