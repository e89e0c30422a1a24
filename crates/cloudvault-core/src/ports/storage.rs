//! Storage-facing contracts: stream records and status updates
//!
//! The storage engine consumes each collection as an unordered stream of
//! [`ItemRecord`]s. A record exposes a stable key (item ID plus a suffix
//! distinguishing data, item metadata and directory metadata), a
//! modification time, and either eagerly materialized bytes, a lazy fetch
//! capability, or a tombstone marker.
//!
//! Lazy records exist so the storage engine's deduplication can decide an
//! item is unchanged (same key, same modification time) and never pay the
//! network fetch. The fetch happens only when [`ItemRecord::payload`]'s
//! lazy capability is explicitly invoked.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::newtypes::{ContainerPath, ItemId};
use crate::domain::sharing::{
    Metadata, DATA_FILE_SUFFIX, DIR_META_FILE_SUFFIX, META_FILE_SUFFIX,
};

use super::provider::ProviderError;

// ============================================================================
// Lazy fetch capability
// ============================================================================

/// Deferred content fetch, invoked by the storage consumer at most once
/// per record when it decides it actually needs the bytes.
#[async_trait::async_trait]
pub trait LazyFetch: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, ProviderError>;
}

// ============================================================================
// ItemRecord
// ============================================================================

/// Content payload of a stream record
#[derive(Clone)]
pub enum ItemPayload {
    /// Bytes already materialized at stream time
    Eager(Vec<u8>),
    /// Fetch deferred until the consumer asks
    Lazy(Arc<dyn LazyFetch>),
    /// Deletion marker; no content
    Tombstone,
}

impl fmt::Debug for ItemPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemPayload::Eager(bytes) => f.debug_tuple("Eager").field(&bytes.len()).finish(),
            ItemPayload::Lazy(_) => f.debug_tuple("Lazy").finish(),
            ItemPayload::Tombstone => f.debug_tuple("Tombstone").finish(),
        }
    }
}

/// One record of a collection's output stream
#[derive(Debug, Clone)]
pub struct ItemRecord {
    key: String,
    meta_key: Option<String>,
    modified: Option<DateTime<Utc>>,
    metadata: Option<Metadata>,
    payload: ItemPayload,
}

impl ItemRecord {
    /// Record for a file item with eagerly materialized content.
    pub fn eager_file(
        id: &ItemId,
        modified: DateTime<Utc>,
        bytes: Vec<u8>,
        metadata: Metadata,
    ) -> Self {
        Self {
            key: format!("{}{}", id, DATA_FILE_SUFFIX),
            meta_key: Some(format!("{}{}", id, META_FILE_SUFFIX)),
            modified: Some(modified),
            metadata: Some(metadata),
            payload: ItemPayload::Eager(bytes),
        }
    }

    /// Record for a file item whose content fetch is deferred.
    pub fn lazy_file(
        id: &ItemId,
        modified: DateTime<Utc>,
        metadata: Metadata,
        fetch: Arc<dyn LazyFetch>,
    ) -> Self {
        Self {
            key: format!("{}{}", id, DATA_FILE_SUFFIX),
            meta_key: Some(format!("{}{}", id, META_FILE_SUFFIX)),
            modified: Some(modified),
            metadata: Some(metadata),
            payload: ItemPayload::Lazy(fetch),
        }
    }

    /// Record carrying a directory's sharing metadata.
    ///
    /// Directory metadata always uses the current time: a permission change
    /// does not touch the directory's remote modification time, and a stale
    /// time would make deduplication skip re-reading it.
    pub fn directory(id: &ItemId, metadata: Metadata) -> Self {
        Self {
            key: format!("{}{}", id, DIR_META_FILE_SUFFIX),
            meta_key: None,
            modified: Some(Utc::now()),
            metadata: Some(metadata),
            payload: ItemPayload::Eager(Vec::new()),
        }
    }

    /// Tombstone record for a removed item.
    pub fn tombstone(id: &ItemId) -> Self {
        Self {
            key: format!("{}{}", id, DATA_FILE_SUFFIX),
            meta_key: None,
            modified: None,
            metadata: None,
            payload: ItemPayload::Tombstone,
        }
    }

    /// Stable storage key of the record's primary payload.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Storage key for the sibling sharing-metadata file, when the record
    /// carries one separate from its primary payload.
    pub fn meta_key(&self) -> Option<&str> {
        self.meta_key.as_deref()
    }

    /// Remote modification time; `None` on tombstones.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    /// Sharing metadata captured with the item, if any.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// The content payload.
    pub fn payload(&self) -> &ItemPayload {
        &self.payload
    }

    /// Returns true for deletion markers.
    pub fn is_tombstone(&self) -> bool {
        matches!(self.payload, ItemPayload::Tombstone)
    }
}

// ============================================================================
// Status updates
// ============================================================================

/// Completion report for one streamed collection
#[derive(Debug, Clone)]
pub struct CollectionStatus {
    /// Path of the container this collection covered (None on tombstone
    /// collections, which never stream)
    pub folder_path: Option<ContainerPath>,
    /// Total records the stream attempted (added + removed)
    pub objects: usize,
    /// Added items successfully materialized into the stream
    pub successes: usize,
    /// Total content bytes accounted to the stream
    pub bytes: u64,
    /// Error that cut the stream short, if any
    pub error: Option<String>,
}

/// Callback invoked exactly once per collection when its stream closes
///
/// The storage write pipeline counts these to know when a snapshot's
/// inputs are final.
pub trait StatusUpdater: Send + Sync {
    fn update(&self, status: CollectionStatus);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetch(AtomicUsize);

    #[async_trait::async_trait]
    impl LazyFetch for CountingFetch {
        async fn fetch(&self) -> Result<Vec<u8>, ProviderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(b"content".to_vec())
        }
    }

    #[test]
    fn test_eager_file_keys() {
        let id = ItemId::new("item-1").unwrap();
        let rec = ItemRecord::eager_file(&id, Utc::now(), b"abc".to_vec(), Metadata::default());
        assert_eq!(rec.key(), "item-1.data");
        assert_eq!(rec.meta_key(), Some("item-1.meta"));
        assert!(!rec.is_tombstone());
    }

    #[test]
    fn test_directory_record_keys() {
        let id = ItemId::new("dir-1").unwrap();
        let rec = ItemRecord::directory(&id, Metadata::default());
        assert_eq!(rec.key(), "dir-1.dirmeta");
        assert!(rec.meta_key().is_none());
        assert!(rec.modified().is_some());
    }

    #[test]
    fn test_tombstone_carries_only_key() {
        let id = ItemId::new("item-2").unwrap();
        let rec = ItemRecord::tombstone(&id);
        assert_eq!(rec.key(), "item-2.data");
        assert!(rec.is_tombstone());
        assert!(rec.modified().is_none());
        assert!(rec.metadata().is_none());
    }

    #[tokio::test]
    async fn test_lazy_record_defers_fetch() {
        let fetcher = Arc::new(CountingFetch(AtomicUsize::new(0)));
        let id = ItemId::new("item-3").unwrap();
        let rec = ItemRecord::lazy_file(&id, Utc::now(), Metadata::default(), fetcher.clone());

        // No fetch just from constructing or inspecting the record
        assert_eq!(fetcher.0.load(Ordering::SeqCst), 0);

        if let ItemPayload::Lazy(fetch) = rec.payload() {
            let bytes = fetch.fetch().await.unwrap();
            assert_eq!(bytes, b"content");
        } else {
            panic!("expected lazy payload");
        }
        assert_eq!(fetcher.0.load(Ordering::SeqCst), 1);
    }
}
