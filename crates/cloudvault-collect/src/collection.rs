//! Collection - the per-container streaming primitive
//!
//! A [`Collection`] represents one container's state transition between two
//! backup runs: the set of added/changed item IDs, the set of removed item
//! IDs, and the container's previous and current paths. The storage engine
//! consumes it exactly once as an unordered record stream.
//!
//! ## Streaming contract
//!
//! - [`Collection::stream`] is single-use; a second call returns
//!   [`CollectError::AlreadyStreamed`] instead of restarting population.
//! - A `Deleted` collection refuses to stream
//!   ([`CollectError::DeletedCollection`]); the producer never registers a
//!   completion expectation for one, so nothing waits on it.
//! - Every added/removed item runs as its own task, bounded by a counting
//!   semaphore sized to the configured parallelism. The driver joins all
//!   tasks, closes the channel (the one signal of stream end), then
//!   invokes the status callback exactly once.
//! - Per-item failures are recoverable and omit only that item. Items that
//!   vanished in flight, malware-flagged items and provider-unprocessable
//!   items become skip records, not failures. Cancellation is fatal.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cloudvault_core::config::{Config, MaterializationMode};
use cloudvault_core::domain::{
    CollectionState, ContainerId, ContainerPath, FaultBus, ItemId, SkipReason, SkipRecord,
};
use cloudvault_core::ports::{
    CollectionStatus, ItemHandler, ItemRecord, LazyFetch, ProviderError, RemoteItem, StatusUpdater,
};

use crate::rate_limit::ServiceLimiter;
use crate::url_cache::DownloadUrlCache;
use crate::CollectError;

// ============================================================================
// Options
// ============================================================================

/// Streaming knobs resolved from the run configuration
#[derive(Debug, Clone, Copy)]
pub struct CollectionOptions {
    /// Concurrent item tasks per streaming collection
    pub parallelism: usize,
    /// Output channel buffer
    pub buffer: usize,
    pub materialization: MaterializationMode,
}

impl CollectionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parallelism: config.parallelism.item_fetch,
            buffer: config.parallelism.collection_buffer,
            materialization: config.materialization,
        }
    }
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ============================================================================
// Collection
// ============================================================================

/// One container's unit of work for a backup run, generic over the
/// provider's item fetch-and-augment capability
pub struct Collection<H: ItemHandler> {
    handler: Arc<H>,
    container_id: ContainerId,
    added: HashMap<ItemId, DateTime<Utc>>,
    removed: HashSet<ItemId>,
    current_path: Option<ContainerPath>,
    previous_path: Option<ContainerPath>,
    state: CollectionState,
    /// True when the delta token expired and prior-run item entries must
    /// not be merged forward
    do_not_merge_items: bool,
    status_updater: Arc<dyn StatusUpdater>,
    limiter: Arc<ServiceLimiter>,
    url_cache: Arc<DownloadUrlCache>,
    options: CollectionOptions,
    streamed: AtomicBool,
}

impl<H: ItemHandler> Collection<H> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handler: Arc<H>,
        container_id: ContainerId,
        current_path: Option<ContainerPath>,
        previous_path: Option<ContainerPath>,
        status_updater: Arc<dyn StatusUpdater>,
        limiter: Arc<ServiceLimiter>,
        url_cache: Arc<DownloadUrlCache>,
        options: CollectionOptions,
        do_not_merge_items: bool,
    ) -> Self {
        let state = CollectionState::of(previous_path.as_ref(), current_path.as_ref());
        Self {
            handler,
            container_id,
            added: HashMap::new(),
            removed: HashSet::new(),
            current_path,
            previous_path,
            state,
            do_not_merge_items,
            status_updater,
            limiter,
            url_cache,
            options,
            streamed: AtomicBool::new(false),
        }
    }

    /// Marks an item eligible for streaming.
    ///
    /// Idempotent: returns true only when the item was not already present,
    /// which callers use for statistics.
    pub fn add(&mut self, item: ItemId, mod_time: DateTime<Utc>) -> bool {
        self.added.insert(item, mod_time).is_none()
    }

    /// Marks an item for tombstoning. A removal always wins over an earlier
    /// `add` of the same ID in this run: the stream yields a tombstone, not
    /// a data record.
    pub fn remove(&mut self, item: ItemId) {
        self.added.remove(&item);
        self.removed.insert(item);
    }

    /// Returns true when the collection holds no items at all.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Returns true when `item` is marked for streaming.
    pub fn contains(&self, item: &ItemId) -> bool {
        self.added.contains_key(item)
    }

    /// Number of added (non-tombstone) items.
    pub fn added_count(&self) -> usize {
        self.added.len()
    }

    /// Derived lifecycle state; pure function of the two paths.
    pub fn state(&self) -> CollectionState {
        self.state
    }

    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    pub fn current_path(&self) -> Option<&ContainerPath> {
        self.current_path.as_ref()
    }

    pub fn previous_path(&self) -> Option<&ContainerPath> {
        self.previous_path.as_ref()
    }

    pub fn do_not_merge_items(&self) -> bool {
        self.do_not_merge_items
    }

    /// Resolves the container's true path after creation with a
    /// placeholder; the state is recomputed from the new value.
    pub fn set_current_path(&mut self, path: ContainerPath) {
        self.current_path = Some(path);
        self.state = CollectionState::of(self.previous_path.as_ref(), self.current_path.as_ref());
    }

    /// Starts the item stream and returns its receiving end.
    ///
    /// Single-use: the internal producer task starts on the first call and
    /// the channel close is the only completion signal. The status callback
    /// fires exactly once after all item tasks finish.
    ///
    /// # Errors
    ///
    /// [`CollectError::DeletedCollection`] when the collection tombstones a
    /// vanished container, [`CollectError::AlreadyStreamed`] on a second
    /// call.
    pub fn stream(
        &self,
        cancel: CancellationToken,
        errs: &FaultBus,
    ) -> Result<mpsc::Receiver<ItemRecord>, CollectError> {
        if self.state.is_deleted() {
            return Err(CollectError::DeletedCollection);
        }
        if self.streamed.swap(true, Ordering::SeqCst) {
            return Err(CollectError::AlreadyStreamed);
        }

        let (tx, rx) = mpsc::channel(self.options.buffer);
        let inputs = StreamInputs {
            handler: Arc::clone(&self.handler),
            container_id: self.container_id.clone(),
            added: self.added.clone(),
            removed: self.removed.clone(),
            folder_path: self.current_path.clone(),
            status_updater: Arc::clone(&self.status_updater),
            limiter: Arc::clone(&self.limiter),
            url_cache: Arc::clone(&self.url_cache),
            options: self.options,
            errs: errs.clone(),
        };
        tokio::spawn(stream_items(inputs, tx, cancel));

        Ok(rx)
    }
}

// ============================================================================
// Streaming internals
// ============================================================================

struct StreamInputs<H: ItemHandler> {
    handler: Arc<H>,
    container_id: ContainerId,
    added: HashMap<ItemId, DateTime<Utc>>,
    removed: HashSet<ItemId>,
    folder_path: Option<ContainerPath>,
    status_updater: Arc<dyn StatusUpdater>,
    limiter: Arc<ServiceLimiter>,
    url_cache: Arc<DownloadUrlCache>,
    options: CollectionOptions,
    errs: FaultBus,
}

#[derive(Default)]
struct StreamStats {
    items_read: AtomicUsize,
    dirs_read: AtomicUsize,
    bytes: AtomicU64,
}

async fn stream_items<H: ItemHandler>(
    inputs: StreamInputs<H>,
    tx: mpsc::Sender<ItemRecord>,
    cancel: CancellationToken,
) {
    let objects = inputs.added.len() + inputs.removed.len();
    let stats = Arc::new(StreamStats::default());
    let semaphore = Arc::new(Semaphore::new(inputs.options.parallelism.max(1)));
    let mut tasks = JoinSet::new();

    debug!(
        container = %inputs.container_id,
        added = inputs.added.len(),
        removed = inputs.removed.len(),
        "streaming collection"
    );

    // Tombstones first; trivial work, but still bounded by the semaphore so
    // a slow consumer cannot pile up unbounded tasks.
    for id in inputs.removed.iter().cloned() {
        if inputs.errs.failure().is_some() {
            break;
        }
        if cancel.is_cancelled() {
            inputs.errs.fail(ProviderError::Cancelled);
            break;
        }
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let tx = tx.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let _ = tx.send(ItemRecord::tombstone(&id)).await;
        });
    }

    for (id, mod_time) in inputs.added.iter().map(|(k, v)| (k.clone(), *v)) {
        if inputs.errs.failure().is_some() {
            break;
        }
        if cancel.is_cancelled() {
            inputs.errs.fail(ProviderError::Cancelled);
            break;
        }
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let task = StreamItemTask {
            handler: Arc::clone(&inputs.handler),
            container_id: inputs.container_id.clone(),
            folder_path: inputs
                .folder_path
                .clone()
                .unwrap_or_else(ContainerPath::root),
            limiter: Arc::clone(&inputs.limiter),
            url_cache: Arc::clone(&inputs.url_cache),
            materialization: inputs.options.materialization,
            stats: Arc::clone(&stats),
            errs: inputs.errs.clone(),
        };
        let tx = tx.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _permit = permit;
            tokio::select! {
                _ = task.run(id, mod_time, tx) => {}
                _ = cancel.cancelled() => {
                    task.errs.fail(ProviderError::Cancelled);
                }
            }
        });
    }

    while tasks.join_next().await.is_some() {}

    // Closing the channel is the single linearization point consumers rely
    // on to know the stream ended.
    drop(tx);

    let successes = stats.items_read.load(Ordering::SeqCst) + stats.dirs_read.load(Ordering::SeqCst);
    let status = CollectionStatus {
        folder_path: inputs.folder_path,
        objects,
        successes,
        bytes: stats.bytes.load(Ordering::SeqCst),
        error: inputs.errs.failure(),
    };

    info!(
        container = %inputs.container_id,
        objects,
        successes,
        bytes = status.bytes,
        "done streaming collection"
    );

    inputs.status_updater.update(status);
}

struct StreamItemTask<H: ItemHandler> {
    handler: Arc<H>,
    container_id: ContainerId,
    folder_path: ContainerPath,
    limiter: Arc<ServiceLimiter>,
    url_cache: Arc<DownloadUrlCache>,
    materialization: MaterializationMode,
    stats: Arc<StreamStats>,
    errs: FaultBus,
}

impl<H: ItemHandler> StreamItemTask<H> {
    async fn run(&self, id: ItemId, mod_time: DateTime<Utc>, tx: mpsc::Sender<ItemRecord>) {
        self.limiter.acquire().await;

        let item = match self.handler.get_item(&self.container_id, &id).await {
            Ok(item) => item,
            Err(err) => {
                self.record_item_error(&id, err);
                return;
            }
        };

        let info = self.handler.augment_info(&item, &self.folder_path);
        debug!(item = %id, info = ?info, "item fetched");

        if let Some(url) = &item.download_url {
            self.url_cache.store(id.clone(), url.clone());
        }

        if item.is_container {
            let record = ItemRecord::directory(&id, item.metadata.clone());
            if tx.send(record).await.is_ok() {
                self.stats.dirs_read.fetch_add(1, Ordering::SeqCst);
            }
            return;
        }

        let record = match self.materialization {
            MaterializationMode::Eager => {
                let bytes = match download_with_refresh(
                    self.handler.as_ref(),
                    &self.url_cache,
                    &self.container_id,
                    &item,
                )
                .await
                {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        self.record_item_error(&id, err);
                        return;
                    }
                };
                ItemRecord::eager_file(&id, mod_time, bytes, item.metadata.clone())
            }
            MaterializationMode::Lazy => {
                let fetch = Arc::new(LazyItemContent {
                    handler: Arc::clone(&self.handler),
                    url_cache: Arc::clone(&self.url_cache),
                    container_id: self.container_id.clone(),
                    item: item.clone(),
                });
                ItemRecord::lazy_file(&id, mod_time, item.metadata.clone(), fetch)
            }
        };

        if tx.send(record).await.is_ok() {
            self.stats.items_read.fetch_add(1, Ordering::SeqCst);
            self.stats.bytes.fetch_add(item.size, Ordering::SeqCst);
        }
    }

    /// Routes a per-item provider error into the skip/recoverable/fatal
    /// taxonomy. Only cancellation escalates.
    fn record_item_error(&self, id: &ItemId, err: ProviderError) {
        match err {
            ProviderError::Cancelled => self.errs.fail(ProviderError::Cancelled),
            ProviderError::NotFound(_) => {
                debug!(item = %id, "item not found, probably deleted in flight");
                self.errs.add_skip(SkipRecord::new(
                    SkipReason::NotFound,
                    Some(id.clone()),
                    "deleted between enumeration and fetch",
                ));
            }
            ProviderError::Malware(reason) => {
                warn!(item = %id, "item flagged as malware, skipping");
                self.errs
                    .add_skip(SkipRecord::new(SkipReason::Malware, Some(id.clone()), reason));
            }
            ProviderError::Unprocessable(reason) => {
                warn!(item = %id, "provider cannot process item, skipping");
                self.errs.add_skip(SkipRecord::new(
                    SkipReason::Unprocessable,
                    Some(id.clone()),
                    reason,
                ));
            }
            err => {
                self.errs
                    .add_recoverable(format!("streaming item {id}: {err}"));
            }
        }
    }
}

// ============================================================================
// Content download with URL refresh
// ============================================================================

/// Downloads item content, retrying once around an expired download URL.
///
/// Flow: direct download; on unauthorized, try the URL cache; on cache
/// miss or a stale cached URL, re-fetch the item's properties for a fresh
/// URL and retry once more. Anything past that surfaces to the caller.
async fn download_with_refresh<H: ItemHandler>(
    handler: &H,
    url_cache: &DownloadUrlCache,
    container_id: &ContainerId,
    item: &RemoteItem,
) -> Result<Vec<u8>, ProviderError> {
    let err = match handler.download(item).await {
        Ok(bytes) => return Ok(bytes),
        Err(err) if err.is_expired_url() => err,
        Err(err) => return Err(err),
    };

    debug!(item = %item.id, "download url expired, consulting cache");

    if let Some(cached) = url_cache.get(&item.id) {
        if cached.deleted {
            return Err(ProviderError::NotFound(format!(
                "item {} deleted per url cache",
                item.id
            )));
        }
        match handler.download_by_url(&cached.url).await {
            Ok(bytes) => {
                debug!(item = %item.id, "downloaded via cached url");
                return Ok(bytes);
            }
            Err(e) if e.is_expired_url() => {
                debug!(item = %item.id, "cached url stale, refetching item");
            }
            Err(e) => return Err(e),
        }
    }

    // Cache miss or stale entry: one item re-fetch for a fresh URL, then
    // one final attempt.
    let fresh = handler.get_item(container_id, &item.id).await?;
    let Some(url) = fresh.download_url else {
        return Err(err);
    };
    url_cache.store(item.id.clone(), url.clone());
    handler.download_by_url(&url).await
}

/// Deferred content fetch capturing everything the download path needs
struct LazyItemContent<H: ItemHandler> {
    handler: Arc<H>,
    url_cache: Arc<DownloadUrlCache>,
    container_id: ContainerId,
    item: RemoteItem,
}

#[async_trait::async_trait]
impl<H: ItemHandler> LazyFetch for LazyItemContent<H> {
    async fn fetch(&self) -> Result<Vec<u8>, ProviderError> {
        download_with_refresh(
            self.handler.as_ref(),
            &self.url_cache,
            &self.container_id,
            &self.item,
        )
        .await
    }
}
