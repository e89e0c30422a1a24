//! Collection producer
//!
//! Drives one [`Collection`] construction per container discovered by the
//! container cache, injecting each with the enumerator's added/removed ID
//! sets and the resolved current/previous paths.
//!
//! ## Previous-run metadata
//!
//! Incremental mode needs two JSON maps persisted by the prior backup for
//! the category: container-ID → delta token and container-ID → path. Both
//! must be present and parseable; a missing or partially-written file
//! forces the whole category back to a full backup, explicitly flagged
//! through `can_use_previous_backup = false` so downstream backup-detail
//! merging never assumes incremental continuity. A token the provider
//! rejects mid-enumeration flips the same flag and marks that container's
//! collection `do_not_merge_items`.
//!
//! ## Completion bookkeeping
//!
//! The producer registers exactly one awaiting-completion count per
//! non-deleted collection. Deleted (tombstone) collections are never
//! registered: they never stream, so no completion signal will ever
//! arrive for them.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use cloudvault_core::domain::{ContainerId, ContainerPath, DeltaToken, FaultBus};
use cloudvault_core::ports::{ContainerResolver, DeltaQuery, ItemHandler, StatusUpdater};

use crate::cache::ContainerCache;
use crate::collection::{Collection, CollectionOptions};
use crate::enumerator::DeltaEnumerator;
use crate::pending::PendingCompletions;
use crate::rate_limit::RateLimiterRegistry;
use crate::url_cache::DownloadUrlCache;
use crate::CollectError;

// ============================================================================
// Previous-run metadata
// ============================================================================

/// Parsed metadata from the previous backup for one category
#[derive(Debug, Clone, Default)]
pub struct PreviousMetadata {
    pub delta_tokens: HashMap<ContainerId, DeltaToken>,
    pub paths: HashMap<ContainerId, ContainerPath>,
    /// False when either metadata file was missing or malformed; the
    /// category runs a full backup
    pub can_use_previous_backup: bool,
}

impl PreviousMetadata {
    /// Parses the category's two metadata files as read back from storage.
    ///
    /// `None` or malformed content in either file yields empty maps and
    /// `can_use_previous_backup = false`. Entries present in the token map
    /// but missing a recorded path are dropped as incomplete; a path
    /// without a token is kept (that container just enumerates fully).
    pub fn parse(delta_json: Option<&[u8]>, paths_json: Option<&[u8]>) -> Self {
        let (Some(delta_json), Some(paths_json)) = (delta_json, paths_json) else {
            info!("previous metadata incomplete, forcing full backup for category");
            return Self::default();
        };

        let tokens_raw: HashMap<String, String> = match serde_json::from_slice(delta_json) {
            Ok(m) => m,
            Err(err) => {
                warn!(error = %err, "unreadable delta-token metadata, forcing full backup");
                return Self::default();
            }
        };
        let paths_raw: HashMap<String, String> = match serde_json::from_slice(paths_json) {
            Ok(m) => m,
            Err(err) => {
                warn!(error = %err, "unreadable path metadata, forcing full backup");
                return Self::default();
            }
        };

        let mut paths = HashMap::new();
        for (id, path) in paths_raw {
            let (Ok(id), Ok(path)) = (ContainerId::new(id), ContainerPath::new(path)) else {
                warn!("dropping malformed path metadata entry");
                continue;
            };
            paths.insert(id, path);
        }

        let mut delta_tokens = HashMap::new();
        for (id, token) in tokens_raw {
            let (Ok(id), Ok(token)) = (ContainerId::new(id), DeltaToken::new(token)) else {
                warn!("dropping malformed delta-token metadata entry");
                continue;
            };
            // A token without a recorded path is incomplete state; the
            // container cannot be matched across runs, so drop it.
            if paths.contains_key(&id) {
                delta_tokens.insert(id, token);
            }
        }

        Self {
            delta_tokens,
            paths,
            can_use_previous_backup: true,
        }
    }

    /// Serializes a token map into the persisted metadata file format.
    pub fn encode_delta_tokens(tokens: &HashMap<ContainerId, DeltaToken>) -> Vec<u8> {
        let map: HashMap<&str, &str> = tokens
            .iter()
            .map(|(id, t)| (id.as_str(), t.as_str()))
            .collect();
        serde_json::to_vec(&map).unwrap_or_else(|_| Value::Null.to_string().into_bytes())
    }

    /// Serializes a path map into the persisted metadata file format.
    pub fn encode_paths(paths: &HashMap<ContainerId, ContainerPath>) -> Vec<u8> {
        let map: HashMap<&str, &str> = paths
            .iter()
            .map(|(id, p)| (id.as_str(), p.as_str()))
            .collect();
        serde_json::to_vec(&map).unwrap_or_else(|_| Value::Null.to_string().into_bytes())
    }
}

// ============================================================================
// Scope
// ============================================================================

/// Which part of the hierarchy the backup was asked to cover
#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Path prefixes to include; empty means everything
    prefixes: Vec<ContainerPath>,
}

impl Scope {
    /// Includes the whole hierarchy.
    pub fn all() -> Self {
        Self::default()
    }

    /// Includes only containers at or below the given paths.
    pub fn subtrees(prefixes: Vec<ContainerPath>) -> Self {
        Self { prefixes }
    }

    /// Returns true when `path` falls inside the scope.
    pub fn includes(&self, path: &ContainerPath) -> bool {
        if self.prefixes.is_empty() {
            return true;
        }
        self.prefixes.iter().any(|prefix| {
            path == prefix
                || prefix.is_root()
                || path.as_str().starts_with(&format!("{}/", prefix.as_str()))
        })
    }
}

// ============================================================================
// Producer
// ============================================================================

/// Everything produced for one category of one backup run
pub struct ProducerOutput<H: ItemHandler> {
    pub collections: Vec<Collection<H>>,
    /// False when incremental continuity broke anywhere in the category
    pub can_use_previous_backup: bool,
    /// Fresh token map for the storage layer to persist for the next run
    pub delta_tokens: HashMap<ContainerId, DeltaToken>,
    /// Fresh path map for the storage layer to persist for the next run
    pub paths: HashMap<ContainerId, ContainerPath>,
}

/// Builds the full set of collections for one category of a backup run
pub struct CollectionProducer<H: ItemHandler, Q: DeltaQuery> {
    handler: Arc<H>,
    enumerator: DeltaEnumerator<Q>,
    status_updater: Arc<dyn StatusUpdater>,
    limiters: Arc<RateLimiterRegistry>,
    url_cache: Arc<DownloadUrlCache>,
    options: CollectionOptions,
    pending: Arc<PendingCompletions>,
}

impl<H: ItemHandler, Q: DeltaQuery> CollectionProducer<H, Q> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handler: Arc<H>,
        enumerator: DeltaEnumerator<Q>,
        status_updater: Arc<dyn StatusUpdater>,
        limiters: Arc<RateLimiterRegistry>,
        url_cache: Arc<DownloadUrlCache>,
        options: CollectionOptions,
        pending: Arc<PendingCompletions>,
    ) -> Self {
        Self {
            handler,
            enumerator,
            status_updater,
            limiters,
            url_cache,
            options,
            pending,
        }
    }

    /// Produces one collection per in-scope container.
    ///
    /// `cache` must have been constructed with the category's previous path
    /// map; this call populates it. Per-container enumeration failures are
    /// recoverable (the container is skipped this run); only a root walk
    /// failure aborts.
    pub async fn produce<R: ContainerResolver>(
        &self,
        cache: &mut ContainerCache<R>,
        scope: &Scope,
        previous: &PreviousMetadata,
        errs: &FaultBus,
    ) -> Result<ProducerOutput<H>, CollectError> {
        cache.populate(errs).await?;

        let limiter = self.limiters.for_service(self.handler.service());
        let mut can_use_previous_backup = previous.can_use_previous_backup;
        let mut collections = Vec::new();
        let mut delta_tokens = HashMap::new();

        let resolved: Vec<_> = cache
            .containers()
            .map(|r| (r.container.id().clone(), r.path.clone()))
            .collect();

        for (id, path) in resolved {
            if errs.failure().is_some() {
                break;
            }
            if !scope.includes(&path) {
                debug!(container = %id, path = %path, "container outside scope, skipping");
                continue;
            }

            let prev_token = if previous.can_use_previous_backup {
                previous.delta_tokens.get(&id)
            } else {
                None
            };

            let result = match self.enumerator.enumerate(&id, prev_token, None).await {
                Ok(result) => result,
                Err(err) => {
                    errs.add_recoverable(format!("enumerating container {id}: {err}"));
                    continue;
                }
            };

            if result.delta.reset {
                info!(container = %id, "delta token reset, category loses incremental continuity");
                can_use_previous_backup = false;
            }
            if let Some(token) = &result.delta.token {
                delta_tokens.insert(id.clone(), token.clone());
            }

            let prev_path = cache.previous_path_of(&id).cloned();
            let mut collection = Collection::new(
                Arc::clone(&self.handler),
                id.clone(),
                Some(path),
                prev_path,
                Arc::clone(&self.status_updater),
                Arc::clone(&limiter),
                Arc::clone(&self.url_cache),
                self.options,
                result.delta.reset,
            );

            for (item, mod_time) in result.added {
                collection.add(item, mod_time);
            }
            for item in result.removed {
                collection.remove(item);
            }

            // Every streamable collection owes the write pipeline exactly
            // one completion signal.
            self.pending.register();
            collections.push(collection);
        }

        // Vanished containers become tombstone collections so storage can
        // issue deletions instead of silently losing history. They never
        // stream, so they are never registered as pending.
        for (id, prev_path) in cache.deleted_containers() {
            debug!(container = %id, previous_path = %prev_path, "emitting tombstone collection");
            collections.push(Collection::new(
                Arc::clone(&self.handler),
                id,
                None,
                Some(prev_path),
                Arc::clone(&self.status_updater),
                Arc::clone(&limiter),
                Arc::clone(&self.url_cache),
                self.options,
                false,
            ));
        }

        info!(
            collections = collections.len(),
            can_use_previous_backup, "collection production complete"
        );

        Ok(ProducerOutput {
            collections,
            can_use_previous_backup,
            delta_tokens,
            paths: cache.current_paths(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(s: &str) -> ContainerId {
        ContainerId::new(s).unwrap()
    }

    fn cpath(s: &str) -> ContainerPath {
        ContainerPath::new(s).unwrap()
    }

    mod previous_metadata_tests {
        use super::*;

        fn tokens_json() -> Vec<u8> {
            serde_json::to_vec(&HashMap::from([("c1", "tok-1"), ("c2", "tok-2")])).unwrap()
        }

        fn paths_json() -> Vec<u8> {
            serde_json::to_vec(&HashMap::from([("c1", "/Inbox"), ("c3", "/Sent")])).unwrap()
        }

        #[test]
        fn test_both_files_present_enables_incremental() {
            let meta = PreviousMetadata::parse(Some(&tokens_json()), Some(&paths_json()));
            assert!(meta.can_use_previous_backup);
            // c2 has a token but no recorded path: incomplete, dropped
            assert_eq!(meta.delta_tokens.len(), 1);
            assert!(meta.delta_tokens.contains_key(&cid("c1")));
            // c3 has a path but no token: kept, will enumerate fully
            assert_eq!(meta.paths.len(), 2);
        }

        #[test]
        fn test_missing_file_forces_full_backup() {
            let meta = PreviousMetadata::parse(None, Some(&paths_json()));
            assert!(!meta.can_use_previous_backup);
            assert!(meta.delta_tokens.is_empty());
            assert!(meta.paths.is_empty());

            let meta = PreviousMetadata::parse(Some(&tokens_json()), None);
            assert!(!meta.can_use_previous_backup);
        }

        #[test]
        fn test_malformed_file_forces_full_backup() {
            let meta = PreviousMetadata::parse(Some(b"{not json"), Some(&paths_json()));
            assert!(!meta.can_use_previous_backup);
        }

        #[test]
        fn test_encode_roundtrip() {
            let tokens = HashMap::from([(cid("c1"), DeltaToken::new("tok-1").unwrap())]);
            let paths = HashMap::from([(cid("c1"), cpath("/Inbox"))]);

            let meta = PreviousMetadata::parse(
                Some(&PreviousMetadata::encode_delta_tokens(&tokens)),
                Some(&PreviousMetadata::encode_paths(&paths)),
            );
            assert!(meta.can_use_previous_backup);
            assert_eq!(meta.delta_tokens, tokens);
            assert_eq!(meta.paths, paths);
        }
    }

    mod scope_tests {
        use super::*;

        #[test]
        fn test_all_includes_everything() {
            let scope = Scope::all();
            assert!(scope.includes(&cpath("/")));
            assert!(scope.includes(&cpath("/Docs/Reports")));
        }

        #[test]
        fn test_subtree_includes_self_and_descendants() {
            let scope = Scope::subtrees(vec![cpath("/Docs")]);
            assert!(scope.includes(&cpath("/Docs")));
            assert!(scope.includes(&cpath("/Docs/Reports")));
            assert!(!scope.includes(&cpath("/Pictures")));
            // prefix match must respect segment boundaries
            assert!(!scope.includes(&cpath("/Docserver")));
        }

        #[test]
        fn test_root_subtree_includes_everything() {
            let scope = Scope::subtrees(vec![ContainerPath::root()]);
            assert!(scope.includes(&cpath("/anything")));
        }
    }
}
