//! Delta/paging enumerator
//!
//! Wraps the provider's delta-query and paged-listing port into a uniform
//! "added IDs + removed IDs + continuation token" view per container.
//!
//! ## Enumeration Flow
//!
//! 1. With a previous token, run an incremental delta enumeration: only
//!    items changed since the token come back, tombstones included.
//! 2. Without a token, or when the provider rejects the token as expired
//!    ([`ProviderError::InvalidDelta`]), fall back to a full listing and
//!    synthesize the removed set by diffing against the previously
//!    recorded item IDs (when available).
//! 3. Pages are followed through opaque `next_link` continuations until
//!    the provider hands out the next run's delta token.
//!
//! Removal is only ever derived from explicit provider tombstones during
//! delta enumeration — never from absence within a page. Within one
//! enumeration the last entry for an ID wins, which tolerates items
//! modified concurrently with paging.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cloudvault_core::domain::{ContainerId, DeltaToken, ItemId};
use cloudvault_core::ports::{DeltaQuery, ProviderError};

// ============================================================================
// Result types
// ============================================================================

/// Continuation-token outcome of one enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaUpdate {
    /// Token for the next incremental run, when the provider issued one
    pub token: Option<DeltaToken>,
    /// True when the previous token was rejected and enumeration restarted
    /// from scratch; downstream must not merge prior-run item state
    pub reset: bool,
}

/// Uniform added/removed view over one container's changes
#[derive(Debug, Clone, Default)]
pub struct EnumerationResult {
    /// Item ID → last remote modification time
    pub added: HashMap<ItemId, DateTime<Utc>>,
    /// Items the provider tombstoned (or that vanished from a full listing)
    pub removed: HashSet<ItemId>,
    pub delta: DeltaUpdate,
}

// ============================================================================
// DeltaEnumerator
// ============================================================================

/// Enumerates one container at a time through a [`DeltaQuery`] port
pub struct DeltaEnumerator<Q: DeltaQuery> {
    query: Q,
}

impl<Q: DeltaQuery> DeltaEnumerator<Q> {
    pub fn new(query: Q) -> Self {
        Self { query }
    }

    /// Enumerates changes in `container` since `prev_token`.
    ///
    /// `prev_item_ids` is the item-ID set recorded by the previous backup,
    /// used to synthesize removals when a full listing is needed. Without
    /// it, a full listing reports every current item as added and nothing
    /// as removed.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Throttled`] propagates for the API-client
    /// collaborator to back off and retry. [`ProviderError::InvalidDelta`]
    /// is consumed once by restarting token-less; a second occurrence
    /// propagates.
    pub async fn enumerate(
        &self,
        container: &ContainerId,
        prev_token: Option<&DeltaToken>,
        prev_item_ids: Option<&HashSet<ItemId>>,
    ) -> Result<EnumerationResult, ProviderError> {
        match prev_token {
            Some(token) => match self.delta_enumerate(container, Some(token)).await {
                Ok(result) => Ok(result),
                Err(ProviderError::InvalidDelta) => {
                    info!(
                        container = %container,
                        "delta token rejected, falling back to full enumeration"
                    );
                    let mut result = self.full_enumerate(container, prev_item_ids).await?;
                    result.delta.reset = true;
                    Ok(result)
                }
                Err(err) => Err(err),
            },
            None => self.full_enumerate(container, prev_item_ids).await,
        }
    }

    /// Incremental enumeration through the delta endpoint.
    async fn delta_enumerate(
        &self,
        container: &ContainerId,
        token: Option<&DeltaToken>,
    ) -> Result<EnumerationResult, ProviderError> {
        let mut result = EnumerationResult::default();
        let mut next_link: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self
                .query
                .delta_page(container, token, next_link.as_deref())
                .await?;
            pages += 1;

            for entry in page.items {
                if entry.is_container {
                    // Child containers are walked by the container cache
                    continue;
                }
                if entry.deleted {
                    result.added.remove(&entry.id);
                    result.removed.insert(entry.id);
                } else {
                    result.removed.remove(&entry.id);
                    result
                        .added
                        .insert(entry.id, entry.modified.unwrap_or_else(Utc::now));
                }
            }

            if page.delta_token.is_some() {
                result.delta.token = page.delta_token;
            }

            match page.next_link {
                Some(link) => next_link = Some(link),
                None => break,
            }
        }

        if result.delta.token.is_none() {
            warn!(
                container = %container,
                "delta enumeration finished without a token; next run will be full"
            );
        }

        debug!(
            container = %container,
            pages,
            added = result.added.len(),
            removed = result.removed.len(),
            "delta enumeration complete"
        );

        Ok(result)
    }

    /// Full (non-incremental) listing with removal synthesis.
    async fn full_enumerate(
        &self,
        container: &ContainerId,
        prev_item_ids: Option<&HashSet<ItemId>>,
    ) -> Result<EnumerationResult, ProviderError> {
        let mut result = EnumerationResult::default();
        let mut next_link: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self.query.list_page(container, next_link.as_deref()).await?;
            pages += 1;

            for entry in page.items {
                if entry.is_container || entry.deleted {
                    continue;
                }
                result
                    .added
                    .insert(entry.id, entry.modified.unwrap_or_else(Utc::now));
            }

            if page.delta_token.is_some() {
                result.delta.token = page.delta_token;
            }

            match page.next_link {
                Some(link) => next_link = Some(link),
                None => break,
            }
        }

        // Removals cannot come from tombstones here: anything previously
        // recorded but absent from the current listing has left the container.
        if let Some(previous) = prev_item_ids {
            for id in previous {
                if !result.added.contains_key(id) {
                    result.removed.insert(id.clone());
                }
            }
        }

        debug!(
            container = %container,
            pages,
            added = result.added.len(),
            removed = result.removed.len(),
            "full enumeration complete"
        );

        Ok(result)
    }
}
