//! Per-item restore orchestration
//!
//! Ties ancestor resolution, diffing, entity filtering and the ordered
//! apply together for one restored item. Items with inherited sharing
//! short-circuit: their state comes for free with the parent.

use std::sync::Arc;

use tracing::{debug, info};

use cloudvault_core::domain::{
    diff_link_shares, diff_permissions, ContainerPath, FaultBus, ItemId, Metadata, SharingMode,
};
use cloudvault_core::ports::{PermissionEditor, ProviderError};

use crate::caches::RestoreCaches;
use crate::link_shares::{
    apply_link_share_updates, compute_previous_link_shares, filter_unavailable_link_shares,
};
use crate::permissions::{
    apply_permission_updates, compute_previous_metadata, filter_unavailable_permissions,
};
use crate::RestoreError;

/// Restores sharing state item by item through an injected editor
pub struct PermissionRestorer {
    editor: Arc<dyn PermissionEditor>,
    caches: Arc<RestoreCaches>,
}

impl PermissionRestorer {
    pub fn new(editor: Arc<dyn PermissionEditor>, caches: Arc<RestoreCaches>) -> Self {
        Self { editor, caches }
    }

    /// Records a restored directory's metadata so its children can resolve
    /// their ancestor chain. Must be called top-down as directories are
    /// restored, before any child item's [`PermissionRestorer::restore_item`].
    pub fn record_directory(&self, path: ContainerPath, meta: Metadata) {
        self.caches.record_directory(path, meta);
    }

    /// Restores one item's sharing state.
    ///
    /// Computes the diff between what the ancestor chain implies is
    /// inherited and what the item's stored metadata says, then removes
    /// stale entries before adding new ones. Link shares go first: when
    /// their restoration had to reset inherited state, every direct
    /// permission of the item is re-added rather than diffed.
    ///
    /// Individual failures are recoverable and accumulated on `errs`; this
    /// method only returns early, never propagates them.
    pub async fn restore_item(
        &self,
        item: &ItemId,
        item_path: &ContainerPath,
        current: &Metadata,
        errs: &FaultBus,
    ) {
        if current.sharing_mode == SharingMode::Inherited {
            return;
        }

        debug!(item = %item, path = %item_path, "restoring custom sharing state");

        let mut did_reset = false;

        match compute_previous_link_shares(item_path, &self.caches.parent_dir_to_meta) {
            Ok(previous_shares) => {
                let (ls_added, ls_removed) =
                    diff_link_shares(&previous_shares, &current.link_shares);
                let ls_added = filter_unavailable_link_shares(
                    ls_added,
                    &self.caches.available,
                    &self.caches.link_share_ids,
                    errs,
                );

                match apply_link_share_updates(
                    self.editor.as_ref(),
                    item,
                    ls_added,
                    ls_removed,
                    &self.caches.link_share_ids,
                    errs,
                )
                .await
                {
                    Ok(reset) => did_reset = reset,
                    Err(err) => {
                        errs.add_recoverable(format!("updating link shares on {item}: {err}"))
                    }
                }
            }
            Err(err) => {
                errs.add_recoverable(format!("previous link shares for {item}: {err}"));
            }
        }

        let previous = match compute_previous_metadata(item_path, &self.caches.parent_dir_to_meta)
        {
            Ok(previous) => previous,
            Err(err) => {
                errs.add_recoverable(format!("previous metadata for {item}: {err}"));
                return;
            }
        };

        let (mut perm_added, mut perm_removed) =
            diff_permissions(&previous.permissions, &current.permissions);

        if did_reset {
            // The link-share reset wiped the item's inherited permissions;
            // everything it currently holds must be created from scratch.
            info!(item = %item, "link share creation reset inherited permissions");
            perm_removed = Vec::new();
            perm_added = current.permissions.clone();
        }

        let perm_added = filter_unavailable_permissions(
            perm_added,
            &self.caches.available,
            &self.caches.perm_ids,
            errs,
        );

        match apply_permission_updates(
            self.editor.as_ref(),
            item,
            perm_added,
            perm_removed,
            &self.caches.perm_ids,
            errs,
        )
        .await
        {
            Ok(()) => {}
            Err(RestoreError::Provider(ProviderError::SharingDisabled(reason))) => {
                info!(item = %item, reason, "sharing disabled, permissions not restored");
            }
            Err(err) => {
                errs.add_recoverable(format!("updating permissions on {item}: {err}"));
            }
        }
    }
}
