//! Link-share restoration
//!
//! Unlike direct permissions, link shares are inherited from **all**
//! custom-sharing ancestors of an item, not just the nearest one. And the
//! provider offers no way to delete an inherited link share directly: the
//! only lever is creating a link with `retain_inherited_permissions =
//! false`, which wipes every inherited share (and permission) in one go.
//! The caller must know when that happened — the reset means the item's
//! direct permissions all have to be re-added too.

use dashmap::DashMap;
use tracing::{debug, info};

use cloudvault_core::domain::{
    ContainerPath, FaultBus, ItemId, LinkShare, Metadata, SharingMode, SkipReason, SkipRecord,
};
use cloudvault_core::ports::{LinkShareRequest, PermissionEditor, ProviderError};

use crate::caches::{AvailableEntities, IdRemap};
use crate::RestoreError;

// ============================================================================
// Ancestor resolution
// ============================================================================

/// Collects the link shares inherited from every custom-sharing ancestor
/// of `item_path`, walking up to the root.
///
/// A missing ancestor entry is an error; the cache must be populated
/// top-down before children restore.
pub fn compute_previous_link_shares(
    item_path: &ContainerPath,
    parent_metas: &DashMap<ContainerPath, Metadata>,
) -> Result<Vec<LinkShare>, RestoreError> {
    let mut link_shares = Vec::new();
    let mut parent = item_path.parent();

    while let Some(dir) = parent {
        if dir.is_root() {
            break;
        }

        let meta = parent_metas
            .get(&dir)
            .map(|m| m.value().clone())
            .ok_or_else(|| RestoreError::MissingParentMetadata(dir.clone()))?;

        // Any sharing change flips the mode to custom, so filtering on it
        // finds exactly the ancestors that contribute inherited shares.
        if meta.sharing_mode == SharingMode::Custom {
            link_shares.extend(meta.link_shares.iter().cloned());
        }

        parent = dir.parent();
    }

    Ok(link_shares)
}

// ============================================================================
// Entity filtering
// ============================================================================

/// Drops link shares none of whose entities resolve in the target tenant.
///
/// Shares that keep at least one resolvable entity are kept with the
/// unresolvable entities removed. Fully dropped shares are marked
/// non-restorable so later deletion logic skips them.
pub fn filter_unavailable_link_shares(
    shares: Vec<LinkShare>,
    available: &AvailableEntities,
    remap: &IdRemap,
    errs: &FaultBus,
) -> Vec<LinkShare> {
    if !available.is_loaded() {
        debug!("entity lookups not loaded, not filtering link shares");
        return shares;
    }

    let mut filtered = Vec::with_capacity(shares.len());
    for mut share in shares {
        share
            .entities
            .retain(|e| available.resolves(e.entity_type, &e.id));

        if share.entities.is_empty() {
            errs.add_skip(SkipRecord::new(
                SkipReason::UnresolvableEntity,
                None,
                "link share has no resolvable entities",
            ));
            remap.mark_non_restorable(share.id);
            continue;
        }
        filtered.push(share);
    }
    filtered
}

// ============================================================================
// Apply
// ============================================================================

/// Applies a link-share diff to one item.
///
/// Returns true when inherited sharing state was reset, which happens on
/// the first link creation sent with `retain_inherited_permissions =
/// false`. Individual creation failures are recoverable.
pub async fn apply_link_share_updates<E: PermissionEditor + ?Sized>(
    editor: &E,
    item: &ItemId,
    added: Vec<LinkShare>,
    removed: Vec<LinkShare>,
    remap: &IdRemap,
    errs: &FaultBus,
) -> Result<bool, RestoreError> {
    let mut did_reset = false;
    let mut first_create = true;
    let any_added = !added.is_empty();

    for share in added {
        if errs.failure().is_some() {
            break;
        }

        // Password-protected links cannot be recreated faithfully: the
        // password is not recoverable and the original URL cannot be kept.
        if share.has_password {
            errs.add_skip(SkipRecord::new(
                SkipReason::PasswordProtectedLink,
                None,
                format!("link share {} has a password", share.id),
            ));
            continue;
        }

        let retain = if first_create {
            first_create = false;
            // Clearing removed inherited shares is only possible here; the
            // reset also wipes inherited permissions, which the caller
            // compensates for.
            removed.is_empty()
        } else {
            true
        };
        if !retain {
            did_reset = true;
        }

        let request = LinkShareRequest {
            link_type: share.link.link_type.clone(),
            scope: share.link.scope.clone(),
            expiration: share.expiration,
            entity_ids: share.entities.iter().map(|e| e.id.clone()).collect(),
            retain_inherited_permissions: retain,
            send_notification: false,
        };

        match editor.post_item_link_share_update(item, &request).await {
            Ok(new_id) => {
                remap.mark_restored(share.id, new_id);
            }
            Err(ProviderError::UnresolvableEntity(reason)) => {
                info!(item = %item, reason, "unable to restore link share");
                remap.mark_non_restorable(share.id);
            }
            Err(ProviderError::SharingDisabled(reason)) => {
                info!(item = %item, reason, "sharing disabled, link share not restored");
            }
            Err(err) => {
                errs.add_recoverable(format!("restoring link share on {item}: {err}"));
            }
        }
    }

    // Inherited shares were removed but nothing re-created: recreate the
    // state by creating a throwaway users-scoped link with inheritance
    // reset, then deleting it.
    if !removed.is_empty() && !any_added {
        let request = LinkShareRequest {
            link_type: "view".to_string(),
            // a users link with no users grants nobody access even if the
            // follow-up delete fails
            scope: "users".to_string(),
            expiration: None,
            entity_ids: Vec::new(),
            retain_inherited_permissions: false,
            send_notification: false,
        };

        let new_id = editor.post_item_link_share_update(item, &request).await?;
        did_reset = true;
        editor.delete_item_permission(item, &new_id).await?;
        debug!(item = %item, "inherited link shares cleared via throwaway link");
    }

    Ok(did_reset)
}
