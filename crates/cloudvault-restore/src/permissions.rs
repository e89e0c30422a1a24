//! Direct permission restoration
//!
//! Computes what the nearest custom-sharing ancestor implies an item
//! inherits, diffs it against the item's own stored permissions, and
//! applies the difference through the editing capability.
//!
//! The ordering is fixed: stale permissions are removed before new ones
//! are added. Removals address IDs the provider assigned during this
//! restore, resolved through the ID remap; IDs marked non-restorable are
//! skipped rather than deleted.

use dashmap::DashMap;
use tracing::{debug, info};

use cloudvault_core::domain::{
    ContainerPath, EntityType, FaultBus, ItemId, Metadata, Permission, SharingMode, SkipReason,
    SkipRecord,
};
use cloudvault_core::ports::{PermissionEditor, PermissionInvite, ProviderError};

use crate::caches::{AvailableEntities, IdRemap};
use crate::RestoreError;

/// Role the provider refuses to assign through the invite path
const OWNER_ROLE: &str = "owner";

// ============================================================================
// Ancestor resolution
// ============================================================================

/// Walks up from `item_path` and returns the metadata of the nearest
/// ancestor with custom sharing.
///
/// The cache is populated top-down during restore, so every ancestor of a
/// restored item must already be present; a missing entry is an error.
/// Reaching the root without finding custom sharing yields the default
/// (inherited, empty) metadata.
pub fn compute_previous_metadata(
    item_path: &ContainerPath,
    parent_metas: &DashMap<ContainerPath, Metadata>,
) -> Result<Metadata, RestoreError> {
    let mut parent = item_path.parent();

    while let Some(dir) = parent {
        if dir.is_root() {
            return Ok(Metadata::default());
        }

        let meta = parent_metas
            .get(&dir)
            .map(|m| m.value().clone())
            .ok_or_else(|| RestoreError::MissingParentMetadata(dir.clone()))?;

        if meta.sharing_mode == SharingMode::Custom {
            return Ok(meta);
        }

        parent = dir.parent();
    }

    Ok(Metadata::default())
}

// ============================================================================
// Entity filtering
// ============================================================================

/// Drops permissions whose entity no longer resolves in the target tenant.
///
/// Dropped permissions are marked non-restorable in the remap so later
/// removal logic never tries to delete an ID that was never created, and
/// recorded as skips for the final report.
pub fn filter_unavailable_permissions(
    perms: Vec<Permission>,
    available: &AvailableEntities,
    remap: &IdRemap,
    errs: &FaultBus,
) -> Vec<Permission> {
    if !available.is_loaded() {
        debug!("entity lookups not loaded, not filtering permissions");
        return perms;
    }

    let mut filtered = Vec::with_capacity(perms.len());
    for perm in perms {
        if available.resolves(perm.entity_type, &perm.entity_id) {
            filtered.push(perm);
            continue;
        }
        errs.add_skip(SkipRecord::new(
            SkipReason::UnresolvableEntity,
            None,
            format!("permission entity {} not in tenant", perm.entity_id),
        ));
        remap.mark_non_restorable(perm.id);
    }
    filtered
}

// ============================================================================
// Apply
// ============================================================================

/// Applies a permission diff to one item: removals first, then additions.
///
/// # Errors
///
/// A failed deletion aborts this item's permission restore (the provider
/// state is no longer predictable); individual addition failures are
/// recoverable and accumulated.
pub async fn apply_permission_updates<E: PermissionEditor + ?Sized>(
    editor: &E,
    item: &ItemId,
    added: Vec<Permission>,
    removed: Vec<Permission>,
    remap: &IdRemap,
    errs: &FaultBus,
) -> Result<(), RestoreError> {
    for perm in removed {
        let Some(restored) = remap.lookup(&perm.id) else {
            errs.add_recoverable(RestoreError::UnknownPermissionId(perm.id.to_string()));
            continue;
        };
        let Some(restored_id) = restored else {
            // Never created on the parent, nothing to delete
            continue;
        };

        editor.delete_item_permission(item, &restored_id).await?;
        debug!(item = %item, permission = %restored_id, "stale permission removed");
    }

    for perm in added {
        if errs.failure().is_some() {
            break;
        }

        // The provider rejects owner grants through this path; drop the
        // role, and the whole permission when nothing else remains.
        let roles: Vec<String> = perm
            .roles
            .iter()
            .filter(|r| !r.eq_ignore_ascii_case(OWNER_ROLE))
            .cloned()
            .collect();
        if roles.is_empty() {
            debug!(item = %item, "skipping owner-only permission");
            continue;
        }
        if perm.entity_type == EntityType::SiteGroup {
            // Site-group IDs are site-local integers; they never resolve in
            // the restore tenant.
            continue;
        }

        let invite = PermissionInvite {
            entity_id: perm.entity_id.clone(),
            email: perm.email.clone(),
            roles,
            expiration: perm.expiration,
            require_sign_in: true,
            send_invitation: false,
        };

        match editor.post_item_permission_update(item, &invite).await {
            Ok(new_id) => {
                remap.mark_restored(perm.id, new_id);
            }
            Err(ProviderError::UnresolvableEntity(reason)) => {
                info!(item = %item, reason, "unable to restore permission");
                remap.mark_non_restorable(perm.id);
            }
            Err(err) => {
                errs.add_recoverable(format!("restoring permission on {item}: {err}"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use cloudvault_core::domain::{EntityId, EntityType, PermissionId};

    fn cpath(s: &str) -> ContainerPath {
        ContainerPath::new(s).unwrap()
    }

    fn perm(id: &str, entity: &str, roles: &[&str]) -> Permission {
        Permission {
            id: PermissionId::new(id).unwrap(),
            entity_id: EntityId::new(entity),
            entity_type: EntityType::User,
            email: String::new(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            expiration: None,
        }
    }

    mod ancestor_tests {
        use super::*;

        #[test]
        fn test_nearest_custom_ancestor_wins() {
            let parents = DashMap::new();
            parents.insert(cpath("/A"), Metadata::custom(vec![perm("p1", "u1", &["read"])], vec![]));
            parents.insert(
                cpath("/A/B"),
                Metadata::custom(vec![perm("p2", "u2", &["write"])], vec![]),
            );
            parents.insert(cpath("/A/B/C"), Metadata::default());

            let meta = compute_previous_metadata(&cpath("/A/B/C/file"), &parents).unwrap();
            // /A/B/C is inherited, /A/B is the nearest custom ancestor
            assert_eq!(meta.permissions[0].id, PermissionId::new("p2").unwrap());
        }

        #[test]
        fn test_no_custom_ancestor_yields_default() {
            let parents = DashMap::new();
            parents.insert(cpath("/A"), Metadata::default());

            let meta = compute_previous_metadata(&cpath("/A/file"), &parents).unwrap();
            assert_eq!(meta.sharing_mode, SharingMode::Inherited);
            assert!(meta.permissions.is_empty());
        }

        #[test]
        fn test_item_directly_under_root() {
            let parents = DashMap::new();
            let meta = compute_previous_metadata(&cpath("/file"), &parents).unwrap();
            assert!(meta.permissions.is_empty());
        }

        #[test]
        fn test_missing_ancestor_is_an_error() {
            let parents = DashMap::new();
            let err = compute_previous_metadata(&cpath("/A/B/file"), &parents).unwrap_err();
            assert!(matches!(err, RestoreError::MissingParentMetadata(_)));
        }
    }

    mod filter_tests {
        use super::*;

        #[test]
        fn test_unresolvable_entity_dropped_and_marked() {
            let available = AvailableEntities::new(
                HashMap::from([(EntityId::new("u1"), "User One".to_string())]),
                HashMap::new(),
            );
            let remap = IdRemap::new();
            let errs = FaultBus::new();

            let filtered = filter_unavailable_permissions(
                vec![perm("p1", "u1", &["read"]), perm("p2", "gone", &["read"])],
                &available,
                &remap,
                &errs,
            );

            assert_eq!(filtered.len(), 1);
            assert_eq!(filtered[0].entity_id, EntityId::new("u1"));
            assert_eq!(remap.lookup(&PermissionId::new("p2").unwrap()), Some(None));
            assert_eq!(errs.skipped().len(), 1);
            assert_eq!(errs.skipped()[0].reason, SkipReason::UnresolvableEntity);
        }

        #[test]
        fn test_unloaded_lookups_skip_filtering() {
            let remap = IdRemap::new();
            let errs = FaultBus::new();
            let filtered = filter_unavailable_permissions(
                vec![perm("p1", "whoever", &["read"])],
                &AvailableEntities::unloaded(),
                &remap,
                &errs,
            );
            assert_eq!(filtered.len(), 1);
        }
    }
}
