//! Restore-scoped shared caches
//!
//! These maps live for the duration of one restore operation and are
//! shared across the concurrent per-item restore tasks, so they all use
//! concurrency-safe containers rather than ad hoc locking.

use std::collections::HashMap;

use dashmap::DashMap;

use cloudvault_core::domain::{ContainerPath, EntityId, EntityType, Metadata, PermissionId};

// ============================================================================
// IdRemap
// ============================================================================

/// Maps backup-time permission/link-share IDs to the IDs the provider
/// assigned during this restore.
///
/// An entry of `None` marks the source ID as not restorable (its entity no
/// longer resolves); later deletion logic must skip it rather than attempt
/// to delete a permission that was never created.
#[derive(Debug, Default)]
pub struct IdRemap {
    entries: DashMap<PermissionId, Option<PermissionId>>,
}

impl IdRemap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `old` was restored as `new`.
    pub fn mark_restored(&self, old: PermissionId, new: PermissionId) {
        self.entries.insert(old, Some(new));
    }

    /// Records that `old` could not be restored.
    pub fn mark_non_restorable(&self, old: PermissionId) {
        self.entries.insert(old, None);
    }

    /// Outer `None`: the ID was never seen. Inner `None`: seen, but not
    /// restorable.
    pub fn lookup(&self, old: &PermissionId) -> Option<Option<PermissionId>> {
        self.entries.get(old).map(|e| e.value().clone())
    }
}

// ============================================================================
// AvailableEntities
// ============================================================================

/// Users and groups that resolve in the target tenant
///
/// `None` maps mean the lookup was not loaded; filtering is skipped rather
/// than wrongly dropping every entity.
#[derive(Debug, Default)]
pub struct AvailableEntities {
    users: Option<HashMap<EntityId, String>>,
    groups: Option<HashMap<EntityId, String>>,
}

impl AvailableEntities {
    pub fn new(users: HashMap<EntityId, String>, groups: HashMap<EntityId, String>) -> Self {
        Self {
            users: Some(users),
            groups: Some(groups),
        }
    }

    /// Unloaded lookups; every entity passes filtering.
    pub fn unloaded() -> Self {
        Self::default()
    }

    /// Returns true when filtering can run at all.
    pub fn is_loaded(&self) -> bool {
        self.users.is_some() && self.groups.is_some()
    }

    /// Returns true when the entity resolves in the target tenant.
    ///
    /// Entity kinds we hold no lookup for pass through unfiltered.
    pub fn resolves(&self, entity_type: EntityType, id: &EntityId) -> bool {
        match entity_type {
            EntityType::User => self
                .users
                .as_ref()
                .map_or(true, |users| users.contains_key(id)),
            EntityType::Group => self
                .groups
                .as_ref()
                .map_or(true, |groups| groups.contains_key(id)),
            _ => true,
        }
    }
}

// ============================================================================
// RestoreCaches
// ============================================================================

/// All shared state for one restore operation
#[derive(Debug, Default)]
pub struct RestoreCaches {
    /// Directory path → its restored sharing metadata, populated top-down
    /// so children can resolve their nearest custom-sharing ancestor
    pub parent_dir_to_meta: DashMap<ContainerPath, Metadata>,
    /// Backup-time permission ID → restored ID
    pub perm_ids: IdRemap,
    /// Backup-time link-share ID → restored ID
    pub link_share_ids: IdRemap,
    pub available: AvailableEntities,
}

impl RestoreCaches {
    pub fn new(available: AvailableEntities) -> Self {
        Self {
            available,
            ..Self::default()
        }
    }

    /// Records a restored directory's metadata for its descendants.
    pub fn record_directory(&self, path: ContainerPath, meta: Metadata) {
        self.parent_dir_to_meta.insert(path, meta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> PermissionId {
        PermissionId::new(s).unwrap()
    }

    #[test]
    fn test_id_remap_lifecycle() {
        let remap = IdRemap::new();
        assert!(remap.lookup(&pid("unknown")).is_none());

        remap.mark_restored(pid("old-1"), pid("new-1"));
        assert_eq!(remap.lookup(&pid("old-1")), Some(Some(pid("new-1"))));

        remap.mark_non_restorable(pid("old-2"));
        assert_eq!(remap.lookup(&pid("old-2")), Some(None));
    }

    #[test]
    fn test_unloaded_entities_pass_everything() {
        let available = AvailableEntities::unloaded();
        assert!(!available.is_loaded());
        assert!(available.resolves(EntityType::User, &EntityId::new("anyone")));
        assert!(available.resolves(EntityType::Group, &EntityId::new("anygroup")));
    }

    #[test]
    fn test_loaded_entities_filter_unknown() {
        let users = HashMap::from([(EntityId::new("u1"), "User One".to_string())]);
        let available = AvailableEntities::new(users, HashMap::new());

        assert!(available.resolves(EntityType::User, &EntityId::new("u1")));
        assert!(!available.resolves(EntityType::User, &EntityId::new("u2")));
        assert!(!available.resolves(EntityType::Group, &EntityId::new("g1")));
        // kinds without a lookup always pass
        assert!(available.resolves(EntityType::Application, &EntityId::new("app")));
    }

    #[test]
    fn test_record_directory() {
        let caches = RestoreCaches::default();
        let path = ContainerPath::new("/Docs").unwrap();
        caches.record_directory(path.clone(), Metadata::default());
        assert!(caches.parent_dir_to_meta.contains_key(&path));
    }
}
