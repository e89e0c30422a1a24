//! Sharing metadata: permissions and link shares
//!
//! Per-item sharing state as stored alongside item content in the backup.
//! An item either inherits sharing from its parent chain (`Inherited`) or
//! carries its own permission set (`Custom`). The restore pipeline diffs
//! stored metadata against what the nearest custom-sharing ancestor
//! implies, and applies only the difference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{EntityId, PermissionId};

// ============================================================================
// Storage key suffixes
// ============================================================================

/// Suffix of the storage key holding an item's content bytes.
pub const DATA_FILE_SUFFIX: &str = ".data";

/// Suffix of the storage key holding an item's sharing metadata.
pub const META_FILE_SUFFIX: &str = ".meta";

/// Suffix of the storage key holding a directory's sharing metadata.
pub const DIR_META_FILE_SUFFIX: &str = ".dirmeta";

/// Returns true when the key names a metadata file rather than content.
pub fn has_meta_suffix(key: &str) -> bool {
    key.ends_with(META_FILE_SUFFIX) || key.ends_with(DIR_META_FILE_SUFFIX)
}

// ============================================================================
// Sharing mode
// ============================================================================

/// Whether an item's sharing state is its own or comes from its parent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingMode {
    /// Permissions are the same as the parent's; nothing item-specific stored
    #[default]
    Inherited,
    /// The item carries its own permission/link-share set
    Custom,
}

// ============================================================================
// Entities, permissions, link shares
// ============================================================================

/// Kind of sharing entity a permission or link share refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Group,
    /// Site-local group; cannot be resolved in a different tenant
    SiteGroup,
    /// Application principal
    Application,
}

/// A user or group referenced by sharing state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub entity_type: EntityType,
}

/// A single direct permission on an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Provider-assigned permission ID as recorded at backup time
    pub id: PermissionId,
    /// Entity the permission grants access to
    pub entity_id: EntityId,
    /// Entity kind
    pub entity_type: EntityType,
    /// Entity email; older backups recorded only this, with a blank ID
    #[serde(default)]
    pub email: String,
    /// Granted roles (e.g. "read", "write", "owner")
    pub roles: Vec<String>,
    /// Optional expiration of the grant
    pub expiration: Option<DateTime<Utc>>,
}

impl Permission {
    /// Two permissions are the same grant when they address the same entity
    /// with the same roles. IDs are provider-run-specific and excluded.
    pub fn same_grant(&self, other: &Permission) -> bool {
        if self.entity_id != other.entity_id || self.entity_type != other.entity_type {
            return false;
        }
        let mut a = self.roles.clone();
        let mut b = other.roles.clone();
        a.sort();
        b.sort();
        a == b && self.expiration == other.expiration
    }
}

/// Link target details of a sharing link
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkShareLink {
    /// Link scope: "anonymous", "organization", "users"
    #[serde(default)]
    pub scope: String,
    /// Link type: "view", "edit", "embed"
    #[serde(default, rename = "type")]
    pub link_type: String,
    /// Provider-issued URL; not restorable, but stable enough for diffing
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub prevents_download: bool,
}

/// A sharing link on an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkShare {
    /// Provider-assigned ID as recorded at backup time
    pub id: PermissionId,
    pub link: LinkShareLink,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Entities the link was shared with
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Links with passwords cannot be restored faithfully
    #[serde(default)]
    pub has_password: bool,
    pub expiration: Option<DateTime<Utc>>,
}

impl LinkShare {
    /// Link shares are compared by their issued URL; roles and entities are
    /// embedded in it on the provider side.
    pub fn same_link(&self, other: &LinkShare) -> bool {
        self.link.web_url == other.link.web_url
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Sharing metadata stored for one item, under its `.meta`/`.dirmeta` key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Original file name (blank for directory metadata)
    #[serde(default)]
    pub file_name: String,
    pub sharing_mode: SharingMode,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub link_shares: Vec<LinkShare>,
}

impl Metadata {
    /// Metadata for an item that carries its own permission set.
    pub fn custom(permissions: Vec<Permission>, link_shares: Vec<LinkShare>) -> Self {
        Self {
            file_name: String::new(),
            sharing_mode: SharingMode::Custom,
            permissions,
            link_shares,
        }
    }
}

// ============================================================================
// Diffing
// ============================================================================

/// Computes the symmetric difference between a previous and a current
/// permission set.
///
/// Returns `(added, removed)`: grants present only in `current` are added,
/// grants present only in `previous` are removed. A role change on the same
/// entity shows up as one removal plus one addition.
pub fn diff_permissions(
    previous: &[Permission],
    current: &[Permission],
) -> (Vec<Permission>, Vec<Permission>) {
    let added = current
        .iter()
        .filter(|c| !previous.iter().any(|p| p.same_grant(c)))
        .cloned()
        .collect();

    let removed = previous
        .iter()
        .filter(|p| !current.iter().any(|c| c.same_grant(p)))
        .cloned()
        .collect();

    (added, removed)
}

/// Computes the symmetric difference between a previous and a current
/// link-share set, compared by issued URL.
pub fn diff_link_shares(
    previous: &[LinkShare],
    current: &[LinkShare],
) -> (Vec<LinkShare>, Vec<LinkShare>) {
    let added = current
        .iter()
        .filter(|c| !previous.iter().any(|p| p.same_link(c)))
        .cloned()
        .collect();

    let removed = previous
        .iter()
        .filter(|p| !current.iter().any(|c| c.same_link(p)))
        .cloned()
        .collect();

    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn link(id: &str, url: &str) -> LinkShare {
        LinkShare {
            id: PermissionId::new(id).unwrap(),
            link: LinkShareLink {
                scope: "users".to_string(),
                link_type: "view".to_string(),
                web_url: url.to_string(),
                prevents_download: false,
            },
            roles: vec!["read".to_string()],
            entities: vec![],
            has_password: false,
            expiration: None,
        }
    }

    mod suffix_tests {
        use super::*;

        #[test]
        fn test_has_meta_suffix() {
            assert!(has_meta_suffix("item-1.meta"));
            assert!(has_meta_suffix("dir-2.dirmeta"));
            assert!(!has_meta_suffix("item-1.data"));
        }
    }

    mod diff_permission_tests {
        use super::*;

        #[test]
        fn test_role_change_is_remove_plus_add() {
            let previous = vec![perm("p1", "A", &["read"])];
            let current = vec![perm("p2", "A", &["write"])];

            let (added, removed) = diff_permissions(&previous, &current);

            assert_eq!(added.len(), 1);
            assert_eq!(removed.len(), 1);
            assert_eq!(added[0].roles, vec!["write"]);
            assert_eq!(removed[0].roles, vec!["read"]);
        }

        #[test]
        fn test_identical_sets_produce_empty_diff() {
            let previous = vec![perm("p1", "A", &["read", "write"])];
            // same grant, different recorded ID and role order
            let current = vec![perm("p9", "A", &["write", "read"])];

            let (added, removed) = diff_permissions(&previous, &current);

            assert!(added.is_empty());
            assert!(removed.is_empty());
        }

        #[test]
        fn test_new_entity_only_added() {
            let previous = vec![perm("p1", "A", &["read"])];
            let current = vec![perm("p1", "A", &["read"]), perm("p2", "B", &["read"])];

            let (added, removed) = diff_permissions(&previous, &current);

            assert_eq!(added.len(), 1);
            assert_eq!(added[0].entity_id.as_str(), "B");
            assert!(removed.is_empty());
        }

        #[test]
        fn test_empty_previous_adds_all() {
            let current = vec![perm("p1", "A", &["read"]), perm("p2", "B", &["write"])];
            let (added, removed) = diff_permissions(&[], &current);
            assert_eq!(added.len(), 2);
            assert!(removed.is_empty());
        }
    }

    mod diff_link_share_tests {
        use super::*;

        #[test]
        fn test_compared_by_url() {
            let previous = vec![link("l1", "https://share/abc")];
            let current = vec![link("l2", "https://share/abc"), link("l3", "https://share/def")];

            let (added, removed) = diff_link_shares(&previous, &current);

            assert_eq!(added.len(), 1);
            assert_eq!(added[0].link.web_url, "https://share/def");
            assert!(removed.is_empty());
        }

        #[test]
        fn test_removed_link() {
            let previous = vec![link("l1", "https://share/abc")];
            let (added, removed) = diff_link_shares(&previous, &[]);
            assert!(added.is_empty());
            assert_eq!(removed.len(), 1);
        }
    }

    mod metadata_tests {
        use super::*;

        #[test]
        fn test_default_is_inherited() {
            let meta = Metadata::default();
            assert_eq!(meta.sharing_mode, SharingMode::Inherited);
            assert!(meta.permissions.is_empty());
        }

        #[test]
        fn test_custom_constructor() {
            let meta = Metadata::custom(vec![perm("p1", "A", &["read"])], vec![]);
            assert_eq!(meta.sharing_mode, SharingMode::Custom);
            assert_eq!(meta.permissions.len(), 1);
        }

        #[test]
        fn test_serde_roundtrip() {
            let meta = Metadata::custom(
                vec![perm("p1", "A", &["read"])],
                vec![link("l1", "https://share/abc")],
            );
            let json = serde_json::to_string(&meta).unwrap();
            let back: Metadata = serde_json::from_str(&json).unwrap();
            assert_eq!(back, meta);
        }
    }
}
