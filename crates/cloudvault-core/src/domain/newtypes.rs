//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers and values that flow between
//! the collection pipeline and the provider/storage ports. Each newtype
//! validates at construction time so the rest of the codebase can assume
//! well-formed values.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// Remote identifiers
// ============================================================================

/// Provider-assigned identifier of a container (folder, drive, list).
///
/// Container identity across backup runs is the remote ID; the hierarchical
/// path is derived from it, never the other way around.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a ContainerId, rejecting empty strings.
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "container id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Returns the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContainerId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Provider-assigned identifier of an item within a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Creates an ItemId, rejecting empty strings.
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "item id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Returns the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ItemId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Provider-assigned identifier of a permission or link share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(String);

impl PermissionId {
    /// Creates a PermissionId, rejecting empty strings.
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "permission id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Returns the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PermissionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PermissionId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Provider-assigned identifier of a sharing entity (user or group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an EntityId. Empty IDs are allowed: older backups stored only
    /// the entity email, leaving the ID blank.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when no ID was recorded for this entity.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// DeltaToken
// ============================================================================

/// Opaque continuation token for incremental (delta) enumeration.
///
/// Issued by the provider at the end of a delta page sequence; passed back
/// on the next run to receive only changes since. Providers may expire
/// tokens at any time, which forces a full re-enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeltaToken(String);

impl DeltaToken {
    /// Creates a DeltaToken, rejecting empty strings.
    pub fn new(token: impl Into<String>) -> Result<Self, DomainError> {
        let token = token.into();
        if token.is_empty() {
            return Err(DomainError::InvalidDeltaToken(
                "delta token must not be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Returns the inner token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeltaToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DeltaToken {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// ============================================================================
// ContainerPath
// ============================================================================

/// Hierarchical location of a container, derived from concatenated ancestor
/// display names. Always absolute (leading `/`), never trailing-slashed
/// except for the root itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerPath(String);

impl ContainerPath {
    /// Creates a ContainerPath from an absolute path string.
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "container path must be absolute: {path}"
            )));
        }
        if path.len() > 1 && path.ends_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "container path must not end with '/': {path}"
            )));
        }
        Ok(Self(path))
    }

    /// The root path (`/`).
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Returns the inner path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends a child segment, producing the child's path.
    pub fn join(&self, segment: &str) -> Self {
        if self.0 == "/" {
            Self(format!("/{segment}"))
        } else {
            Self(format!("{}/{segment}", self.0))
        }
    }

    /// Returns the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0 == "/" {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Returns the path segments, root first.
    pub fn segments(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Returns true for the root path.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }
}

impl Display for ContainerPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContainerPath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// ============================================================================
// RunId
// ============================================================================

/// Identifier for a single backup or restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a RunId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod id_tests {
        use super::*;

        #[test]
        fn test_container_id_rejects_empty() {
            assert!(ContainerId::new("").is_err());
            assert!(ContainerId::new("folder-01").is_ok());
        }

        #[test]
        fn test_item_id_rejects_empty() {
            assert!(ItemId::new("").is_err());
            let id = ItemId::new("item-ABC").unwrap();
            assert_eq!(id.as_str(), "item-ABC");
            assert_eq!(id.to_string(), "item-ABC");
        }

        #[test]
        fn test_entity_id_allows_empty() {
            let id = EntityId::new("");
            assert!(id.is_empty());
        }

        #[test]
        fn test_serde_transparent() {
            let id = ItemId::new("xyz").unwrap();
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, "\"xyz\"");
            let back: ItemId = serde_json::from_str(&json).unwrap();
            assert_eq!(back, id);
        }
    }

    mod delta_token_tests {
        use super::*;

        #[test]
        fn test_rejects_empty() {
            assert!(DeltaToken::new("").is_err());
        }

        #[test]
        fn test_roundtrip() {
            let token = DeltaToken::new("opaque-token-123").unwrap();
            assert_eq!(token.as_str(), "opaque-token-123");
        }
    }

    mod container_path_tests {
        use super::*;

        #[test]
        fn test_must_be_absolute() {
            assert!(ContainerPath::new("Docs/Old").is_err());
            assert!(ContainerPath::new("/Docs/Old").is_ok());
        }

        #[test]
        fn test_no_trailing_slash() {
            assert!(ContainerPath::new("/Docs/").is_err());
            assert!(ContainerPath::new("/").is_ok());
        }

        #[test]
        fn test_join_from_root() {
            let root = ContainerPath::root();
            assert_eq!(root.join("Inbox").as_str(), "/Inbox");
        }

        #[test]
        fn test_join_nested() {
            let p = ContainerPath::new("/Docs").unwrap();
            assert_eq!(p.join("Reports").as_str(), "/Docs/Reports");
        }

        #[test]
        fn test_parent() {
            let p = ContainerPath::new("/Docs/Reports").unwrap();
            assert_eq!(p.parent().unwrap().as_str(), "/Docs");
            assert_eq!(p.parent().unwrap().parent().unwrap().as_str(), "/");
            assert!(ContainerPath::root().parent().is_none());
        }

        #[test]
        fn test_segments() {
            let p = ContainerPath::new("/A/B/C").unwrap();
            assert_eq!(p.segments(), vec!["A", "B", "C"]);
            assert!(ContainerPath::root().segments().is_empty());
        }
    }
}
