//! Container entity and collection lifecycle state
//!
//! A container is a remote hierarchy node (mail folder, drive folder, site
//! library, list). Containers are identified across backup runs by their
//! remote ID; their hierarchical path is derived during the cache walk.
//!
//! ## Collection state
//!
//! The state of a container's collection between two backup runs is never
//! transitioned explicitly. It is a pure function of the previous and
//! current paths, recomputed whenever the current path is resolved:
//!
//! ```text
//! current = None                → Deleted (terminal)
//! prev = None, current = Some   → New
//! prev == current               → NotMoved
//! prev != current (both Some)   → Moved
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::newtypes::{ContainerId, ContainerPath};

// ============================================================================
// CollectionState
// ============================================================================

/// Lifecycle state of a container's collection, derived from path comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    /// Container did not exist in the previous backup
    New,
    /// Container exists at the same path as in the previous backup
    NotMoved,
    /// Container exists but its path changed since the previous backup
    Moved,
    /// Container no longer exists; only a tombstone is emitted
    Deleted,
}

impl CollectionState {
    /// Derives the state from the previous and current paths.
    ///
    /// This is the only way a state is ever produced; there is no
    /// transition API.
    pub fn of(previous: Option<&ContainerPath>, current: Option<&ContainerPath>) -> Self {
        match (previous, current) {
            (_, None) => CollectionState::Deleted,
            (None, Some(_)) => CollectionState::New,
            (Some(p), Some(c)) if p == c => CollectionState::NotMoved,
            (Some(_), Some(_)) => CollectionState::Moved,
        }
    }

    /// Returns true when the collection only tombstones a vanished container.
    pub fn is_deleted(&self) -> bool {
        matches!(self, CollectionState::Deleted)
    }

    /// Returns true when items from this collection may be streamed.
    pub fn is_streamable(&self) -> bool {
        !self.is_deleted()
    }
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionState::New => write!(f, "new"),
            CollectionState::NotMoved => write!(f, "not_moved"),
            CollectionState::Moved => write!(f, "moved"),
            CollectionState::Deleted => write!(f, "deleted"),
        }
    }
}

// ============================================================================
// Container
// ============================================================================

/// A remote container as reported by the provider
///
/// Carries only provider-sourced facts. Path resolution and state
/// derivation live in the container cache and collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Provider-assigned identifier
    id: ContainerId,
    /// Display name used for path derivation
    display_name: String,
    /// Parent container ID (None for the hierarchy root)
    parent_id: Option<ContainerId>,
    /// Provider's hint of how many items the container holds, if reported
    item_count_hint: Option<u64>,
}

impl Container {
    /// Creates a Container from provider facts.
    pub fn new(
        id: ContainerId,
        display_name: impl Into<String>,
        parent_id: Option<ContainerId>,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            parent_id,
            item_count_hint: None,
        }
    }

    /// Sets the provider's item-count hint.
    pub fn with_item_count_hint(mut self, hint: u64) -> Self {
        self.item_count_hint = Some(hint);
        self
    }

    /// Returns the container's remote ID.
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Returns the display name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the parent container ID, if any.
    pub fn parent_id(&self) -> Option<&ContainerId> {
        self.parent_id.as_ref()
    }

    /// Returns the item-count hint, if the provider reported one.
    pub fn item_count_hint(&self) -> Option<u64> {
        self.item_count_hint
    }
}
