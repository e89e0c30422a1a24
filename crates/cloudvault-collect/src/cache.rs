//! Container cache
//!
//! Builds the container-ID → hierarchical-path mapping for the current
//! backup run and compares it against the previous run's recorded mapping
//! to classify each container as new, unmoved, moved or deleted.
//!
//! Paths are derived by concatenating ancestor display names during a
//! breadth-first walk from the root; they are never stored as identity.
//! A container whose ID is known from the previous run but whose computed
//! path differs has been moved or renamed. A container recorded before
//! but absent from the walk is deleted, and the producer still emits a
//! tombstone collection for it so downstream storage can issue the
//! deletion.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use cloudvault_core::domain::{
    CollectionState, Container, ContainerId, ContainerPath, FaultBus,
};
use cloudvault_core::ports::ContainerResolver;

use crate::CollectError;

// ============================================================================
// ResolvedContainer
// ============================================================================

/// A container discovered by the walk, with its computed path
#[derive(Debug, Clone)]
pub struct ResolvedContainer {
    pub container: Container,
    pub path: ContainerPath,
}

// ============================================================================
// ContainerCache
// ============================================================================

/// Container hierarchy mapping for one backup run
pub struct ContainerCache<R: ContainerResolver> {
    resolver: R,
    /// Containers found by the current walk, keyed by remote ID
    resolved: HashMap<ContainerId, ResolvedContainer>,
    /// ID → path mapping recorded by the previous backup
    previous_paths: HashMap<ContainerId, ContainerPath>,
}

impl<R: ContainerResolver> ContainerCache<R> {
    /// Creates a cache seeded with the previous run's path mapping.
    ///
    /// Pass an empty map on a first (full) backup.
    pub fn new(resolver: R, previous_paths: HashMap<ContainerId, ContainerPath>) -> Self {
        Self {
            resolver,
            resolved: HashMap::new(),
            previous_paths,
        }
    }

    /// Walks the hierarchy breadth-first from the root, computing paths.
    ///
    /// Failure to fetch one container's children is recoverable: the error
    /// is recorded on the bus and the subtree skipped. Failure to fetch the
    /// root itself aborts the walk.
    pub async fn populate(&mut self, errs: &FaultBus) -> Result<(), CollectError> {
        let root = self
            .resolver
            .root_container()
            .await
            .map_err(|e| CollectError::RootWalkFailed(e.to_string()))?;

        let root_id = root.id().clone();
        let root_path = ContainerPath::root();
        self.resolved.insert(
            root_id.clone(),
            ResolvedContainer {
                container: root,
                path: root_path.clone(),
            },
        );

        let mut queue: VecDeque<(ContainerId, ContainerPath)> = VecDeque::new();
        let mut visited: HashSet<ContainerId> = HashSet::new();
        queue.push_back((root_id.clone(), root_path));
        visited.insert(root_id);

        while let Some((id, path)) = queue.pop_front() {
            if errs.failure().is_some() {
                break;
            }

            let children = match self.resolver.children_of(&id).await {
                Ok(children) => children,
                Err(err) => {
                    warn!(container = %id, error = %err, "listing children failed, skipping subtree");
                    errs.add_recoverable(format!("listing children of {id}: {err}"));
                    continue;
                }
            };

            for child in children {
                let child_id = child.id().clone();
                if !visited.insert(child_id.clone()) {
                    // Providers occasionally report a container under two
                    // parents mid-move; first sighting wins.
                    continue;
                }
                let child_path = path.join(child.display_name());
                debug!(container = %child_id, path = %child_path, "container resolved");
                queue.push_back((child_id.clone(), child_path.clone()));
                self.resolved.insert(
                    child_id,
                    ResolvedContainer {
                        container: child,
                        path: child_path,
                    },
                );
            }
        }

        debug!(
            resolved = self.resolved.len(),
            previous = self.previous_paths.len(),
            "container walk complete"
        );

        Ok(())
    }

    /// Path computed for `id` in the current run.
    pub fn path_of(&self, id: &ContainerId) -> Option<&ContainerPath> {
        self.resolved.get(id).map(|r| &r.path)
    }

    /// Path recorded for `id` by the previous backup.
    pub fn previous_path_of(&self, id: &ContainerId) -> Option<&ContainerPath> {
        self.previous_paths.get(id)
    }

    /// Derived collection state for `id` (see [`CollectionState::of`]).
    pub fn state_of(&self, id: &ContainerId) -> CollectionState {
        CollectionState::of(self.previous_path_of(id), self.path_of(id))
    }

    /// All containers found by the current walk.
    pub fn containers(&self) -> impl Iterator<Item = &ResolvedContainer> {
        self.resolved.values()
    }

    /// Containers recorded previously but absent from the current walk.
    ///
    /// Each gets a tombstone collection with `current_path = None`.
    pub fn deleted_containers(&self) -> Vec<(ContainerId, ContainerPath)> {
        self.previous_paths
            .iter()
            .filter(|(id, _)| !self.resolved.contains_key(*id))
            .map(|(id, path)| (id.clone(), path.clone()))
            .collect()
    }

    /// Current-run ID → path mapping, for persisting as next run's
    /// previous-paths metadata.
    pub fn current_paths(&self) -> HashMap<ContainerId, ContainerPath> {
        self.resolved
            .iter()
            .map(|(id, r)| (id.clone(), r.path.clone()))
            .collect()
    }
}
