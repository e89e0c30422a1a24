//! CloudVault Restore - Sharing state restoration
//!
//! Re-applies permissions and link shares to restored items by diffing the
//! item's stored sharing metadata against what its ancestor chain implies
//! is inherited, then issuing only the difference through the
//! `PermissionEditor` capability.
//!
//! ## Modules
//!
//! - [`caches`] - Restore-scoped shared maps (parent metadata, ID remaps,
//!   available entities)
//! - [`permissions`] - Direct permission diff application
//! - [`link_shares`] - Link-share diff application and inheritance resets
//! - [`restorer`] - Per-item orchestration

pub mod caches;
pub mod link_shares;
pub mod permissions;
pub mod restorer;

use thiserror::Error;

use cloudvault_core::domain::ContainerPath;

/// Errors that can occur while restoring sharing state
#[derive(Debug, Error)]
pub enum RestoreError {
    /// The parent-directory metadata cache is missing an ancestor entry;
    /// the cache must be populated top-down before restoring children
    #[error("No metadata recorded for ancestor directory {0}")]
    MissingParentMetadata(ContainerPath),

    /// No remapped ID exists for a permission recorded as removed
    #[error("No restored permission matches recorded id {0}")]
    UnknownPermissionId(String),

    /// A provider error that aborts the current item's restore
    #[error("Provider error: {0}")]
    Provider(#[from] cloudvault_core::ports::ProviderError),
}
