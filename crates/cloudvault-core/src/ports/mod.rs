//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces the collection and restore
//! pipelines depend on, implemented by provider/storage adapter crates.
//!
//! ## Ports Overview
//!
//! - [`DeltaQuery`] - Paged and delta enumeration of a container's items
//! - [`ContainerResolver`] - Container hierarchy identification and walking
//! - [`ItemHandler`] - Per-item fetch-and-augment capability
//! - [`StatusUpdater`] - Completion callback consumed by the storage pipeline
//! - [`PermissionEditor`] - Permission/link-share mutation on restore

pub mod permissions;
pub mod provider;
pub mod storage;

pub use permissions::{LinkShareRequest, PermissionEditor, PermissionInvite};
pub use provider::{
    ContainerResolver, DeltaPage, DeltaQuery, ItemHandler, ItemInfo, PageItem, ProviderError,
    RemoteItem, ServiceKind,
};
pub use storage::{CollectionStatus, ItemPayload, ItemRecord, LazyFetch, StatusUpdater};
