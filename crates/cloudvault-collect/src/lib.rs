//! CloudVault Collect - Incremental collection pipeline
//!
//! Provides:
//! - Delta/paged enumeration of container contents
//! - Container hierarchy caching with move/delete detection
//! - The per-container `Collection` streaming primitive
//! - Bounded-concurrency item fetch with lazy materialization
//! - Per-service rate limiting with swappable window strategies
//!
//! ## Modules
//!
//! - [`enumerator`] - Uniform added/removed/token view over delta and paging
//! - [`cache`] - Container ID to path mapping across backup runs
//! - [`collection`] - Single-use concurrent item stream per container
//! - [`producer`] - Builds one collection per container for a whole backup
//! - [`rate_limit`] - Per-service window limiters
//! - [`url_cache`] - Last-known-good download URLs
//! - [`pending`] - Awaiting-completion bookkeeping for the write pipeline

pub mod cache;
pub mod collection;
pub mod enumerator;
pub mod pending;
pub mod producer;
pub mod rate_limit;
pub mod url_cache;

use thiserror::Error;

/// Errors that can occur in the collection pipeline
#[derive(Debug, Error)]
pub enum CollectError {
    /// `stream()` was called a second time on the same collection
    #[error("Collection stream already consumed")]
    AlreadyStreamed,

    /// `stream()` was called on a deleted (tombstone) collection
    #[error("Deleted collection cannot stream items")]
    DeletedCollection,

    /// Root container enumeration failed; the walk cannot start
    #[error("Root container walk failed: {0}")]
    RootWalkFailed(String),

    /// A provider error that is fatal at pipeline level
    #[error("Provider error: {0}")]
    Provider(#[from] cloudvault_core::ports::ProviderError),

    /// A domain-level error propagated from cloudvault-core
    #[error("Domain error: {0}")]
    Domain(#[from] cloudvault_core::domain::DomainError),
}
