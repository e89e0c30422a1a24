//! Content provider port (driven/secondary port)
//!
//! Interfaces for talking to the remote content provider. The HTTP, auth
//! and retry internals live in adapter crates; the pipeline only sees
//! paged/delta enumeration, container listing and item fetches, plus a
//! typed error taxonomy it can route on.
//!
//! ## Design Notes
//!
//! - Provider genericity is expressed through two capability traits rather
//!   than per-provider subclassing: [`ContainerResolver`] identifies and
//!   walks containers, [`ItemHandler`] fetches and augments items. Each
//!   provider (mail, drive, site library, group) supplies both.
//! - DTOs here are port-level types, not domain entities; the collection
//!   pipeline maps them into stream records.
//! - [`ProviderError`] carries the classification the pipeline needs
//!   (throttled, invalid delta, not found, malware, ...) — adapters map
//!   provider wire errors into it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::container::Container;
use crate::domain::newtypes::{ContainerId, ContainerPath, DeltaToken, ItemId};
use crate::domain::sharing::Metadata;

// ============================================================================
// ServiceKind
// ============================================================================

/// Remote service a container belongs to; selects the rate-limit profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Mailbox folders and messages
    Mail,
    /// Personal drive folders and files
    Drive,
    /// Site libraries and lists
    Site,
    /// Group mailboxes and channels
    Groups,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Mail => write!(f, "mail"),
            ServiceKind::Drive => write!(f, "drive"),
            ServiceKind::Site => write!(f, "site"),
            ServiceKind::Groups => write!(f, "groups"),
        }
    }
}

// ============================================================================
// ProviderError
// ============================================================================

/// Errors surfaced by provider adapters, classified for pipeline routing
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider rate limiter rejected the request; caller owns backoff
    #[error("Throttled by provider, retry after {retry_after:?}")]
    Throttled {
        /// Provider-suggested wait, when the response carried one
        retry_after: Option<Duration>,
    },

    /// The delta continuation token is expired or invalid; enumeration
    /// must restart without a token
    #[error("Delta token expired or invalid")]
    InvalidDelta,

    /// The requested resource does not exist (or vanished in flight)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication rejected; for downloads this usually means an
    /// expired pre-authenticated URL
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Provider flagged the item as malware; content is not served
    #[error("Item flagged as malware: {0}")]
    Malware(String),

    /// Provider cannot produce the content for this item
    #[error("Provider cannot process item: {0}")]
    Unprocessable(String),

    /// One or more sharing entities could not be resolved in the tenant
    #[error("Entity cannot be resolved: {0}")]
    UnresolvableEntity(String),

    /// Sharing is administratively disabled on the target
    #[error("Sharing is disabled: {0}")]
    SharingDisabled(String),

    /// The operation was cancelled; fatal, never retried per-item
    #[error("Operation cancelled")]
    Cancelled,

    /// Any other adapter-specific error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    /// Returns true for conditions handled as expected skips rather than
    /// recoverable errors.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            ProviderError::NotFound(_) | ProviderError::Malware(_) | ProviderError::Unprocessable(_)
        )
    }

    /// Returns true when a download should retry with a refreshed URL.
    pub fn is_expired_url(&self) -> bool {
        matches!(self, ProviderError::Unauthorized(_))
    }
}

// ============================================================================
// Page DTOs
// ============================================================================

/// One entry of a delta or listing page
///
/// Tombstones arrive as explicit entries with `deleted = true`; removal is
/// never derived from absence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageItem {
    /// Provider-specific item identifier
    pub id: ItemId,
    /// Item display name (may be blank on tombstones)
    #[serde(default)]
    pub name: String,
    /// Last remote modification time (absent on tombstones)
    pub modified: Option<DateTime<Utc>>,
    /// True when the provider reports the item as deleted
    #[serde(default)]
    pub deleted: bool,
    /// True when the entry is itself a container
    #[serde(default)]
    pub is_container: bool,
    /// Size in bytes, when reported
    pub size: Option<u64>,
}

/// One page of delta or listing results
#[derive(Debug, Clone, Default)]
pub struct DeltaPage {
    /// Entries on this page
    pub items: Vec<PageItem>,
    /// Opaque continuation for the next page (None on the last page)
    pub next_link: Option<String>,
    /// Token for the next incremental run (present only on the last page
    /// of a delta sequence)
    pub delta_token: Option<DeltaToken>,
}

// ============================================================================
// RemoteItem
// ============================================================================

/// A fully fetched item: content handle plus sharing metadata
#[derive(Debug, Clone)]
pub struct RemoteItem {
    pub id: ItemId,
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_container: bool,
    pub mime_type: Option<String>,
    /// Pre-authenticated download URL, when the provider issues one
    pub download_url: Option<String>,
    /// Sharing metadata captured with the item
    pub metadata: Metadata,
}

/// Summary recorded with each backed-up item for the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub name: String,
    pub parent_path: ContainerPath,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub service: ServiceKind,
}

// ============================================================================
// Port traits
// ============================================================================

/// Delta and paged enumeration of a container's items
///
/// `delta_page` with a token returns only changes since that token;
/// adapters signal expiry with [`ProviderError::InvalidDelta`].
/// `list_page` is the full (non-incremental) enumeration used as the
/// fallback path.
#[async_trait::async_trait]
pub trait DeltaQuery: Send + Sync {
    /// Fetches one delta page. Exactly one of `token`/`next_link` is used:
    /// `next_link` continues a page sequence, `token` (or neither) starts one.
    async fn delta_page(
        &self,
        container: &ContainerId,
        token: Option<&DeltaToken>,
        next_link: Option<&str>,
    ) -> Result<DeltaPage, ProviderError>;

    /// Fetches one page of the full listing of `container`.
    async fn list_page(
        &self,
        container: &ContainerId,
        next_link: Option<&str>,
    ) -> Result<DeltaPage, ProviderError>;
}

/// Container identification and hierarchy walking
#[async_trait::async_trait]
pub trait ContainerResolver: Send + Sync {
    /// Fetches the root container of the resource being backed up.
    async fn root_container(&self) -> Result<Container, ProviderError>;

    /// Lists the direct child containers of `id`.
    async fn children_of(&self, id: &ContainerId) -> Result<Vec<Container>, ProviderError>;
}

/// Item fetch-and-augment capability
///
/// The collection pipeline is generic over this trait; each provider
/// supplies its own implementation.
#[async_trait::async_trait]
pub trait ItemHandler: Send + Sync + 'static {
    /// The service this handler talks to; selects the rate-limit profile.
    fn service(&self) -> ServiceKind;

    /// Fetches an item's full description, including sharing metadata and a
    /// fresh download URL.
    async fn get_item(
        &self,
        container: &ContainerId,
        item: &ItemId,
    ) -> Result<RemoteItem, ProviderError>;

    /// Downloads the item's content using its current download URL.
    async fn download(&self, item: &RemoteItem) -> Result<Vec<u8>, ProviderError>;

    /// Downloads content from an explicit pre-authenticated URL (used by
    /// the URL-cache retry path).
    async fn download_by_url(&self, url: &str) -> Result<Vec<u8>, ProviderError>;

    /// Produces the report summary for an item under `parent_path`.
    fn augment_info(&self, item: &RemoteItem, parent_path: &ContainerPath) -> ItemInfo {
        ItemInfo {
            name: item.name.clone(),
            parent_path: parent_path.clone(),
            size: item.size,
            modified: item.modified,
            service: self.service(),
        }
    }
}
