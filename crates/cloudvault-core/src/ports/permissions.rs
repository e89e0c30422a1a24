//! Permission editing port (restore side)
//!
//! Capability interface through which the restorer re-applies sharing
//! state. The provider adapter owns the wire format; the restorer only
//! builds request bodies and routes on [`ProviderError`] classes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::newtypes::{EntityId, ItemId, PermissionId};

use super::provider::ProviderError;

// ============================================================================
// Request bodies
// ============================================================================

/// Invitation body for re-creating a direct permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInvite {
    /// Entity to grant access to; blank when only an email was recorded
    pub entity_id: EntityId,
    /// Fallback recipient address from older backups
    #[serde(default)]
    pub email: String,
    /// Roles to grant (never contains "owner"; the provider rejects it)
    pub roles: Vec<String>,
    pub expiration: Option<DateTime<Utc>>,
    /// Always true: restored grants require sign-in
    pub require_sign_in: bool,
    /// Always false: restores must not notify users
    pub send_invitation: bool,
}

/// Body for re-creating a sharing link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkShareRequest {
    /// Link type: "view", "edit", "embed"
    pub link_type: String,
    /// Link scope: "anonymous", "organization", "users"
    pub scope: String,
    pub expiration: Option<DateTime<Utc>>,
    /// Entities the link is shared with
    pub entity_ids: Vec<EntityId>,
    /// False on the first create when inherited shares must be cleared;
    /// creating a link with this false resets inherited sharing state
    pub retain_inherited_permissions: bool,
    /// Always false: restores must not notify users
    pub send_notification: bool,
}

// ============================================================================
// PermissionEditor
// ============================================================================

/// Externally-provided capability for permission/link-share mutation
#[async_trait::async_trait]
pub trait PermissionEditor: Send + Sync {
    /// Deletes a single permission from an item.
    async fn delete_item_permission(
        &self,
        item: &ItemId,
        permission: &PermissionId,
    ) -> Result<(), ProviderError>;

    /// Creates a permission on an item; returns the newly assigned ID.
    async fn post_item_permission_update(
        &self,
        item: &ItemId,
        body: &PermissionInvite,
    ) -> Result<PermissionId, ProviderError>;

    /// Creates a link share on an item; returns the newly assigned ID.
    async fn post_item_link_share_update(
        &self,
        item: &ItemId,
        body: &LinkShareRequest,
    ) -> Result<PermissionId, ProviderError>;
}
