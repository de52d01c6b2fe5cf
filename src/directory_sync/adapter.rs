//! Capability-based IdP adapter model. Providers expose whatever subset
//! of {list_users, list_groups, list_group_members, refresh_access_token}
//! they support; the sync runner degrades gracefully around gaps.

use async_trait::async_trait;
use crate::error::SyncError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityAttrs {
    pub provider_identifier: String,
    pub email: Option<String>,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAttrs {
    pub provider_group_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipTuple {
    pub provider_group_id: String,
    pub provider_identifier: String,
}

#[async_trait]
pub trait DirectoryAdapter: Send + Sync {
    async fn list_users(&self) -> Result<Vec<IdentityAttrs>, SyncError>;
    async fn list_groups(&self) -> Result<Vec<GroupAttrs>, SyncError>;
    async fn list_group_members(&self, provider_group_id: &str) -> Result<Vec<String>, SyncError>;

    /// Not every adapter needs a standalone refresh step (some client
    /// libraries refresh transparently); default to a no-op.
    async fn refresh_access_token(&self) -> Result<(), SyncError> {
        Ok(())
    }

    /// All membership tuples, derived from `list_groups` +
    /// `list_group_members` unless the adapter has a cheaper bulk query.
    async fn membership_tuples(&self) -> Result<Vec<MembershipTuple>, SyncError> {
        let groups = self.list_groups().await?;
        let mut out = Vec::new();
        for group in groups {
            for member in self.list_group_members(&group.provider_group_id).await? {
                out.push(MembershipTuple { provider_group_id: group.provider_group_id.clone(), provider_identifier: member });
            }
        }
        Ok(out)
    }
}
