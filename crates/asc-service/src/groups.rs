//! Group directory.
//!
//! Group membership and roles are owned by the group service; this crate
//! only asks. [`HttpGroupDirectory`] calls its internal membership endpoint:
//!
//! ```text
//! GET {base}/internal/groups/{group_id}/members/{user_id}
//!   200 {"role": "member" | "admin" | "owner"}
//!   404 not a member
//! ```

use crate::errors::AscError;
use crate::models::{AudioSession, SessionStatus};
use async_trait::async_trait;
use common::error::HuddleError;
use common::secret::{ExposeSecret, SecretString};
use common::types::{GroupId, UserId};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{instrument, warn};

/// Default timeout for group service requests in seconds.
const GROUP_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Membership and permission lookups.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool, AscError>;

    async fn is_admin(&self, group_id: GroupId, user_id: UserId) -> Result<bool, AscError>;

    /// Whether `user_id` created `session` and it has not ended.
    fn has_active_session_owner(&self, session: &AudioSession, user_id: UserId) -> bool {
        session.creator_id == user_id && session.status != SessionStatus::Ended
    }
}

/// Role of a member within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    Member,
    Admin,
    Owner,
}

#[derive(Debug, Deserialize)]
struct MembershipResponse {
    role: GroupRole,
}

/// Group directory backed by the group service's HTTP API.
#[derive(Clone)]
pub struct HttpGroupDirectory {
    client: Client,
    base_url: String,
    service_token: Option<SecretString>,
}

impl HttpGroupDirectory {
    /// Create a new group service client.
    ///
    /// # Errors
    ///
    /// Returns `AscError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: String, service_token: Option<SecretString>) -> Result<Self, AscError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GROUP_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| AscError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            service_token,
        })
    }

    #[instrument(skip_all, name = "asc.groups.membership", fields(group_id = %group_id, user_id = %user_id))]
    async fn membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> common::error::Result<Option<GroupRole>> {
        let url = format!(
            "{}/internal/groups/{group_id}/members/{user_id}",
            self.base_url.trim_end_matches('/')
        );

        let mut request = self.client.get(&url);
        if let Some(token) = &self.service_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            warn!(target: "asc.groups", error = %e, "Group service request failed");
            HuddleError::Upstream(format!("group service unreachable: {e}"))
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: MembershipResponse = response.json().await.map_err(|e| {
                    HuddleError::Serialization(format!("invalid membership response: {e}"))
                })?;
                Ok(Some(body.role))
            }
            status => {
                warn!(target: "asc.groups", status = %status, "Group service returned error");
                Err(HuddleError::Upstream(format!(
                    "group service returned {status}"
                )))
            }
        }
    }
}

#[async_trait]
impl GroupDirectory for HttpGroupDirectory {
    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool, AscError> {
        Ok(self.membership(group_id, user_id).await?.is_some())
    }

    async fn is_admin(&self, group_id: GroupId, user_id: UserId) -> Result<bool, AscError> {
        Ok(matches!(
            self.membership(group_id, user_id).await?,
            Some(GroupRole::Admin | GroupRole::Owner)
        ))
    }
}
