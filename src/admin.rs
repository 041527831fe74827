//! Owner moderation endpoints under `/api/admin/owner`.

use std::sync::Arc;

use log::info;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::api::ApiClient;
use crate::error::{ClientError, Result};
use crate::models::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Suspended,
    Banned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Visible,
    Hidden,
    Removed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AdminAck {
    #[serde(default)]
    pub message: String,
}

/// A banner shown to every user until dismissed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformUpdate {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerAccount {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl OwnerAccount {
    fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() || self.email.trim().is_empty() {
            return Err(ClientError::validation("Owner username and email are required"));
        }
        if self.password.len() < 8 {
            return Err(ClientError::validation("Owner password must be at least 8 characters"));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusBody<T> {
    status: T,
}

#[derive(Deserialize)]
struct SeedResponse {
    user: User,
}

pub struct AdminClient {
    api: Arc<ApiClient>,
}

impl AdminClient {
    #[must_use]
    pub fn new(api: Arc<ApiClient>) -> Self {
        AdminClient { api }
    }

    /// # Errors
    ///
    /// The HTTP error, e.g. 403 when the caller is not the owner.
    pub async fn set_user_status(&self, user_id: &str, status: AccountStatus) -> Result<AdminAck> {
        let ack = self
            .api
            .send_json(Method::PUT, &owner_path(&format!("users/{user_id}/status")), &StatusBody { status })
            .await?;
        info!("user {user_id} set to {status:?}");
        Ok(ack)
    }

    /// # Errors
    ///
    /// The HTTP error, e.g. 404 for an unknown post.
    pub async fn set_post_status(&self, post_id: &str, status: PostStatus) -> Result<AdminAck> {
        let ack = self
            .api
            .send_json(Method::PUT, &owner_path(&format!("posts/{post_id}/status")), &StatusBody { status })
            .await?;
        info!("post {post_id} set to {status:?}");
        Ok(ack)
    }

    /// # Errors
    ///
    /// [`ClientError::Validation`] for a blank title or body, otherwise the
    /// HTTP error.
    pub async fn publish_update(&self, update: &PlatformUpdate) -> Result<AdminAck> {
        if update.title.trim().is_empty() || update.body.trim().is_empty() {
            return Err(ClientError::validation("Update title and body are required"));
        }
        self.api.send_json(Method::POST, &owner_path("updates"), update).await
    }

    /// Creates the owner account on a fresh deployment.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] before any request when the account is
    /// incomplete, otherwise the HTTP error, e.g. when an owner already exists.
    pub async fn seed_owner(&self, account: &OwnerAccount) -> Result<User> {
        account.validate()?;
        let seeded: SeedResponse = self.api.send_json(Method::POST, &owner_path("seed"), account).await?;
        info!("seeded owner {}", seeded.user.username);
        Ok(seeded.user)
    }
}

fn owner_path(rest: &str) -> String {
    format!("admin/owner/{rest}")
}
