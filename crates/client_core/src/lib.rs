use async_trait::async_trait;
use reqwest::{Client, Response};
use shared::{
    domain::{PostId, UserId},
    error::{ApiError, ApiException},
    protocol::{AdminMessageRecord, RegisterUserRequest, RegisteredUser},
};
use tracing::warn;

pub mod banner;
pub mod error;
pub mod post_card;
pub mod registration;

pub use banner::{BannerView, DismissalMemory, FeedOptions, FeedState, MessageFeedController};
pub use error::{ClientError, ClientResult};
pub use post_card::{CommentRecord, PostCard, PostCardRecord};
pub use registration::{FormField, RegistrationForm, SubmitOutcome};

/// Remote source of admin broadcast messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Returns the full set of active messages, in no guaranteed order.
    async fn admin_messages(&self) -> ClientResult<Vec<AdminMessageRecord>>;
}

#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn register_user(&self, request: &RegisterUserRequest) -> ClientResult<RegisteredUser>;
}

#[async_trait]
pub trait LikeApi: Send + Sync {
    async fn set_post_liked(&self, post_id: PostId, user_id: UserId, liked: bool)
        -> ClientResult<()>;
}

/// Thin HTTP client for the SkillSync REST backend.
#[derive(Clone)]
pub struct SkillSyncClient {
    http: Client,
    server_url: String,
}

impl SkillSyncClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_http_client(server_url, Client::new())
    }

    pub fn with_http_client(server_url: impl Into<String>, http: Client) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Self { http, server_url }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn fetch_admin_messages(&self) -> ClientResult<Vec<AdminMessageRecord>> {
        let res = self
            .http
            .get(format!("{}/api/admin-messages", self.server_url))
            .send()
            .await?;
        let raw: Option<Vec<serde_json::Value>> = check_status(res).await?.json().await?;

        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| {
                match serde_json::from_value::<AdminMessageRecord>(value) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        let err = ClientError::Data(format!("admin message #{index}: {err}"));
                        warn!("dropping admin message: {err}");
                        None
                    }
                }
            })
            .collect())
    }

    pub async fn register(&self, request: &RegisterUserRequest) -> ClientResult<RegisteredUser> {
        let res = self
            .http
            .post(format!("{}/api/users/register", self.server_url))
            .json(request)
            .send()
            .await?;
        Ok(check_status(res).await?.json().await?)
    }

    pub async fn like_post(&self, post_id: PostId, user_id: UserId) -> ClientResult<()> {
        let res = self
            .http
            .post(self.like_url(post_id, user_id))
            .send()
            .await?;
        check_status(res).await?;
        Ok(())
    }

    pub async fn unlike_post(&self, post_id: PostId, user_id: UserId) -> ClientResult<()> {
        let res = self
            .http
            .delete(self.like_url(post_id, user_id))
            .send()
            .await?;
        check_status(res).await?;
        Ok(())
    }

    fn like_url(&self, post_id: PostId, user_id: UserId) -> String {
        format!("{}/api/likes/{post_id}/user/{user_id}", self.server_url)
    }
}

#[async_trait]
impl MessageSource for SkillSyncClient {
    async fn admin_messages(&self) -> ClientResult<Vec<AdminMessageRecord>> {
        self.fetch_admin_messages().await
    }
}

#[async_trait]
impl AccountApi for SkillSyncClient {
    async fn register_user(&self, request: &RegisterUserRequest) -> ClientResult<RegisteredUser> {
        self.register(request).await
    }
}

#[async_trait]
impl LikeApi for SkillSyncClient {
    async fn set_post_liked(
        &self,
        post_id: PostId,
        user_id: UserId,
        liked: bool,
    ) -> ClientResult<()> {
        if liked {
            self.like_post(post_id, user_id).await
        } else {
            self.unlike_post(post_id, user_id).await
        }
    }
}

/// Maps non-success responses to [`ApiException`], preferring the server's own
/// error body when it sent one.
async fn check_status(res: Response) -> ClientResult<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }

    let body = res.text().await.unwrap_or_default();
    let reported = serde_json::from_str::<ApiError>(&body).ok();
    let fallback = match (&reported, body.trim()) {
        (None, raw) if !raw.is_empty() => raw,
        _ => status.canonical_reason().unwrap_or("request failed"),
    };
    Err(ApiException::from_response(status.as_u16(), reported.as_ref(), fallback).into())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
