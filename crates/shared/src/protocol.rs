use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::domain::{MessageId, PostId, Role, UserId};

/// Admin message exactly as the server sent it. Required fields stay optional
/// here so one bad entry can be dropped without failing the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Backend columns without a value arrive as `null`; read them as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessage {
    pub message_id: MessageId,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecord {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("unparseable timestamp `{0}`")]
    BadTimestamp(String),
}

impl TryFrom<AdminMessageRecord> for AdminMessage {
    type Error = MalformedRecord;

    fn try_from(record: AdminMessageRecord) -> Result<Self, Self::Error> {
        let message_id = record
            .message_id
            .ok_or(MalformedRecord::MissingField("messageId"))?;
        let raw_created_at = record
            .created_at
            .ok_or(MalformedRecord::MissingField("createdAt"))?;
        let created_at = parse_timestamp(&raw_created_at)
            .ok_or(MalformedRecord::BadTimestamp(raw_created_at))?;

        Ok(Self {
            message_id,
            title: record.title,
            content: record.content,
            created_at,
        })
    }
}

impl From<&AdminMessage> for AdminMessageRecord {
    fn from(message: &AdminMessage) -> Self {
        Self {
            message_id: Some(message.message_id),
            title: message.title.clone(),
            content: message.content.clone(),
            created_at: Some(message.created_at.to_rfc3339()),
        }
    }
}

/// Accepts RFC 3339 as well as the zone-less `LocalDateTime` form the backend
/// emits, which is read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAuthor {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub profile_image: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayAuthor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPayload {
    #[serde(default)]
    pub author: Option<DisplayAuthor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Post as returned by the REST backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendPost {
    #[serde(default, alias = "id")]
    pub post_id: Option<PostId>,
    pub user: BackendAuthor,
    pub description: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub likes: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comments: Vec<CommentPayload>,
}

/// Post in the pre-rendered shape used by seeded feeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayPost {
    #[serde(default, alias = "postId")]
    pub id: Option<PostId>,
    #[serde(default)]
    pub author: Option<DisplayAuthor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub likes: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comments: Vec<CommentPayload>,
}

/// Either accepted post shape. A post is in the backend shape only when it
/// carries a `user` and a non-empty `description`; anything else is read as
/// the display shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PostPayload {
    Backend(BackendPost),
    Display(DisplayPost),
}

/// Union of both post shapes, classified after decoding.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPost {
    #[serde(default, alias = "id")]
    post_id: Option<PostId>,
    #[serde(default)]
    user: Option<BackendAuthor>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    author: Option<DisplayAuthor>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    likes: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    comments: Vec<CommentPayload>,
}

impl From<RawPost> for PostPayload {
    fn from(raw: RawPost) -> Self {
        let description = raw.description.filter(|text| !text.is_empty());
        match (raw.user, description) {
            (Some(user), Some(description)) => Self::Backend(BackendPost {
                post_id: raw.post_id,
                user,
                description,
                title: raw.title,
                created_at: raw.created_at,
                image: raw.image,
                likes: raw.likes,
                comments: raw.comments,
            }),
            _ => Self::Display(DisplayPost {
                id: raw.post_id,
                author: raw.author,
                content: raw.content.unwrap_or_default(),
                title: raw.title,
                created_at: raw.created_at,
                image: raw.image,
                likes: raw.likes,
                comments: raw.comments,
            }),
        }
    }
}

impl<'de> Deserialize<'de> for PostPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawPost::deserialize(deserializer).map(Self::from)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub bio: String,
    pub profile_image: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    #[serde(alias = "id")]
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
}
