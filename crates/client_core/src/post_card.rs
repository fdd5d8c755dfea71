//! Post card view state.
//!
//! Posts arrive either in the REST backend shape or in the pre-rendered
//! display shape. Both are folded into [`PostCardRecord`] once, before any
//! presentation logic runs.

use chrono::{Local, NaiveDate};
use shared::{
    domain::{PostId, UserId},
    protocol::{parse_timestamp, BackendPost, CommentPayload, DisplayPost, PostPayload},
};
use tracing::warn;

use crate::{
    error::{ClientError, ClientResult},
    LikeApi,
};

pub const DEFAULT_AVATAR: &str = "/assets/images/default-avatar.png";
const UNKNOWN_AUTHOR: &str = "Unknown User";
const ANONYMOUS_COMMENTER: &str = "Anonymous";
const UNDATED_COMMENT: &str = "Recently";
const DISPLAY_DATE_FORMAT: &str = "%-m/%-d/%Y";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRecord {
    pub author_name: String,
    pub author_avatar: String,
    pub content: String,
    pub posted_on: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCardRecord {
    pub post_id: Option<PostId>,
    pub author_name: String,
    pub author_avatar: String,
    pub title: String,
    pub content: String,
    pub posted_on: String,
    pub image: Option<String>,
    pub likes: u32,
    pub comments: Vec<CommentRecord>,
}

impl PostCardRecord {
    /// `today` fills in for posts without a usable date.
    pub fn normalize(payload: PostPayload, today: NaiveDate) -> Self {
        match payload {
            PostPayload::Backend(post) => Self::from_backend(post, today),
            PostPayload::Display(post) => Self::from_display(post, today),
        }
    }

    fn from_backend(post: BackendPost, today: NaiveDate) -> Self {
        let full_name = format!(
            "{} {}",
            post.user.first_name.as_deref().unwrap_or_default(),
            post.user.last_name.as_deref().unwrap_or_default()
        );
        let posted_on = match post.created_at.as_deref() {
            Some(raw) => match parse_timestamp(raw) {
                Some(created_at) => created_at.date_naive(),
                None => {
                    warn!("post has unreadable createdAt '{raw}', showing today's date");
                    today
                }
            },
            None => today,
        };

        Self {
            post_id: post.post_id,
            author_name: non_empty(full_name.trim()).unwrap_or(UNKNOWN_AUTHOR).to_string(),
            author_avatar: post
                .user
                .profile_image
                .unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
            title: post.title.unwrap_or_default(),
            content: post.description,
            posted_on: posted_on.format(DISPLAY_DATE_FORMAT).to_string(),
            image: post.image,
            likes: post.likes.unwrap_or(0),
            comments: post.comments.into_iter().map(CommentRecord::from).collect(),
        }
    }

    fn from_display(post: DisplayPost, today: NaiveDate) -> Self {
        let (author_name, author_avatar) = match post.author {
            Some(author) => (
                author.name.unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
                author.avatar.unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
            ),
            None => (UNKNOWN_AUTHOR.to_string(), DEFAULT_AVATAR.to_string()),
        };

        Self {
            post_id: post.id,
            author_name,
            author_avatar,
            title: post.title.unwrap_or_default(),
            content: post.content,
            posted_on: post
                .created_at
                .unwrap_or_else(|| today.format(DISPLAY_DATE_FORMAT).to_string()),
            image: post.image,
            likes: post.likes.unwrap_or(0),
            comments: post.comments.into_iter().map(CommentRecord::from).collect(),
        }
    }
}

impl From<PostPayload> for PostCardRecord {
    fn from(payload: PostPayload) -> Self {
        Self::normalize(payload, Local::now().date_naive())
    }
}

impl From<CommentPayload> for CommentRecord {
    fn from(comment: CommentPayload) -> Self {
        let author = comment.author.unwrap_or_default();
        Self {
            author_name: author.name.unwrap_or_else(|| ANONYMOUS_COMMENTER.to_string()),
            author_avatar: author.avatar.unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
            content: comment.content,
            posted_on: comment
                .created_at
                .unwrap_or_else(|| UNDATED_COMMENT.to_string()),
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

#[derive(Debug, Clone)]
pub struct PostCard {
    record: PostCardRecord,
    liked: bool,
    likes: u32,
    show_comments: bool,
}

impl PostCard {
    pub fn new(payload: PostPayload) -> Self {
        Self::from_record(PostCardRecord::from(payload))
    }

    pub fn from_record(record: PostCardRecord) -> Self {
        Self {
            likes: record.likes,
            record,
            liked: false,
            show_comments: false,
        }
    }

    pub fn record(&self) -> &PostCardRecord {
        &self.record
    }

    pub fn liked(&self) -> bool {
        self.liked
    }

    pub fn likes(&self) -> u32 {
        self.likes
    }

    pub fn comment_count(&self) -> usize {
        self.record.comments.len()
    }

    pub fn comments_open(&self) -> bool {
        self.show_comments
    }

    /// Returns the new liked state.
    pub fn toggle_like(&mut self) -> bool {
        if self.liked {
            self.likes = self.likes.saturating_sub(1);
        } else {
            self.likes += 1;
        }
        self.liked = !self.liked;
        self.liked
    }

    pub fn toggle_comments(&mut self) -> bool {
        self.show_comments = !self.show_comments;
        self.show_comments
    }

    pub fn visible_comments(&self) -> &[CommentRecord] {
        if self.show_comments {
            &self.record.comments
        } else {
            &[]
        }
    }

    /// Pushes the current like state to the backend. The local toggle is
    /// undone if the backend refuses it.
    pub async fn sync_like(&mut self, api: &dyn LikeApi, user_id: UserId) -> ClientResult<()> {
        let Some(post_id) = self.record.post_id else {
            self.toggle_like();
            return Err(ClientError::Data("post has no id to like".to_string()));
        };

        if let Err(err) = api.set_post_liked(post_id, user_id, self.liked).await {
            warn!("reverting like on post {post_id}: {err}");
            self.toggle_like();
            return Err(err);
        }
        Ok(())
    }
}
