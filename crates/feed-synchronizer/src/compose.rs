//! Creating posts.
//!
//! The new post reaches the feed through the insert stream like any other
//! post; nothing here touches feed state.

use backend_gateway::{BackendGateway, Row, Session, WriteError, WriteResult};
use client_config_and_utils::DEFAULT_POSTS_TABLE;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

/// Caller-supplied content for a new post. Image upload happens elsewhere;
/// `image_url` is the public URL of the stored image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewPost {
    pub caption: Option<String>,
    pub image_url: String,
}

impl NewPost {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            caption: None,
            image_url: image_url.into(),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    fn into_row(self, author_id: &str) -> Row {
        let caption = self
            .caption
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let mut row = Row::new();
        row.insert("user_id".to_string(), Value::String(author_id.to_string()));
        row.insert(
            "caption".to_string(),
            caption.map(Value::String).unwrap_or(Value::Null),
        );
        row.insert(
            "image_url".to_string(),
            Value::String(self.image_url.trim().to_string()),
        );
        row
    }
}

/// Inserts a post authored by the signed-in subject into the posts table.
pub async fn create_post(
    gateway: &dyn BackendGateway,
    session: Option<&Session>,
    post: NewPost,
) -> WriteResult<()> {
    create_post_in(gateway, DEFAULT_POSTS_TABLE, session, post).await
}

/// [`create_post`] against a configured table name.
pub async fn create_post_in(
    gateway: &dyn BackendGateway,
    table: &str,
    session: Option<&Session>,
    post: NewPost,
) -> WriteResult<()> {
    let session = session.ok_or(WriteError::NotAuthenticated)?;
    if post.image_url.trim().is_empty() {
        return Err(WriteError::Invalid("image_url is required".to_string()));
    }

    let row = post.into_row(&session.subject_id);
    gateway
        .insert(table, row)
        .await
        .inspect_err(|err| warn!(error = %err, "Create post failed"))?;
    info!(author_id = %session.subject_id, table, "Post created");
    Ok(())
}
