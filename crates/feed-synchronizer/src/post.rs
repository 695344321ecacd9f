//! Post values and row decoding.

use std::cmp::Ordering;
use std::fmt;

use backend_gateway::Row;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Relation embedded in feed rows for the author's profile.
pub const PROFILE_RELATION: &str = "profiles";

const FALLBACK_AUTHOR_NAME: &str = "User";
const FALLBACK_AUTHOR_INITIAL: char = 'U';

/// Globally unique, immutable post identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Author details joined from the profiles table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorProfile {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: String,
    pub caption: Option<String>,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
    pub author_profile: Option<AuthorProfile>,
}

/// Why a row could not become a [`Post`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("row has no id")]
    MissingId,
    #[error("row {id} has no parseable created_at")]
    BadTimestamp { id: String },
}

impl Post {
    /// Decodes a posts row.
    ///
    /// Only `id` and `created_at` are required. A missing or malformed
    /// profile embed leaves `author_profile` empty rather than failing.
    pub fn from_row(row: &Row) -> Result<Self, RowError> {
        let id = row
            .get("id")
            .and_then(scalar_text)
            .filter(|id| !id.is_empty())
            .ok_or(RowError::MissingId)?;

        let created_at = row
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .ok_or_else(|| RowError::BadTimestamp { id: id.clone() })?;

        Ok(Self {
            id: PostId(id),
            author_id: row.get("user_id").and_then(scalar_text).unwrap_or_default(),
            caption: row
                .get("caption")
                .and_then(Value::as_str)
                .map(str::to_string),
            image_url: row
                .get("image_url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            created_at,
            author_profile: row.get(PROFILE_RELATION).and_then(AuthorProfile::from_embed),
        })
    }

    /// Feed order: newest first, ties broken by id descending.
    pub fn feed_order(a: &Post, b: &Post) -> Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    }

    /// Name shown on the post card.
    pub fn author_name(&self) -> &str {
        self.author_profile
            .as_ref()
            .and_then(|p| p.display_name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(FALLBACK_AUTHOR_NAME)
    }

    /// Letter shown in place of a missing avatar.
    pub fn author_initial(&self) -> char {
        self.author_profile
            .as_ref()
            .and_then(|p| p.display_name.as_deref())
            .and_then(|name| name.trim().chars().next())
            .unwrap_or(FALLBACK_AUTHOR_INITIAL)
    }

    /// Short date label, e.g. `Mar 5`.
    pub fn date_label(&self) -> String {
        self.created_at.format("%b %-d").to_string()
    }
}

impl AuthorProfile {
    /// Accepts the embed as an object, or as a one-element array (to-many
    /// embeds). Anything else is treated as no profile.
    fn from_embed(value: &Value) -> Option<Self> {
        let object = match value {
            Value::Object(map) => map,
            Value::Array(items) => items.first()?.as_object()?,
            _ => return None,
        };

        let text = |key: &str| match object.get(key) {
            Some(Value::String(s)) => Some(Some(s.clone())),
            None | Some(Value::Null) => Some(None),
            Some(_) => None,
        };

        Some(Self {
            display_name: text("full_name")?,
            avatar_url: text("avatar_url")?,
        })
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses RFC 3339, plus the offset-less form Postgres emits for
/// `timestamp` columns over realtime.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn decodes_full_row() {
        let post = Post::from_row(&row(json!({
            "id": "p1",
            "user_id": "u1",
            "caption": "hello",
            "image_url": "https://img/p1.jpg",
            "created_at": "2024-03-05T10:00:00+00:00",
            "profiles": { "full_name": "Ana Lima", "avatar_url": "https://img/ana.jpg" }
        })))
        .unwrap();

        assert_eq!(post.id.as_str(), "p1");
        assert_eq!(post.author_id, "u1");
        assert_eq!(post.caption.as_deref(), Some("hello"));
        assert_eq!(
            post.author_profile,
            Some(AuthorProfile {
                display_name: Some("Ana Lima".to_string()),
                avatar_url: Some("https://img/ana.jpg".to_string()),
            })
        );
        assert_eq!(post.author_name(), "Ana Lima");
        assert_eq!(post.author_initial(), 'A');
        assert_eq!(post.date_label(), "Mar 5");
    }

    #[test]
    fn numeric_ids_become_text() {
        let post = Post::from_row(&row(json!({
            "id": 42,
            "created_at": "2024-01-01T00:00:00Z"
        })))
        .unwrap();
        assert_eq!(post.id, PostId::new("42"));
    }

    #[test]
    fn malformed_profile_is_dropped_not_fatal() {
        for profiles in [
            json!(null),
            json!("Ana"),
            json!({ "full_name": 7 }),
            json!([]),
        ] {
            let post = Post::from_row(&row(json!({
                "id": "p1",
                "created_at": "2024-01-01T00:00:00Z",
                "profiles": profiles
            })))
            .unwrap();
            assert_eq!(post.author_profile, None);
            assert_eq!(post.author_name(), "User");
            assert_eq!(post.author_initial(), 'U');
        }
    }

    #[test]
    fn profile_as_single_element_array() {
        let post = Post::from_row(&row(json!({
            "id": "p1",
            "created_at": "2024-01-01T00:00:00Z",
            "profiles": [{ "full_name": "Bo", "avatar_url": null }]
        })))
        .unwrap();
        assert_eq!(post.author_name(), "Bo");
        assert_eq!(post.author_profile.unwrap().avatar_url, None);
    }

    #[test]
    fn missing_id_or_timestamp_is_rejected() {
        assert_eq!(
            Post::from_row(&row(json!({ "created_at": "2024-01-01T00:00:00Z" }))),
            Err(RowError::MissingId)
        );
        assert_eq!(
            Post::from_row(&row(json!({ "id": "p1", "created_at": "yesterday" }))),
            Err(RowError::BadTimestamp {
                id: "p1".to_string()
            })
        );
    }

    #[test]
    fn realtime_timestamp_without_offset() {
        let post = Post::from_row(&row(json!({
            "id": "p1",
            "created_at": "2024-03-05T10:00:00.123456"
        })))
        .unwrap();
        assert_eq!(post.date_label(), "Mar 5");
    }

    #[test]
    fn feed_order_is_newest_first_then_id_desc() {
        let at = |id: &str, ts: &str| {
            Post::from_row(&row(json!({ "id": id, "created_at": ts }))).unwrap()
        };
        let mut posts = vec![
            at("a", "2024-01-01T00:00:00Z"),
            at("c", "2024-01-02T00:00:00Z"),
            at("b", "2024-01-02T00:00:00Z"),
        ];
        posts.sort_by(Post::feed_order);
        let ids: Vec<_> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }
}
