//! Published feed snapshots.

use std::fmt;

use backend_gateway::{QueryError, SubscriptionError};
use serde::Serialize;

use crate::post::Post;

/// Why a feed run stopped producing updates.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFailure {
    /// The bulk query failed. Not retried automatically.
    Query(QueryError),
    /// The insert subscription could not be opened or never became active.
    SubscriptionFailed(SubscriptionError),
    /// The insert subscription closed after it was active.
    SubscriptionLost(Option<String>),
}

impl FeedFailure {
    /// Subscription failures are eligible for reconnect; query failures are not.
    pub fn is_subscription(&self) -> bool {
        !matches!(self, FeedFailure::Query(_))
    }
}

impl fmt::Display for FeedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedFailure::Query(err) => write!(f, "Could not load posts: {err}"),
            FeedFailure::SubscriptionFailed(err) => write!(f, "Live updates unavailable: {err}"),
            FeedFailure::SubscriptionLost(Some(reason)) => {
                write!(f, "Live updates disconnected: {reason}")
            }
            FeedFailure::SubscriptionLost(None) => f.write_str("Live updates disconnected"),
        }
    }
}

impl Serialize for FeedFailure {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedStatus {
    /// Never started.
    Idle,
    Loading,
    Ready,
    Failed(FeedFailure),
}

impl FeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::Idle => "idle",
            FeedStatus::Loading => "loading",
            FeedStatus::Ready => "ready",
            FeedStatus::Failed(_) => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, FeedStatus::Ready)
    }

    pub fn failure(&self) -> Option<&FeedFailure> {
        match self {
            FeedStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// A complete feed snapshot. Posts are empty unless the status is `Ready`
/// or a `Failed` that followed `Ready`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedState {
    pub posts: Vec<Post>,
    pub status: FeedStatus,
}

impl Serialize for FeedState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let failure = self.status.failure();
        let mut map = serializer.serialize_map(Some(2 + usize::from(failure.is_some())))?;
        map.serialize_entry("posts", &self.posts)?;
        map.serialize_entry("status", self.status.as_str())?;
        if let Some(failure) = failure {
            map.serialize_entry("reason", failure)?;
        }
        map.end()
    }
}

impl FeedState {
    pub fn idle() -> Self {
        Self {
            posts: Vec::new(),
            status: FeedStatus::Idle,
        }
    }

    pub fn loading() -> Self {
        Self {
            posts: Vec::new(),
            status: FeedStatus::Loading,
        }
    }

    pub fn ready(posts: Vec<Post>) -> Self {
        Self {
            posts,
            status: FeedStatus::Ready,
        }
    }

    pub fn failed(posts: Vec<Post>, failure: FeedFailure) -> Self {
        Self {
            posts,
            status: FeedStatus::Failed(failure),
        }
    }

    pub fn post_ids(&self) -> Vec<&str> {
        self.posts.iter().map(|post| post.id.as_str()).collect()
    }
}

impl Default for FeedState {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_display_is_renderable() {
        let failure = FeedFailure::Query(QueryError::Network("offline".to_string()));
        assert_eq!(failure.to_string(), "Could not load posts: Network error: offline");
        assert!(!failure.is_subscription());

        let lost = FeedFailure::SubscriptionLost(None);
        assert_eq!(lost.to_string(), "Live updates disconnected");
        assert!(lost.is_subscription());
    }

    #[test]
    fn state_serializes_status_inline() {
        let value = serde_json::to_value(FeedState::loading()).unwrap();
        assert_eq!(value, json!({ "posts": [], "status": "loading" }));

        let failed = FeedState::failed(Vec::new(), FeedFailure::SubscriptionLost(Some("eof".into())));
        let value = serde_json::to_value(failed).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["reason"], "Live updates disconnected: eof");
    }

    #[test]
    fn status_helpers() {
        assert!(FeedStatus::Ready.is_ready());
        assert!(FeedStatus::Loading.failure().is_none());
        assert!(FeedStatus::Failed(FeedFailure::SubscriptionLost(None))
            .failure()
            .is_some());
    }
}
