//! Behavioural tests for the feed synchronizer.
//!
//! - `ordering.rs`  - snapshot and live merge order, buffering during load
//! - `live.rs`      - inserts, profiles, malformed rows, post creation
//! - `failures.rs`  - query failures, subscription failures, reconnect
//! - `lifecycle.rs` - start, stop, restart, drop


use std::sync::Arc;
use std::time::Duration;

use backend_gateway::{InMemoryGateway, Row};
use serde_json::json;
use tokio::sync::watch;

use crate::{FeedConfig, FeedState, FeedSynchronizer, ReconnectPolicy};

pub(crate) const WAIT: Duration = Duration::from_secs(2);
pub(crate) const POSTS: &str = "posts";

pub(crate) fn fast_config() -> FeedConfig {
    FeedConfig {
        subscribe_timeout: WAIT,
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
        ..FeedConfig::default()
    }
}

pub(crate) fn setup_with(config: FeedConfig) -> (Arc<InMemoryGateway>, FeedSynchronizer) {
    let gateway = Arc::new(InMemoryGateway::new());
    let feed = FeedSynchronizer::new(gateway.clone(), config);
    (gateway, feed)
}

pub(crate) fn setup() -> (Arc<InMemoryGateway>, FeedSynchronizer) {
    setup_with(fast_config())
}

/// A posts row created on 2024-03-`day`.
pub(crate) fn post_row(id: &str, day: u32) -> Row {
    json!({
        "id": id,
        "user_id": "u1",
        "caption": format!("caption {id}"),
        "image_url": format!("https://img/{id}.jpg"),
        "created_at": format!("2024-03-{day:02}T12:00:00Z"),
    })
    .as_object()
    .cloned()
    .unwrap()
}

pub(crate) async fn wait_for(
    rx: &mut watch::Receiver<FeedState>,
    mut predicate: impl FnMut(&FeedState) -> bool,
) -> FeedState {
    let state = tokio::time::timeout(WAIT, rx.wait_for(|state| predicate(state)))
        .await
        .expect("feed did not reach the expected state")
        .expect("feed state channel closed");
    state.clone()
}

pub(crate) async fn wait_ready(rx: &mut watch::Receiver<FeedState>) -> FeedState {
    wait_for(rx, |state| state.status.is_ready()).await
}

/// Polls `check` until it holds.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not reached");
}

/// Lets spawned run tasks drain whatever is queued.
pub(crate) async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
