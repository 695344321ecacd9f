//! Behavioural tests for the session store.
//!
//! - `lifecycle.rs` - initialize, idempotence, release, remount
//! - `ordering.rs`  - event ordering, races with the initial read, change handlers
//! - `failures.rs`  - gateway failures never corrupt the stored session

mod lifecycle;

use std::sync::Arc;
use std::time::Duration;

use backend_gateway::{InMemoryGateway, Session};

use crate::SessionStore;

pub(crate) const WAIT: Duration = Duration::from_secs(2);

pub(crate) const EMAIL_A: &str = "a@x.com";
pub(crate) const EMAIL_B: &str = "b@x.com";
pub(crate) const PASSWORD: &str = "secret1";

pub(crate) fn setup() -> (Arc<InMemoryGateway>, SessionStore) {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.register_user(EMAIL_A, PASSWORD);
    gateway.register_user(EMAIL_B, PASSWORD);
    let store = SessionStore::new(gateway.clone());
    (gateway, store)
}

/// Waits until the store holds a session for `email` (or none, for `None`).
pub(crate) async fn wait_for_email(store: &SessionStore, email: Option<&str>) -> Option<Session> {
    tokio::time::timeout(
        WAIT,
        store.wait_until(|session| session.and_then(Session::email) == email),
    )
    .await
    .expect("session did not reach the expected state")
}

/// Lets spawned listener tasks drain whatever is queued.
pub(crate) async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
