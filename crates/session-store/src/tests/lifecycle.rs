//! Initialize, idempotence, release, remount, expiry.

use std::sync::atomic::{AtomicBool, Ordering};

use super::*;
use crate::{SessionChange, SessionListener, SessionTransition};
use backend_gateway::{AuthEvent, BackendGateway};
use chrono::Utc;
use parking_lot::Mutex;

/// A session for `email` that expires `millis` from now.
fn short_lived(gateway: &InMemoryGateway, email: &str, millis: i64) -> Session {
    let mut session = gateway.session_for(email).unwrap();
    session.expiry = Utc::now() + chrono::Duration::milliseconds(millis);
    session
}

fn record_changes(store: &SessionStore) -> (Arc<Mutex<Vec<SessionChange>>>, backend_gateway::Registration) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = store.on_change(move |change| sink.lock().push(change.clone()));
    (seen, handler)
}

#[tokio::test]
async fn initialize_seeds_from_existing_session() {
    let (gateway, store) = setup();
    let existing = gateway.session_for(EMAIL_A).unwrap();
    gateway.set_session(Some(existing.clone()));

    let _listener = store.initialize().await;

    assert_eq!(store.current_session(), Some(existing));
    assert!(store.is_initialized());
}

#[tokio::test]
async fn initialize_without_session_starts_signed_out() {
    let (_gateway, store) = setup();

    let _listener = store.initialize().await;

    assert_eq!(store.current_session(), None);
}

#[tokio::test]
async fn initialize_twice_registers_one_listener_and_reads_once() {
    let (gateway, store) = setup();

    let first = store.initialize().await;
    let second = store.initialize().await;

    assert_eq!(gateway.auth_listener_count(), 1);
    assert_eq!(gateway.session_read_count(), 1);

    second.release();
    assert!(first.is_released());
    assert_eq!(gateway.auth_listener_count(), 0);
}

#[tokio::test]
async fn concurrent_initialize_reads_once() {
    let (gateway, store) = setup();

    let (a, b) = tokio::join!(store.initialize(), store.initialize());

    assert_eq!(gateway.session_read_count(), 1);
    assert_eq!(gateway.auth_listener_count(), 1);
    a.release();
    assert!(b.is_released());
}

#[tokio::test]
async fn release_stops_applying_events() {
    let (gateway, store) = setup();
    let listener = store.initialize().await;

    gateway.sign_in(EMAIL_A, PASSWORD).await.unwrap();
    wait_for_email(&store, Some(EMAIL_A)).await;

    listener.release();
    assert!(!store.is_initialized());
    assert_eq!(gateway.auth_listener_count(), 0);

    gateway.emit_auth_event(AuthEvent::signed_out());
    settle().await;

    assert_eq!(
        store.current_session().as_ref().and_then(Session::email),
        Some(EMAIL_A)
    );
}

#[tokio::test]
async fn release_is_idempotent() {
    let (gateway, store) = setup();
    let listener = store.initialize().await;

    listener.release();
    listener.release();

    assert!(listener.is_released());
    assert_eq!(gateway.auth_listener_count(), 0);
}

#[tokio::test]
async fn initialize_after_release_remounts() {
    let (gateway, store) = setup();

    let first = store.initialize().await;
    first.release();

    let existing = gateway.session_for(EMAIL_B).unwrap();
    gateway.set_session(Some(existing.clone()));

    let second = store.initialize().await;
    assert!(!second.is_released());
    assert_eq!(gateway.session_read_count(), 2);
    assert_eq!(gateway.auth_listener_count(), 1);
    assert_eq!(store.current_session(), Some(existing));

    // Releasing the old handle again must not touch the new listener.
    first.release();
    assert!(store.is_initialized());
    assert_eq!(gateway.auth_listener_count(), 1);
}

#[tokio::test]
async fn dropping_the_handle_keeps_listening() {
    let (gateway, store) = setup();
    drop(store.initialize().await);

    gateway.sign_in(EMAIL_A, PASSWORD).await.unwrap();

    wait_for_email(&store, Some(EMAIL_A)).await;
    assert_eq!(gateway.auth_listener_count(), 1);
}

#[tokio::test]
async fn dropping_the_store_releases_the_listener() {
    let (gateway, store) = setup();
    let listener = store.initialize().await;

    drop(store);
    settle().await;

    assert!(listener.is_released());
    assert_eq!(gateway.auth_listener_count(), 0);
}

#[tokio::test]
async fn expired_session_is_cleared() {
    let (gateway, store) = setup();
    let (seen, _handler) = record_changes(&store);
    let _listener = store.initialize().await;

    gateway.emit_auth_event(AuthEvent::signed_in(short_lived(&gateway, EMAIL_A, 50)));

    tokio::time::timeout(WAIT, async {
        while seen.lock().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("expired session was never cleared");
    assert_eq!(store.current_session(), None);

    let transitions: Vec<_> = seen.lock().iter().map(|c| c.transition).collect();
    assert_eq!(
        transitions,
        vec![SessionTransition::SignedIn, SessionTransition::SignedOut]
    );
}

#[tokio::test]
async fn expiring_session_is_refreshed_when_the_backend_can() {
    let (gateway, store) = setup();
    gateway.refresh_expired_sessions(true);
    let (seen, _handler) = record_changes(&store);
    let _listener = store.initialize().await;

    let original = short_lived(&gateway, EMAIL_A, 50);
    gateway.emit_auth_event(AuthEvent::signed_in(original.clone()));

    let fresh = tokio::time::timeout(
        WAIT,
        store.wait_until(|session| {
            session.is_some_and(|s| s.credentials_token != original.credentials_token)
        }),
    )
    .await
    .expect("session was not refreshed")
    .unwrap();

    assert_eq!(fresh.subject_id, original.subject_id);
    assert!(!fresh.is_expired());
    settle().await;
    let transitions: Vec<_> = seen.lock().iter().map(|c| c.transition).collect();
    assert_eq!(
        transitions,
        vec![SessionTransition::SignedIn, SessionTransition::Refreshed]
    );
}

#[tokio::test]
async fn release_cancels_the_expiry_timer() {
    let (gateway, store) = setup();
    let listener = store.initialize().await;

    let session = short_lived(&gateway, EMAIL_A, 200);
    gateway.emit_auth_event(AuthEvent::signed_in(session.clone()));
    wait_for_email(&store, Some(EMAIL_A)).await;

    listener.release();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(store.current_session(), Some(session));
    assert_eq!(gateway.session_read_count(), 1);
}

#[tokio::test]
async fn handler_can_release_its_own_listener() {
    let (gateway, store) = setup();
    let slot: Arc<Mutex<Option<SessionListener>>> = Arc::new(Mutex::new(None));
    let calls = Arc::new(Mutex::new(0usize));

    let _handler = {
        let slot = Arc::clone(&slot);
        let calls = Arc::clone(&calls);
        store.on_change(move |_| {
            *calls.lock() += 1;
            if let Some(listener) = slot.lock().as_ref() {
                listener.release();
            }
        })
    };
    *slot.lock() = Some(store.initialize().await);

    gateway.sign_in(EMAIL_A, PASSWORD).await.unwrap();
    wait_for_email(&store, Some(EMAIL_A)).await;
    assert!(slot.lock().as_ref().unwrap().is_released());

    gateway.emit_auth_event(AuthEvent::signed_out());
    settle().await;

    assert_eq!(*calls.lock(), 1);
    assert!(store.current_session().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn release_waits_for_a_running_handler() {
    let (gateway, store) = setup();
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));

    let _handler = {
        let started = Arc::clone(&started);
        let finished = Arc::clone(&finished);
        store.on_change(move |_| {
            started.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            finished.store(true, Ordering::SeqCst);
        })
    };
    let listener = store.initialize().await;

    gateway.sign_in(EMAIL_A, PASSWORD).await.unwrap();
    tokio::time::timeout(WAIT, async {
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("handler never ran");

    tokio::task::spawn_blocking(move || listener.release())
        .await
        .unwrap();

    assert!(finished.load(Ordering::SeqCst));
}
