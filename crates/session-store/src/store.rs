//! The session store.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use backend_gateway::{
    AuthError, AuthEvent, BackendGateway, ChannelStatus, ListenerRegistry, Registration, Session,
    Subscription, SubscriptionEvent,
};
use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::change::{SessionChange, SessionTransition};

type ChangeHandler = Arc<dyn Fn(&SessionChange) + Send + Sync>;

/// Set by `release()`. Held while an event is applied and its handlers run,
/// so release waits for an in-flight notification. Reentrant so a handler
/// may release the listener itself.
type StopFlag = Arc<ReentrantMutex<Cell<bool>>>;

struct ActiveRun {
    generation: u64,
    registration: Registration,
}

struct StoreInner {
    gateway: Arc<dyn BackendGateway>,
    current: watch::Sender<Option<Session>>,
    changes: ListenerRegistry<SessionChange>,
    handlers: Mutex<BTreeMap<u64, ChangeHandler>>,
    next_handler: AtomicU64,
    init_lock: tokio::sync::Mutex<()>,
    active: Mutex<Option<ActiveRun>>,
    generation: AtomicU64,
}

impl StoreInner {
    fn seed(&self, session: Option<Session>) {
        match &session {
            Some(s) => info!(subject_id = %s.subject_id, "Session restored"),
            None => debug!("No session on startup"),
        }
        self.current.send_replace(session);
    }

    fn apply(&self, event: AuthEvent) -> SessionChange {
        let previous = self.current.borrow().clone();
        let change = SessionChange::new(event.kind, previous.as_ref(), event.session);
        self.current.send_replace(change.session.clone());
        change
    }

    fn notify(&self, change: &SessionChange) {
        match change.transition {
            SessionTransition::Refreshed => debug!(
                kind = %change.kind,
                subject_id = ?change.subject_id(),
                "Session refreshed"
            ),
            transition => info!(
                kind = %change.kind,
                transition = ?transition,
                subject_id = ?change.subject_id(),
                previous_subject = ?change.previous_subject,
                "Session changed"
            ),
        }

        let ids: Vec<u64> = self.handlers.lock().keys().copied().collect();
        for id in ids {
            let handler = self.handlers.lock().get(&id).cloned();
            if let Some(handler) = handler {
                handler(change);
            }
        }
        self.changes.emit(change);
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(run) = self.active.get_mut().take() {
            run.registration.release();
        }
    }
}

/// Handle returned by [`SessionStore::initialize`].
///
/// `release()` stops the auth change listener before returning; events
/// emitted afterwards are not applied. Dropping the handle does not release.
#[derive(Debug, Clone)]
pub struct SessionListener {
    registration: Registration,
}

impl SessionListener {
    pub fn release(&self) {
        self.registration.release();
    }

    pub fn is_released(&self) -> bool {
        self.registration.is_released()
    }
}

/// Owns the one authoritative session value.
///
/// The value changes only when the backend emits an auth change; sign-in
/// and sign-out calls report errors but never write it directly. Cheap to
/// clone; clones share state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    pub fn new(gateway: Arc<dyn BackendGateway>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                gateway,
                current: watch::Sender::new(None),
                changes: ListenerRegistry::new(),
                handlers: Mutex::new(BTreeMap::new()),
                next_handler: AtomicU64::new(1),
                init_lock: tokio::sync::Mutex::new(()),
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Seeds the session from the backend and starts following auth changes.
    ///
    /// The auth listener is registered before the session read is issued;
    /// the read is applied first, then every event that arrived meanwhile,
    /// in emission order. A failed read leaves the session absent.
    ///
    /// Calling this again while a listener is running returns a handle to
    /// the same listener without another read.
    pub async fn initialize(&self) -> SessionListener {
        let _init = self.inner.init_lock.lock().await;

        if let Some(run) = self.inner.active.lock().as_ref() {
            debug!(generation = run.generation, "Session store already initialized");
            return SessionListener {
                registration: run.registration.clone(),
            };
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let auth_events = self.inner.gateway.on_auth_change();
        let gateway_listener = auth_events.registration();
        let stopped: StopFlag = Arc::new(ReentrantMutex::new(Cell::new(false)));

        let initial = match self.inner.gateway.get_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Initial session read failed, starting signed out");
                None
            }
        };
        self.inner.seed(initial);

        let task = tokio::spawn(run_listener(
            auth_events,
            Arc::downgrade(&self.inner),
            Arc::clone(&stopped),
            generation,
        ));

        let weak = Arc::downgrade(&self.inner);
        let registration = Registration::new(move || {
            stopped.lock().set(true);
            gateway_listener.release();
            task.abort();

            if let Some(inner) = weak.upgrade() {
                let finished = {
                    let mut active = inner.active.lock();
                    if active.as_ref().map(|run| run.generation) == Some(generation) {
                        active.take()
                    } else {
                        None
                    }
                };
                drop(finished);
            }
            info!(generation, "Session listener released");
        });

        *self.inner.active.lock() = Some(ActiveRun {
            generation,
            registration: registration.clone(),
        });
        info!(
            generation,
            signed_in = self.inner.current.borrow().is_some(),
            "Session store initialized"
        );

        SessionListener { registration }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Snapshot of the current session. Never blocks.
    pub fn current_session(&self) -> Option<Session> {
        self.inner.current.borrow().clone()
    }

    /// Watch the session value. Always holds a complete snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.inner.current.subscribe()
    }

    /// Waits until the session satisfies `predicate` and returns it.
    pub async fn wait_until<F>(&self, mut predicate: F) -> Option<Session>
    where
        F: FnMut(Option<&Session>) -> bool,
    {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|session| predicate(session.as_ref())).await;
        match result {
            Ok(session) => session.clone(),
            Err(_) => self.current_session(),
        }
    }

    /// Calls `handler` once per applied auth event, in order.
    ///
    /// Keep the returned registration alive; dropping or releasing it
    /// removes the handler.
    pub fn on_change<F>(&self, handler: F) -> Registration
    where
        F: Fn(&SessionChange) + Send + Sync + 'static,
    {
        let id = self.inner.next_handler.fetch_add(1, Ordering::SeqCst);
        self.inner.handlers.lock().insert(id, Arc::new(handler));

        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        Registration::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handlers.lock().remove(&id);
            }
        })
    }

    /// Stream of applied changes.
    pub fn changes(&self) -> Subscription<SessionChange> {
        let (_, subscription) = self.inner.changes.register(ChannelStatus::Active);
        subscription
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.inner
            .gateway
            .sign_in(email, password)
            .await
            .inspect_err(|e| warn!(error = %e, "Sign-in failed"))
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.inner
            .gateway
            .sign_up(email, password)
            .await
            .inspect_err(|e| warn!(error = %e, "Sign-up failed"))
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner
            .gateway
            .sign_out()
            .await
            .inspect_err(|e| warn!(error = %e, "Sign-out failed"))
    }
}

async fn run_listener(
    mut auth_events: Subscription<AuthEvent>,
    store: Weak<StoreInner>,
    stopped: StopFlag,
    generation: u64,
) {
    loop {
        let Some(inner) = store.upgrade() else {
            break;
        };
        let expiry = inner.current.borrow().as_ref().map(|s| s.expiry);
        drop(inner);
        let expiry_timer = async move {
            match expiry {
                Some(expiry) => {
                    let remaining = (expiry - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::time::sleep_until(Instant::now() + remaining).await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = auth_events.next_event() => match event {
                SubscriptionEvent::Item(event) => {
                    if !apply_event(&store, &stopped, event) {
                        break;
                    }
                }
                SubscriptionEvent::Closed(reason) => {
                    debug!(generation, reason = ?reason, "Auth change stream closed");
                    break;
                }
            },
            _ = expiry_timer => {
                if !expire_session(&store, &stopped, &mut auth_events, generation).await {
                    break;
                }
            }
        }
    }
}

/// Applies one event and notifies handlers. `false` once the listener is
/// released or the store is gone.
fn apply_event(store: &Weak<StoreInner>, stopped: &StopFlag, event: AuthEvent) -> bool {
    let Some(inner) = store.upgrade() else {
        return false;
    };
    let stopped = stopped.lock();
    if stopped.get() {
        return false;
    }
    let change = inner.apply(event);
    inner.notify(&change);
    true
}

/// The current session reached its expiry: ask the backend for a valid
/// one, apply whatever it emitted meanwhile, and clear the session if it is
/// still expired afterwards.
async fn expire_session(
    store: &Weak<StoreInner>,
    stopped: &StopFlag,
    auth_events: &mut Subscription<AuthEvent>,
    generation: u64,
) -> bool {
    let gateway = {
        let Some(inner) = store.upgrade() else {
            return false;
        };
        let expired = inner.current.borrow().as_ref().is_some_and(Session::is_expired);
        if !expired {
            return true;
        }
        Arc::clone(&inner.gateway)
    };

    debug!(generation, "Session expired, asking the backend for a fresh one");
    if let Err(e) = gateway.get_session().await {
        warn!(generation, error = %e, "Session refresh after expiry failed");
    }

    while let Some(event) = auth_events.try_recv() {
        if !apply_event(store, stopped, event) {
            return false;
        }
    }

    let Some(inner) = store.upgrade() else {
        return false;
    };
    let stopped = stopped.lock();
    if stopped.get() {
        return false;
    }
    let still_expired = inner.current.borrow().as_ref().is_some_and(Session::is_expired);
    if still_expired {
        info!(generation, "Session expired, signing out locally");
        let change = inner.apply(AuthEvent::signed_out());
        inner.notify(&change);
    }
    true
}
