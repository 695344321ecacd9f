//! Event subscription plumbing shared by the gateways and the core components.
//!
//! A [`ListenerRegistry`] fans events out to any number of [`Subscription`]s.
//! Each subscription carries its own [`ChannelStatus`] so callers can await
//! the moment it goes live, and a [`Registration`] that removes the listener
//! when released (explicitly or on drop of the last clone).
//!
//! # Design Principles
//!
//! - Events reach each listener in emission order
//! - Release is synchronous: once `release()` returns, no further event is delivered
//! - Events emitted before a close are still delivered before the close is reported

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::error::{SubscriptionError, SubscriptionResult};

/// Identifies one listener inside a registry.
pub type ListenerId = u64;

/// Lifecycle of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Registered, but the source has not confirmed delivery yet.
    Pending,
    /// The source confirmed delivery; events from now on will arrive.
    Active,
    /// No further events will arrive.
    Closed(Option<String>),
}

impl ChannelStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ChannelStatus::Active)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelStatus::Closed(_))
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

struct RegistrationInner {
    release: Mutex<Option<ReleaseFn>>,
}

impl RegistrationInner {
    fn release(&self) {
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }
}

impl Drop for RegistrationInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Deregistration handle.
///
/// Clones share one release action. It runs at most once: on the first
/// `release()` call, or when the last clone is dropped.
#[derive(Clone)]
#[must_use = "dropping the last Registration releases the listener"]
pub struct Registration {
    inner: Arc<RegistrationInner>,
}

impl Registration {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(RegistrationInner {
                release: Mutex::new(Some(Box::new(release))),
            }),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self {
            inner: Arc::new(RegistrationInner {
                release: Mutex::new(None),
            }),
        }
    }

    /// Runs the release action if it has not run yet. Idempotent.
    pub fn release(&self) {
        self.inner.release();
    }

    pub fn is_released(&self) -> bool {
        self.inner.release.lock().is_none()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("released", &self.is_released())
            .finish()
    }
}

/// What [`Subscription::next_event`] yields.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent<T> {
    Item(T),
    Closed(Option<String>),
}

/// The receiving side of one listener.
pub struct Subscription<T> {
    events: mpsc::UnboundedReceiver<T>,
    status: watch::Receiver<ChannelStatus>,
    status_open: bool,
    registration: Registration,
}

impl<T> Subscription<T> {
    fn new(
        events: mpsc::UnboundedReceiver<T>,
        status: watch::Receiver<ChannelStatus>,
        registration: Registration,
    ) -> Self {
        Self {
            events,
            status,
            status_open: true,
            registration,
        }
    }

    /// A subscription that is already closed and never yields anything.
    pub fn closed(reason: Option<String>) -> Self {
        let (_tx, events) = mpsc::unbounded_channel();
        let (_status_tx, status) = watch::channel(ChannelStatus::Closed(reason));
        Self::new(events, status, Registration::noop())
    }

    /// Current status without waiting.
    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    /// A clone of the deregistration handle.
    ///
    /// Lets one task consume events while another owner keeps the power to
    /// release the listener.
    pub fn registration(&self) -> Registration {
        self.registration.clone()
    }

    /// Wraps the release action so `hook` runs first.
    ///
    /// Gateways use this to tear down transport resources (a websocket task)
    /// together with the listener.
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        let previous = self.registration.clone();
        self.registration = Registration::new(move || {
            hook();
            previous.release();
        });
        self
    }

    /// Waits until the source confirms the subscription is live.
    ///
    /// Returns immediately if it already is. Fails with
    /// [`SubscriptionError::Closed`] if the subscription closes first.
    pub async fn wait_active(&mut self) -> SubscriptionResult<()> {
        loop {
            match self.status.borrow_and_update().clone() {
                ChannelStatus::Active => return Ok(()),
                ChannelStatus::Closed(reason) => return Err(SubscriptionError::Closed(reason)),
                ChannelStatus::Pending => {}
            }
            if self.status.changed().await.is_err() {
                self.status_open = false;
                return Err(SubscriptionError::Closed(self.closed_reason()));
            }
        }
    }

    /// Next event or the close notification.
    ///
    /// Events that were emitted before the close are always yielded first.
    pub async fn next_event(&mut self) -> SubscriptionEvent<T> {
        loop {
            if let Ok(item) = self.events.try_recv() {
                return SubscriptionEvent::Item(item);
            }
            if let ChannelStatus::Closed(reason) = self.status.borrow_and_update().clone() {
                return SubscriptionEvent::Closed(reason);
            }
            if !self.status_open {
                return match self.events.recv().await {
                    Some(item) => SubscriptionEvent::Item(item),
                    None => SubscriptionEvent::Closed(self.closed_reason()),
                };
            }

            tokio::select! {
                biased;
                item = self.events.recv() => {
                    return match item {
                        Some(item) => SubscriptionEvent::Item(item),
                        None => SubscriptionEvent::Closed(self.closed_reason()),
                    };
                }
                changed = self.status.changed() => {
                    if changed.is_err() {
                        self.status_open = false;
                    }
                }
            }
        }
    }

    /// Next event, or `None` once the subscription has closed.
    pub async fn recv(&mut self) -> Option<T> {
        match self.next_event().await {
            SubscriptionEvent::Item(item) => Some(item),
            SubscriptionEvent::Closed(_) => None,
        }
    }

    /// Returns an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.events.try_recv().ok()
    }

    /// Releases the listener and drops the receiver.
    pub fn unsubscribe(self) {
        self.registration.release();
    }

    fn closed_reason(&self) -> Option<String> {
        match &*self.status.borrow() {
            ChannelStatus::Closed(reason) => reason.clone(),
            _ => None,
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("status", &*self.status.borrow())
            .field("registration", &self.registration)
            .finish()
    }
}

struct Listener<T> {
    events: mpsc::UnboundedSender<T>,
    status: watch::Sender<ChannelStatus>,
}

struct RegistryInner<T> {
    next_id: ListenerId,
    listeners: BTreeMap<ListenerId, Listener<T>>,
}

/// Fan-out of events to registered listeners.
///
/// Cheap to clone; clones share the same listener set.
pub struct ListenerRegistry<T> {
    inner: Arc<Mutex<RegistryInner<T>>>,
}

impl<T> Clone for ListenerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 1,
                listeners: BTreeMap::new(),
            })),
        }
    }

    /// Registers a listener with the given starting status.
    ///
    /// The listener receives every event emitted after this call, in
    /// emission order. Releasing the returned subscription's registration
    /// removes it.
    pub fn register(&self, initial: ChannelStatus) -> (ListenerId, Subscription<T>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(initial);

        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.insert(
                id,
                Listener {
                    events: events_tx,
                    status: status_tx,
                },
            );
            id
        };

        let weak: Weak<Mutex<RegistryInner<T>>> = Arc::downgrade(&self.inner);
        let registration = Registration::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().listeners.remove(&id);
            }
        });

        (id, Subscription::new(events_rx, status_rx, registration))
    }

    /// Sends `event` to every listener. Returns how many received it.
    ///
    /// Listeners whose receiver is gone are dropped from the registry.
    pub fn emit(&self, event: &T) -> usize {
        let mut inner = self.inner.lock();
        inner
            .listeners
            .retain(|_, listener| listener.events.send(event.clone()).is_ok());
        inner.listeners.len()
    }

    /// Like [`emit`](Self::emit), but skips listeners that are still
    /// `Pending`. A source that has not confirmed a join delivers nothing.
    pub fn emit_active(&self, event: &T) -> usize {
        let mut inner = self.inner.lock();
        let mut delivered = 0;
        inner.listeners.retain(|_, listener| {
            if !listener.status.borrow().is_active() {
                return true;
            }
            let alive = listener.events.send(event.clone()).is_ok();
            if alive {
                delivered += 1;
            }
            alive
        });
        delivered
    }

    /// Sends `event` to one listener.
    pub fn emit_to(&self, id: ListenerId, event: T) -> bool {
        let mut inner = self.inner.lock();
        let delivered = inner
            .listeners
            .get(&id)
            .map(|listener| listener.events.send(event).is_ok())
            .unwrap_or(false);
        if !delivered {
            inner.listeners.remove(&id);
        }
        delivered
    }

    pub fn set_status(&self, id: ListenerId, status: ChannelStatus) {
        if let Some(listener) = self.inner.lock().listeners.get(&id) {
            listener.status.send_replace(status);
        }
    }

    pub fn set_all_status(&self, status: ChannelStatus) {
        for listener in self.inner.lock().listeners.values() {
            listener.status.send_replace(status.clone());
        }
    }

    /// Marks one listener closed and removes it.
    pub fn close(&self, id: ListenerId, reason: Option<String>) {
        if let Some(listener) = self.inner.lock().listeners.remove(&id) {
            listener.status.send_replace(ChannelStatus::Closed(reason));
        }
    }

    /// Marks every listener closed and empties the registry.
    pub fn close_all(&self, reason: Option<String>) {
        let listeners = std::mem::take(&mut self.inner.lock().listeners);
        for listener in listeners.into_values() {
            listener
                .status
                .send_replace(ChannelStatus::Closed(reason.clone()));
        }
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.inner.lock().listeners.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<ListenerId> {
        self.inner.lock().listeners.keys().copied().collect()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listener_count() == 0
    }
}

impl<T: Clone + Send + 'static> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let registry = ListenerRegistry::<u32>::new();
        let (_, mut sub) = registry.register(ChannelStatus::Active);

        for n in 1..=3 {
            registry.emit(&n);
        }

        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, Some(2));
        assert_eq!(sub.recv().await, Some(3));
    }

    #[tokio::test]
    async fn release_stops_delivery_synchronously() {
        let registry = ListenerRegistry::<u32>::new();
        let (_, mut sub) = registry.register(ChannelStatus::Active);
        assert_eq!(registry.listener_count(), 1);

        sub.registration().release();
        assert_eq!(registry.listener_count(), 0);

        assert_eq!(registry.emit(&7), 0);
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn release_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registration = Registration::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let clone = registration.clone();

        registration.release();
        clone.release();
        drop(registration);
        drop(clone);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_last_clone_releases() {
        let registry = ListenerRegistry::<u32>::new();
        let (_, sub) = registry.register(ChannelStatus::Active);
        let handle = sub.registration();

        drop(sub);
        assert_eq!(registry.listener_count(), 1);

        drop(handle);
        assert_eq!(registry.listener_count(), 0);
    }

    #[tokio::test]
    async fn wait_active_resolves_after_status_change() {
        let registry = ListenerRegistry::<u32>::new();
        let (id, mut sub) = registry.register(ChannelStatus::Pending);

        let waiter = tokio::spawn(async move {
            let result = sub.wait_active().await;
            result.map(|_| sub)
        });
        tokio::task::yield_now().await;
        registry.set_status(id, ChannelStatus::Active);

        let sub = timeout(WAIT, waiter).await.unwrap().unwrap().unwrap();
        assert!(sub.status().is_active());
    }

    #[tokio::test]
    async fn wait_active_fails_when_closed_first() {
        let registry = ListenerRegistry::<u32>::new();
        let (id, mut sub) = registry.register(ChannelStatus::Pending);

        registry.close(id, Some("join refused".to_string()));

        let err = timeout(WAIT, sub.wait_active()).await.unwrap().unwrap_err();
        assert_eq!(
            err,
            SubscriptionError::Closed(Some("join refused".to_string()))
        );
    }

    #[tokio::test]
    async fn events_before_close_are_delivered_first() {
        let registry = ListenerRegistry::<&'static str>::new();
        let (_, mut sub) = registry.register(ChannelStatus::Active);

        registry.emit(&"a");
        registry.emit(&"b");
        registry.close_all(Some("socket dropped".to_string()));

        assert_eq!(sub.next_event().await, SubscriptionEvent::Item("a"));
        assert_eq!(sub.next_event().await, SubscriptionEvent::Item("b"));
        assert_eq!(
            timeout(WAIT, sub.next_event()).await.unwrap(),
            SubscriptionEvent::Closed(Some("socket dropped".to_string()))
        );
    }

    #[tokio::test]
    async fn recv_returns_none_after_release() {
        let registry = ListenerRegistry::<u32>::new();
        let (_, mut sub) = registry.register(ChannelStatus::Active);
        sub.registration().release();

        assert_eq!(timeout(WAIT, sub.recv()).await.unwrap(), None);
    }

    #[test]
    fn release_hook_runs_before_listener_removal() {
        let registry = ListenerRegistry::<u32>::new();
        let (_, sub) = registry.register(ChannelStatus::Active);

        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let counter = Arc::clone(&seen);
        let counted_registry = registry.clone();
        let sub = sub.with_release_hook(move || {
            counter.store(counted_registry.listener_count(), Ordering::SeqCst);
        });

        sub.unsubscribe();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn dead_receivers_are_pruned_on_emit() {
        let registry = ListenerRegistry::<u32>::new();
        let (id, sub) = registry.register(ChannelStatus::Active);
        let keep = sub.registration();

        drop(sub);
        assert!(registry.contains(id));

        registry.emit(&1);
        assert!(!registry.contains(id));
        drop(keep);
    }

    #[tokio::test]
    async fn emit_active_skips_pending_listeners() {
        let registry = ListenerRegistry::<u32>::new();
        let (pending_id, mut pending) = registry.register(ChannelStatus::Pending);
        let (_, mut active) = registry.register(ChannelStatus::Active);

        assert_eq!(registry.emit_active(&1), 1);
        registry.set_status(pending_id, ChannelStatus::Active);
        assert_eq!(registry.emit_active(&2), 2);

        assert_eq!(active.try_recv(), Some(1));
        assert_eq!(active.try_recv(), Some(2));
        assert_eq!(pending.try_recv(), Some(2));
        assert_eq!(pending.try_recv(), None);
    }

    #[tokio::test]
    async fn closed_subscription_never_yields() {
        let mut sub = Subscription::<u32>::closed(Some("offline".to_string()));
        assert!(sub.status().is_closed());
        assert_eq!(timeout(WAIT, sub.recv()).await.unwrap(), None);
    }
}
