//! The feed run loop: subscribe, wait for the subscription to go live, load
//! the snapshot, then merge live inserts.

use std::sync::{Arc, Weak};
use std::time::Duration;

use backend_gateway::{
    BackendGateway, OrderBy, Registration, Row, RowQuery, SubscriptionError, SubscriptionEvent,
};
use client_config_and_utils::{Config, DEFAULT_POSTS_TABLE};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fsm::{FeedMachine, FeedMachineInput, FeedPhase};
use crate::model::FeedModel;
use crate::post::{Post, PROFILE_RELATION};
use crate::state::{FeedFailure, FeedState};

/// Columns requested for the feed, with the author profile embedded.
pub const DEFAULT_FEED_SELECT: &str =
    "id,user_id,caption,image_url,created_at,profiles(full_name,avatar_url)";

const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnect behaviour after the insert subscription fails or drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive attempts before giving up. Zero disables reconnects.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub table: String,
    pub select: String,
    /// Bound on opening the subscription and on waiting for it to go live.
    pub subscribe_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_POSTS_TABLE.to_string(),
            select: DEFAULT_FEED_SELECT.to_string(),
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl FeedConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            table: config.posts_table.clone(),
            subscribe_timeout: config.subscribe_timeout(),
            reconnect: ReconnectPolicy {
                max_attempts: config.reconnect_max_attempts,
                ..ReconnectPolicy::default()
            },
            ..Self::default()
        }
    }

    /// The bulk query: every post, newest first.
    pub fn snapshot_query(&self) -> RowQuery {
        RowQuery::table(&self.table)
            .select(&self.select)
            .order(OrderBy::desc("created_at"))
    }
}

/// Owns the main feed.
///
/// One run at a time: [`start`](Self::start) stops any previous run before
/// spawning the next, and every result is checked against the run
/// generation before it is published. Must be used inside a tokio runtime.
#[derive(Clone)]
pub struct FeedSynchronizer {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    gateway: Arc<dyn BackendGateway>,
    config: FeedConfig,
    state: watch::Sender<FeedState>,
    run: Mutex<RunSlot>,
}

struct RunSlot {
    generation: u64,
    machine: FeedMachine,
    active: Option<ActiveRun>,
}

struct ActiveRun {
    generation: u64,
    task: JoinHandle<()>,
    subscription: Option<Registration>,
}

impl RunSlot {
    fn stop_active(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        if let Some(subscription) = active.subscription {
            subscription.release();
        }
        active.task.abort();
        let _ = self.machine.consume(&FeedMachineInput::Stop);
        true
    }
}

impl Drop for FeedInner {
    fn drop(&mut self) {
        self.run.get_mut().stop_active();
    }
}

impl FeedInner {
    /// Applies a lifecycle input and publishes `next`, unless the run is stale.
    fn advance(&self, generation: u64, input: FeedMachineInput, next: Option<FeedState>) -> bool {
        let mut slot = self.run.lock();
        if slot.generation != generation {
            return false;
        }
        if slot.machine.consume(&input).is_err() {
            warn!(
                generation,
                phase = ?FeedPhase::from(slot.machine.state()),
                "Rejected feed transition"
            );
            return false;
        }
        if let Some(next) = next {
            self.state.send_replace(next);
        }
        true
    }

    fn publish(&self, generation: u64, next: FeedState) -> bool {
        let slot = self.run.lock();
        if slot.generation != generation {
            return false;
        }
        self.state.send_replace(next);
        true
    }

    /// Hands the subscription's release handle to the slot so `stop` can
    /// release it without waiting on the run task.
    fn attach(&self, generation: u64, registration: Registration) -> bool {
        let mut slot = self.run.lock();
        if slot.generation != generation {
            return false;
        }
        match slot.active.as_mut() {
            Some(active) if active.generation == generation => {
                if let Some(previous) = active.subscription.replace(registration) {
                    previous.release();
                }
                true
            }
            _ => false,
        }
    }
}

impl FeedSynchronizer {
    pub fn new(gateway: Arc<dyn BackendGateway>, config: FeedConfig) -> Self {
        let (state, _) = watch::channel(FeedState::idle());
        Self {
            inner: Arc::new(FeedInner {
                gateway,
                config,
                state,
                run: Mutex::new(RunSlot {
                    generation: 0,
                    machine: FeedMachine::new(),
                    active: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    /// Starts a run and returns the state stream.
    ///
    /// State is `Loading` with no posts when this returns. A run already in
    /// progress is stopped first.
    pub fn start(&self) -> watch::Receiver<FeedState> {
        let mut slot = self.inner.run.lock();
        if slot.stop_active() {
            debug!(generation = slot.generation, "Stopped previous feed run");
        }
        slot.generation += 1;
        let generation = slot.generation;
        if slot.machine.consume(&FeedMachineInput::Start).is_err() {
            warn!(generation, "Feed machine refused start; resetting");
            slot.machine = FeedMachine::new();
            let _ = slot.machine.consume(&FeedMachineInput::Start);
        }
        self.inner.state.send_replace(FeedState::loading());

        let run = FeedRun {
            inner: Arc::downgrade(&self.inner),
            gateway: Arc::clone(&self.inner.gateway),
            config: self.inner.config.clone(),
            generation,
        };
        let task = tokio::spawn(run.run());
        slot.active = Some(ActiveRun {
            generation,
            task,
            subscription: None,
        });
        drop(slot);

        info!(generation, table = %self.inner.config.table, "Feed started");
        self.inner.state.subscribe()
    }

    /// Stops the current run. Safe at any time; state is left as it was.
    pub fn stop(&self) {
        let mut slot = self.inner.run.lock();
        slot.generation += 1;
        if slot.stop_active() {
            info!(generation = slot.generation, "Feed stopped");
        }
    }

    /// Stop and start again, e.g. after a failed query.
    pub fn retry(&self) -> watch::Receiver<FeedState> {
        self.start()
    }

    pub fn state(&self) -> FeedState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.inner.state.subscribe()
    }

    pub fn phase(&self) -> FeedPhase {
        FeedPhase::from(self.inner.run.lock().machine.state())
    }

    /// True while a started run can still change the feed.
    pub fn is_running(&self) -> bool {
        let slot = self.inner.run.lock();
        slot.active.is_some() && FeedPhase::from(slot.machine.state()).is_live()
    }
}

impl std::fmt::Debug for FeedSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSynchronizer")
            .field("table", &self.inner.config.table)
            .field("phase", &self.phase())
            .finish()
    }
}

/// How one subscribe-then-load cycle ended.
enum CycleEnd {
    /// The run was stopped or superseded.
    Stale,
    /// Terminal until a manual retry.
    QueryFailed,
    /// Eligible for reconnect.
    SubscriptionFailed,
}

/// Everything the spawned task needs. Holds the synchronizer weakly so
/// dropping the last handle ends the run.
struct FeedRun {
    inner: Weak<FeedInner>,
    gateway: Arc<dyn BackendGateway>,
    config: FeedConfig,
    generation: u64,
}

impl FeedRun {
    async fn run(self) {
        let mut attempt = 0u32;
        loop {
            match self.cycle(&mut attempt).await {
                CycleEnd::Stale | CycleEnd::QueryFailed => return,
                CycleEnd::SubscriptionFailed => {
                    let policy = &self.config.reconnect;
                    if attempt >= policy.max_attempts {
                        warn!(
                            generation = self.generation,
                            attempts = attempt,
                            "Giving up on live feed updates"
                        );
                        return;
                    }
                    let delay = policy.delay_for_attempt(attempt);
                    attempt += 1;
                    info!(
                        generation = self.generation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting feed"
                    );
                    tokio::time::sleep(delay).await;
                    if !self.advance(FeedMachineInput::Start, Some(FeedState::loading())) {
                        return;
                    }
                }
            }
        }
    }

    async fn cycle(&self, attempt: &mut u32) -> CycleEnd {
        let table = self.config.table.as_str();

        let opened = tokio::time::timeout(
            self.config.subscribe_timeout,
            self.gateway.on_row_inserted(table),
        )
        .await
        .unwrap_or(Err(SubscriptionError::Timeout));
        let mut subscription = match opened {
            Ok(subscription) => subscription,
            Err(err) => return self.subscription_failed(err),
        };
        if !self.with_inner(|inner| inner.attach(self.generation, subscription.registration()))
            .unwrap_or(false)
        {
            subscription.unsubscribe();
            return CycleEnd::Stale;
        }

        let active = tokio::time::timeout(
            self.config.subscribe_timeout,
            subscription.wait_active(),
        )
        .await
        .unwrap_or(Err(SubscriptionError::Timeout));
        if let Err(err) = active {
            subscription.unsubscribe();
            return self.subscription_failed(err);
        }
        if !self.advance(FeedMachineInput::SubscriptionActive, None) {
            subscription.unsubscribe();
            return CycleEnd::Stale;
        }
        info!(generation = self.generation, table, "Feed subscription active");

        let mut model = FeedModel::new();
        let query = self.config.snapshot_query();
        let loaded = {
            let fetch = self.gateway.query(&query);
            tokio::pin!(fetch);
            loop {
                tokio::select! {
                    biased;
                    event = subscription.next_event() => match event {
                        SubscriptionEvent::Item(row) => {
                            if let Some(post) = decode(&row) {
                                debug!(post_id = %post.id, "Buffering live post during load");
                                model.buffer_live(post);
                            }
                        }
                        SubscriptionEvent::Closed(reason) => break Err(reason),
                    },
                    result = &mut fetch => break Ok(result),
                }
            }
        };

        let rows = match loaded {
            Ok(Ok(rows)) => rows,
            Ok(Err(err)) => {
                warn!(generation = self.generation, error = %err, "Feed query failed");
                subscription.unsubscribe();
                let failed = FeedState::failed(Vec::new(), FeedFailure::Query(err));
                return if self.advance(FeedMachineInput::QueryFailed, Some(failed)) {
                    CycleEnd::QueryFailed
                } else {
                    CycleEnd::Stale
                };
            }
            Err(reason) => {
                subscription.unsubscribe();
                return self.subscription_lost(reason, Vec::new());
            }
        };

        let row_count = rows.len();
        model.load_snapshot(rows.iter().filter_map(decode).collect());
        if !self.advance(
            FeedMachineInput::SnapshotLoaded,
            Some(FeedState::ready(model.posts().to_vec())),
        ) {
            subscription.unsubscribe();
            return CycleEnd::Stale;
        }
        *attempt = 0;
        info!(
            generation = self.generation,
            rows = row_count,
            posts = model.len(),
            "Feed ready"
        );

        loop {
            match subscription.next_event().await {
                SubscriptionEvent::Item(row) => {
                    let Some(post) = decode(&row) else {
                        continue;
                    };
                    let post_id = post.id.clone();
                    if !model.prepend_live(post) {
                        debug!(post_id = %post_id, "Ignoring duplicate live post");
                        continue;
                    }
                    debug!(post_id = %post_id, posts = model.len(), "Merged live post");
                    let published = self
                        .with_inner(|inner| {
                            inner.publish(self.generation, FeedState::ready(model.posts().to_vec()))
                        })
                        .unwrap_or(false);
                    if !published {
                        subscription.unsubscribe();
                        return CycleEnd::Stale;
                    }
                }
                SubscriptionEvent::Closed(reason) => {
                    subscription.unsubscribe();
                    return self.subscription_lost(reason, model.posts().to_vec());
                }
            }
        }
    }

    fn subscription_failed(&self, err: SubscriptionError) -> CycleEnd {
        warn!(generation = self.generation, error = %err, "Feed subscription failed");
        let failed = FeedState::failed(Vec::new(), FeedFailure::SubscriptionFailed(err));
        if self.advance(FeedMachineInput::SubscriptionFailed, Some(failed)) {
            CycleEnd::SubscriptionFailed
        } else {
            CycleEnd::Stale
        }
    }

    fn subscription_lost(&self, reason: Option<String>, posts: Vec<Post>) -> CycleEnd {
        warn!(
            generation = self.generation,
            reason = reason.as_deref().unwrap_or("none"),
            "Feed subscription lost"
        );
        let failed = FeedState::failed(posts, FeedFailure::SubscriptionLost(reason));
        if self.advance(FeedMachineInput::SubscriptionLost, Some(failed)) {
            CycleEnd::SubscriptionFailed
        } else {
            CycleEnd::Stale
        }
    }

    fn advance(&self, input: FeedMachineInput, next: Option<FeedState>) -> bool {
        self.with_inner(|inner| inner.advance(self.generation, input, next))
            .unwrap_or(false)
    }

    fn with_inner<R>(&self, f: impl FnOnce(&FeedInner) -> R) -> Option<R> {
        self.inner.upgrade().map(|inner| f(&inner))
    }
}

/// Decodes one row, skipping it with a warning when it is unusable.
fn decode(row: &Row) -> Option<Post> {
    Post::from_row(row)
        .inspect_err(|err| {
            warn!(
                error = %err,
                has_profile = row.contains_key(PROFILE_RELATION),
                "Skipping malformed post row"
            )
        })
        .ok()
}
