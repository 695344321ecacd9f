//! In-process backend for tests and offline runs.
//!
//! Behaves like the hosted backend from the caller's side (sessions arrive
//! through the auth change stream, inserts fan out to active row
//! subscriptions) and exposes knobs to hold, fail, or drop any step so
//! interleavings can be reproduced deterministically.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::error::{
    AuthError, AuthResult, QueryError, QueryResult, SubscriptionError, SubscriptionResult,
    WriteError, WriteResult,
};
use crate::gateway::BackendGateway;
use crate::subscription::{ChannelStatus, ListenerRegistry, Subscription};
use crate::types::{
    value_text, AuthChangeKind, AuthEvent, Direction, Row, RowQuery, Session,
};

/// Column every embedded relation is joined through (`posts.user_id -> profiles.id`).
const EMBED_FOREIGN_KEY: &str = "user_id";

const SESSION_LIFETIME_SECS: i64 = 3600;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone)]
struct MemoryUser {
    id: String,
    email: String,
    password: String,
    created_at: DateTime<Utc>,
}

impl MemoryUser {
    fn record(&self) -> Value {
        json!({
            "id": self.id,
            "email": self.email,
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, MemoryUser>,
    session: Option<Session>,
    tables: HashMap<String, Vec<Row>>,
    offline: bool,
    refresh_expired: bool,
    hold_activation: bool,
    reject_subscriptions: Option<String>,
    session_read_failures: VecDeque<AuthError>,
    query_failures: VecDeque<QueryError>,
    write_failures: VecDeque<WriteError>,
}

/// Deterministic in-memory [`BackendGateway`].
pub struct InMemoryGateway {
    state: Mutex<MemoryState>,
    auth_listeners: ListenerRegistry<AuthEvent>,
    row_listeners: Mutex<HashMap<String, ListenerRegistry<Row>>>,
    session_reads_open: watch::Sender<bool>,
    queries_open: watch::Sender<bool>,
    session_reads: AtomicUsize,
    queries: AtomicUsize,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            auth_listeners: ListenerRegistry::new(),
            row_listeners: Mutex::new(HashMap::new()),
            session_reads_open: watch::Sender::new(true),
            queries_open: watch::Sender::new(true),
            session_reads: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    /// A gateway seeded with two accounts, their profiles, and a few posts.
    ///
    /// `demo@instaclone.dev` / `password` can sign in.
    pub fn with_demo_data() -> Self {
        let gateway = Self::new();
        let demo = gateway.register_user("demo@instaclone.dev", "password");
        let ana = gateway.register_user("ana@instaclone.dev", "password");

        gateway.seed_rows(
            "profiles",
            vec![
                row(json!({
                    "id": demo,
                    "full_name": "Demo User",
                    "avatar_url": "https://picsum.photos/seed/demo/64",
                    "updated_at": "2024-03-01T09:00:00Z",
                })),
                row(json!({
                    "id": ana,
                    "full_name": "Ana Lima",
                    "avatar_url": null,
                    "updated_at": "2024-03-02T10:00:00Z",
                })),
            ],
        );

        gateway.seed_rows(
            "posts",
            vec![
                row(json!({
                    "id": "00000000-0000-4000-8000-000000000001",
                    "user_id": ana,
                    "caption": "Morning light over the harbour",
                    "image_url": "https://picsum.photos/seed/harbour/600",
                    "created_at": "2024-03-03T07:15:00Z",
                })),
                row(json!({
                    "id": "00000000-0000-4000-8000-000000000002",
                    "user_id": demo,
                    "caption": "First post!",
                    "image_url": "https://picsum.photos/seed/first/600",
                    "created_at": "2024-03-04T18:40:00Z",
                })),
                row(json!({
                    "id": "00000000-0000-4000-8000-000000000003",
                    "user_id": ana,
                    "caption": null,
                    "image_url": "https://picsum.photos/seed/market/600",
                    "created_at": "2024-03-05T12:00:00Z",
                })),
            ],
        );

        gateway
    }

    /// Creates an account and returns its user id.
    pub fn register_user(&self, email: &str, password: &str) -> String {
        let user = MemoryUser {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password: password.to_string(),
            created_at: Utc::now(),
        };
        let id = user.id.clone();
        self.state.lock().users.insert(email.to_string(), user);
        id
    }

    /// Builds a session for a registered user without touching stored state.
    pub fn session_for(&self, email: &str) -> Option<Session> {
        self.state.lock().users.get(email).map(new_session)
    }

    /// Replaces the stored session without notifying anyone, as if it had
    /// been restored from disk before the app started.
    pub fn set_session(&self, session: Option<Session>) {
        self.state.lock().session = session;
    }

    /// Stores the event's session and notifies auth listeners.
    pub fn emit_auth_event(&self, event: AuthEvent) {
        self.state.lock().session = event.session.clone();
        self.auth_listeners.emit(&event);
    }

    /// Issues a new token for the current subject and emits `TOKEN_REFRESHED`.
    pub fn refresh_session(&self) -> Option<Session> {
        let refreshed = {
            let mut state = self.state.lock();
            let current = state.session.clone()?;
            let refreshed = Session {
                credentials_token: format!("mem-{}", Uuid::new_v4()),
                expiry: Utc::now() + Duration::seconds(SESSION_LIFETIME_SECS),
                ..current
            };
            state.session = Some(refreshed.clone());
            refreshed
        };
        self.auth_listeners.emit(&AuthEvent::new(
            AuthChangeKind::TokenRefreshed,
            Some(refreshed.clone()),
        ));
        Some(refreshed)
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state.lock().session.clone()
    }

    /// When set, reading an expired session refreshes it and emits
    /// `TOKEN_REFRESHED`, the way the hosted backend does. Otherwise an
    /// expired session reads as absent.
    pub fn refresh_expired_sessions(&self, refresh: bool) {
        self.state.lock().refresh_expired = refresh;
    }

    /// While offline every call fails with a network-type error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn fail_next_session_read(&self, error: AuthError) {
        self.state.lock().session_read_failures.push_back(error);
    }

    /// Session reads take their snapshot immediately but do not return
    /// until [`release_session_reads`](Self::release_session_reads).
    pub fn hold_session_reads(&self) {
        self.session_reads_open.send_replace(false);
    }

    pub fn release_session_reads(&self) {
        self.session_reads_open.send_replace(true);
    }

    /// Queries take their snapshot immediately but do not return until
    /// [`release_queries`](Self::release_queries).
    pub fn hold_queries(&self) {
        self.queries_open.send_replace(false);
    }

    pub fn release_queries(&self) {
        self.queries_open.send_replace(true);
    }

    /// The next query (after any hold is released) fails with `error`.
    pub fn fail_next_query(&self, error: QueryError) {
        self.state.lock().query_failures.push_back(error);
    }

    pub fn fail_next_write(&self, error: WriteError) {
        self.state.lock().write_failures.push_back(error);
    }

    /// New row subscriptions stay `Pending` until
    /// [`activate_subscriptions`](Self::activate_subscriptions).
    pub fn hold_subscription_activation(&self, hold: bool) {
        self.state.lock().hold_activation = hold;
    }

    /// Confirms every pending subscription on `table`.
    pub fn activate_subscriptions(&self, table: &str) {
        self.row_registry(table).set_all_status(ChannelStatus::Active);
    }

    /// Refuse new row subscriptions with `reason`; `None` accepts again.
    pub fn reject_subscriptions(&self, reason: Option<String>) {
        self.state.lock().reject_subscriptions = reason;
    }

    /// Closes every subscription on `table`, as a dropped socket would.
    pub fn drop_subscriptions(&self, table: &str, reason: Option<String>) {
        self.row_registry(table).close_all(reason);
    }

    /// Adds rows to a table without notifying subscribers.
    pub fn seed_rows(&self, table: &str, rows: Vec<Row>) {
        self.state
            .lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Notifies active subscribers of an insert without storing the row.
    pub fn emit_row_inserted(&self, table: &str, row: Row) -> usize {
        self.row_registry(table).emit_active(&row)
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `get_session` calls issued so far.
    pub fn session_read_count(&self) -> usize {
        self.session_reads.load(Ordering::SeqCst)
    }

    /// Number of `query` calls issued so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn auth_listener_count(&self) -> usize {
        self.auth_listeners.listener_count()
    }

    pub fn row_listener_count(&self, table: &str) -> usize {
        self.row_registry(table).listener_count()
    }

    fn row_registry(&self, table: &str) -> ListenerRegistry<Row> {
        self.row_listeners
            .lock()
            .entry(table.to_string())
            .or_default()
            .clone()
    }

    fn is_offline(&self) -> bool {
        self.state.lock().offline
    }

    fn run_query(&self, query: &RowQuery) -> Vec<Row> {
        let state = self.state.lock();
        let mut rows: Vec<Row> = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| f.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if !query.order.is_empty() {
            rows.sort_by(|a, b| {
                for order in &query.order {
                    let ord = compare_values(a.get(&order.column), b.get(&order.column));
                    let ord = match order.direction {
                        Direction::Asc => ord,
                        Direction::Desc => ord.reverse(),
                    };
                    if ord != CmpOrdering::Equal {
                        return ord;
                    }
                }
                CmpOrdering::Equal
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        let relations = query.embedded_relations();
        let columns = plain_columns(&query.select);
        rows.into_iter()
            .map(|mut row| {
                for relation in &relations {
                    let embedded = row
                        .get(EMBED_FOREIGN_KEY)
                        .and_then(|key| {
                            state.tables.get(*relation).and_then(|table| {
                                table.iter().find(|candidate| {
                                    candidate
                                        .get("id")
                                        .map(|id| value_text(id) == value_text(key))
                                        .unwrap_or(false)
                                })
                            })
                        })
                        .map(|found| Value::Object(found.clone()))
                        .unwrap_or(Value::Null);
                    row.insert((*relation).to_string(), embedded);
                }
                if let Some(columns) = &columns {
                    row.retain(|key, _| {
                        columns.iter().any(|c| c == key) || relations.contains(&key.as_str())
                    });
                }
                row
            })
            .collect()
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendGateway for InMemoryGateway {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        self.session_reads.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.state.lock().session.clone();

        let mut open = self.session_reads_open.subscribe();
        let _ = open.wait_for(|open| *open).await;

        let mut state = self.state.lock();
        if state.offline {
            return Err(AuthError::Network("offline".to_string()));
        }
        if let Some(err) = state.session_read_failures.pop_front() {
            return Err(err);
        }
        let expired = snapshot.as_ref().is_some_and(Session::is_expired);
        if expired && state.refresh_expired {
            drop(state);
            return Ok(self.refresh_session());
        }
        Ok(snapshot.filter(|session| !session.is_expired()))
    }

    fn on_auth_change(&self) -> Subscription<AuthEvent> {
        let (_, subscription) = self.auth_listeners.register(ChannelStatus::Active);
        subscription
    }

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<()> {
        let session = {
            let mut state = self.state.lock();
            if state.offline {
                return Err(AuthError::Network("offline".to_string()));
            }
            let user = state
                .users
                .get(email)
                .filter(|user| user.password == password)
                .ok_or_else(|| AuthError::InvalidCredentials("Invalid login credentials".to_string()))?;
            let session = new_session(user);
            state.session = Some(session.clone());
            session
        };
        debug!(subject_id = %session.subject_id, "memory gateway sign-in");
        self.auth_listeners.emit(&AuthEvent::signed_in(session));
        Ok(())
    }

    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<()> {
        {
            let state = self.state.lock();
            if state.offline {
                return Err(AuthError::Network("offline".to_string()));
            }
            if state.users.contains_key(email) {
                return Err(AuthError::InvalidCredentials(
                    "User already registered".to_string(),
                ));
            }
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidCredentials(format!(
                "Password should be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        self.register_user(email, password);
        self.sign_in(email, password).await
    }

    async fn sign_out(&self) -> AuthResult<()> {
        {
            let mut state = self.state.lock();
            if state.offline {
                return Err(AuthError::Network("offline".to_string()));
            }
            state.session = None;
        }
        self.auth_listeners.emit(&AuthEvent::signed_out());
        Ok(())
    }

    async fn query(&self, query: &RowQuery) -> QueryResult<Vec<Row>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.is_offline() {
            return Err(QueryError::Network("offline".to_string()));
        }
        let snapshot = self.run_query(query);

        let mut open = self.queries_open.subscribe();
        let _ = open.wait_for(|open| *open).await;

        if let Some(err) = self.state.lock().query_failures.pop_front() {
            return Err(err);
        }
        debug!(table = %query.table, rows = snapshot.len(), "memory gateway query");
        Ok(snapshot)
    }

    async fn insert(&self, table: &str, mut row: Row) -> WriteResult<()> {
        {
            let mut state = self.state.lock();
            if state.offline {
                return Err(WriteError::Network("offline".to_string()));
            }
            if let Some(err) = state.write_failures.pop_front() {
                return Err(err);
            }
            if state.session.is_none() {
                return Err(WriteError::NotAuthenticated);
            }
            row.entry("id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            row.entry("created_at")
                .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
            state
                .tables
                .entry(table.to_string())
                .or_default()
                .push(row.clone());
        }
        self.row_registry(table).emit_active(&row);
        Ok(())
    }

    async fn on_row_inserted(&self, table: &str) -> SubscriptionResult<Subscription<Row>> {
        let initial = {
            let state = self.state.lock();
            if state.offline {
                return Err(SubscriptionError::Connect("offline".to_string()));
            }
            if let Some(reason) = &state.reject_subscriptions {
                return Err(SubscriptionError::Rejected(reason.clone()));
            }
            if state.hold_activation {
                ChannelStatus::Pending
            } else {
                ChannelStatus::Active
            }
        };
        let (_, subscription) = self.row_registry(table).register(initial);
        Ok(subscription)
    }
}

fn new_session(user: &MemoryUser) -> Session {
    Session {
        subject_id: user.id.clone(),
        credentials_token: format!("mem-{}", Uuid::new_v4()),
        expiry: Utc::now() + Duration::seconds(SESSION_LIFETIME_SECS),
        raw_user_record: user.record(),
    }
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Top-level non-embedded columns of a select list, or `None` for `*`.
fn plain_columns(select: &str) -> Option<Vec<String>> {
    let mut columns = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in select.chars().chain(std::iter::once(',')) {
        match ch {
            '(' => {
                depth += 1;
                current.clear();
            }
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                let name = current.trim();
                if name == "*" {
                    return None;
                }
                if !name.is_empty() {
                    columns.push(name.to_string());
                }
                current.clear();
            }
            _ if depth == 0 => current.push(ch),
            _ => {}
        }
    }
    Some(columns)
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(x), Some(y)) => value_text(x).cmp(&value_text(y)),
    }
}
