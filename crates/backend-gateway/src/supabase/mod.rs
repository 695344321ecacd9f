//! Supabase-compatible [`BackendGateway`]: GoTrue auth, PostgREST rows, and
//! Realtime inserts.
//!
//! The session (with its refresh token) lives in a JSON file so that
//! separate CLI invocations share one sign-in. An expired session is
//! refreshed on the next [`get_session`](BackendGateway::get_session).

pub mod auth;
pub mod persist;
pub mod protocol;
pub mod realtime;
pub mod rest;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use client_config_and_utils::{Config, CoreResult, Paths};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{
    AuthError, AuthResult, QueryError, QueryResult, SubscriptionResult, WriteError, WriteResult,
};
use crate::gateway::BackendGateway;
use crate::subscription::{ChannelStatus, ListenerRegistry, Subscription};
use crate::types::{AuthChangeKind, AuthEvent, Row, RowQuery, Session};
use auth::SignUpOutcome;
use persist::{SessionFile, StoredSession};

/// Refresh this long before the token actually expires.
const REFRESH_LEEWAY_SECS: i64 = 60;
const REFRESH_MAX_ATTEMPTS: u32 = 3;
const REFRESH_BASE_DELAY_MS: u64 = 500;

/// Hash a response body for logs instead of printing it.
pub(crate) fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Connection settings for a Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: Url,
    /// Publishable (anon) API key.
    pub publishable_key: String,
    /// Where the signed-in session is persisted.
    pub session_file: PathBuf,
    /// Realtime heartbeat interval.
    pub heartbeat: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl SupabaseConfig {
    pub fn from_config(config: &Config, paths: &Paths) -> CoreResult<Self> {
        Ok(Self {
            url: config.supabase_url()?,
            publishable_key: config.supabase_publishable_key.clone(),
            session_file: paths.session_file(),
            heartbeat: config.realtime_heartbeat(),
            request_timeout: Duration::from_secs(30),
        })
    }

    fn base(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }

    /// Absolute URL for a path under the project, e.g. `auth/v1/signup`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base(), path.trim_start_matches('/'))
    }

    /// Build the REST API URL for a table.
    pub fn rest_url(&self, table: &str) -> String {
        self.endpoint(&format!("rest/v1/{table}"))
    }
}

/// Gateway backed by a hosted (or local) Supabase project.
pub struct SupabaseGateway {
    config: SupabaseConfig,
    http: reqwest::Client,
    store: SessionFile,
    session: Mutex<Option<StoredSession>>,
    refresh_lock: tokio::sync::Mutex<()>,
    auth_listeners: ListenerRegistry<AuthEvent>,
}

impl SupabaseGateway {
    /// Creates the gateway and loads any persisted session.
    pub fn new(config: SupabaseConfig) -> AuthResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let store = SessionFile::new(config.session_file.clone());
        let session = store.load()?;
        if let Some(stored) = &session {
            debug!(subject_id = %stored.session.subject_id, "Loaded persisted session");
        }

        Ok(Self {
            config,
            http,
            store,
            session: Mutex::new(session),
            refresh_lock: tokio::sync::Mutex::new(()),
            auth_listeners: ListenerRegistry::new(),
        })
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    fn replace_session(&self, stored: Option<StoredSession>) -> AuthResult<()> {
        match &stored {
            Some(stored) => self.store.save(stored)?,
            None => self.store.clear()?,
        }
        *self.session.lock() = stored;
        Ok(())
    }

    fn emit(&self, kind: AuthChangeKind, session: Option<Session>) {
        let delivered = self.auth_listeners.emit(&AuthEvent::new(kind, session));
        debug!(kind = %kind, listeners = delivered, "Auth change emitted");
    }

    /// The stored session, refreshed first if it is about to expire.
    ///
    /// A refresh the server rejects signs the user out; a transient failure
    /// is returned and the stored session is kept for the next attempt.
    async fn valid_session(&self) -> AuthResult<Option<StoredSession>> {
        let _guard = self.refresh_lock.lock().await;

        let Some(stored) = self.session.lock().clone() else {
            return Ok(None);
        };
        let deadline = Utc::now() + chrono::Duration::seconds(REFRESH_LEEWAY_SECS);
        if !stored.session.is_expired_at(deadline) {
            return Ok(Some(stored));
        }

        match self.refresh_with_backoff(&stored.refresh_token).await {
            Ok(fresh) => {
                self.replace_session(Some(fresh.clone()))?;
                info!(subject_id = %fresh.session.subject_id, "Token refreshed successfully");
                self.emit(AuthChangeKind::TokenRefreshed, Some(fresh.session.clone()));
                Ok(Some(fresh))
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(error = %e, "Session refresh rejected, signing out");
                self.replace_session(None)?;
                self.emit(AuthChangeKind::SignedOut, None);
                Ok(None)
            }
        }
    }

    async fn refresh_with_backoff(&self, refresh_token: &str) -> AuthResult<StoredSession> {
        let mut last_error = None;

        for attempt in 0..REFRESH_MAX_ATTEMPTS {
            match auth::refresh_grant(&self.http, &self.config, refresh_token).await {
                Ok(fresh) => return Ok(fresh),
                Err(e) if e.is_transient() => {
                    if attempt + 1 < REFRESH_MAX_ATTEMPTS {
                        let delay = Duration::from_millis(REFRESH_BASE_DELAY_MS << attempt);
                        debug!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Refresh failed with transient error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| AuthError::SessionExpired("refresh failed".to_string())))
    }

    /// Bearer for data requests: the user's token, or the publishable key
    /// when nobody is signed in.
    async fn bearer(&self) -> AuthResult<String> {
        Ok(self
            .valid_session()
            .await?
            .map(|stored| stored.session.credentials_token)
            .unwrap_or_else(|| self.config.publishable_key.clone()))
    }
}

#[async_trait]
impl BackendGateway for SupabaseGateway {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        Ok(self.valid_session().await?.map(|stored| stored.session))
    }

    fn on_auth_change(&self) -> Subscription<AuthEvent> {
        let (_, subscription) = self.auth_listeners.register(ChannelStatus::Active);
        subscription
    }

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<()> {
        let stored = auth::password_grant(&self.http, &self.config, email, password).await?;
        self.replace_session(Some(stored.clone()))?;
        info!(subject_id = %stored.session.subject_id, "Login successful");
        self.emit(AuthChangeKind::SignedIn, Some(stored.session));
        Ok(())
    }

    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<()> {
        match auth::sign_up(&self.http, &self.config, email, password).await? {
            SignUpOutcome::SignedIn(stored) => {
                self.replace_session(Some(stored.clone()))?;
                info!(subject_id = %stored.session.subject_id, "Sign-up successful");
                self.emit(AuthChangeKind::SignedIn, Some(stored.session));
            }
            SignUpOutcome::ConfirmationRequired { user_id } => {
                info!(user_id = ?user_id, "Sign-up requires email confirmation");
            }
        }
        Ok(())
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let current = self.session.lock().clone();
        if let Some(stored) = current {
            auth::logout(&self.http, &self.config, &stored.session.credentials_token).await?;
        }
        self.replace_session(None)?;
        info!("Signed out");
        self.emit(AuthChangeKind::SignedOut, None);
        Ok(())
    }

    async fn query(&self, query: &RowQuery) -> QueryResult<Vec<Row>> {
        let bearer = self
            .bearer()
            .await
            .map_err(|e| QueryError::Network(e.to_string()))?;
        rest::fetch_rows(&self.http, &self.config, query, &bearer).await
    }

    async fn insert(&self, table: &str, row: Row) -> WriteResult<()> {
        let stored = match self.valid_session().await {
            Ok(Some(stored)) => stored,
            Ok(None) => return Err(WriteError::NotAuthenticated),
            Err(AuthError::Network(e)) => return Err(WriteError::Network(e)),
            Err(_) => return Err(WriteError::NotAuthenticated),
        };
        rest::insert_row(
            &self.http,
            &self.config,
            table,
            &row,
            &stored.session.credentials_token,
        )
        .await
    }

    async fn on_row_inserted(&self, table: &str) -> SubscriptionResult<Subscription<Row>> {
        let access_token = self
            .bearer()
            .await
            .unwrap_or_else(|_| self.config.publishable_key.clone());
        let endpoint = realtime::realtime_url(&self.config.url, &self.config.publishable_key)?;
        realtime::subscribe_inserts(endpoint, table.to_string(), access_token, self.config.heartbeat)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> SupabaseConfig {
        SupabaseConfig {
            url: Url::parse("https://abc.supabase.co/").unwrap(),
            publishable_key: "anon".to_string(),
            session_file: dir.join("session.json"),
            heartbeat: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn stored(expiry: chrono::DateTime<Utc>) -> StoredSession {
        StoredSession {
            session: Session {
                subject_id: "user-1".to_string(),
                credentials_token: "access".to_string(),
                expiry,
                raw_user_record: json!({ "id": "user-1" }),
            },
            refresh_token: "refresh".to_string(),
        }
    }

    #[test]
    fn endpoints_join_without_double_slash() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        assert_eq!(
            config.endpoint("/auth/v1/signup"),
            "https://abc.supabase.co/auth/v1/signup"
        );
        assert_eq!(config.rest_url("posts"), "https://abc.supabase.co/rest/v1/posts");
    }

    #[test]
    fn from_config_uses_paths_and_heartbeat() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let config = SupabaseConfig::from_config(&Config::default(), &paths).unwrap();
        assert_eq!(config.session_file, paths.session_file());
        assert_eq!(config.heartbeat, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn persisted_session_is_returned_without_network() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let expected = stored(Utc::now() + chrono::Duration::hours(1));
        SessionFile::new(config.session_file.clone())
            .save(&expected)
            .unwrap();

        let gateway = SupabaseGateway::new(config).unwrap();
        assert_eq!(gateway.get_session().await.unwrap(), Some(expected.session));
    }

    #[tokio::test]
    async fn no_persisted_session_reads_as_none() {
        let dir = tempdir().unwrap();
        let gateway = SupabaseGateway::new(config(dir.path())).unwrap();
        assert_eq!(gateway.get_session().await.unwrap(), None);
        assert_eq!(
            gateway.insert("posts", Row::new()).await,
            Err(WriteError::NotAuthenticated)
        );
    }

    #[test]
    fn summarize_hides_body() {
        let summary = summarize_response_body("secret token in body");
        assert!(summary.starts_with("len=20,digest="));
        assert!(!summary.contains("secret"));
    }
}
