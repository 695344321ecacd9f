//! CLI command implementations.

mod auth;
mod feed;
mod profile;

pub use auth::{login, logout, signup, status};
pub use feed::{feed, post};
pub use profile::profile;

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use backend_gateway::{
    BackendGateway, InMemoryGateway, Session, SupabaseConfig, SupabaseGateway,
};
use client_config_and_utils::{Config, Paths};
use session_store::{SessionListener, SessionStore};
use tracing::debug;

use crate::output::OutputFormat;

/// Account the offline demo backend signs in as.
const DEMO_EMAIL: &str = "demo@instaclone.dev";

/// How long to wait for the auth stream to reflect a sign-in or sign-out.
const SESSION_WAIT: Duration = Duration::from_secs(5);

/// Everything a command needs: the backend, the session store, and output
/// settings.
pub struct Context {
    pub gateway: Arc<dyn BackendGateway>,
    pub store: SessionStore,
    pub config: Config,
    pub format: OutputFormat,
    pub offline: bool,
    listener: SessionListener,
}

impl Context {
    pub async fn connect(
        paths: &Paths,
        config: Config,
        offline: bool,
        demo_session: bool,
        format: OutputFormat,
    ) -> Result<Self> {
        let gateway: Arc<dyn BackendGateway> = if offline {
            let gateway = InMemoryGateway::with_demo_data();
            if demo_session {
                gateway.set_session(gateway.session_for(DEMO_EMAIL));
            }
            Arc::new(gateway)
        } else {
            let supabase = SupabaseConfig::from_config(&config, paths)?;
            Arc::new(SupabaseGateway::new(supabase)?)
        };

        let store = SessionStore::new(Arc::clone(&gateway));
        let listener = store.initialize().await;
        debug!(
            offline,
            logged_in = store.current_session().is_some(),
            "Session store ready"
        );

        Ok(Self {
            gateway,
            store,
            config,
            format,
            offline,
            listener,
        })
    }

    /// Stops listening for auth changes.
    pub fn close(&self) {
        self.listener.release();
    }

    pub fn backend_label(&self) -> String {
        if self.offline {
            "offline demo".to_string()
        } else {
            self.config.supabase_url.clone()
        }
    }

    fn is_text(&self) -> bool {
        matches!(self.format, OutputFormat::Text)
    }

    /// Waits until the store holds a session (or none), as reported by the
    /// auth stream. `None` on timeout.
    async fn wait_for_session(&self, signed_in: bool) -> Option<Option<Session>> {
        tokio::time::timeout(
            SESSION_WAIT,
            self.store
                .wait_until(|session| session.is_some() == signed_in),
        )
        .await
        .ok()
    }
}

/// Email or subject id, for messages.
fn display_user(session: &Session) -> &str {
    session.email().unwrap_or(&session.subject_id)
}

fn prompt_email(email: Option<String>) -> Result<String> {
    if let Some(email) = email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()) {
        return Ok(email);
    }

    print!("Email: ");
    io::stdout().flush()?;
    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    let email = email.trim().to_string();

    if email.is_empty() {
        anyhow::bail!("Email is required");
    }
    Ok(email)
}

fn prompt_password(password: Option<String>) -> Result<String> {
    let password = match password.filter(|p| !p.is_empty()) {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ")?,
    };

    if password.is_empty() {
        anyhow::bail!("Password is required");
    }
    Ok(password)
}
