//! GoTrue auth endpoints.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::persist::StoredSession;
use super::{summarize_response_body, SupabaseConfig};
use crate::error::{AuthError, AuthResult};
use crate::types::Session;

#[derive(Debug, Serialize)]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Token grant response (password, refresh, and auto-confirmed sign-up).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: Value,
}

impl TokenResponse {
    fn into_stored(self) -> AuthResult<StoredSession> {
        let subject_id = self
            .user
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::Unknown("token response user has no id".to_string()))?
            .to_string();

        Ok(StoredSession {
            session: Session {
                subject_id,
                credentials_token: self.access_token,
                expiry: Utc::now() + Duration::seconds(self.expires_in),
                raw_user_record: self.user,
            },
            refresh_token: self.refresh_token,
        })
    }
}

/// What sign-up produced.
#[derive(Debug)]
pub enum SignUpOutcome {
    /// The project auto-confirms accounts; the user is signed in.
    SignedIn(StoredSession),
    /// A confirmation email was sent; no session yet.
    ConfirmationRequired { user_id: Option<String> },
}

pub async fn password_grant(
    http: &reqwest::Client,
    config: &SupabaseConfig,
    email: &str,
    password: &str,
) -> AuthResult<StoredSession> {
    let url = config.endpoint("auth/v1/token?grant_type=password");
    debug!(url = %url, email = %email, "Attempting email/password login");

    let response = http
        .post(&url)
        .header("apikey", &config.publishable_key)
        .json(&PasswordRequest { email, password })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body_summary = %summarize_response_body(&body), "Login failed");
        return Err(auth_error_from_response(status.as_u16(), &body));
    }

    response.json::<TokenResponse>().await?.into_stored()
}

pub async fn refresh_grant(
    http: &reqwest::Client,
    config: &SupabaseConfig,
    refresh_token: &str,
) -> AuthResult<StoredSession> {
    let url = config.endpoint("auth/v1/token?grant_type=refresh_token");
    debug!(url = %url, "Refreshing token");

    let response = http
        .post(&url)
        .header("apikey", &config.publishable_key)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body_summary = %summarize_response_body(&body), "Token refresh failed");
        return Err(match auth_error_from_response(status.as_u16(), &body) {
            AuthError::InvalidCredentials(message) => AuthError::SessionExpired(message),
            other => other,
        });
    }

    response.json::<TokenResponse>().await?.into_stored()
}

pub async fn sign_up(
    http: &reqwest::Client,
    config: &SupabaseConfig,
    email: &str,
    password: &str,
) -> AuthResult<SignUpOutcome> {
    let url = config.endpoint("auth/v1/signup");
    debug!(url = %url, email = %email, "Attempting sign-up");

    let response = http
        .post(&url)
        .header("apikey", &config.publishable_key)
        .json(&PasswordRequest { email, password })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body_summary = %summarize_response_body(&body), "Sign-up failed");
        return Err(auth_error_from_response(status.as_u16(), &body));
    }

    let body: Value = response.json().await?;
    if body.get("access_token").is_some() {
        let tokens: TokenResponse = serde_json::from_value(body)?;
        return Ok(SignUpOutcome::SignedIn(tokens.into_stored()?));
    }

    let user_id = body
        .get("id")
        .or_else(|| body.pointer("/user/id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(SignUpOutcome::ConfirmationRequired { user_id })
}

/// Revokes the access token server-side. A token the server no longer
/// accepts counts as already signed out.
pub async fn logout(
    http: &reqwest::Client,
    config: &SupabaseConfig,
    access_token: &str,
) -> AuthResult<()> {
    let url = config.endpoint("auth/v1/logout");
    debug!(url = %url, "Signing out");

    let response = http
        .post(&url)
        .header("apikey", &config.publishable_key)
        .header("Authorization", format!("Bearer {access_token}"))
        .send()
        .await?;

    let status = response.status();
    if status.is_success() || status.as_u16() == 401 || status.as_u16() == 403 {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, body_summary = %summarize_response_body(&body), "Logout failed");
    Err(auth_error_from_response(status.as_u16(), &body))
}

/// Maps a GoTrue error response to an [`AuthError`].
pub fn auth_error_from_response(status: u16, body: &str) -> AuthError {
    let message = error_message(body).unwrap_or_else(|| format!("HTTP {status}"));
    match status {
        400 | 401 | 403 | 422 => AuthError::InvalidCredentials(message),
        _ => AuthError::Server { status, message },
    }
}

fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
