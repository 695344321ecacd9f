//! Authentication commands.

use anyhow::{anyhow, Result};
use serde_json::json;

use super::{display_user, prompt_email, prompt_password, Context};
use crate::output::{self, OutputFormat};

/// Login with email and password.
pub async fn login(ctx: &Context, email: Option<String>, password: Option<String>) -> Result<()> {
    if let Some(session) = ctx.store.current_session() {
        output::print_success(
            &format!("Already logged in as {}", display_user(&session)),
            &ctx.format,
        );
        return Ok(());
    }

    let email = prompt_email(email)?;
    let password = prompt_password(password)?;

    if ctx.is_text() {
        println!("Logging in...");
    }
    ctx.store
        .sign_in(&email, &password)
        .await
        .map_err(|e| anyhow!("Login failed: {e}"))?;

    match ctx.wait_for_session(true).await {
        Some(Some(session)) => output::print_success(
            &format!("Logged in as {}", display_user(&session)),
            &ctx.format,
        ),
        _ => output::print_success("Logged in successfully", &ctx.format),
    }
    Ok(())
}

/// Create an account. Signs in right away unless the backend asks for email
/// confirmation first.
pub async fn signup(ctx: &Context, email: Option<String>, password: Option<String>) -> Result<()> {
    let email = prompt_email(email)?;
    let password = prompt_password(password)?;

    if ctx.is_text() {
        println!("Creating account...");
    }
    ctx.store
        .sign_up(&email, &password)
        .await
        .map_err(|e| anyhow!("Sign-up failed: {e}"))?;

    match ctx.wait_for_session(true).await {
        Some(Some(session)) => output::print_success(
            &format!("Account created. Logged in as {}", display_user(&session)),
            &ctx.format,
        ),
        _ => output::print_success(
            "Account created. Confirm your email, then run 'instaclone login'",
            &ctx.format,
        ),
    }
    Ok(())
}

/// Logout and clear session.
pub async fn logout(ctx: &Context) -> Result<()> {
    if ctx.store.current_session().is_none() {
        output::print_success("Not logged in", &ctx.format);
        return Ok(());
    }

    ctx.store
        .sign_out()
        .await
        .map_err(|e| anyhow!("Logout failed: {e}"))?;
    ctx.wait_for_session(false).await;

    output::print_success("Logged out successfully", &ctx.format);
    Ok(())
}

/// Check authentication status.
pub async fn status(ctx: &Context) -> Result<()> {
    let session = ctx.store.current_session();

    match ctx.format {
        OutputFormat::Text => {
            output::print_row("Backend", &ctx.backend_label());
            match &session {
                Some(session) => {
                    output::print_row("Auth", "logged in");
                    output::print_row("User ID", &session.subject_id);
                    output::print_row("Email", session.email().unwrap_or("unknown"));
                    output::print_row("Expires", &session.expiry.to_rfc3339());
                }
                None => output::print_row("Auth", "not logged in"),
            }
        }
        OutputFormat::Json => {
            let status = json!({
                "backend": ctx.backend_label(),
                "offline": ctx.offline,
                "logged_in": session.is_some(),
                "user_id": session.as_ref().map(|s| s.subject_id.as_str()),
                "email": session.as_ref().and_then(|s| s.email()),
                "expires_at": session.as_ref().map(|s| s.expiry.to_rfc3339()),
            });
            output::print_json(&status)?;
        }
    }

    Ok(())
}
