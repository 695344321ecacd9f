//! Profile command.

use anyhow::{anyhow, Result};
use feed_synchronizer::fetch_profile;

use super::Context;
use crate::output::{self, OutputFormat};

/// Show a profile by user id, defaulting to the signed-in user.
pub async fn profile(ctx: &Context, user_id: Option<String>) -> Result<()> {
    let user_id = match user_id {
        Some(id) => id,
        None => ctx
            .store
            .current_session()
            .map(|s| s.subject_id)
            .ok_or_else(|| anyhow!("Not logged in. Pass a user id or run 'instaclone login'"))?,
    };

    let Some(profile) = fetch_profile(ctx.gateway.as_ref(), &user_id).await? else {
        return Err(anyhow!("No profile for user {user_id}"));
    };

    match ctx.format {
        OutputFormat::Text => {
            output::print_heading(profile.display_name());
            output::print_row("User ID", &profile.id);
            output::print_row("Avatar", profile.avatar_url.as_deref().unwrap_or("-"));
            let updated = profile
                .updated_at
                .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "-".to_string());
            output::print_row("Updated", &updated);
        }
        OutputFormat::Json => output::print_json(&profile)?,
    }

    Ok(())
}
