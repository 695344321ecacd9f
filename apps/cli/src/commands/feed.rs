//! Feed and post commands.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use feed_synchronizer::{
    create_post_in, FeedConfig, FeedFailure, FeedState, FeedStatus, FeedSynchronizer, NewPost,
    PostId,
};
use tokio::sync::watch;
use tracing::info;

use super::Context;
use crate::output::{self, OutputFormat};

/// Print the feed; with `follow`, keep printing new posts until Ctrl-C.
pub async fn feed(ctx: &Context, follow: bool) -> Result<()> {
    let feed = FeedSynchronizer::new(ctx.gateway.clone(), FeedConfig::from_config(&ctx.config));
    let mut rx = feed.start();

    let state = rx
        .wait_for(|s| !matches!(s.status, FeedStatus::Idle | FeedStatus::Loading))
        .await?
        .clone();

    match first_view(&state, follow) {
        FirstView::Abort(message) => {
            feed.stop();
            return Err(anyhow!(message));
        }
        FirstView::Reconnecting { notice, show_posts } => {
            output::print_error(&notice, &ctx.format);
            if show_posts {
                print_snapshot(&state, &ctx.format)?;
            }
        }
        FirstView::Snapshot => print_snapshot(&state, &ctx.format)?,
    }
    if !follow {
        feed.stop();
        return Ok(());
    }

    if ctx.is_text() {
        println!("Following new posts (Ctrl-C to stop)...");
    }
    let mut seen: HashSet<PostId> = state.posts.iter().map(|p| p.id.clone()).collect();
    let result = follow_feed(&mut rx, &mut seen, &ctx.format).await;
    feed.stop();
    result
}

/// How to present the first settled feed state.
#[derive(Debug, PartialEq)]
enum FirstView {
    Abort(String),
    /// Keep following; posts from before the drop are printed if there are any.
    Reconnecting { notice: String, show_posts: bool },
    Snapshot,
}

fn first_view(state: &FeedState, follow: bool) -> FirstView {
    match &state.status {
        FeedStatus::Failed(failure) if !follow || !failure.is_subscription() => {
            FirstView::Abort(failure.to_string())
        }
        FeedStatus::Failed(failure) => FirstView::Reconnecting {
            notice: format!("{failure}; reconnecting"),
            show_posts: !state.posts.is_empty(),
        },
        _ => FirstView::Snapshot,
    }
}

async fn follow_feed(
    rx: &mut watch::Receiver<FeedState>,
    seen: &mut HashSet<PostId>,
    format: &OutputFormat,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Feed follow interrupted");
                return Ok(());
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = rx.borrow_and_update().clone();
                match &state.status {
                    FeedStatus::Ready => {
                        // Newest first in the feed; print in arrival order.
                        for post in state.posts.iter().rev() {
                            if seen.insert(post.id.clone()) {
                                output::print_post(post, format);
                            }
                        }
                    }
                    FeedStatus::Failed(FeedFailure::Query(err)) => {
                        return Err(anyhow!("Could not load posts: {err}"));
                    }
                    FeedStatus::Failed(failure) => {
                        output::print_error(&format!("{failure}; reconnecting"), format);
                    }
                    FeedStatus::Idle | FeedStatus::Loading => {}
                }
            }
        }
    }
}

fn print_snapshot(state: &FeedState, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if state.posts.is_empty() {
                println!("No posts yet.");
            }
            for post in &state.posts {
                output::print_post(post, format);
            }
            Ok(())
        }
        OutputFormat::Json => output::print_json(state),
    }
}

/// Share a post as the signed-in user.
pub async fn post(ctx: &Context, caption: Option<String>, image_url: String) -> Result<()> {
    let session = ctx.store.current_session();
    if session.is_none() {
        return Err(anyhow!("Not logged in. Run 'instaclone login' first"));
    }

    let new_post = NewPost { caption, image_url };
    create_post_in(
        ctx.gateway.as_ref(),
        &ctx.config.posts_table,
        session.as_ref(),
        new_post,
    )
    .await
    .map_err(|e| anyhow!("Could not share post: {e}"))?;

    output::print_success("Post shared", &ctx.format);
    Ok(())
}
