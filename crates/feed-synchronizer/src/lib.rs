//! Main feed for the InstaClone client.
//!
//! A [`FeedSynchronizer`] run opens one row-insert subscription on the posts
//! table, waits until it is live, then issues one bulk query. Inserts that
//! arrive during the query are buffered and replayed on top of the snapshot;
//! later inserts are prepended as they arrive. Duplicate ids never produce a
//! second entry.
//!
//! # Design Principles
//!
//! - The subscription is active before the query is issued
//! - Each published [`FeedState`] is a complete snapshot on a watch channel
//! - Results from a stopped or superseded run are discarded
//! - Query failures wait for a manual retry; subscription failures reconnect

pub mod compose;
pub mod fsm;
pub mod model;
pub mod post;
pub mod profile;
pub mod state;
mod synchronizer;

pub use compose::{create_post, create_post_in, NewPost};
pub use fsm::FeedPhase;
pub use model::FeedModel;
pub use post::{AuthorProfile, Post, PostId, RowError};
pub use profile::{fetch_profile, Profile};
pub use state::{FeedFailure, FeedState, FeedStatus};
pub use synchronizer::{FeedConfig, FeedSynchronizer, ReconnectPolicy, DEFAULT_FEED_SELECT};

#[cfg(test)]
mod tests;
