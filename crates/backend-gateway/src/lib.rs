//! Backend gateway for the InstaClone client.
//!
//! Everything the client needs from the hosted backend goes through the
//! [`BackendGateway`] trait:
//!
//! - Auth: read the current session, sign in, sign up, sign out, and a
//!   stream of auth changes
//! - Data: query rows, insert a row, and subscribe to row inserts
//!
//! Two implementations ship: [`SupabaseGateway`] for a real project and
//! [`InMemoryGateway`] for tests and offline runs. The listener plumbing in
//! [`subscription`] is shared with the session store and the feed.

pub mod error;
pub mod gateway;
pub mod memory;
pub mod subscription;
pub mod supabase;
pub mod types;

pub use error::{
    AuthError, AuthResult, QueryError, QueryResult, SubscriptionError, SubscriptionResult,
    WriteError, WriteResult,
};
pub use gateway::BackendGateway;
pub use memory::InMemoryGateway;
pub use subscription::{
    ChannelStatus, ListenerId, ListenerRegistry, Registration, Subscription, SubscriptionEvent,
};
pub use supabase::{SupabaseConfig, SupabaseGateway};
pub use types::{
    AuthChangeKind, AuthEvent, Direction, Filter, OrderBy, Row, RowQuery, Session,
};
