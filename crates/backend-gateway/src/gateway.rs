//! The backend seam used by the session store, the feed, and the CLI.

use async_trait::async_trait;

use crate::error::{AuthResult, QueryResult, SubscriptionResult, WriteResult};
use crate::subscription::Subscription;
use crate::types::{AuthEvent, Row, RowQuery, Session};

/// Auth and data operations of the hosted backend.
///
/// Session state is never mutated through return values: `sign_in`,
/// `sign_up` and `sign_out` only report success or failure, and the new
/// session arrives on the [`on_auth_change`](Self::on_auth_change) stream.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    /// Reads the current session, refreshing it first if it has expired.
    async fn get_session(&self) -> AuthResult<Option<Session>>;

    /// Registers an auth change listener. It is active immediately.
    fn on_auth_change(&self) -> Subscription<AuthEvent>;

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<()>;

    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<()>;

    async fn sign_out(&self) -> AuthResult<()>;

    async fn query(&self, query: &RowQuery) -> QueryResult<Vec<Row>>;

    async fn insert(&self, table: &str, row: Row) -> WriteResult<()>;

    /// Opens a row-insert subscription on `table`.
    ///
    /// The subscription starts `Pending`; await
    /// [`Subscription::wait_active`] before relying on delivery.
    async fn on_row_inserted(&self, table: &str) -> SubscriptionResult<Subscription<Row>>;
}
