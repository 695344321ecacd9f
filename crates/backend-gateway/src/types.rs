//! Values exchanged with the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A single row as returned by the data API: a JSON object keyed by column.
pub type Row = serde_json::Map<String, Value>;

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Stable identifier of the signed-in user.
    pub subject_id: String,
    /// Bearer token sent with data API requests.
    pub credentials_token: String,
    /// When `credentials_token` stops being accepted.
    pub expiry: DateTime<Utc>,
    /// The user record exactly as the auth server returned it.
    #[serde(default)]
    pub raw_user_record: Value,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Email address from the raw user record, if the backend included one.
    pub fn email(&self) -> Option<&str> {
        self.raw_user_record.get("email").and_then(Value::as_str)
    }
}

/// What caused an auth change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

impl fmt::Display for AuthChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthChangeKind::InitialSession => "INITIAL_SESSION",
            AuthChangeKind::SignedIn => "SIGNED_IN",
            AuthChangeKind::SignedOut => "SIGNED_OUT",
            AuthChangeKind::TokenRefreshed => "TOKEN_REFRESHED",
            AuthChangeKind::UserUpdated => "USER_UPDATED",
        };
        f.write_str(name)
    }
}

/// An auth change notification carrying the session that is now current.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub kind: AuthChangeKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn new(kind: AuthChangeKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }

    pub fn signed_in(session: Session) -> Self {
        Self::new(AuthChangeKind::SignedIn, Some(session))
    }

    pub fn signed_out() -> Self {
        Self::new(AuthChangeKind::SignedOut, None)
    }
}

/// A row filter. Only equality is needed by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { column: String, value: Value },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. } => column,
        }
    }

    /// Whether `row` passes this filter. Values compare by their string form
    /// so `"42"` and `42` match, the way the data API treats query params.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Eq { column, value } => row
                .get(column)
                .map(|v| value_text(v) == value_text(value))
                .unwrap_or(false),
        }
    }
}

/// Sort direction for [`OrderBy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }
}

/// A bulk read against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    pub table: String,
    /// Column list in the data API's select syntax, e.g.
    /// `id,caption,profiles(full_name,avatar_url)`.
    pub select: String,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl RowQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.select = select.into();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Embedded relations named in `select`, e.g. `profiles` for
    /// `id,profiles(full_name)`.
    pub fn embedded_relations(&self) -> Vec<&str> {
        let mut relations = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;
        for (i, ch) in self.select.char_indices() {
            match ch {
                '(' => {
                    if depth == 0 {
                        let name = self.select[start..i].trim();
                        if !name.is_empty() {
                            relations.push(name);
                        }
                    }
                    depth += 1;
                }
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => start = i + 1,
                _ => {}
            }
        }
        relations
    }
}

/// String form of a JSON value as it would appear in a query parameter.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn session(expiry: DateTime<Utc>) -> Session {
        Session {
            subject_id: "user-1".to_string(),
            credentials_token: "token".to_string(),
            expiry,
            raw_user_record: json!({ "id": "user-1", "email": "a@x.com" }),
        }
    }

    #[test]
    fn session_expiry() {
        let now = Utc::now();
        assert!(session(now - Duration::seconds(1)).is_expired_at(now));
        assert!(!session(now + Duration::hours(1)).is_expired_at(now));
    }

    #[test]
    fn session_email_from_raw_record() {
        let s = session(Utc::now());
        assert_eq!(s.email(), Some("a@x.com"));
    }

    #[test]
    fn filter_matches_by_text() {
        let row: Row = json!({ "id": 42, "user_id": "u1" })
            .as_object()
            .cloned()
            .unwrap();
        assert!(Filter::eq("id", "42").matches(&row));
        assert!(Filter::eq("user_id", "u1").matches(&row));
        assert!(!Filter::eq("user_id", "u2").matches(&row));
        assert!(!Filter::eq("missing", "x").matches(&row));
    }

    #[test]
    fn embedded_relations_parsed_from_select() {
        let q = RowQuery::table("posts")
            .select("id,user_id,caption,profiles(full_name,avatar_url),created_at");
        assert_eq!(q.embedded_relations(), vec!["profiles"]);

        let plain = RowQuery::table("profiles").select("id,full_name");
        assert!(plain.embedded_relations().is_empty());
    }

    #[test]
    fn auth_change_kind_display_matches_wire_names() {
        assert_eq!(AuthChangeKind::SignedIn.to_string(), "SIGNED_IN");
        assert_eq!(
            serde_json::to_value(AuthChangeKind::TokenRefreshed).unwrap(),
            json!("TOKEN_REFRESHED")
        );
    }
}
