//! Profile lookup.

use backend_gateway::{BackendGateway, Filter, QueryError, QueryResult, Row, RowQuery};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const PROFILES_TABLE: &str = "profiles";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn from_row(row: &Row) -> QueryResult<Self> {
        serde_json::from_value(Value::Object(row.clone()))
            .map_err(|e| QueryError::Decode(format!("profile row: {e}")))
    }

    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("User")
    }
}

/// Reads one profile by user id. `Ok(None)` when the user has no profile row.
pub async fn fetch_profile(
    gateway: &dyn BackendGateway,
    user_id: &str,
) -> QueryResult<Option<Profile>> {
    let query = RowQuery::table(PROFILES_TABLE)
        .select("id,full_name,avatar_url,updated_at")
        .filter(Filter::eq("id", user_id))
        .limit(1);
    let rows = gateway.query(&query).await?;
    debug!(user_id, found = !rows.is_empty(), "Fetched profile");
    rows.first().map(Profile::from_row).transpose()
}
