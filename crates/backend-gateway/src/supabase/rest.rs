//! PostgREST data endpoints.

use tracing::{debug, error};
use url::Url;

use super::{summarize_response_body, SupabaseConfig};
use crate::error::{QueryError, QueryResult, WriteError, WriteResult};
use crate::types::{value_text, Direction, Filter, Row, RowQuery};

/// Builds `/rest/v1/{table}?select=..&col=eq.value&order=col.desc&limit=n`.
pub fn query_url(config: &SupabaseConfig, query: &RowQuery) -> QueryResult<Url> {
    if !is_identifier(&query.table) {
        return Err(QueryError::Invalid(format!("bad table name: {}", query.table)));
    }

    let mut url = Url::parse(&config.rest_url(&query.table))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("select", &query.select);

        for filter in &query.filters {
            match filter {
                Filter::Eq { column, value } => {
                    pairs.append_pair(column, &format!("eq.{}", value_text(value)));
                }
            }
        }

        if !query.order.is_empty() {
            let order = query
                .order
                .iter()
                .map(|o| {
                    let dir = match o.direction {
                        Direction::Asc => "asc",
                        Direction::Desc => "desc",
                    };
                    format!("{}.{}", o.column, dir)
                })
                .collect::<Vec<_>>()
                .join(",");
            pairs.append_pair("order", &order);
        }

        if let Some(limit) = query.limit {
            pairs.append_pair("limit", &limit.to_string());
        }
    }
    Ok(url)
}

pub async fn fetch_rows(
    http: &reqwest::Client,
    config: &SupabaseConfig,
    query: &RowQuery,
    bearer: &str,
) -> QueryResult<Vec<Row>> {
    let url = query_url(config, query)?;
    debug!(url = %url, "Querying rows");

    let response = http
        .get(url)
        .header("apikey", &config.publishable_key)
        .header("Authorization", format!("Bearer {bearer}"))
        .header("Accept", "application/json")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body_summary = %summarize_response_body(&body), "Row query failed");
        return Err(QueryError::Server {
            status: status.as_u16(),
            message: body,
        });
    }

    let body = response.text().await?;
    serde_json::from_str::<Vec<Row>>(&body).map_err(|e| QueryError::Decode(e.to_string()))
}

pub async fn insert_row(
    http: &reqwest::Client,
    config: &SupabaseConfig,
    table: &str,
    row: &Row,
    access_token: &str,
) -> WriteResult<()> {
    if !is_identifier(table) {
        return Err(WriteError::Invalid(format!("bad table name: {table}")));
    }

    let url = config.rest_url(table);
    debug!(url = %url, "Inserting row");

    let response = http
        .post(&url)
        .header("apikey", &config.publishable_key)
        .header("Authorization", format!("Bearer {access_token}"))
        .header("Content-Type", "application/json")
        .header("Prefer", "return=minimal")
        .json(row)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    error!(status = %status, body_summary = %summarize_response_body(&body), "Row insert failed");
    Err(match status.as_u16() {
        401 => WriteError::NotAuthenticated,
        code => WriteError::Server {
            status: code,
            message: body,
        },
    })
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
