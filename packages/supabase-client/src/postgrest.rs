//! PostgREST query builder.
//!
//! Covers the subset of PostgREST the client needs: equality filters,
//! ordering, limits, and select/insert/update.

use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::{check_status, Result, SupabaseClient, SupabaseError};

/// A query against one table. Built with [`SupabaseClient::from`].
pub struct QueryBuilder<'a> {
    client: &'a SupabaseClient,
    table: String,
    params: Vec<(String, String)>,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(client: &'a SupabaseClient, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
            params: Vec::new(),
        }
    }

    /// Filter rows where `column` equals `value`.
    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.params
            .push((column.to_string(), format!("eq.{}", value.to_string())));
        self
    }

    /// Order by `column`.
    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        let direction = if ascending { "asc" } else { "desc" };
        self.params
            .push(("order".to_string(), format!("{}.{}", column, direction)));
        self
    }

    /// Return at most `count` rows.
    pub fn limit(mut self, count: usize) -> Self {
        self.params.push(("limit".to_string(), count.to_string()));
        self
    }

    /// Select `columns` (PostgREST syntax, e.g. `"*"` or `"keyword, frequency"`).
    pub async fn select<T: DeserializeOwned>(self, columns: &str) -> Result<Vec<T>> {
        let url = self.url(Some(columns))?;
        tracing::debug!(table = %self.table, %url, "PostgREST select");

        let resp = self
            .client
            .authorize(self.client.http().get(url))
            .send()
            .await?;
        let rows: Vec<T> = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| SupabaseError::Parse(e.to_string()))?;
        Ok(rows)
    }

    /// Insert one row and return its stored representation.
    pub async fn insert<B: Serialize, T: DeserializeOwned>(self, row: &B) -> Result<T> {
        let url = self.url(None)?;
        tracing::debug!(table = %self.table, "PostgREST insert");

        let resp = self
            .client
            .authorize(self.client.http().post(url))
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;
        let rows: Vec<T> = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| SupabaseError::Parse(e.to_string()))?;

        rows.into_iter().next().ok_or_else(|| {
            SupabaseError::Parse(format!("insert into {} returned no rows", self.table))
        })
    }

    /// Patch every row matching the filters. Returns the number of rows
    /// the server reported back.
    pub async fn update<B: Serialize>(self, patch: &B) -> Result<usize> {
        let url = self.url(None)?;
        tracing::debug!(table = %self.table, %url, "PostgREST update");

        let resp = self
            .client
            .authorize(self.client.http().patch(url))
            .header("Prefer", "return=representation")
            .json(patch)
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| SupabaseError::Parse(e.to_string()))?;
        Ok(rows.len())
    }

    fn url(&self, columns: Option<&str>) -> Result<Url> {
        let mut url = self.client.endpoint(&format!("rest/v1/{}", self.table))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(columns) = columns {
                query.append_pair("select", columns);
            }
            for (key, value) in &self.params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }
}
