//! Google Sheets v4 implementation of [`RowStore`].
//!
//! Each [`Table`] is a worksheet of the same name whose first row is the
//! header. Data row `n` (zero-based) lives on sheet row `n + 2`.
//!
//! All values are written with `valueInputOption=RAW` so that codes made of
//! digits and phone numbers starting with `+` survive as text. Booleans are
//! therefore stored as the strings `TRUE`/`FALSE`.
//!
//! The store holds one HTTP client for the whole process. The access token
//! is obtained lazily on first use and dropped when the API rejects it, so
//! the next call re-establishes the session.

pub mod auth;

use std::sync::Arc;

use async_trait::async_trait;
use ballot::{Row, RowPosition, RowStore, RowStoreAdmin, StoreError, Table};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub use auth::{MetadataServerToken, StaticToken, TokenSource};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Spreadsheet column letters for a zero-based column index.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// A1 address of one data cell.
pub fn cell_a1(table: Table, row: RowPosition, column: usize) -> String {
    format!("{}!{}{}", table.name(), column_letter(column), row.0 + 2)
}

/// A1 range covering every data row of `table`.
pub fn data_range(table: Table) -> String {
    format!(
        "{}!A2:{}",
        table.name(),
        column_letter(table.width().saturating_sub(1))
    )
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl ValueRange {
    fn into_rows(self) -> Vec<Row> {
        self.values
            .into_iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeBody<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: Vec<Row>,
}

/// Google Sheets backed store.
pub struct SheetsStore {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    tokens: Arc<dyn TokenSource>,
}

impl SheetsStore {
    pub fn new(
        http: reqwest::Client,
        spreadsheet_id: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            base_url: SHEETS_API_BASE.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            tokens,
        }
    }

    /// Point the store at another API root, e.g. a local emulator.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}/values/{}", self.base_url, self.spreadsheet_id, suffix)
    }

    /// Send a request, retrying once with a fresh token if the current one is
    /// rejected.
    async fn send<F>(&self, build: F) -> Result<Response, StoreError>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let mut retried = false;
        loop {
            let token = self.tokens.token().await?;
            let response = build(&token)
                .send()
                .await
                .map_err(StoreError::unavailable)?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if status == StatusCode::UNAUTHORIZED && !retried {
                warn!("sheets token rejected, reconnecting");
                self.tokens.invalidate().await;
                retried = true;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "sheets request failed");
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                StoreError::unavailable(format!("sheets returned {status}"))
            } else {
                StoreError::Protocol(format!("sheets returned {status}: {body}"))
            });
        }
    }

    async fn call<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Response, StoreError> {
        self.send(|token| {
            let request = self
                .http
                .request(method.clone(), url)
                .bearer_auth(token)
                .query(query);
            match body {
                Some(body) => request.json(body),
                None => request,
            }
        })
        .await
    }

    async fn append(&self, table: Table, rows: Vec<Row>) -> Result<(), StoreError> {
        let range = format!("{}!A1", table.name());
        let body = ValueRangeBody {
            range: &range,
            major_dimension: "ROWS",
            values: rows,
        };
        self.call(
            Method::POST,
            &self.url(&format!("{range}:append")),
            &[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")],
            Some(&body),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RowStore for SheetsStore {
    async fn scan(&self, table: Table) -> Result<Vec<Row>, StoreError> {
        let range = data_range(table);
        let response = self
            .call::<()>(
                Method::GET,
                &self.url(&range),
                &[
                    ("majorDimension", "ROWS"),
                    ("valueRenderOption", "FORMATTED_VALUE"),
                ],
                None,
            )
            .await?;
        let values: ValueRange = response
            .json()
            .await
            .map_err(|e| StoreError::Protocol(format!("bad values response: {e}")))?;
        let rows = values.into_rows();
        debug!(table = %table, rows = rows.len(), "sheet scanned");
        Ok(rows)
    }

    async fn write_cell(
        &self,
        table: Table,
        row: RowPosition,
        column: usize,
        value: &str,
    ) -> Result<(), StoreError> {
        if column >= table.width() {
            return Err(StoreError::ColumnOutOfRange { table, column });
        }
        let a1 = cell_a1(table, row, column);
        let body = ValueRangeBody {
            range: &a1,
            major_dimension: "ROWS",
            values: vec![vec![value.to_string()]],
        };
        self.call(
            Method::PUT,
            &self.url(&a1),
            &[("valueInputOption", "RAW")],
            Some(&body),
        )
        .await?;
        debug!(cell = %a1, "cell written");
        Ok(())
    }

    async fn append_row(&self, table: Table, values: Row) -> Result<(), StoreError> {
        self.append(table, vec![values]).await
    }
}

#[async_trait]
impl RowStoreAdmin for SheetsStore {
    async fn clear(&self, table: Table) -> Result<(), StoreError> {
        self.call(
            Method::POST,
            &self.url(&format!("{}:clear", table.name())),
            &[],
            Some(&serde_json::json!({})),
        )
        .await?;
        debug!(table = %table, "sheet cleared");
        Ok(())
    }

    async fn append_rows(&self, table: Table, rows: Vec<Row>) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        self.append(table, rows).await
    }
}
