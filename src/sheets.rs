//! Remote table client.
//!
//! [`SheetsApi`] is the raw tabular-data service (Google Sheets values API plus
//! the Drive modification time). [`RemoteTable`] builds the row-level
//! operations on top of it.
//!
//! # Delete is not atomic
//!
//! The values API has no row delete. [`RemoteTable::delete_row`] fetches the
//! sheet, drops the target row, clears the data region and rewrites what is
//! left. A writer that appends between the clear and the rewrite loses its row,
//! and a failed rewrite leaves the data region empty until someone writes it
//! back. Callers reload after every attempt so the outcome is at least visible.

use crate::error::TransientError;
use crate::session::AuthProvider;
use crate::table::{ModifiedToken, TableSnapshot};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

const SHEETS_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_FILES_BASE: &str = "https://www.googleapis.com/drive/v3/files";

/// Last column addressed by row-level writes.
const LAST_COLUMN: &str = "ZZ";

/// Raw operations of the remote tabular-data service.
#[async_trait]
pub trait SheetsApi: Send + Sync + 'static {
    /// Opaque modification marker of the whole spreadsheet.
    async fn modified_time(&self) -> Result<String, TransientError>;

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, TransientError>;

    async fn append_values(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), TransientError>;

    async fn update_values(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), TransientError>;

    async fn clear_values(&self, range: &str) -> Result<(), TransientError>;
}

/// Row-level operations against one sheet. Row indices are 0-based data rows.
#[async_trait]
pub trait TableStore: Send + Sync + 'static {
    async fn fetch_modified_timestamp(&self) -> Result<ModifiedToken, TransientError>;

    async fn fetch_all_rows(&self) -> Result<TableSnapshot, TransientError>;

    async fn append_row(&self, values: Vec<String>) -> Result<(), TransientError>;

    /// Fails with [`TransientError::StaleRow`] when the row is gone remotely.
    async fn replace_row(&self, index: usize, values: Vec<String>) -> Result<(), TransientError>;

    async fn delete_row(&self, index: usize) -> Result<(), TransientError>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    modified_time: Option<String>,
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(TransientError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Google Sheets v4 over reqwest, authorized with the provider's bearer token.
pub struct GoogleSheets {
    http: reqwest::Client,
    spreadsheet_id: String,
    auth: Arc<dyn AuthProvider>,
}

impl GoogleSheets {
    pub fn new(http: reqwest::Client, spreadsheet_id: impl Into<String>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            http,
            spreadsheet_id: spreadsheet_id.into(),
            auth,
        }
    }

    fn values_url(&self, range: &str, suffix: &str) -> String {
        format!(
            "{}/{}/values/{}{}",
            SHEETS_BASE,
            self.spreadsheet_id,
            urlencoding::encode(range),
            suffix
        )
    }

    fn drive_url(&self) -> String {
        format!("{}/{}?fields=modifiedTime", DRIVE_FILES_BASE, self.spreadsheet_id)
    }

    async fn bearer(&self) -> Result<String, TransientError> {
        self.auth
            .access_token()
            .await
            .ok_or(TransientError::Unauthenticated)
    }

    async fn write(
        &self,
        request: reqwest::RequestBuilder,
        range: &str,
        rows: Vec<Vec<String>>,
    ) -> Result<(), TransientError> {
        let token = self.bearer().await?;
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": rows });
        let response = request.bearer_auth(token).json(&body).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl SheetsApi for GoogleSheets {
    async fn modified_time(&self) -> Result<String, TransientError> {
        let token = self.bearer().await?;
        let response = self.http.get(self.drive_url()).bearer_auth(token).send().await?;
        let file: DriveFile = check_status(response).await?.json().await?;
        file.modified_time
            .ok_or_else(|| TransientError::Decode("file metadata has no modifiedTime".into()))
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, TransientError> {
        log::debug!("[SHEETS] GET values range={}", range);
        let token = self.bearer().await?;
        let response = self
            .http
            .get(self.values_url(range, ""))
            .bearer_auth(token)
            .send()
            .await?;
        let body: ValueRange = check_status(response).await?.json().await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    async fn append_values(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), TransientError> {
        log::debug!("[SHEETS] APPEND {} rows range={}", rows.len(), range);
        let url = self.values_url(
            range,
            ":append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
        );
        self.write(self.http.post(url), range, rows).await
    }

    async fn update_values(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), TransientError> {
        log::debug!("[SHEETS] UPDATE {} rows range={}", rows.len(), range);
        let url = self.values_url(range, "?valueInputOption=RAW");
        self.write(self.http.put(url), range, rows).await
    }

    async fn clear_values(&self, range: &str) -> Result<(), TransientError> {
        log::debug!("[SHEETS] CLEAR range={}", range);
        let token = self.bearer().await?;
        let response = self
            .http
            .post(self.values_url(range, ":clear"))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Quote a sheet name for A1 notation when it is not a plain identifier.
pub fn quote_sheet_name(name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// One sheet of a spreadsheet, header in row 1.
pub struct RemoteTable {
    api: Arc<dyn SheetsApi>,
    sheet_name: String,
}

impl RemoteTable {
    pub fn new(api: Arc<dyn SheetsApi>, sheet_name: impl Into<String>) -> Self {
        Self {
            api,
            sheet_name: sheet_name.into(),
        }
    }

    /// The whole sheet.
    pub fn sheet_range(&self) -> String {
        quote_sheet_name(&self.sheet_name)
    }

    /// Sheet row of data row `index` (1-based, after the header).
    pub fn row_range(&self, index: usize) -> String {
        let row = index + 2;
        format!("{}!A{}:{}{}", self.sheet_range(), row, LAST_COLUMN, row)
    }

    /// Everything below the header.
    pub fn data_range(&self) -> String {
        format!("{}!A2:{}", self.sheet_range(), LAST_COLUMN)
    }

    fn data_origin(&self) -> String {
        format!("{}!A2", self.sheet_range())
    }
}

#[async_trait]
impl TableStore for RemoteTable {
    async fn fetch_modified_timestamp(&self) -> Result<ModifiedToken, TransientError> {
        self.api.modified_time().await.map(ModifiedToken::new)
    }

    async fn fetch_all_rows(&self) -> Result<TableSnapshot, TransientError> {
        let values = self.api.get_values(&self.sheet_range()).await?;
        Ok(TableSnapshot::from_values(values, None))
    }

    async fn append_row(&self, values: Vec<String>) -> Result<(), TransientError> {
        self.api.append_values(&self.sheet_range(), vec![values]).await
    }

    async fn replace_row(&self, index: usize, values: Vec<String>) -> Result<(), TransientError> {
        let current = self.api.get_values(&self.sheet_range()).await?;
        check_row(index, &current)?;
        self.api.update_values(&self.row_range(index), vec![values]).await
    }

    async fn delete_row(&self, index: usize) -> Result<(), TransientError> {
        let mut values = self.api.get_values(&self.sheet_range()).await?;
        check_row(index, &values)?;

        values.remove(index + 1);
        let remaining: Vec<Vec<String>> = values.into_iter().skip(1).collect();

        self.api.clear_values(&self.data_range()).await?;
        if remaining.is_empty() {
            return Ok(());
        }
        self.api.update_values(&self.data_origin(), remaining).await
    }
}

/// The data row at `index` must still exist remotely (row 0 of `values` is the header).
fn check_row(index: usize, values: &[Vec<String>]) -> Result<(), TransientError> {
    let data_rows = values.len().saturating_sub(1);
    if index >= data_rows {
        return Err(TransientError::StaleRow {
            index,
            rows: data_rows,
        });
    }
    Ok(())
}
