use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::auth::{Credentials, TokenProvider};
use super::{SheetBackend, SheetHandle};
use crate::config::GoogleSheetsConfig;

const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

/// Google Sheets backend. Lookup, sharing and folder moves go through the
/// Drive API; creation and row appends through the Sheets API.
pub struct GoogleSheets {
    client: reqwest::Client,
    auth: TokenProvider,
    sheets_api: String,
    drive_api: String,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct FileParents {
    #[serde(default)]
    parents: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Spreadsheet {
    spreadsheet_id: String,
    #[serde(default)]
    sheets: Vec<Worksheet>,
}

#[derive(Deserialize)]
struct Worksheet {
    properties: WorksheetProperties,
}

#[derive(Deserialize)]
struct WorksheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Serialize)]
struct AppendBody<'a> {
    values: [&'a [String]; 1],
}

impl GoogleSheets {
    pub async fn new(config: &GoogleSheetsConfig) -> Result<Self> {
        let path = config
            .credentials_path
            .as_ref()
            .context("Google backend needs a credentials file")?;
        let credentials = Credentials::from_file(path)?;
        let auth = TokenProvider::new(credentials).await?;
        Ok(Self::with_auth(config, auth))
    }

    pub fn with_auth(config: &GoogleSheetsConfig, auth: TokenProvider) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth,
            sheets_api: config.sheets_api_url.trim_end_matches('/').to_string(),
            drive_api: config.drive_api_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(base: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(base).with_context(|| format!("Bad API base URL: {}", base))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API base URL cannot have a path: {}", base))?
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let token = self.auth.token().await?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send Google API request: {}", what))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Google API error during {} ({}): {}", what, status, body);
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        self.send(request, what)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse Google API response: {}", what))
    }

    async fn first_worksheet(&self, spreadsheet_id: &str) -> Result<String> {
        let url = Self::url(&self.sheets_api, &["spreadsheets", spreadsheet_id])?;
        let request = self
            .request(Method::GET, url)
            .await?
            .query(&[("fields", "spreadsheetId,sheets.properties.title")]);
        let spreadsheet: Spreadsheet = self.send_json(request, "get spreadsheet").await?;
        worksheet_title(&spreadsheet)
    }
}

fn worksheet_title(spreadsheet: &Spreadsheet) -> Result<String> {
    spreadsheet
        .sheets
        .first()
        .map(|s| s.properties.title.clone())
        .with_context(|| format!("Spreadsheet {} has no worksheets", spreadsheet.spreadsheet_id))
}

/// Drive query string literal: backslash-escape quotes and backslashes.
fn drive_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// A1 range covering the worksheet, quoted so any title works.
fn a1_range(worksheet: &str, cells: &str) -> String {
    format!("'{}'!{}", worksheet.replace('\'', "''"), cells)
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetBackend for GoogleSheets {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn find(&self, title: &str) -> Result<Option<SheetHandle>> {
        let query = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            drive_literal(title),
            SPREADSHEET_MIME
        );
        let url = Self::url(&self.drive_api, &["files"])?;
        let request = self.request(Method::GET, url).await?.query(&[
            ("q", query.as_str()),
            ("fields", "files(id,name)"),
            ("pageSize", "1"),
        ]);
        let list: FileList = self.send_json(request, "find spreadsheet").await?;

        let Some(file) = list.files.into_iter().next() else {
            return Ok(None);
        };
        debug!("Found spreadsheet '{}' ({})", file.name, file.id);
        let worksheet = self.first_worksheet(&file.id).await?;
        Ok(Some(SheetHandle {
            id: file.id,
            title: file.name,
            worksheet,
        }))
    }

    async fn create(&self, title: &str) -> Result<SheetHandle> {
        let url = Self::url(&self.sheets_api, &["spreadsheets"])?;
        let request = self
            .request(Method::POST, url)
            .await?
            .json(&json!({ "properties": { "title": title } }));
        let spreadsheet: Spreadsheet = self.send_json(request, "create spreadsheet").await?;

        Ok(SheetHandle {
            worksheet: worksheet_title(&spreadsheet)?,
            id: spreadsheet.spreadsheet_id,
            title: title.to_string(),
        })
    }

    async fn share(&self, sheet: &SheetHandle, email: &str) -> Result<()> {
        let url = Self::url(&self.drive_api, &["files", &sheet.id, "permissions"])?;
        let request = self
            .request(Method::POST, url)
            .await?
            .query(&[("sendNotificationEmail", "false")])
            .json(&json!({
                "type": "user",
                "role": "writer",
                "emailAddress": email,
            }));
        self.send(request, "share spreadsheet").await?;
        Ok(())
    }

    async fn move_to_folder(&self, sheet: &SheetHandle, folder_id: &str) -> Result<()> {
        let url = Self::url(&self.drive_api, &["files", &sheet.id])?;
        let request = self
            .request(Method::GET, url.clone())
            .await?
            .query(&[("fields", "parents")]);
        let current: FileParents = self.send_json(request, "get parents").await?;

        let remove = current.parents.join(",");
        let request = self.request(Method::PATCH, url).await?.query(&[
            ("addParents", folder_id),
            ("removeParents", remove.as_str()),
            ("fields", "id,parents"),
        ]);
        self.send(request, "move spreadsheet").await?;
        Ok(())
    }

    async fn first_row(&self, sheet: &SheetHandle) -> Result<Option<Vec<String>>> {
        let range = a1_range(&sheet.worksheet, "1:1");
        let url = Self::url(&self.sheets_api, &["spreadsheets", &sheet.id, "values", &range])?;
        let request = self.request(Method::GET, url).await?;
        let values: ValueRange = self.send_json(request, "read header").await?;

        Ok(values
            .values
            .into_iter()
            .next()
            .filter(|row| !row.is_empty())
            .map(|row| row.iter().map(cell_text).collect()))
    }

    async fn append_row(&self, sheet: &SheetHandle, row: &[String]) -> Result<()> {
        let target = format!("{}:append", a1_range(&sheet.worksheet, "A1"));
        let url = Self::url(&self.sheets_api, &["spreadsheets", &sheet.id, "values", &target])?;
        let request = self
            .request(Method::POST, url)
            .await?
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&AppendBody { values: [row] });
        self.send(request, "append row").await?;
        Ok(())
    }
}
