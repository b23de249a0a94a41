pub mod auth;
pub mod google;
pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::SheetsConfig;

/// Fixed header written as the first row of every destination sheet.
pub const HEADER: [&str; 7] = [
    "Timestamp",
    "Chat",
    "Sender",
    "Chat ID",
    "Message ID",
    "Text",
    "Category",
];

/// Handle to the first worksheet of a spreadsheet
#[derive(Debug, Clone, PartialEq)]
pub struct SheetHandle {
    pub id: String,
    pub title: String,
    pub worksheet: String,
}

/// Spreadsheet operations the resolver and appender need. One implementation
/// per storage (local workbook file, Google Sheets).
#[async_trait]
pub trait SheetBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Look up a spreadsheet by exact title.
    async fn find(&self, title: &str) -> Result<Option<SheetHandle>>;

    async fn create(&self, title: &str) -> Result<SheetHandle>;

    /// Give `email` write access to the sheet.
    async fn share(&self, sheet: &SheetHandle, email: &str) -> Result<()>;

    async fn move_to_folder(&self, sheet: &SheetHandle, folder_id: &str) -> Result<()>;

    /// First row of the worksheet, `None` when the sheet is empty.
    async fn first_row(&self, sheet: &SheetHandle) -> Result<Option<Vec<String>>>;

    async fn append_row(&self, sheet: &SheetHandle, row: &[String]) -> Result<()>;
}

fn header_row() -> Vec<String> {
    HEADER.iter().map(|h| h.to_string()).collect()
}

/// Finds or creates the spreadsheet for a given date.
pub struct SheetResolver {
    backend: Box<dyn SheetBackend>,
    name_prefix: String,
    folder_id: Option<String>,
    share_with: Option<String>,
    /// Date key and handle of the last resolved sheet
    current: Mutex<Option<(String, SheetHandle)>>,
}

impl SheetResolver {
    pub fn new(backend: Box<dyn SheetBackend>, config: &SheetsConfig) -> Self {
        Self {
            backend,
            name_prefix: config.name_prefix.clone(),
            folder_id: config.folder_id.clone(),
            share_with: config.share_with.clone(),
            current: Mutex::new(None),
        }
    }

    pub fn title_for(&self, date_key: &str) -> String {
        format!("{}{}", self.name_prefix, date_key)
    }

    /// Resolve the sheet for `date_key` (`YYYY-MM-DD`). An error means no
    /// sheet is available and the caller should drop the message.
    pub async fn resolve(&self, date_key: &str) -> Result<SheetHandle> {
        let mut current = self.current.lock().await;
        if let Some((key, handle)) = current.as_ref() {
            if key == date_key {
                return Ok(handle.clone());
            }
        }

        let title = self.title_for(date_key);
        let handle = match self.backend.find(&title).await? {
            Some(handle) => {
                self.ensure_header(&handle).await?;
                handle
            }
            None => self.create_and_initialize(&title).await?,
        };

        *current = Some((date_key.to_string(), handle.clone()));
        Ok(handle)
    }

    async fn create_and_initialize(&self, title: &str) -> Result<SheetHandle> {
        info!("Creating sheet '{}' via {}", title, self.backend.name());
        let handle = self.backend.create(title).await?;
        self.initialize(&handle).await?;
        info!("Sheet '{}' ready ({})", title, handle.id);
        Ok(handle)
    }

    /// Share, move, then write the header. The header goes last, so a sheet
    /// that has one went through every step.
    async fn initialize(&self, handle: &SheetHandle) -> Result<()> {
        if let Some(email) = &self.share_with {
            self.backend.share(handle, email).await?;
        }
        if let Some(folder) = &self.folder_id {
            self.backend.move_to_folder(handle, folder).await?;
        }
        self.backend.append_row(handle, &header_row()).await
    }

    /// A sheet without a header was left half-initialized by an earlier
    /// failure; run the whole initialization again.
    async fn ensure_header(&self, handle: &SheetHandle) -> Result<()> {
        if self.backend.first_row(handle).await?.is_none() {
            warn!("Sheet '{}' has no header row, initializing it", handle.title);
            self.initialize(handle).await?;
        }
        Ok(())
    }

    pub async fn append(&self, handle: &SheetHandle, row: &[String]) -> Result<()> {
        self.backend.append_row(handle, row).await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingBackend;
    use super::*;

    fn sheets_config(folder: Option<&str>, share: Option<&str>) -> SheetsConfig {
        let mut config: SheetsConfig = toml::from_str("").unwrap();
        config.folder_id = folder.map(String::from);
        config.share_with = share.map(String::from);
        config
    }

    #[tokio::test]
    async fn test_missing_sheet_is_created_once_with_header() {
        let backend = RecordingBackend::default();
        let resolver = SheetResolver::new(
            Box::new(backend.clone()),
            &sheets_config(Some("folder-9"), Some("ops@example.com")),
        );

        let first = resolver.resolve("2025-03-01").await.unwrap();
        let second = resolver.resolve("2025-03-01").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.title, "messages_2025-03-01");

        assert_eq!(
            backend.calls(),
            vec![
                "find messages_2025-03-01",
                "create messages_2025-03-01",
                "share messages_2025-03-01 ops@example.com",
                "move messages_2025-03-01 folder-9",
                "append messages_2025-03-01",
            ]
        );
        assert_eq!(backend.rows("messages_2025-03-01"), vec![header_row()]);
    }

    #[tokio::test]
    async fn test_share_and_move_skipped_when_unconfigured() {
        let backend = RecordingBackend::default();
        let resolver = SheetResolver::new(Box::new(backend.clone()), &sheets_config(None, None));

        resolver.resolve("2025-03-01").await.unwrap();
        assert_eq!(backend.count("share"), 0);
        assert_eq!(backend.count("move"), 0);
        assert_eq!(backend.count("create"), 1);
    }

    #[tokio::test]
    async fn test_existing_sheet_is_not_recreated() {
        let backend =
            RecordingBackend::with_sheet("messages_2025-03-02", vec![header_row()]);
        let resolver = SheetResolver::new(Box::new(backend.clone()), &sheets_config(None, None));

        let handle = resolver.resolve("2025-03-02").await.unwrap();
        assert_eq!(handle.title, "messages_2025-03-02");
        assert_eq!(backend.count("create"), 0);
        assert_eq!(backend.count("append"), 0);
    }

    #[tokio::test]
    async fn test_existing_sheet_without_header_is_repaired() {
        let backend = RecordingBackend::with_sheet("messages_2025-03-03", Vec::new());
        let resolver = SheetResolver::new(Box::new(backend.clone()), &sheets_config(None, None));

        resolver.resolve("2025-03-03").await.unwrap();
        assert_eq!(backend.count("create"), 0);
        assert_eq!(backend.rows("messages_2025-03-03"), vec![header_row()]);
    }

    #[tokio::test]
    async fn test_new_day_resolves_new_sheet() {
        let backend = RecordingBackend::default();
        let resolver = SheetResolver::new(Box::new(backend.clone()), &sheets_config(None, None));

        resolver.resolve("2025-03-01").await.unwrap();
        let next = resolver.resolve("2025-03-02").await.unwrap();
        assert_eq!(next.title, "messages_2025-03-02");
        assert_eq!(backend.count("create"), 2);
    }

    #[tokio::test]
    async fn test_create_failure_yields_no_sheet() {
        let backend = RecordingBackend {
            fail_create: true,
            ..Default::default()
        };
        let resolver = SheetResolver::new(Box::new(backend.clone()), &sheets_config(None, None));

        assert!(resolver.resolve("2025-03-01").await.is_err());
        // Nothing cached: the next message tries again
        assert!(resolver.resolve("2025-03-01").await.is_err());
        assert_eq!(backend.count("create"), 2);
    }

    #[tokio::test]
    async fn test_failed_share_is_retried_on_next_resolve() {
        let backend = RecordingBackend {
            failing_shares: std::sync::Arc::new(std::sync::Mutex::new(1)),
            ..Default::default()
        };
        let resolver = SheetResolver::new(
            Box::new(backend.clone()),
            &sheets_config(Some("folder-9"), Some("ops@example.com")),
        );

        assert!(resolver.resolve("2025-03-04").await.is_err());
        let handle = resolver.resolve("2025-03-04").await.unwrap();
        assert_eq!(handle.title, "messages_2025-03-04");

        assert_eq!(
            backend.calls(),
            vec![
                "find messages_2025-03-04",
                "create messages_2025-03-04",
                "share messages_2025-03-04 ops@example.com",
                "find messages_2025-03-04",
                "first_row messages_2025-03-04",
                "share messages_2025-03-04 ops@example.com",
                "move messages_2025-03-04 folder-9",
                "append messages_2025-03-04",
            ]
        );
        assert_eq!(backend.rows("messages_2025-03-04"), vec![header_row()]);
    }

    #[tokio::test]
    async fn test_failed_header_write_reinitializes_sheet() {
        let backend = RecordingBackend::default();
        *backend.fail_append.lock().unwrap() = true;
        let resolver = SheetResolver::new(
            Box::new(backend.clone()),
            &sheets_config(Some("folder-9"), None),
        );

        assert!(resolver.resolve("2025-03-05").await.is_err());
        *backend.fail_append.lock().unwrap() = false;
        resolver.resolve("2025-03-05").await.unwrap();

        assert_eq!(backend.count("create"), 1);
        assert_eq!(backend.count("move"), 2);
        assert_eq!(backend.rows("messages_2025-03-05"), vec![header_row()]);
    }
}
