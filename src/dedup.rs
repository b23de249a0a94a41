use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Last processed message id, persisted as a single JSON number.
#[derive(Debug)]
pub struct DedupCursor {
    path: PathBuf,
    last_id: i64,
}

impl DedupCursor {
    /// Read the cursor from disk. A missing or unreadable file means nothing
    /// has been processed yet.
    pub async fn load(path: &Path) -> Self {
        let last_id = match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str::<i64>(content.trim()) {
                Ok(id) => id,
                Err(e) => {
                    warn!(
                        "Cursor file {} is corrupt ({}), starting from 0",
                        path.display(),
                        e
                    );
                    0
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                warn!(
                    "Cursor file {} unreadable ({}), starting from 0",
                    path.display(),
                    e
                );
                0
            }
        };

        debug!("Dedup cursor at {} (from {})", last_id, path.display());
        Self {
            path: path.to_path_buf(),
            last_id,
        }
    }

    pub fn last_id(&self) -> i64 {
        self.last_id
    }

    pub fn is_new(&self, message_id: i64) -> bool {
        message_id > self.last_id
    }

    /// Move the cursor forward to `message_id` and write it out.
    /// Ids at or below the current cursor are ignored.
    pub async fn advance(&mut self, message_id: i64) -> Result<()> {
        if !self.is_new(message_id) {
            return Ok(());
        }
        self.last_id = message_id;

        let tmp = self.path.with_extension("tmp");
        let body = serde_json::to_string(&message_id)?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write cursor file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace cursor file: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let cursor = DedupCursor::load(&dir.path().join("cursor.json")).await;
        assert_eq!(cursor.last_id(), 0);
        assert!(cursor.is_new(1));
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, "{not json").unwrap();
        let cursor = DedupCursor::load(&path).await;
        assert_eq!(cursor.last_id(), 0);
    }

    #[tokio::test]
    async fn test_advance_persists_scalar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");

        let mut cursor = DedupCursor::load(&path).await;
        cursor.advance(17).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "17");

        let reloaded = DedupCursor::load(&path).await;
        assert_eq!(reloaded.last_id(), 17);
        assert!(!reloaded.is_new(17));
        assert!(!reloaded.is_new(3));
        assert!(reloaded.is_new(18));
    }

    #[tokio::test]
    async fn test_advance_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");

        let mut cursor = DedupCursor::load(&path).await;
        cursor.advance(50).await.unwrap();
        cursor.advance(10).await.unwrap();
        assert_eq!(cursor.last_id(), 50);
        assert_eq!(DedupCursor::load(&path).await.last_id(), 50);
    }

    #[tokio::test]
    async fn test_reads_value_with_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, "905\n").unwrap();
        assert_eq!(DedupCursor::load(&path).await.last_id(), 905);
    }
}
