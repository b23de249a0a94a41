use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::classifier::{Category, Classifier};
use crate::dedup::DedupCursor;
use crate::platform::IncomingMessage;
use crate::sheets::SheetResolver;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Appended {
        sheet: String,
        category: Option<Category>,
    },
    /// Message id at or below the dedup cursor
    Duplicate,
    /// Message from a chat other than the source chat
    OutOfScope,
    /// Classified into a label that is not recorded
    Filtered(Category),
    /// An external call failed; the message is lost
    Dropped,
}

/// One spreadsheet row, in header order.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub chat_title: String,
    pub sender: String,
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    pub category: Option<Category>,
}

impl MessageRecord {
    pub fn date_key(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            self.chat_title.clone(),
            self.sender.clone(),
            self.chat_id.to_string(),
            self.message_id.to_string(),
            self.text.clone(),
            self.category
                .map(|c| c.as_str().to_string())
                .unwrap_or_default(),
        ]
    }
}

/// Filter, classify, resolve and append. Built once at startup and shared by
/// the message handlers and scheduled jobs.
pub struct Pipeline {
    source_chat_id: i64,
    utc_offset: FixedOffset,
    drop_other: bool,
    classifier: Option<Box<dyn Classifier>>,
    resolver: SheetResolver,
    /// Held for the whole of `process`, so messages are handled one at a time
    cursor: Mutex<DedupCursor>,
}

impl Pipeline {
    pub fn new(
        source_chat_id: i64,
        utc_offset: FixedOffset,
        classifier: Option<Box<dyn Classifier>>,
        drop_other: bool,
        resolver: SheetResolver,
        cursor: DedupCursor,
    ) -> Self {
        Self {
            source_chat_id,
            utc_offset,
            drop_other,
            classifier,
            resolver,
            cursor: Mutex::new(cursor),
        }
    }

    pub fn source_chat_id(&self) -> i64 {
        self.source_chat_id
    }

    pub async fn last_processed_id(&self) -> i64 {
        self.cursor.lock().await.last_id()
    }

    pub async fn process(&self, msg: &IncomingMessage) -> Outcome {
        if msg.chat_id != self.source_chat_id {
            debug!("Ignoring message from chat {}", msg.chat_id);
            return Outcome::OutOfScope;
        }

        let mut cursor = self.cursor.lock().await;
        if !cursor.is_new(msg.message_id) {
            debug!(
                "Skipping message {} (cursor at {})",
                msg.message_id,
                cursor.last_id()
            );
            return Outcome::Duplicate;
        }

        let category = match &self.classifier {
            Some(classifier) => match classifier.classify(&msg.text).await {
                Ok(category) => Some(category),
                Err(e) => {
                    warn!("Classifier failed for message {}: {:#}", msg.message_id, e);
                    None
                }
            },
            None => None,
        };

        if self.drop_other && category == Some(Category::Other) {
            debug!("Message {} classified as Other, not recorded", msg.message_id);
            if let Err(e) = cursor.advance(msg.message_id).await {
                warn!("Failed to persist cursor: {:#}", e);
            }
            return Outcome::Filtered(Category::Other);
        }

        let record = MessageRecord {
            timestamp: msg.sent_at.with_timezone(&self.utc_offset),
            chat_title: msg.chat_title.clone(),
            sender: msg.sender.clone(),
            chat_id: msg.chat_id,
            message_id: msg.message_id,
            text: msg.text.clone(),
            category,
        };

        let sheet = match self.resolver.resolve(&record.date_key()).await {
            Ok(sheet) => sheet,
            Err(e) => {
                error!(
                    "No sheet available for {}, dropping message {}: {:#}",
                    record.date_key(),
                    msg.message_id,
                    e
                );
                return Outcome::Dropped;
            }
        };

        if let Err(e) = self.resolver.append(&sheet, &record.to_row()).await {
            error!(
                "Failed to append message {} to '{}': {:#}",
                msg.message_id, sheet.title, e
            );
            return Outcome::Dropped;
        }

        if let Err(e) = cursor.advance(msg.message_id).await {
            warn!("Row written but cursor not persisted: {:#}", e);
        }

        info!(
            "Recorded message {} from {} in '{}'",
            msg.message_id, msg.sender, sheet.title
        );
        Outcome::Appended {
            sheet: sheet.title,
            category,
        }
    }

    /// Resolve the sheet for the current date ahead of the first message.
    pub async fn warm_up(&self, now: DateTime<Utc>) -> anyhow::Result<String> {
        let date_key = now
            .with_timezone(&self.utc_offset)
            .format("%Y-%m-%d")
            .to_string();
        let sheet = self.resolver.resolve(&date_key).await?;
        Ok(sheet.title)
    }
}
