pub mod telegram;

use chrono::{DateTime, Utc};

/// A chat message as the pipeline sees it, independent of the bot framework
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    /// Group/channel title, or the user's name for private chats
    pub chat_title: String,
    pub message_id: i64,
    /// Display name of the author
    pub sender: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}
