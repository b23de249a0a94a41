use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use teloxide::types::Chat;
use teloxide::update_listeners::webhooks;
use tracing::{debug, info};

use crate::config::{DeliveryMode, TelegramConfig};
use crate::pipeline::Pipeline;
use crate::platform::IncomingMessage;

const START_REPLY: &str = "Hi! I read the messages of this group and record them in a \
                           spreadsheet, one sheet per day.";

fn chat_title(chat: &Chat) -> String {
    chat.title()
        .map(str::to_string)
        .or_else(|| chat.username().map(|u| format!("@{}", u)))
        .or_else(|| chat.first_name().map(str::to_string))
        .unwrap_or_else(|| chat.id.to_string())
}

fn sender_name(msg: &Message) -> String {
    if let Some(user) = msg.from.as_ref() {
        return user.full_name();
    }
    // Channel posts and anonymous admins speak as a chat
    if let Some(chat) = msg.sender_chat.as_ref() {
        return chat_title(chat);
    }
    msg.author_signature()
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Convert a Telegram message; `None` for updates carrying no text.
pub fn incoming_from(msg: &Message) -> Option<IncomingMessage> {
    let text = msg.text().or_else(|| msg.caption())?;
    Some(IncomingMessage {
        chat_id: msg.chat.id.0,
        chat_title: chat_title(&msg.chat),
        message_id: i64::from(msg.id.0),
        sender: sender_name(msg),
        text: text.to_string(),
        sent_at: msg.date,
    })
}

fn is_start_command(text: &str) -> bool {
    text.split_whitespace()
        .next()
        .and_then(|word| word.split('@').next())
        == Some("/start")
}

/// Run the Telegram listener until the process is stopped
pub async fn run(bot: Bot, pipeline: Arc<Pipeline>, config: &TelegramConfig) -> Result<()> {
    info!("Starting Telegram listener ({})...", config.mode);

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_channel_post().endpoint(handle_message));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![pipeline])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build();

    match config.mode {
        DeliveryMode::Polling => dispatcher.dispatch().await,
        DeliveryMode::Webhook => {
            let url: reqwest::Url = config
                .webhook_url
                .as_deref()
                .context("webhook_url is required in webhook mode")?
                .parse()
                .context("webhook_url is not a valid URL")?;

            let listener =
                webhooks::axum(bot, webhooks::Options::new(config.webhook_listen, url))
                    .await
                    .context("Failed to set up Telegram webhook")?;
            info!("Webhook listening on {}", config.webhook_listen);

            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("webhook listener"),
                )
                .await;
        }
    }

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, pipeline: Arc<Pipeline>) -> ResponseResult<()> {
    if msg.text().is_some_and(is_start_command) {
        bot.send_message(msg.chat.id, START_REPLY).await?;
        return Ok(());
    }

    if msg.chat.id.0 != pipeline.source_chat_id() {
        debug!("Ignoring message from chat {}", msg.chat.id);
        return Ok(());
    }

    let Some(incoming) = incoming_from(&msg) else {
        info!("Ignoring message {} without text", msg.id.0);
        return Ok(());
    };

    debug!(
        "Telegram message {} from {} in {}",
        incoming.message_id, incoming.sender, incoming.chat_title
    );

    // Failures are logged by the pipeline; the chat gets no notice
    let outcome = pipeline.process(&incoming).await;
    debug!("Message {} -> {:?}", incoming.message_id, outcome);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_group_message_conversion() {
        let msg = message(serde_json::json!({
            "message_id": 77,
            "date": 1740868200,
            "chat": { "id": -1002298203209i64, "type": "supergroup", "title": "Support" },
            "from": { "id": 42, "is_bot": false, "first_name": "Anna", "last_name": "Petrova" },
            "text": "Login is broken"
        }));

        let incoming = incoming_from(&msg).unwrap();
        assert_eq!(incoming.chat_id, -1002298203209);
        assert_eq!(incoming.chat_title, "Support");
        assert_eq!(incoming.message_id, 77);
        assert_eq!(incoming.sender, "Anna Petrova");
        assert_eq!(incoming.text, "Login is broken");
        assert_eq!(
            incoming.sent_at,
            Utc.with_ymd_and_hms(2025, 3, 1, 22, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_private_chat_title_falls_back_to_name() {
        let msg = message(serde_json::json!({
            "message_id": 1,
            "date": 1740868200,
            "chat": { "id": 42, "type": "private", "first_name": "Anna" },
            "from": { "id": 42, "is_bot": false, "first_name": "Anna" },
            "text": "hi"
        }));

        let incoming = incoming_from(&msg).unwrap();
        assert_eq!(incoming.chat_title, "Anna");
        assert_eq!(incoming.sender, "Anna");
    }

    #[test]
    fn test_caption_is_used_as_text() {
        let msg = message(serde_json::json!({
            "message_id": 78,
            "date": 1740868200,
            "chat": { "id": -1002298203209i64, "type": "supergroup", "title": "Support" },
            "from": { "id": 42, "is_bot": false, "first_name": "Anna" },
            "photo": [{
                "file_id": "AgAD", "file_unique_id": "AQAD",
                "width": 90, "height": 60, "file_size": 1200
            }],
            "caption": "Screenshot of the error"
        }));

        let incoming = incoming_from(&msg).unwrap();
        assert_eq!(incoming.text, "Screenshot of the error");
    }

    #[test]
    fn test_message_without_text_or_caption_is_ignored() {
        let msg = message(serde_json::json!({
            "message_id": 79,
            "date": 1740868200,
            "chat": { "id": -1002298203209i64, "type": "supergroup", "title": "Support" },
            "from": { "id": 42, "is_bot": false, "first_name": "Anna" },
            "location": { "latitude": 55.75, "longitude": 37.61 }
        }));

        assert!(incoming_from(&msg).is_none());
    }

    #[test]
    fn test_channel_post_sender_is_the_channel() {
        let msg = message(serde_json::json!({
            "message_id": 80,
            "date": 1740868200,
            "chat": { "id": -1001111, "type": "channel", "title": "Release notes" },
            "sender_chat": { "id": -1001111, "type": "channel", "title": "Release notes" },
            "text": "Version 2 is out"
        }));

        let incoming = incoming_from(&msg).unwrap();
        assert_eq!(incoming.sender, "Release notes");
        assert_eq!(incoming.chat_title, "Release notes");
    }

    #[test]
    fn test_sender_falls_back_to_author_signature() {
        let msg = message(serde_json::json!({
            "message_id": 81,
            "date": 1740868200,
            "chat": { "id": -1001111, "type": "channel", "title": "Release notes" },
            "author_signature": "Ivan",
            "text": "Signed post"
        }));

        assert_eq!(incoming_from(&msg).unwrap().sender, "Ivan");
    }

    #[test]
    fn test_start_command_detection() {
        assert!(is_start_command("/start"));
        assert!(is_start_command("/start@sheet_bot"));
        assert!(is_start_command("/start payload"));
        assert!(!is_start_command("start"));
        assert!(!is_start_command("/stats"));
        assert!(!is_start_command(""));
    }
}
