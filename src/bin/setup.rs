//! sheetbot setup wizard.
//!
//! Asks a few questions in the terminal and writes `config.toml` to the
//! project root (or `SHEETBOT_ROOT`). Secrets can be left blank and supplied
//! later through `TELEGRAM_BOT_TOKEN` / `GOOGLE_CREDENTIALS_PATH`.

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::PathBuf;

// ── Config formatting ──────────────────────────────────────────────────────────

struct ConfigParams<'a> {
    bot_token: &'a str,
    source_chat_id: &'a str,
    backend: &'a str,
    folder_id: &'a str,
    share_with: &'a str,
    credentials_path: &'a str,
    classifier_url: &'a str,
    health_port: &'a str,
}

/// TOML string literal for a user-entered value (quotes, backslashes escaped).
fn quoted(value: &str) -> String {
    toml::Value::String(value.to_owned()).to_string()
}

fn optional_line(key: &str, value: &str, example: &str) -> String {
    if value.is_empty() {
        format!("# {key} = \"{example}\"")
    } else {
        format!("{key} = {}", quoted(value))
    }
}

/// Produces a valid config.toml string. Extracted so it can be unit-tested.
fn format_config(p: &ConfigParams<'_>) -> String {
    let bot_token = quoted(p.bot_token);
    let source_chat_id = p.source_chat_id;
    let backend = if p.backend == "google" { "google" } else { "local" };
    let folder_line = optional_line("folder_id", p.folder_id, "drive-folder-id");
    let share_line = optional_line("share_with", p.share_with, "team@example.com");
    let creds_line = optional_line("credentials_path", p.credentials_path, "credentials.json");

    let classifier = if p.classifier_url.is_empty() {
        "# [classifier]\n# base_url = \"http://127.0.0.1:8000\"\n# drop_other = true".to_owned()
    } else {
        format!("[classifier]\nbase_url = {}\ndrop_other = true", quoted(p.classifier_url))
    };

    let health = if p.health_port.is_empty() {
        "# [health]\n# listen = \"0.0.0.0:8080\"".to_owned()
    } else {
        format!("[health]\nlisten = {}", quoted(&format!("0.0.0.0:{}", p.health_port)))
    };

    format!(
        r#"[telegram]
bot_token = {bot_token}
source_chat_id = {source_chat_id}
mode = "polling"

[dedup]
cursor_path = "last_message_id.json"

[sheets]
backend = "{backend}"
name_prefix = "messages_"
{folder_line}
{share_line}
utc_offset_minutes = 0

[sheets.local]
workbook_path = "messages.xlsx"

[sheets.google]
{creds_line}

{classifier}

{health}
"#
    )
}

// ── Entry point ────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let project_root =
        PathBuf::from(std::env::var("SHEETBOT_ROOT").unwrap_or_else(|_| ".".to_string()));

    println!("=== sheetbot setup ===\n");

    let read_line = |prompt: &str| -> Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut buf = String::new();
        io::stdin().read_line(&mut buf)?;
        Ok(buf.trim().to_owned())
    };

    let bot_token = read_line("Telegram bot token (blank to use TELEGRAM_BOT_TOKEN): ")?;
    let source_chat_id = loop {
        let value = read_line("Source chat id (e.g. -1001234567890): ")?;
        if value.parse::<i64>().is_ok() {
            break value;
        }
        println!("  not a chat id, try again");
    };
    let backend = read_line("Spreadsheet backend [local/google] (local): ")?;
    let (credentials_path, folder_id, share_with) = if backend == "google" {
        (
            read_line("Google credentials file (service account key or authorized_user JSON): ")?,
            read_line("Drive folder id (optional): ")?,
            read_line("Share new sheets with (optional email): ")?,
        )
    } else {
        (String::new(), String::new(), String::new())
    };
    let classifier_url = read_line("Classifier server URL (optional, e.g. http://127.0.0.1:8000): ")?;
    let health_port = read_line("Health check port (optional): ")?;

    let config = format_config(&ConfigParams {
        bot_token: &bot_token,
        source_chat_id: &source_chat_id,
        backend: &backend,
        folder_id: &folder_id,
        share_with: &share_with,
        credentials_path: &credentials_path,
        classifier_url: &classifier_url,
        health_port: &health_port,
    });

    let config_path = project_root.join("config.toml");
    std::fs::write(&config_path, &config)
        .with_context(|| format!("Could not write {}", config_path.display()))?;

    println!("\n✓  config.toml saved to {}", config_path.display());
    println!("   Run the bot with:  cargo run --bin sheetbot");
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
