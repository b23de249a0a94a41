use anyhow::{Context, Result};
use chrono::{Offset, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Polling,
    Webhook,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Polling => write!(f, "polling"),
            DeliveryMode::Webhook => write!(f, "webhook"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SheetsBackendKind {
    #[default]
    Local,
    Google,
}

impl std::fmt::Display for SheetsBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetsBackendKind::Local => write!(f, "local"),
            SheetsBackendKind::Google => write!(f, "google"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default = "default_dedup_config")]
    pub dedup: DedupConfig,
    #[serde(default = "default_sheets_config")]
    pub sheets: SheetsConfig,
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
    #[serde(default)]
    pub health: Option<HealthConfig>,
    #[serde(default = "default_schedule_config")]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Only messages from this chat are forwarded.
    #[serde(default)]
    pub source_chat_id: i64,
    #[serde(default)]
    pub mode: DeliveryMode,
    /// Public URL Telegram posts updates to (webhook mode only)
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_listen")]
    pub webhook_listen: SocketAddr,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_cursor_path")]
    pub cursor_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SheetsConfig {
    #[serde(default)]
    pub backend: SheetsBackendKind,
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Folder new sheets are moved into
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Account that gets write access to every new sheet
    #[serde(default)]
    pub share_with: Option<String>,
    /// Offset applied to message timestamps before deriving the date key
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_local_config")]
    pub local: LocalSheetsConfig,
    #[serde(default)]
    pub google: GoogleSheetsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalSheetsConfig {
    #[serde(default = "default_workbook_path")]
    pub workbook_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GoogleSheetsConfig {
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default = "default_sheets_api_url")]
    pub sheets_api_url: String,
    #[serde(default = "default_drive_api_url")]
    pub drive_api_url: String,
}

impl Default for GoogleSheetsConfig {
    fn default() -> Self {
        Self {
            credentials_path: None,
            sheets_api_url: default_sheets_api_url(),
            drive_api_url: default_drive_api_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_url")]
    pub base_url: String,
    /// Let the server cut inputs longer than the model accepts
    #[serde(default = "default_true")]
    pub truncate: bool,
    /// Drop messages labelled `Other` instead of writing them
    #[serde(default = "default_true")]
    pub drop_other: bool,
    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_health_listen")]
    pub listen: SocketAddr,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_heartbeat_cron")]
    pub heartbeat_cron: String,
    /// Pre-creates the day's sheet; empty disables the job
    #[serde(default = "default_warmup_cron")]
    pub sheet_warmup_cron: String,
}

fn default_true() -> bool {
    true
}

fn default_webhook_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8443))
}

fn default_cursor_path() -> PathBuf {
    PathBuf::from("last_message_id.json")
}

fn default_name_prefix() -> String {
    "messages_".to_string()
}

fn default_workbook_path() -> PathBuf {
    PathBuf::from("messages.xlsx")
}

fn default_sheets_api_url() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}

fn default_drive_api_url() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_classifier_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_classifier_timeout() -> u64 {
    30
}

fn default_health_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_heartbeat_cron() -> String {
    "0 0 * * * *".to_string()
}

fn default_warmup_cron() -> String {
    "5 0 0 * * *".to_string()
}

fn default_dedup_config() -> DedupConfig {
    DedupConfig {
        cursor_path: default_cursor_path(),
    }
}

fn default_local_config() -> LocalSheetsConfig {
    LocalSheetsConfig {
        workbook_path: default_workbook_path(),
    }
}

fn default_sheets_config() -> SheetsConfig {
    SheetsConfig {
        backend: SheetsBackendKind::default(),
        name_prefix: default_name_prefix(),
        folder_id: None,
        share_with: None,
        utc_offset_minutes: 0,
        local: default_local_config(),
        google: GoogleSheetsConfig::default(),
    }
}

fn default_schedule_config() -> ScheduleConfig {
    ScheduleConfig {
        heartbeat_cron: default_heartbeat_cron(),
        sheet_warmup_cron: default_warmup_cron(),
    }
}

impl Config {
    /// Load from `path`, falling back to environment-only configuration when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let content = if path.exists() {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?
        } else {
            tracing::warn!(
                "Config file {} not found, using environment only",
                path.display()
            );
            "[telegram]\n".to_string()
        };

        let mut config = Self::parse(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Environment values win over the file so secrets can stay out of it.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(chat_id) = lookup("SOURCE_CHAT_ID") {
            self.telegram.source_chat_id = chat_id
                .trim()
                .parse()
                .with_context(|| format!("SOURCE_CHAT_ID is not a chat id: {}", chat_id))?;
        }
        if let Some(folder) = lookup("SHEETS_FOLDER_ID") {
            self.sheets.folder_id = Some(folder);
        }
        if let Some(path) = lookup("GOOGLE_CREDENTIALS_PATH") {
            self.sheets.google.credentials_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("telegram.bot_token is missing (or set TELEGRAM_BOT_TOKEN)");
        }
        if self.telegram.source_chat_id == 0 {
            anyhow::bail!("telegram.source_chat_id is missing (or set SOURCE_CHAT_ID)");
        }
        if self.telegram.mode == DeliveryMode::Webhook && self.telegram.webhook_url.is_none() {
            anyhow::bail!("telegram.webhook_url is required in webhook mode");
        }
        if self.sheets.backend == SheetsBackendKind::Google
            && self.sheets.google.credentials_path.is_none()
        {
            anyhow::bail!(
                "sheets.google.credentials_path is required for the google backend \
                 (or set GOOGLE_CREDENTIALS_PATH)"
            );
        }
        if !(-14 * 60..=14 * 60).contains(&self.sheets.utc_offset_minutes) {
            anyhow::bail!(
                "sheets.utc_offset_minutes out of range: {}",
                self.sheets.utc_offset_minutes
            );
        }
        Ok(())
    }

    /// Offset used to turn message timestamps into local times and date keys.
    pub fn utc_offset(&self) -> chrono::FixedOffset {
        chrono::FixedOffset::east_opt(self.sheets.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
[telegram]
bot_token = "123:abc"
source_chat_id = -1002298203209
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.telegram.mode, DeliveryMode::Polling);
        assert_eq!(config.sheets.backend, SheetsBackendKind::Local);
        assert_eq!(config.sheets.name_prefix, "messages_");
        assert_eq!(
            config.sheets.local.workbook_path,
            PathBuf::from("messages.xlsx")
        );
        assert_eq!(
            config.dedup.cursor_path,
            PathBuf::from("last_message_id.json")
        );
        assert!(config.classifier.is_none());
        assert!(config.health.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = Config::parse(include_str!("../config.example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.schedule.sheet_warmup_cron, "5 0 0 * * *");
    }

    #[test]
    fn test_full_config_parses() {
        let config = Config::parse(
            r#"
[telegram]
bot_token = "t"
source_chat_id = -42
mode = "webhook"
webhook_url = "https://example.com/hook"
webhook_listen = "127.0.0.1:9000"

[sheets]
backend = "google"
name_prefix = "chat_"
folder_id = "folder-1"
share_with = "team@example.com"
utc_offset_minutes = 180

[sheets.google]
credentials_path = "creds.json"

[classifier]
base_url = "http://localhost:9999"
drop_other = false

[health]
listen = "127.0.0.1:8081"
"#,
        )
        .unwrap();
        assert_eq!(config.telegram.mode, DeliveryMode::Webhook);
        assert_eq!(config.sheets.backend, SheetsBackendKind::Google);
        assert_eq!(config.sheets.folder_id.as_deref(), Some("folder-1"));
        let classifier = config.classifier.as_ref().unwrap();
        assert!(!classifier.drop_other);
        assert!(classifier.truncate);
        assert_eq!(config.health.as_ref().unwrap().listen.port(), 8081);
        assert_eq!(config.utc_offset().local_minus_utc(), 180 * 60);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::parse(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            ("TELEGRAM_BOT_TOKEN", "999:env"),
            ("SOURCE_CHAT_ID", " -7 "),
            ("SHEETS_FOLDER_ID", "env-folder"),
            ("GOOGLE_CREDENTIALS_PATH", "/etc/creds.json"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.telegram.bot_token, "999:env");
        assert_eq!(config.telegram.source_chat_id, -7);
        assert_eq!(config.sheets.folder_id.as_deref(), Some("env-folder"));
        assert_eq!(
            config.sheets.google.credentials_path,
            Some(PathBuf::from("/etc/creds.json"))
        );
    }

    #[test]
    fn test_bad_chat_id_in_env_is_an_error() {
        let mut config = Config::parse(MINIMAL).unwrap();
        let result = config.apply_env_overrides(|k| {
            (k == "SOURCE_CHAT_ID").then(|| "not-a-number".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let config = Config::parse("[telegram]\nsource_chat_id = 5\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bot_token"));
    }

    #[test]
    fn test_missing_chat_id_is_fatal() {
        let config = Config::parse("[telegram]\nbot_token = \"t\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_webhook_requires_url() {
        let config = Config::parse(
            "[telegram]\nbot_token = \"t\"\nsource_chat_id = 1\nmode = \"webhook\"\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_google_backend_requires_credentials() {
        let config = Config::parse(&format!("{}\n[sheets]\nbackend = \"google\"\n", MINIMAL))
            .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("credentials_path"));
    }
}
