mod classifier;
mod config;
mod dedup;
mod health;
mod pipeline;
mod platform;
mod scheduler;
mod sheets;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::classifier::{Classifier, HttpClassifier};
use crate::config::{Config, SheetsBackendKind};
use crate::dedup::DedupCursor;
use crate::pipeline::Pipeline;
use crate::scheduler::Scheduler;
use crate::sheets::google::GoogleSheets;
use crate::sheets::local::LocalWorkbook;
use crate::sheets::{SheetBackend, SheetResolver};

#[tokio::main]
async fn main() -> Result<()> {
    // Before logging so RUST_LOG can come from .env
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sheetbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Source chat: {}", config.telegram.source_chat_id);
    info!("  Delivery: {}", config.telegram.mode);
    info!("  Sheets backend: {}", config.sheets.backend);
    info!("  Classifier: {}", config.classifier.is_some());

    let backend: Box<dyn SheetBackend> = match config.sheets.backend {
        SheetsBackendKind::Local => Box::new(LocalWorkbook::open(&config.sheets.local.workbook_path)?),
        SheetsBackendKind::Google => Box::new(GoogleSheets::new(&config.sheets.google).await?),
    };
    let resolver = SheetResolver::new(backend, &config.sheets);

    let (classifier, drop_other) = match &config.classifier {
        Some(cfg) => (
            Some(Box::new(HttpClassifier::new(cfg.clone())?) as Box<dyn Classifier>),
            cfg.drop_other,
        ),
        None => (None, false),
    };

    let cursor = DedupCursor::load(&config.dedup.cursor_path).await;
    info!("Resuming after message {}", cursor.last_id());

    let pipeline = Arc::new(Pipeline::new(
        config.telegram.source_chat_id,
        config.utc_offset(),
        classifier,
        drop_other,
        resolver,
        cursor,
    ));

    if let Some(health) = &config.health {
        let listen = health.listen;
        tokio::spawn(async move {
            if let Err(e) = health::serve(listen).await {
                error!("Health endpoint stopped: {:#}", e);
            }
        });
    }

    let scheduler = Scheduler::new().await?;
    scheduler::tasks::register_builtin_tasks(&scheduler, pipeline.clone(), &config.schedule)
        .await?;
    scheduler.start().await?;

    let bot = teloxide::Bot::new(&config.telegram.bot_token);
    info!("Bot is starting...");
    platform::telegram::run(bot, pipeline, &config.telegram).await?;

    Ok(())
}
