use std::sync::Arc;

use tracing::{error, info};

use crate::config::ScheduleConfig;
use crate::pipeline::Pipeline;
use crate::scheduler::Scheduler;

/// Register built-in background tasks
pub async fn register_builtin_tasks(
    scheduler: &Scheduler,
    pipeline: Arc<Pipeline>,
    config: &ScheduleConfig,
) -> anyhow::Result<()> {
    let heartbeat_pipeline = pipeline.clone();
    scheduler
        .add_cron_job(&config.heartbeat_cron, "heartbeat", move || {
            let pipeline = heartbeat_pipeline.clone();
            Box::pin(async move {
                info!(
                    "Heartbeat: listener alive, last processed message {}",
                    pipeline.last_processed_id().await
                );
            })
        })
        .await?;

    // Create the day's sheet before its first message arrives
    scheduler
        .add_cron_job(&config.sheet_warmup_cron, "sheet-warmup", move || {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                match pipeline.warm_up(chrono::Utc::now()).await {
                    Ok(title) => info!("Sheet '{}' ready for today", title),
                    Err(e) => error!("Sheet warm-up failed: {:#}", e),
                }
            })
        })
        .await?;

    Ok(())
}
