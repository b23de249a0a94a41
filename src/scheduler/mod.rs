pub mod tasks;

use anyhow::{Context, Result};
use std::future::Future;
use std::pin::Pin;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Cron jobs that run alongside the listener
pub struct Scheduler {
    inner: JobScheduler,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self { inner })
    }

    /// Register `task` under `cron_expr` (six fields, seconds first, UTC).
    /// An empty expression leaves the job disabled.
    pub async fn add_cron_job<F>(&self, cron_expr: &str, name: &str, task: F) -> Result<bool>
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        if cron_expr.trim().is_empty() {
            warn!("Scheduled task '{}' disabled (no cron expression)", name);
            return Ok(false);
        }

        let job_name = name.to_string();
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let name = job_name.clone();
            let fut = task();
            Box::pin(async move {
                info!("Running scheduled task: {}", name);
                fut.await;
            })
        })
        .with_context(|| format!("Invalid cron expression for {}: {}", name, cron_expr))?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        info!("Scheduled task '{}' with cron: {}", name, cron_expr);
        Ok(true)
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started");
        Ok(())
    }
}
