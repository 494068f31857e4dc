//! Daily scheduled backups.

use crate::error::ServiceError;
use crate::state::AppState;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

impl BackupScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    pub async fn init_schedule(&self) -> anyhow::Result<()> {
        let schedule = self.state.config.backup_schedule.clone();
        let state = self.state.clone();

        let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                tracing::info!("Starting scheduled backup");
                match state.backups.create_backup().await {
                    Ok(result) => {
                        tracing::info!(filename = %result.filename, "Scheduled backup completed")
                    }
                    Err(ServiceError::AlreadyRunning) => {
                        tracing::warn!("Skipping scheduled backup: another operation is running")
                    }
                    Err(err) => tracing::error!(error = %err, "Scheduled backup failed"),
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(schedule = %schedule, "Daily backup scheduled");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
