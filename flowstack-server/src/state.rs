use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::runtime::{ContainerRuntime, DockerCli};
use crate::services::BackupService;
use crate::ws::events::EventBroadcaster;
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    pub events: EventBroadcaster,
    pub backups: Arc<BackupService>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let events = EventBroadcaster::new();
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new());
        let credentials = CredentialStore::new(config.credentials_path.clone());
        let backups = Arc::new(BackupService::new(
            config.clone(),
            runtime,
            credentials,
            events.clone(),
        ));
        Self {
            config,
            events,
            backups,
        }
    }
}
