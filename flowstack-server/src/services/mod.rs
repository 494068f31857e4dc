pub mod archive;
pub mod backup;
pub mod catalog;
pub mod restore;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::runtime::{ContainerInfo, ContainerRuntime};
use crate::ws::events::EventBroadcaster;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub(crate) const VOLUME_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const VOLUME_ARCHIVE_TIMEOUT: Duration = Duration::from_secs(120);
pub(crate) const COMPRESS_TIMEOUT: Duration = Duration::from_secs(300);
pub(crate) const EXTRACT_TIMEOUT: Duration = Duration::from_secs(300);

/// Which of the three backed-up components an archive actually covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComponentSet {
    pub postgres: bool,
    pub evolution: bool,
    pub configs: bool,
}

/// Drives backups and restores of the deployment's stateful components.
///
/// One instance lives in [`crate::state::AppState`]; the internal gate admits
/// a single backup *or* restore at a time, so the staging namespace and the
/// archive directory never see concurrent writers.
pub struct BackupService {
    config: AppConfig,
    runtime: Arc<dyn ContainerRuntime>,
    credentials: CredentialStore,
    events: EventBroadcaster,
    gate: Mutex<()>,
}

impl BackupService {
    pub fn new(
        config: AppConfig,
        runtime: Arc<dyn ContainerRuntime>,
        credentials: CredentialStore,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            config,
            runtime,
            credentials,
            events,
            gate: Mutex::new(()),
        }
    }

    /// Locate the running PostgreSQL container and its password. `None` means
    /// the database component is skipped, never that the operation failed.
    pub(crate) async fn postgres_target(&self) -> Option<(ContainerInfo, String)> {
        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "Failed to list containers");
                return None;
            }
        };

        let needle = self.config.postgres_container.to_lowercase();
        let container = containers
            .into_iter()
            .find(|c| c.name.to_lowercase().contains(&needle) && c.state == "running")?;

        let creds = match self.credentials.load() {
            Ok(creds) => creds,
            Err(err) => {
                tracing::debug!(error = %err, "Credentials unavailable, skipping database component");
                return None;
            }
        };
        let password = creds.postgres.and_then(|p| p.password)?;
        if password.is_empty() {
            return None;
        }

        Some((container, password))
    }
}

/// Per-run staging area under the system temp directory.
///
/// The uuid suffix keeps two runs started within the same second apart;
/// `Drop` removes the tree on success and failure paths alike.
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub fn create(op: &str) -> anyhow::Result<Self> {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S");
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let path = std::env::temp_dir().join(format!("flowstack-{op}-{ts}-{}", &nonce[..8]));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to remove staging directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_dir_removed_on_drop() {
        let staging = StagingDir::create("test").unwrap();
        let path = staging.path().to_path_buf();
        std::fs::write(path.join("marker"), b"x").unwrap();
        assert!(path.is_dir());

        drop(staging);
        assert!(!path.exists());
    }

    #[test]
    fn test_staging_dirs_never_collide() {
        let a = StagingDir::create("test").unwrap();
        let b = StagingDir::create("test").unwrap();
        assert_ne!(a.path(), b.path());
    }
}
