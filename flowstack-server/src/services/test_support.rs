//! Shared fixtures for orchestrator tests: a scripted container runtime and
//! a service wired to a temp directory.

use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::runtime::{ContainerInfo, ContainerRuntime};
use crate::services::BackupService;
use crate::ws::events::EventBroadcaster;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub(crate) struct MockRuntime {
    pub containers: Vec<ContainerInfo>,
    pub databases: Vec<String>,
    /// Database whose `pg_dump` fails.
    pub fail_dump_of: Option<String>,
    /// Database whose `pg_restore` fails.
    pub fail_restore_of: Option<String>,
    /// Stdout of the volume content probe; empty means "volume empty".
    pub volume_listing: String,
    /// When set, the volume-archive step writes these bytes as
    /// `instances.tar.gz` into the mounted staging directory.
    pub volume_payload: Option<Vec<u8>>,
    /// Artificial latency for `list_containers`, to hold the operation gate
    /// open in concurrency tests.
    pub list_delay: Option<Duration>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self {
            containers: Vec::new(),
            databases: Vec::new(),
            fail_dump_of: None,
            fail_restore_of: None,
            volume_listing: String::new(),
            volume_payload: None,
            list_delay: None,
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.containers.clone())
    }

    async fn exec(&self, _container: &str, _env: &[(&str, &str)], cmd: &[&str]) -> Result<String> {
        match cmd.first().copied() {
            // Database listing uses tuples-only output (-t); the restore
            // path's pg_terminate_backend call does not.
            Some("psql") if cmd.contains(&"-t") => Ok(self.databases.join("\n")),
            Some("psql") | Some("dropdb") | Some("createdb") | Some("rm") => Ok(String::new()),
            Some("pg_dump") => {
                let db = cmd.last().copied().unwrap_or_default();
                if self.fail_dump_of.as_deref() == Some(db) {
                    anyhow::bail!("pg_dump: connection to server failed");
                }
                Ok(String::new())
            }
            Some("pg_restore") => {
                let db = cmd.get(4).copied().unwrap_or_default();
                if self.fail_restore_of.as_deref() == Some(db) {
                    anyhow::bail!("pg_restore: could not connect to database");
                }
                Ok(String::new())
            }
            other => anyhow::bail!("unexpected exec: {other:?}"),
        }
    }

    async fn run(&self, args: &[&str], _timeout: Duration) -> Result<String> {
        let joined = args.join(" ");
        if joined.contains("ls /data") {
            return Ok(self.volume_listing.clone());
        }
        if joined.contains("tar -czf") {
            if let Some(payload) = &self.volume_payload {
                let host_dir = args
                    .iter()
                    .find_map(|a| a.strip_suffix(":/backup"))
                    .context("missing staging mount")?;
                std::fs::write(Path::new(host_dir).join("instances.tar.gz"), payload)?;
            }
            return Ok(String::new());
        }
        if joined.contains("tar -xzf") {
            return Ok(String::new());
        }
        anyhow::bail!("unexpected run: {joined}")
    }

    async fn copy_from_container(&self, _container: &str, src: &str, dest: &Path) -> Result<()> {
        std::fs::write(dest, format!("dump of {src}"))?;
        Ok(())
    }

    async fn copy_to_container(&self, _container: &str, src: &Path, _dest: &str) -> Result<()> {
        anyhow::ensure!(src.is_file(), "missing dump file {}", src.display());
        Ok(())
    }
}

pub(crate) fn pg_container() -> ContainerInfo {
    ContainerInfo {
        id: "abc123".into(),
        name: "flowstack_postgres_postgres.1".into(),
        state: "running".into(),
    }
}

pub(crate) fn test_config(root: &Path) -> AppConfig {
    AppConfig {
        port: 0,
        backups_dir: root.join("backups"),
        config_path: root.join("config.json"),
        credentials_path: root.join("credentials.json"),
        postgres_container: "postgres_postgres".into(),
        evolution_volume: "evolution_instances".into(),
        helper_image: "alpine".into(),
        backup_schedule: "0 0 3 * * *".into(),
    }
}

pub(crate) fn build_service(root: &Path, runtime: MockRuntime) -> (BackupService, EventBroadcaster) {
    let config = test_config(root);
    let events = EventBroadcaster::new();
    let service = BackupService::new(
        config.clone(),
        Arc::new(runtime),
        CredentialStore::new(config.credentials_path.clone()),
        events.clone(),
    );
    (service, events)
}

/// Collect every event already sitting in the receiver.
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<String>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        if let Ok(value) = serde_json::from_str(&raw) {
            events.push(value);
        }
    }
    events
}
