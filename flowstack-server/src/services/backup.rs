//! The backup orchestrator.
//!
//! Components are captured sequentially into a staging directory, compressed
//! into a single archive, and rotated. Component failures degrade to a
//! `false` flag in the result; only compression and filesystem errors abort
//! the run.

use crate::error::ServiceError;
use crate::services::{archive, catalog, ComponentSet, StagingDir};
use crate::services::{BackupService, COMPRESS_TIMEOUT, VOLUME_ARCHIVE_TIMEOUT, VOLUME_PROBE_TIMEOUT};
use crate::utils::format_bytes;
use anyhow::Context;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

const DATABASE_LIST_SQL: &str =
    "SELECT datname FROM pg_database WHERE datistemplate = false AND datname != 'postgres'";

/// Compression output is staged under a fixed hidden name and renamed into
/// place, so a half-written archive never carries the `.tar.gz` suffix the
/// catalog looks for. The single-operation gate makes the fixed name safe.
const INCOMING_NAME: &str = ".backup.incoming";

#[derive(Debug, Clone, Serialize)]
pub struct BackupResult {
    pub success: bool,
    pub filename: String,
    pub size: u64,
    #[serde(rename = "sizeFormatted")]
    pub size_formatted: String,
    pub date: String,
    pub includes: ComponentSet,
}

impl BackupService {
    pub async fn create_backup(&self) -> Result<BackupResult, ServiceError> {
        let _guard = self
            .gate
            .try_lock()
            .map_err(|_| ServiceError::AlreadyRunning)?;

        match self.run_backup().await {
            Ok(result) => Ok(result),
            Err(err) => {
                self.events.broadcast(json!({
                    "type": "backup",
                    "status": "error",
                    "error": format!("{err:#}"),
                }));
                Err(ServiceError::Backup(err))
            }
        }
    }

    async fn run_backup(&self) -> anyhow::Result<BackupResult> {
        let backups_dir = self.config.backups_dir.clone();
        tokio::fs::create_dir_all(&backups_dir)
            .await
            .context("creating backups directory")?;

        let started_at = chrono::Utc::now();
        let filename = format!("backup-{}.tar.gz", started_at.format("%Y-%m-%dT%H-%M-%S"));
        let staging = StagingDir::create("backup").context("creating staging directory")?;

        self.events.broadcast(json!({
            "type": "backup",
            "status": "started",
            "filename": filename,
        }));

        self.events
            .broadcast(json!({ "type": "backup", "step": "PostgreSQL dump..." }));
        let postgres = self.dump_postgres(staging.path()).await;

        self.events
            .broadcast(json!({ "type": "backup", "step": "Evolution instances..." }));
        let evolution = self.dump_evolution(staging.path()).await;

        self.events
            .broadcast(json!({ "type": "backup", "step": "Config files..." }));
        self.copy_configs(staging.path()).await;

        self.events
            .broadcast(json!({ "type": "backup", "step": "Compressing..." }));
        let archive_path = backups_dir.join(&filename);
        let incoming = backups_dir.join(INCOMING_NAME);
        let compressed = {
            let src = staging.path().to_path_buf();
            let dest = incoming.clone();
            tokio::time::timeout(
                COMPRESS_TIMEOUT,
                tokio::task::spawn_blocking(move || archive::create_tar_gz(&src, &dest)),
            )
            .await
        };
        let compressed = match compressed {
            Ok(joined) => joined.context("compression task panicked")?,
            Err(_) => Err(anyhow::anyhow!(
                "compression timed out after {}s",
                COMPRESS_TIMEOUT.as_secs()
            )),
        };
        if let Err(err) = compressed {
            let _ = tokio::fs::remove_file(&incoming).await;
            return Err(err.context("compressing backup archive"));
        }
        tokio::fs::rename(&incoming, &archive_path)
            .await
            .context("publishing backup archive")?;

        {
            let dir = backups_dir.clone();
            let _ = tokio::task::spawn_blocking(move || catalog::rotate(&dir, catalog::MAX_BACKUPS))
                .await;
        }

        drop(staging);

        let size = tokio::fs::metadata(&archive_path)
            .await
            .context("reading archive size")?
            .len();

        let result = BackupResult {
            success: true,
            filename,
            size,
            size_formatted: format_bytes(size),
            date: started_at.to_rfc3339(),
            includes: ComponentSet {
                postgres,
                evolution,
                configs: true,
            },
        };

        let mut event = serde_json::to_value(&result).context("serializing backup result")?;
        if let Some(map) = event.as_object_mut() {
            map.insert("type".into(), Value::String("backup".into()));
            map.insert("status".into(), Value::String("completed".into()));
        }
        self.events.broadcast(event);
        tracing::info!(filename = %result.filename, size, "Backup completed");

        Ok(result)
    }

    /// Dump every non-template database from the running PostgreSQL
    /// container. A single database failing is a warning; failing to list
    /// databases at all marks the whole component absent.
    async fn dump_postgres(&self, staging: &Path) -> bool {
        let Some((container, password)) = self.postgres_target().await else {
            return false;
        };

        let dump_dir = staging.join("postgres");
        if let Err(err) = tokio::fs::create_dir_all(&dump_dir).await {
            tracing::warn!(error = %err, "Failed to create postgres staging directory");
            return false;
        }

        let listing = match self
            .runtime
            .exec(
                &container.id,
                &[("PGPASSWORD", password.as_str())],
                &["psql", "-U", "postgres", "-t", "-A", "-c", DATABASE_LIST_SQL],
            )
            .await
        {
            Ok(out) => out,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "Failed to list databases");
                return false;
            }
        };

        let databases: Vec<&str> = listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if databases.is_empty() {
            return false;
        }

        for db in databases {
            match self
                .dump_database(&container.id, &password, db, &dump_dir)
                .await
            {
                Ok(()) => self.events.broadcast(json!({
                    "type": "backup",
                    "step": format!("Database {db} exported."),
                })),
                Err(err) => self.events.broadcast(json!({
                    "type": "backup",
                    "step": format!("Warning: {db} - {err:#}"),
                })),
            }
        }
        true
    }

    async fn dump_database(
        &self,
        container: &str,
        password: &str,
        db: &str,
        dump_dir: &Path,
    ) -> anyhow::Result<()> {
        let remote = format!("/tmp/dump_{db}.sql");
        self.runtime
            .exec(
                container,
                &[("PGPASSWORD", password)],
                &["pg_dump", "-U", "postgres", "-Fc", "-f", &remote, db],
            )
            .await?;
        self.runtime
            .copy_from_container(container, &remote, &dump_dir.join(format!("{db}.sql")))
            .await?;
        self.runtime
            .exec(container, &[], &["rm", "-f", &remote])
            .await?;
        Ok(())
    }

    /// Archive the Evolution volume through a throwaway container. Empty or
    /// inaccessible volumes mark the component absent; nothing here is fatal.
    async fn dump_evolution(&self, staging: &Path) -> bool {
        let data_mount = format!("{}:/data", self.config.evolution_volume);

        let probe = self
            .runtime
            .run(
                &[
                    "run",
                    "--rm",
                    "-v",
                    &data_mount,
                    &self.config.helper_image,
                    "sh",
                    "-c",
                    "ls /data 2>/dev/null | head -1",
                ],
                VOLUME_PROBE_TIMEOUT,
            )
            .await;
        match probe {
            Ok(out) if !out.trim().is_empty() => {}
            Ok(_) => {
                tracing::debug!(volume = %self.config.evolution_volume, "Volume is empty, skipping");
                return false;
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "Volume probe failed");
                return false;
            }
        }

        let dest = staging.join("evolution");
        if let Err(err) = tokio::fs::create_dir_all(&dest).await {
            tracing::warn!(error = %err, "Failed to create evolution staging directory");
            return false;
        }
        let backup_mount = format!("{}:/backup", dest.display());

        match self
            .runtime
            .run(
                &[
                    "run",
                    "--rm",
                    "-v",
                    &data_mount,
                    "-v",
                    &backup_mount,
                    &self.config.helper_image,
                    "sh",
                    "-c",
                    "cd /data && tar -czf /backup/instances.tar.gz .",
                ],
                VOLUME_ARCHIVE_TIMEOUT,
            )
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "Volume archive failed");
                false
            }
        }
    }

    /// Copy the platform config and credential files into staging. Missing
    /// files are skipped silently.
    async fn copy_configs(&self, staging: &Path) {
        let dest = staging.join("configs");
        if let Err(err) = tokio::fs::create_dir_all(&dest).await {
            tracing::warn!(error = %err, "Failed to create configs staging directory");
            return;
        }

        for (src, name) in [
            (&self.config.config_path, "config.json"),
            (&self.config.credentials_path, "credentials.json"),
        ] {
            if let Err(err) = tokio::fs::copy(src, dest.join(name)).await {
                tracing::debug!(path = %src.display(), error = %err, "Skipping config file");
            }
        }
    }
}
