//! The restore orchestrator.
//!
//! Mirrors the backup sequence in reverse. Extraction failures abort the
//! run; per-component and per-database failures degrade to `false` flags or
//! warning events. A successful restore consumes its source archive.

use crate::error::ServiceError;
use crate::services::{archive, BackupService, ComponentSet, StagingDir};
use crate::services::{EXTRACT_TIMEOUT, VOLUME_ARCHIVE_TIMEOUT};
use anyhow::Context;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub success: bool,
    pub message: String,
    pub restored: ComponentSet,
}

impl BackupService {
    pub async fn restore_backup(&self, archive_path: &Path) -> Result<RestoreResult, ServiceError> {
        let _guard = self
            .gate
            .try_lock()
            .map_err(|_| ServiceError::AlreadyRunning)?;

        match self.run_restore(archive_path).await {
            Ok(result) => Ok(result),
            Err(err) => {
                self.events.broadcast(json!({
                    "type": "restore",
                    "status": "error",
                    "error": format!("{err:#}"),
                }));
                Err(ServiceError::Restore(err))
            }
        }
    }

    async fn run_restore(&self, archive_path: &Path) -> anyhow::Result<RestoreResult> {
        let staging = StagingDir::create("restore").context("creating staging directory")?;

        self.events
            .broadcast(json!({ "type": "restore", "status": "started" }));

        self.events
            .broadcast(json!({ "type": "restore", "step": "Extracting backup..." }));
        let extracted = {
            let src = archive_path.to_path_buf();
            let dest = staging.path().to_path_buf();
            tokio::time::timeout(
                EXTRACT_TIMEOUT,
                tokio::task::spawn_blocking(move || archive::extract_tar_gz(&src, &dest)),
            )
            .await
        };
        match extracted {
            Ok(joined) => joined
                .context("extraction task panicked")?
                .context("extracting backup archive")?,
            Err(_) => anyhow::bail!(
                "extraction timed out after {}s",
                EXTRACT_TIMEOUT.as_secs()
            ),
        }

        self.events
            .broadcast(json!({ "type": "restore", "step": "Restoring databases..." }));
        let postgres = self.restore_postgres(staging.path()).await;

        self.events
            .broadcast(json!({ "type": "restore", "step": "Restoring Evolution instances..." }));
        let evolution = self.restore_evolution(staging.path()).await;

        self.events
            .broadcast(json!({ "type": "restore", "step": "Restoring configuration..." }));
        self.restore_configs(staging.path()).await;

        drop(staging);

        // Restores are one-shot: the archive is consumed on success.
        if let Err(err) = tokio::fs::remove_file(archive_path).await {
            tracing::warn!(path = %archive_path.display(), error = %err, "Failed to remove restored archive");
        }

        let result = RestoreResult {
            success: true,
            message: "Backup restored successfully".into(),
            restored: ComponentSet {
                postgres,
                evolution,
                configs: true,
            },
        };

        let mut event = serde_json::to_value(&result).context("serializing restore result")?;
        if let Some(map) = event.as_object_mut() {
            map.insert("type".into(), Value::String("restore".into()));
            map.insert("status".into(), Value::String("completed".into()));
        }
        self.events.broadcast(event);
        tracing::info!(archive = %archive_path.display(), "Restore completed");

        Ok(result)
    }

    /// Restore every dump found under `postgres/` into the running
    /// container, one database at a time.
    async fn restore_postgres(&self, staging: &Path) -> bool {
        let dump_dir = staging.join("postgres");
        let mut entries = match tokio::fs::read_dir(&dump_dir).await {
            Ok(entries) => entries,
            Err(_) => return false,
        };

        let Some((container, password)) = self.postgres_target().await else {
            return false;
        };

        let mut dumps = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".sql") {
                dumps.push(name);
            }
        }
        dumps.sort();

        for dump in dumps {
            let db = dump.trim_end_matches(".sql").to_string();
            match self
                .restore_database(&container.id, &password, &db, &dump, &dump_dir)
                .await
            {
                Ok(()) => self.events.broadcast(json!({
                    "type": "restore",
                    "step": format!("Database {db} restored."),
                })),
                Err(err) => self.events.broadcast(json!({
                    "type": "restore",
                    "step": format!("Warning: {db} - {err:#}"),
                })),
            }
        }
        true
    }

    /// Drop-and-recreate restore of a single database. Other sessions are
    /// terminated first so the drop cannot hang on open connections.
    async fn restore_database(
        &self,
        container: &str,
        password: &str,
        db: &str,
        dump: &str,
        dump_dir: &Path,
    ) -> anyhow::Result<()> {
        let remote = format!("/tmp/restore_{dump}");
        self.runtime
            .copy_to_container(container, &dump_dir.join(dump), &remote)
            .await?;

        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = '{db}' AND pid <> pg_backend_pid()"
        );
        let env = [("PGPASSWORD", password)];
        self.runtime
            .exec(container, &env, &["psql", "-U", "postgres", "-c", &terminate])
            .await?;
        self.runtime
            .exec(container, &env, &["dropdb", "-U", "postgres", "--if-exists", db])
            .await?;
        self.runtime
            .exec(container, &env, &["createdb", "-U", "postgres", db])
            .await?;
        self.runtime
            .exec(
                container,
                &env,
                &["pg_restore", "-U", "postgres", "-d", db, &remote],
            )
            .await?;
        self.runtime
            .exec(container, &[], &["rm", "-f", &remote])
            .await?;
        Ok(())
    }

    /// Unpack `evolution/instances.tar.gz` back into the named volume,
    /// overwriting whatever is there.
    async fn restore_evolution(&self, staging: &Path) -> bool {
        let evolution_dir = staging.join("evolution");
        if !evolution_dir.join("instances.tar.gz").is_file() {
            return false;
        }

        let data_mount = format!("{}:/data", self.config.evolution_volume);
        let backup_mount = format!("{}:/backup", evolution_dir.display());

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
                    "cd /data && tar -xzf /backup/instances.tar.gz",
                ],
                VOLUME_ARCHIVE_TIMEOUT,
            )
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "Volume restore failed");
                false
            }
        }
    }

    /// Put config and credential files back at their fixed locations.
    async fn restore_configs(&self, staging: &Path) {
        let src_dir = staging.join("configs");
        for (name, dest) in [
            ("config.json", &self.config.config_path),
            ("credentials.json", &self.config.credentials_path),
        ] {
            let src = src_dir.join(name);
            if let Err(err) = tokio::fs::copy(&src, dest).await {
                tracing::debug!(path = %src.display(), error = %err, "Skipping config file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{build_service, drain_events, pg_container, MockRuntime};
    use tempfile::TempDir;

    /// Build a loose archive with the given component layout and return its
    /// path inside `root`.
    fn make_archive(root: &Path, with_dbs: &[&str], with_volume: bool) -> std::path::PathBuf {
        let staging = TempDir::new().unwrap();
        if !with_dbs.is_empty() {
            std::fs::create_dir_all(staging.path().join("postgres")).unwrap();
            for db in with_dbs {
                std::fs::write(
                    staging.path().join(format!("postgres/{db}.sql")),
                    b"pg dump",
                )
                .unwrap();
            }
        }
        if with_volume {
            std::fs::create_dir_all(staging.path().join("evolution")).unwrap();
            std::fs::write(staging.path().join("evolution/instances.tar.gz"), b"vol").unwrap();
        }
        std::fs::create_dir_all(staging.path().join("configs")).unwrap();
        std::fs::write(staging.path().join("configs/config.json"), b"{\"a\":1}").unwrap();

        let archive_path = root.join("upload.tar.gz");
        archive::create_tar_gz(staging.path(), &archive_path).unwrap();
        archive_path
    }

    #[tokio::test]
    async fn test_backup_restore_round_trip_matches_includes() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("config.json"), br#"{"domain":"one"}"#).unwrap();
        std::fs::write(
            root.path().join("credentials.json"),
            br#"{"postgres":{"password":"hunter2"}}"#,
        )
        .unwrap();

        let runtime = MockRuntime {
            containers: vec![pg_container()],
            databases: vec!["n8n".into()],
            volume_listing: "instance-a".into(),
            volume_payload: Some(b"volume bytes".to_vec()),
            ..MockRuntime::default()
        };
        let (service, _events) = build_service(root.path(), runtime);

        let backup = service.create_backup().await.unwrap();
        let archive_path = root.path().join("backups").join(&backup.filename);

        // Drift the live config so the restore has something to undo.
        std::fs::write(root.path().join("config.json"), br#"{"domain":"two"}"#).unwrap();

        let restore = service.restore_backup(&archive_path).await.unwrap();
        assert!(restore.success);
        assert_eq!(restore.restored, backup.includes);

        // Consumed on success, and the live config is back.
        assert!(!archive_path.exists());
        assert_eq!(
            std::fs::read(root.path().join("config.json")).unwrap(),
            br#"{"domain":"one"}"#
        );
    }

    #[tokio::test]
    async fn test_one_failing_database_does_not_abort_restore() {
        let root = TempDir::new().unwrap();
        std::fs::write(
            root.path().join("credentials.json"),
            br#"{"postgres":{"password":"hunter2"}}"#,
        )
        .unwrap();
        let archive_path = make_archive(root.path(), &["n8n", "ghost"], false);

        let runtime = MockRuntime {
            containers: vec![pg_container()],
            fail_restore_of: Some("ghost".into()),
            ..MockRuntime::default()
        };
        let (service, events) = build_service(root.path(), runtime);
        let mut rx = events.subscribe();

        let result = service.restore_backup(&archive_path).await.unwrap();
        assert!(result.success);
        assert!(result.restored.postgres);
        assert!(!result.restored.evolution);

        let seen = drain_events(&mut rx);
        assert!(seen.iter().any(|e| e["step"]
            .as_str()
            .is_some_and(|s| s.starts_with("Warning: ghost"))));
        assert!(seen.iter().any(|e| e["step"] == "Database n8n restored."));
    }

    #[tokio::test]
    async fn test_restore_without_database_container_marks_component_false() {
        let root = TempDir::new().unwrap();
        let archive_path = make_archive(root.path(), &["n8n"], true);

        // No containers at all; volume restore still possible.
        let (service, _events) = build_service(root.path(), MockRuntime::default());

        let result = service.restore_backup(&archive_path).await.unwrap();
        assert!(result.success);
        assert!(!result.restored.postgres);
        assert!(result.restored.evolution);
        assert!(result.restored.configs);
    }

    #[tokio::test]
    async fn test_unreadable_archive_is_fatal() {
        let root = TempDir::new().unwrap();
        let bogus = root.path().join("bogus.tar.gz");
        std::fs::write(&bogus, b"not an archive").unwrap();

        let (service, events) = build_service(root.path(), MockRuntime::default());
        let mut rx = events.subscribe();

        let err = service.restore_backup(&bogus).await.unwrap_err();
        assert!(matches!(err, ServiceError::Restore(_)));
        // Fatal restores do not consume the upload.
        assert!(bogus.exists());

        let seen = drain_events(&mut rx);
        assert!(seen
            .iter()
            .any(|e| e["type"] == "restore" && e["status"] == "error"));
    }
}
