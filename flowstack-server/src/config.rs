use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub backups_dir: PathBuf,
    pub config_path: PathBuf,
    pub credentials_path: PathBuf,
    /// Substring matched (case-insensitively) against running container names
    /// to locate the PostgreSQL container.
    pub postgres_container: String,
    /// Named volume holding the Evolution instance data.
    pub evolution_volume: String,
    /// Image used for throwaway volume-inspection containers.
    pub helper_image: String,
    /// Six-field cron expression for the daily backup.
    pub backup_schedule: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let base_dir = PathBuf::from(
            std::env::var("FLOWSTACK_DIR").unwrap_or_else(|_| "/opt/flowstack".into()),
        );

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            backups_dir: std::env::var("BACKUPS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| base_dir.join("backups")),
            config_path: std::env::var("CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| base_dir.join("config.json")),
            credentials_path: std::env::var("CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| base_dir.join("credentials.json")),
            postgres_container: std::env::var("POSTGRES_CONTAINER")
                .unwrap_or_else(|_| "postgres_postgres".into()),
            evolution_volume: std::env::var("EVOLUTION_VOLUME")
                .unwrap_or_else(|_| "evolution_instances".into()),
            helper_image: std::env::var("HELPER_IMAGE").unwrap_or_else(|_| "alpine".into()),
            backup_schedule: std::env::var("BACKUP_SCHEDULE")
                .unwrap_or_else(|_| "0 0 3 * * *".into()),
        }
    }
}
