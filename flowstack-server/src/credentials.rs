//! Read-only access to the deployment's stored credentials.
//!
//! Only the PostgreSQL password is consumed here; everything else in the
//! file belongs to other parts of the platform.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub postgres: Option<PostgresCredentials>,
}

#[derive(Debug, Deserialize)]
pub struct PostgresCredentials {
    pub password: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum CredentialsError {
    #[error("credentials file unreadable: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("credentials file invalid: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<Credentials, CredentialsError> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
