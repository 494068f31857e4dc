//! Container runtime access.
//!
//! Everything the orchestrator needs from Docker goes through the
//! [`ContainerRuntime`] trait so the backup logic can be exercised without a
//! daemon. The production implementation shells out to the `docker` CLI with
//! discrete arguments; nothing user- or database-derived is ever interpolated
//! into a shell string, and secrets travel via the process environment.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const COPY_TIMEOUT: Duration = Duration::from_secs(120);
/// Container execs cover pg_dump/pg_restore of whole databases.
const EXEC_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>>;

    /// Execute a command inside a container. `env` entries are exported into
    /// the command's environment.
    async fn exec(&self, container: &str, env: &[(&str, &str)], cmd: &[&str]) -> Result<String>;

    /// Invoke the runtime itself (`docker <args>`) with a bounded timeout.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<String>;

    async fn copy_from_container(&self, container: &str, src: &str, dest: &Path) -> Result<()>;

    async fn copy_to_container(&self, container: &str, src: &Path, dest: &str) -> Result<()>;
}

pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        Self
    }

    async fn invoke(&self, args: Vec<String>, env: &[(&str, &str)], timeout: Duration) -> Result<String> {
        let verb = args.first().cloned().unwrap_or_default();

        let mut command = Command::new("docker");
        command.args(&args).stdin(Stdio::null()).kill_on_drop(true);
        for (key, value) in env {
            command.env(key, value);
        }

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                anyhow::anyhow!("docker {verb} timed out after {}s", timeout.as_secs())
            })?
            .with_context(|| format!("failed to run docker {verb}"))?;

        if !output.status.success() {
            anyhow::bail!(
                "docker {verb} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        let out = self
            .invoke(
                vec![
                    "ps".into(),
                    "--format".into(),
                    "{{.ID}}\t{{.Names}}\t{{.State}}".into(),
                ],
                &[],
                LIST_TIMEOUT,
            )
            .await?;
        Ok(parse_container_lines(&out))
    }

    async fn exec(&self, container: &str, env: &[(&str, &str)], cmd: &[&str]) -> Result<String> {
        let mut args = vec!["exec".to_string()];
        for (key, _) in env {
            // Value-less -e forwards the variable from our own environment,
            // keeping secrets out of the argument list.
            args.push("-e".into());
            args.push((*key).to_string());
        }
        args.push(container.to_string());
        args.extend(cmd.iter().map(|s| s.to_string()));
        self.invoke(args, env, EXEC_TIMEOUT).await
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<String> {
        self.invoke(args.iter().map(|s| s.to_string()).collect(), &[], timeout)
            .await
    }

    async fn copy_from_container(&self, container: &str, src: &str, dest: &Path) -> Result<()> {
        self.invoke(
            vec![
                "cp".into(),
                format!("{container}:{src}"),
                dest.display().to_string(),
            ],
            &[],
            COPY_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    async fn copy_to_container(&self, container: &str, src: &Path, dest: &str) -> Result<()> {
        self.invoke(
            vec![
                "cp".into(),
                src.display().to_string(),
                format!("{container}:{dest}"),
            ],
            &[],
            COPY_TIMEOUT,
        )
        .await
        .map(|_| ())
    }
}

fn parse_container_lines(output: &str) -> Vec<ContainerInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let id = parts.next()?.trim();
            let name = parts.next()?.trim();
            let state = parts.next()?.trim();
            if id.is_empty() {
                return None;
            }
            Some(ContainerInfo {
                id: id.into(),
                name: name.into(),
                state: state.into(),
            })
        })
        .collect()
}
