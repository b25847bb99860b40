// instancetool/src/utils/docker.rs
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output};
use tracing::{debug, info};

use crate::errors::ConfigError;

/// Thin wrapper over the docker command-line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn output<I, S>(&self, args: I) -> std::io::Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.binary).args(args).output()
    }

    /// Raw `docker inspect` JSON for one container.
    pub fn inspect(&self, container: &str) -> Result<String, ConfigError> {
        let output = self
            .output(["inspect", "--type", "container", container])
            .map_err(|source| ConfigError::Spawn {
                program: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("No such") {
                return Err(ConfigError::NoSuchContainer(container.to_string()));
            }
            return Err(ConfigError::Inspect(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Runs a command inside the container as root and returns its stdout.
    pub fn exec<I, S>(&self, container: &str, command: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let command: Vec<S> = command.into_iter().collect();
        let printable = command
            .iter()
            .map(|arg| arg.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("docker exec {} {}", container, printable);

        let mut args: Vec<&OsStr> = vec![
            OsStr::new("exec"),
            OsStr::new("-u"),
            OsStr::new("root"),
            OsStr::new(container),
        ];
        args.extend(command.iter().map(AsRef::as_ref));

        let output = self
            .output(args)
            .with_context(|| format!("Failed to execute docker exec in {container}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "'{}' failed in container {} with status: {}\nStderr: {}",
                printable,
                container,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !stdout.is_empty() {
            info!("'{}' returned '{}'", printable, stdout);
        }
        Ok(stdout)
    }

    /// Contents of a file inside the container. The text is not logged, it
    /// may hold credentials.
    pub fn read_file(&self, container: &str, path: &str) -> Result<String> {
        debug!("Reading {} from container {}", path, container);
        let output = self
            .output(["exec", container, "cat", path])
            .with_context(|| format!("Failed to execute docker exec in {container}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "Could not read '{}' from container {}: {}",
                path,
                container,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Copies a host path into the container (`docker cp`).
    pub fn copy_into(&self, container: &str, source: &Path, destination: &Path) -> Result<()> {
        let target = format!("{}:{}", container, destination.display());
        let output = self
            .output([OsStr::new("cp"), source.as_os_str(), OsStr::new(&target)])
            .with_context(|| format!("Failed to execute docker cp into {container}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "docker cp {} {} failed with status: {}\nStderr: {}",
                source.display(),
                target,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}
