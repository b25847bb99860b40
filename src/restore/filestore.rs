// instancetool/src/restore/filestore.rs
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::ConnectionDescriptor;
use crate::utils::docker::DockerCli;

/// Where a database's attachments live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilestoreTarget {
    /// A directory on this host.
    Local(PathBuf),
    /// A directory inside a running container, owned by `owner`.
    Container {
        id: String,
        owner: String,
        path: PathBuf,
    },
}

impl FilestoreTarget {
    /// `None` when the descriptor does not say where attachments go.
    pub fn for_descriptor(descriptor: &ConnectionDescriptor) -> Option<Self> {
        let database = descriptor.database.as_deref()?;
        match descriptor.container() {
            Some(container) => Some(Self::Container {
                id: container.id.clone(),
                owner: container.owner.clone(),
                path: container.data_dir.join("filestore").join(database),
            }),
            None => descriptor.filestore_dir().map(Self::Local),
        }
    }
}

/// Puts an extracted `filestore` folder where the application expects it,
/// replacing whatever was there.
pub fn relocate_filestore(source: &Path, target: &FilestoreTarget, docker: &DockerCli) -> Result<()> {
    if !source.is_dir() {
        warn!("No filestore in the backup file");
        return Ok(());
    }
    match target {
        FilestoreTarget::Local(destination) => {
            info!("Moving filestore to {}", destination.display());
            move_dir(source, destination)
        }
        FilestoreTarget::Container { id, owner, path } => {
            info!("Restoring filestore into container {} at {}", id, path.display());
            let staged = container_staging_path(path);
            let staged_str = staged.to_string_lossy();
            let path_str = path.to_string_lossy();

            docker.exec(id, ["rm", "-rf", &*staged_str])?;
            docker.copy_into(id, source, &staged)?;
            docker.exec(id, ["rm", "-rf", &*path_str])?;
            if let Some(parent) = path.parent() {
                docker.exec(id, ["mkdir", "-p", &*parent.to_string_lossy()])?;
            }
            docker.exec(id, ["mv", &*staged_str, &*path_str])?;
            let ownership = format!("{owner}:{owner}");
            docker.exec(id, ["chown", "-R", ownership.as_str(), &*path_str])?;
            Ok(())
        }
    }
}

fn container_staging_path(path: &Path) -> PathBuf {
    let database = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    PathBuf::from(format!("/tmp/filestore_{database}"))
}

/// Removes a database's attachments; a missing directory is not an error.
pub fn remove_attachments(target: &FilestoreTarget, docker: &DockerCli) -> Result<()> {
    match target {
        FilestoreTarget::Local(path) => {
            if path.exists() {
                info!("Removing previous filestore {}", path.display());
                fs::remove_dir_all(path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            Ok(())
        }
        FilestoreTarget::Container { id, path, .. } => {
            docker.exec(id, ["rm", "-rf", &*path.to_string_lossy()])?;
            Ok(())
        }
    }
}

/// Moves a directory tree, replacing `destination`. Falls back to copy and
/// remove when a rename is not possible (different filesystems).
pub fn move_dir(source: &Path, destination: &Path) -> Result<()> {
    if destination.exists() {
        info!("{} folder already exists, replacing", destination.display());
        fs::remove_dir_all(destination)
            .with_context(|| format!("Failed to remove {}", destination.display()))?;
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    copy_dir(source, destination)?;
    fs::remove_dir_all(source).with_context(|| format!("Failed to remove {}", source.display()))?;
    Ok(())
}

fn copy_dir(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source)?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}
