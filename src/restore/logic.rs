// instancetool/src/restore/logic.rs
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::db_restore::{database_exists, drop_database, restore_database};
use super::filestore::{FilestoreTarget, relocate_filestore, remove_attachments};
use super::legacy::extract_legacy_dump;
use crate::backup::archive::{self, ArchiveFlavor, FILESTORE_NAME, SQL_DUMP_NAME, UnpackedArchive};
use crate::config::{ConnectionDescriptor, Settings};
use crate::utils::docker::DockerCli;
use crate::utils::pg::PgContext;

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub archive: PathBuf,
    /// Parent of the private extraction directory.
    pub working_dir: PathBuf,
    /// Drop an existing database (and its attachments) instead of refusing.
    pub replace: bool,
}

/// Path of the SQL dump inside an extracted archive, decoding the legacy
/// flavor first.
fn locate_dump(unpacked: &UnpackedArchive) -> Result<PathBuf> {
    match unpacked.flavor {
        ArchiveFlavor::Direct => Ok(unpacked.root.join(SQL_DUMP_NAME)),
        ArchiveFlavor::Legacy => {
            info!("Backup was generated through the application server");
            extract_legacy_dump(&unpacked.root)
        }
    }
}

/// Restores a backup archive into `descriptor`'s database and puts its
/// attachments in place. Every step must succeed for the next one to run;
/// the extraction directory is removed afterwards either way.
pub async fn restore_archive(
    descriptor: &ConnectionDescriptor,
    request: &RestoreRequest,
    settings: &Settings,
) -> Result<()> {
    let ctx = PgContext::new(descriptor)?;
    let database = ctx.database().to_string();

    let exists = database_exists(&ctx)
        .await
        .with_context(|| format!("Failed to check existence of database '{database}'"))?;
    if exists && !request.replace {
        bail!("Database {database} already exists, aborting (use --replace to overwrite it)");
    }

    fs::create_dir_all(&request.working_dir).with_context(|| {
        format!("Failed to create working directory {}", request.working_dir.display())
    })?;
    let work = tempfile::Builder::new()
        .prefix("restore_")
        .tempdir_in(&request.working_dir)
        .context("Failed to create extraction directory")?;

    info!("Extracting files");
    let unpacked = archive::unpack(&request.archive, work.path())
        .with_context(|| format!("Failed to extract {}", request.archive.display()))?;
    let dump = locate_dump(&unpacked)?;

    let docker = DockerCli::new(&settings.docker_binary);
    let target = FilestoreTarget::for_descriptor(descriptor);

    if exists {
        warn!("Replacing existing database {}", database);
        drop_database(&ctx)?;
        if let Some(target) = &target {
            remove_attachments(target, &docker)?;
        }
    }

    restore_database(&ctx, &dump)?;
    info!("✓ Database {} restored from {}", database, request.archive.display());

    restore_attachments(&unpacked.root, target.as_ref(), &docker)?;
    drop(work);
    Ok(())
}

fn restore_attachments(root: &Path, target: Option<&FilestoreTarget>, docker: &DockerCli) -> Result<()> {
    let filestore = root.join(FILESTORE_NAME);
    match target {
        Some(target) => relocate_filestore(&filestore, target, docker),
        None => {
            if filestore.is_dir() {
                warn!("No data directory configured, attachments in the backup were not restored");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::LEGACY_DUMP_NAME;

    #[test]
    fn direct_dump_is_used_as_is() -> anyhow::Result<()> {
        let unpacked = UnpackedArchive {
            root: PathBuf::from("/w/acme_20240115_093000"),
            flavor: ArchiveFlavor::Direct,
        };
        assert_eq!(
            locate_dump(&unpacked)?,
            PathBuf::from("/w/acme_20240115_093000/database_dump.sql")
        );
        Ok(())
    }

    #[test]
    fn broken_legacy_dump_stops_the_restore() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(LEGACY_DUMP_NAME), "%%%")?;
        let unpacked = UnpackedArchive {
            root: dir.path().to_path_buf(),
            flavor: ArchiveFlavor::Legacy,
        };
        assert!(locate_dump(&unpacked).is_err());
        Ok(())
    }

    #[test]
    fn attachments_without_target_are_left_alone() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("filestore/ab"))?;
        restore_attachments(dir.path(), None, &DockerCli::new("docker"))?;
        assert!(dir.path().join("filestore/ab").is_dir());
        Ok(())
    }

    #[test]
    fn attachments_are_moved_to_local_target() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("root/filestore/ab"))?;
        fs::write(dir.path().join("root/filestore/ab/abc"), b"a")?;
        let target = FilestoreTarget::Local(dir.path().join("data/filestore/acme"));

        restore_attachments(&dir.path().join("root"), Some(&target), &DockerCli::new("docker"))?;
        assert_eq!(fs::read(dir.path().join("data/filestore/acme/ab/abc"))?, b"a");
        Ok(())
    }
}
