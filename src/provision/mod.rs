// instancetool/src/provision/mod.rs
//! Development/test databases created from the most recent backup.

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::backup::archive::ArchiveFormat;
use crate::backup::db_dump::is_valid_database_name;
use crate::backup::naming::{parse_backup_timestamp, strip_database_prefix};
use crate::config::{ConnectionDescriptor, Settings};
use crate::deactivate::{deactivate, parse_action_list};
use crate::report::BatchReport;
use crate::restore::{RestoreRequest, run_restore_flow};
use crate::utils::pg::PgContext;
use crate::utils::setting::connect;

/// Newest archive in `dir` by the timestamp embedded in its name. Names
/// without a readable timestamp rank oldest.
pub fn select_latest_backup(dir: &Path) -> Result<PathBuf> {
    debug!("Selecting backup file to be restored");
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read backup directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && ArchiveFormat::from_path(path).is_some())
        .collect();
    candidates.sort();

    let mut latest: Option<(NaiveDateTime, PathBuf)> = None;
    for path in candidates {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stamp = parse_backup_timestamp(&name).unwrap_or_else(|| {
            error!("File: {} - no backup timestamp in name", name);
            NaiveDateTime::MIN
        });
        if latest.as_ref().is_none_or(|(best, _)| stamp > *best) {
            latest = Some((stamp, path));
        }
    }

    let (_, path) = latest.with_context(|| format!("No backup archives found in {}", dir.display()))?;
    info!("File {} selected", path.display());
    Ok(path)
}

/// `prefix_<archive name without its database field>`.
pub fn provisioned_name(prefix: &str, archive: &Path) -> Result<String> {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let rest = strip_database_prefix(&file_name)
        .with_context(|| format!("Cannot derive a database name from {file_name}"))?;
    Ok(format!("{prefix}_{rest}"))
}

/// Restores `source` (an archive, or a directory whose newest archive is
/// used) into a fresh database and sanitizes it.
pub async fn provision(
    source: &Path,
    prefix: &str,
    descriptor: &ConnectionDescriptor,
    working_dir: &Path,
    settings: &Settings,
) -> Result<(String, BatchReport)> {
    let archive = if source.is_dir() {
        select_latest_backup(source)?
    } else {
        source.to_path_buf()
    };
    let database = provisioned_name(prefix, &archive)?;
    if !is_valid_database_name(&database) {
        bail!("'{database}' is not a usable database name");
    }
    info!("Creating {} database from {} backup", database, archive.display());

    let descriptor = descriptor.clone().with_database(&database);
    let request = RestoreRequest {
        archive,
        working_dir: working_dir.to_path_buf(),
        replace: false,
    };
    run_restore_flow(&descriptor, &request, settings).await?;

    info!("Deactivating database...");
    let ctx = PgContext::new(&descriptor)?;
    let mut conn = connect(&ctx)
        .await
        .with_context(|| format!("Failed to connect to {database}"))?;
    let report = deactivate(&mut conn, &parse_action_list(None)).await;
    report.log_summary("Deactivation");
    Ok((database, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_backup_wins_by_embedded_timestamp() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for name in [
            "acme_20240115_093000.tar.bz2",
            "acme_nightly_20240301_010000.tar.gz",
            "zzz_20230101_000000.tar.bz2",
            "acme_latest.tar.bz2",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"")?;
        }
        fs::create_dir(dir.path().join("acme_20991231_235959.tar.bz2"))?;

        assert_eq!(
            select_latest_backup(dir.path())?,
            dir.path().join("acme_nightly_20240301_010000.tar.gz")
        );
        Ok(())
    }

    #[test]
    fn unparseable_names_are_still_selectable_when_alone() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("acme_latest.tar.bz2"), b"")?;
        assert_eq!(
            select_latest_backup(dir.path())?,
            dir.path().join("acme_latest.tar.bz2")
        );
        Ok(())
    }

    #[test]
    fn empty_directory_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(select_latest_backup(dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn name_replaces_database_field() -> anyhow::Result<()> {
        assert_eq!(
            provisioned_name("test", Path::new("/b/acme_pre-migration_20240115_093000.tar.bz2"))?,
            "test_pre-migration_20240115_093000"
        );
        assert_eq!(
            provisioned_name("dev", Path::new("acme_20240115_093000.tar.gz"))?,
            "dev_20240115_093000"
        );
        assert!(provisioned_name("dev", Path::new("acme.tar.gz")).is_err());
        Ok(())
    }
}
