// instancetool/src/backup/logic.rs
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{error, info, warn};

use super::archive::{self, ArchiveEntry, ArchiveFormat, FILESTORE_NAME};
use super::db_dump::{dump_database, is_valid_database_name};
use super::naming::backup_name_now;
use crate::config::ConnectionDescriptor;
use crate::report::{BatchReport, ItemOutcome};
use crate::utils::pg::PgContext;

/// Options shared by every database of a backup run.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub dest_folder: PathBuf,
    pub reason: Option<String>,
    /// Parent of the per-database working directories.
    pub tmp_dir: PathBuf,
    pub format: ArchiveFormat,
}

impl BackupRequest {
    /// Private working directory for one database, removed on drop.
    pub(crate) fn work_dir(&self, database: &str) -> Result<TempDir> {
        fs::create_dir_all(&self.tmp_dir).with_context(|| {
            format!("Failed to create temporary directory {}", self.tmp_dir.display())
        })?;
        tempfile::Builder::new()
            .prefix(&format!("{database}_"))
            .tempdir_in(&self.tmp_dir)
            .with_context(|| format!("Failed to create working directory in {}", self.tmp_dir.display()))
    }
}

/// Dumps one database, adds its attachments when they can be found and packs
/// both into `dest_folder`. The transient dump is removed whatever happens.
pub fn backup_database(descriptor: &ConnectionDescriptor, request: &BackupRequest) -> Result<PathBuf> {
    let ctx = PgContext::new(descriptor)?;
    let database = ctx.database();
    info!("🔍 Backing up database: {}", database);

    let work = request.work_dir(database)?;
    let dump = dump_database(&ctx, work.path())
        .with_context(|| format!("Failed to dump database {database}"))?;
    // The timestamp is taken once the dump is complete.
    let name = backup_name_now(database, request.reason.as_deref());

    let mut entries = vec![ArchiveEntry::Path(dump)];
    match descriptor.filestore_dir() {
        Some(filestore) if filestore.is_dir() => {
            info!("Including attachments from {}", filestore.display());
            entries.push(ArchiveEntry::Renamed(filestore, FILESTORE_NAME.to_string()));
        }
        Some(filestore) => {
            warn!(
                "Attachments directory {} not found, backing up database only",
                filestore.display()
            );
        }
        None => info!("No data directory configured, backing up database only"),
    }

    let archive = archive::pack(&name, &entries, &request.dest_folder, request.format)
        .with_context(|| format!("Failed to compress backup of {database}"))?;
    drop(work);
    Ok(archive)
}

/// Backs up each database in order; a failure only affects its own item.
pub fn backup_databases(
    descriptor: &ConnectionDescriptor,
    databases: &[String],
    request: &BackupRequest,
) -> BatchReport {
    let mut report = BatchReport::new();
    for database in databases {
        let database = database.trim();
        if !is_valid_database_name(database) {
            error!("❌ Invalid database name: '{}'", database);
            report.push(database, ItemOutcome::Failed("invalid database name".into()));
            continue;
        }

        let descriptor = descriptor.clone().with_database(database);
        match backup_database(&descriptor, request) {
            Ok(archive) => report.push(
                database,
                ItemOutcome::Succeeded(archive.display().to_string()),
            ),
            Err(e) => {
                error!("❌ Backup of {} failed: {:#}", database, e);
                report.push(database, ItemOutcome::Failed(format!("{e:#}")));
            }
        }
    }
    report
}

/// Splits a comma separated database list.
pub fn parse_database_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|db| db.trim().to_string())
        .filter(|db| !db.is_empty())
        .collect()
}

pub(crate) fn ensure_dest_folder(dest_folder: &Path) -> Result<()> {
    fs::create_dir_all(dest_folder)
        .with_context(|| format!("Failed to create backup directory: {}", dest_folder.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(root: &Path) -> BackupRequest {
        BackupRequest {
            dest_folder: root.join("out"),
            reason: None,
            tmp_dir: root.join("tmp"),
            format: ArchiveFormat::Bzip2,
        }
    }

    #[test]
    fn database_list_is_split_and_trimmed() {
        assert_eq!(
            parse_database_list(" acme, beta ,,gamma "),
            vec!["acme", "beta", "gamma"]
        );
        assert!(parse_database_list("").is_empty());
    }

    #[test]
    fn invalid_names_fail_without_touching_the_server() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let descriptor = ConnectionDescriptor::from_flags(None, None, None, None);
        let report = backup_databases(
            &descriptor,
            &[" ".to_string(), "../x".to_string()],
            &request(root.path()),
        );

        assert!(report.has_failures());
        assert_eq!(report.failed_count(), 2);
        assert!(matches!(report.outcome("../x"), Some(ItemOutcome::Failed(_))));
        assert!(!root.path().join("out").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn dotted_database_names_are_backed_up() -> anyhow::Result<()> {
        use crate::utils::pg::fake_tools;

        let root = tempfile::tempdir()?;
        let bin = tempfile::tempdir()?;
        fake_tools::install(
            bin.path(),
            "pg_dump",
            r#"for last; do :; done
echo "CREATE TABLE res_partner ();" > "$last""#,
        )?;
        let request = request(root.path());
        let report = backup_databases(
            &fake_tools::descriptor(bin.path()),
            &["acme.example.com".to_string()],
            &request,
        );

        assert!(!report.has_failures());
        let Some(ItemOutcome::Succeeded(archive)) = report.outcome("acme.example.com") else {
            panic!("expected a backup, got {:?}", report.items());
        };
        let archive = PathBuf::from(archive);
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        assert!(name.starts_with("acme.example.com_"), "{name}");
        assert!(name.ends_with(".tar.bz2"), "{name}");

        let unpacked = archive::unpack(&archive, &root.path().join("check"))?;
        assert!(unpacked.root.join("database_dump.sql").is_file());
        assert_eq!(
            unpacked.root.file_name().map(|n| n.to_string_lossy().into_owned()),
            Some(name.trim_end_matches(".tar.bz2").to_string())
        );
        // The working directory is gone once the archive exists.
        assert_eq!(fs::read_dir(&request.tmp_dir)?.count(), 0);
        Ok(())
    }

    #[test]
    fn work_dirs_are_private_and_removed() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let request = request(root.path());
        let first = request.work_dir("acme")?;
        let second = request.work_dir("acme")?;
        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(&request.tmp_dir));

        let kept = first.path().to_path_buf();
        drop(first);
        assert!(!kept.exists());
        Ok(())
    }

    #[test]
    fn ensure_dest_folder_creates_nested_dirs() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let dest = root.path().join("a/b/c");
        ensure_dest_folder(&dest)?;
        assert!(dest.is_dir());
        Ok(())
    }
}
