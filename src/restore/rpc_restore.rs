// instancetool/src/restore/rpc_restore.rs
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::backup::archive::{self, ArchiveFlavor, LEGACY_DUMP_NAME};
use crate::rpc::RpcClient;

/// Reads the base64 dump out of a `backup-rpc` archive.
fn read_legacy_dump(archive_path: &Path, working_dir: &Path) -> Result<String> {
    fs::create_dir_all(working_dir)
        .with_context(|| format!("Failed to create working directory {}", working_dir.display()))?;
    let work = tempfile::Builder::new()
        .prefix("restore_")
        .tempdir_in(working_dir)
        .context("Failed to create extraction directory")?;

    info!("Extracting files");
    let unpacked = archive::unpack(archive_path, work.path())
        .with_context(|| format!("Failed to extract {}", archive_path.display()))?;
    if unpacked.flavor != ArchiveFlavor::Legacy {
        bail!(
            "{} holds a pg_dump backup, not {LEGACY_DUMP_NAME}; use the restore command instead",
            archive_path.display()
        );
    }

    let dump = unpacked.root.join(LEGACY_DUMP_NAME);
    fs::read_to_string(&dump).with_context(|| format!("Failed to read {}", dump.display()))
}

/// Restores an archive made through the application server back through
/// its `db.restore` call. Refuses to touch an existing database.
pub async fn restore_archive_rpc(
    client: &RpcClient,
    archive_path: &Path,
    working_dir: &Path,
    database: &str,
    super_password: &str,
) -> Result<()> {
    let encoded = read_legacy_dump(archive_path, working_dir)?;

    let exists = client
        .database_exists(database)
        .await
        .with_context(|| format!("Cannot connect to the application server at {}", client.base_url()))?;
    if exists {
        bail!("Database {database} already exists, aborting");
    }

    info!("Restoring database {} through {}", database, client.base_url());
    client
        .restore_database(super_password, database, &encoded)
        .await
        .with_context(|| format!("db.restore failed for {database}"))?;
    info!("✓ Database {} restored from {}", database, archive_path.display());
    Ok(())
}
