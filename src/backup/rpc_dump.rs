// instancetool/src/backup/rpc_dump.rs
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::archive::{self, ArchiveEntry, LEGACY_DUMP_NAME};
use super::db_dump::is_valid_database_name;
use super::logic::BackupRequest;
use super::naming::backup_name_now;
use crate::report::{BatchReport, ItemOutcome};
use crate::rpc::RpcClient;

/// Writes the server's base64 dump of `database` into `dest_folder/database_dump.b64`.
pub async fn dump_database_rpc(
    client: &RpcClient,
    database: &str,
    super_password: &str,
    dest_folder: &Path,
) -> Result<PathBuf> {
    info!("Dumping database {} into {} folder", database, dest_folder.display());
    let dump_path = dest_folder.join(LEGACY_DUMP_NAME);
    let encoded = client
        .dump_database(super_password, database)
        .await
        .with_context(|| format!("db.dump failed for {database}"))?;
    fs::write(&dump_path, encoded)
        .with_context(|| format!("Failed to write {}", dump_path.display()))?;
    Ok(dump_path)
}

/// Backup through the application server instead of the client tools. The
/// archive carries `database_dump.b64` and no attachments.
pub async fn backup_database_rpc(
    client: &RpcClient,
    database: &str,
    super_password: &str,
    request: &BackupRequest,
) -> Result<PathBuf> {
    info!("🔍 Backing up database {} through {}", database, client.base_url());
    if !client.database_exists(database).await? {
        bail!("Database '{database}' does not exist, check name and try again");
    }

    let work = request.work_dir(database)?;
    let dump = dump_database_rpc(client, database, super_password, work.path()).await?;
    let name = backup_name_now(database, request.reason.as_deref());

    let archive = archive::pack(&name, &[ArchiveEntry::Path(dump)], &request.dest_folder, request.format)
        .with_context(|| format!("Failed to compress backup of {database}"))?;
    drop(work);
    Ok(archive)
}

pub async fn backup_databases_rpc(
    client: &RpcClient,
    databases: &[String],
    super_password: &str,
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
        match backup_database_rpc(client, database, super_password, request).await {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::ArchiveFormat;

    #[tokio::test]
    async fn invalid_names_fail_without_reaching_the_server() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        // Nothing listens there; a request would fail the item.
        let client = RpcClient::new("127.0.0.1", 9)?;
        let request = BackupRequest {
            dest_folder: root.path().join("out"),
            reason: Some("nightly".into()),
            tmp_dir: root.path().join("tmp"),
            format: ArchiveFormat::Gzip,
        };

        let report = backup_databases_rpc(&client, &[" ".to_string(), "a/b".to_string()], "admin", &request).await;
        assert_eq!(report.failed_count(), 2);
        assert!(report
            .items()
            .iter()
            .all(|(_, o)| matches!(o, ItemOutcome::Failed(reason) if reason == "invalid database name")));
        Ok(())
    }
}
