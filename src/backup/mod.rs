pub(crate) mod archive; // tar.bz2 / tar.gz packing and unpacking
pub(crate) mod db_dump; // pg_dump driver
mod logic;
pub(crate) mod naming; // Backup names and their timestamps
mod rpc_dump; // Dumps through the application's db.dump RPC

pub use logic::{BackupRequest, backup_databases, parse_database_list};
pub use rpc_dump::backup_databases_rpc;

use anyhow::Result;
use tracing::info;

use crate::config::ConnectionDescriptor;
use crate::report::BatchReport;
use crate::rpc::RpcClient;
use crate::utils::pg::{MAINTENANCE_DB, PgContext};
use crate::utils::setting::check_db_connection;

/// Public entry point for a client-tools backup run.
pub async fn run_backup_flow(
    descriptor: &ConnectionDescriptor,
    databases: &[String],
    request: &BackupRequest,
) -> Result<BatchReport> {
    let ctx = PgContext::new(&descriptor.clone().with_database(MAINTENANCE_DB))?;
    if !check_db_connection(&ctx).await {
        anyhow::bail!("Cannot reach the database server, aborting backup");
    }
    logic::ensure_dest_folder(&request.dest_folder)?;

    let report = backup_databases(descriptor, databases, request);
    report.log_summary("Backup");
    Ok(report)
}

/// Public entry point for a backup run through the application server.
pub async fn run_rpc_backup_flow(
    client: &RpcClient,
    databases: &[String],
    super_password: &str,
    request: &BackupRequest,
) -> Result<BatchReport> {
    let version = client.server_version().await?;
    info!("✅ Connected to application server {} (version {})", client.base_url(), version);
    logic::ensure_dest_folder(&request.dest_folder)?;

    let report = backup_databases_rpc(client, databases, super_password, request).await;
    report.log_summary("Backup");
    Ok(report)
}
