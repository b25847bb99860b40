pub(crate) mod db_restore; // createdb / psql / dropdb driver
pub(crate) mod filestore; // Attachments relocation, local or inside a container
mod legacy; // base64 + zip dumps from the application server
mod logic;
mod rpc_restore; // db.restore through the application server

pub use logic::{RestoreRequest, restore_archive};
pub use rpc_restore::restore_archive_rpc;

use anyhow::Result;

use crate::config::{ConnectionDescriptor, Settings};
use crate::utils::pg::{MAINTENANCE_DB, PgContext};
use crate::utils::setting::check_db_connection;

/// Public entry point for the restore process.
pub async fn run_restore_flow(
    descriptor: &ConnectionDescriptor,
    request: &RestoreRequest,
    settings: &Settings,
) -> Result<()> {
    let maintenance = PgContext::new(&descriptor.clone().with_database(MAINTENANCE_DB))?;
    if !check_db_connection(&maintenance).await {
        anyhow::bail!("Cannot reach the database server, aborting restore");
    }
    restore_archive(descriptor, request, settings).await
}
