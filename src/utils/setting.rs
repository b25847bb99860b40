// Database connections
use sqlx::{Connection, PgConnection};
use tracing::{error, info};

use super::pg::{MAINTENANCE_DB, PgContext};
use crate::errors::DriverError;

/// Opens a connection to the context's database.
pub async fn connect(ctx: &PgContext) -> Result<PgConnection, DriverError> {
    let conn = PgConnection::connect_with(&ctx.connect_options(ctx.database())).await?;
    Ok(conn)
}

/// Checks that the server is reachable with the given credentials.
pub async fn check_db_connection(ctx: &PgContext) -> bool {
    match PgConnection::connect_with(&ctx.connect_options(MAINTENANCE_DB)).await {
        Ok(conn) => {
            let _ = conn.close().await;
            info!("✅ Successfully connected to the database server");
            true
        }
        Err(e) => {
            error!("❌ Failed to connect to the database server: {}", e);
            false
        }
    }
}
