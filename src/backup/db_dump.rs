// instancetool/src/backup/db_dump.rs
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::archive::SQL_DUMP_NAME;
use crate::errors::{DriverError, ToolFailure};
use crate::utils::pg::PgContext;

/// Names that can be handed to the client tools and used as a single file
/// name component. PostgreSQL accepts dots, spaces and most punctuation.
pub fn is_valid_database_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.contains(['/', '\0'])
}

/// Dumps the context's database with `pg_dump -O` into
/// `dest_folder/database_dump.sql`.
pub fn dump_database(ctx: &PgContext, dest_folder: &Path) -> Result<PathBuf, DriverError> {
    fs::create_dir_all(dest_folder)?;
    let dump_path = dest_folder.join(SQL_DUMP_NAME);
    info!(
        "Dumping database {} into {} folder",
        ctx.database(),
        dest_folder.display()
    );

    let result = ctx.run(
        "pg_dump",
        [
            OsStr::new(ctx.database()),
            OsStr::new("-O"),
            OsStr::new("-f"),
            dump_path.as_os_str(),
        ],
    );

    match result {
        Ok(()) => {
            info!("✓ Database {} dumped successfully via pg_dump.", ctx.database());
            Ok(dump_path)
        }
        Err(err) => {
            if dump_path.exists() {
                let _ = fs::remove_file(&dump_path);
            }
            match err.tool_failure() {
                Some(ToolFailure::DoesNotExist(_)) => {
                    error!(
                        "Database '{}' does not exist, check name and try again",
                        ctx.database()
                    );
                    Err(DriverError::DatabaseMissing(ctx.database().to_string()))
                }
                _ => Err(err),
            }
        }
    }
}
