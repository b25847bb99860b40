pub mod docker;
pub mod pg;
pub mod setting;

use std::path::{Path, PathBuf};
use which::which;

use crate::errors::DriverError;

/// Finds a PostgreSQL client executable (`pg_dump`, `psql`, ...) in `bin_dir`
/// when given, otherwise in the system PATH.
pub fn find_pg_executable(name: &'static str, bin_dir: Option<&Path>) -> Result<PathBuf, DriverError> {
    match bin_dir {
        Some(dir) => {
            let path = dir.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(DriverError::ToolNotFound(name))
            }
        }
        None => which(name).map_err(|_| DriverError::ToolNotFound(name)),
    }
}
