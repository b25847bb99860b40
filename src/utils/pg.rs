// instancetool/src/utils/pg.rs
use sqlx::postgres::PgConnectOptions;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use super::find_pg_executable;
use crate::config::ConnectionDescriptor;
use crate::errors::{DriverError, ToolFailure};

/// Maintenance database used for existence checks and connection tests.
pub const MAINTENANCE_DB: &str = "postgres";

/// Execution context for the PostgreSQL client tools.
///
/// Built once from a descriptor and handed to every driver call. The
/// password only ever reaches a child process through that child's own
/// environment; the tool's process environment is left untouched.
#[derive(Debug, Clone)]
pub struct PgContext {
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    database: String,
    bin_dir: Option<PathBuf>,
}

impl PgContext {
    pub fn new(descriptor: &ConnectionDescriptor) -> Result<Self, DriverError> {
        let database = descriptor.require_database()?.to_string();
        Ok(Self {
            host: descriptor.db_host.clone(),
            port: descriptor.db_port,
            user: descriptor.db_user.clone(),
            password: descriptor.db_password.clone(),
            database,
            bin_dir: descriptor.pg_bin_dir.clone(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Command for `program` with host, port and user filled in.
    pub fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-h")
            .arg(&self.host)
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-w"); // never prompt for a password
        if let Some(user) = &self.user {
            cmd.arg("-U").arg(user);
        }
        if let Some(password) = &self.password {
            cmd.env("PGPASSWORD", password);
        }
        cmd
    }

    /// Runs one of the client tools and classifies its failure.
    pub fn run<I, S>(&self, tool: &'static str, args: I) -> Result<(), DriverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = find_pg_executable(tool, self.bin_dir.as_deref())?;
        let mut cmd = self.command(&program);
        cmd.args(args);
        debug!("Running {:?} {:?}", tool, cmd.get_args().collect::<Vec<_>>());

        let output = cmd
            .output()
            .map_err(|source| DriverError::Spawn { tool, source })?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(DriverError::Tool {
            tool,
            failure: classify_failure(&stderr),
        })
    }

    pub fn connect_options(&self, database: &str) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(database);
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        options
    }
}

/// Maps the client tools' stderr wording onto the outcomes callers act on.
///
/// The wording is not a documented interface of the tools; keep every match
/// on it here.
pub fn classify_failure(stderr: &str) -> ToolFailure {
    let message = stderr.trim().to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("does not exist") {
        ToolFailure::DoesNotExist(message)
    } else if lowered.contains("already exists") {
        ToolFailure::AlreadyExists(message)
    } else {
        ToolFailure::Other(message)
    }
}
