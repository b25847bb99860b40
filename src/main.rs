//! Instance Backup/Restore Tool
//!
//! Backs up, restores, sanitizes and provisions databases of the business
//! application together with their attachments.

// instancetool/src/main.rs
mod backup;
mod config;
mod deactivate;
mod errors;
mod provision;
mod report;
mod restore;
mod rpc;
mod utils;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use backup::{BackupRequest, archive::ArchiveFormat, parse_database_list};
use config::{ConnectionDescriptor, DEFAULT_SETTINGS_FILE, Settings};
use restore::RestoreRequest;
use rpc::RpcClient;
use utils::pg::PgContext;
use utils::setting::{check_db_connection, connect};

#[derive(Debug, Parser)]
#[command(about, version, subcommand_help_heading = "Commands")]
struct Cli {
    /// JSON file with tool settings
    #[arg(long, global = true, value_name = "path", default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dump databases with pg_dump and archive them with their attachments
    Backup(BackupOptions),
    /// Dump databases through the application server
    BackupRpc(BackupRpcOptions),
    /// Restore a backup archive into a database
    Restore(RestoreOptions),
    /// Restore an archive made by backup-rpc through the application server
    RestoreRpc(RestoreRpcOptions),
    /// Neutralize mail servers, cron jobs and friends with SQL
    Deactivate(DeactivateOptions),
    /// Neutralize a database through the application server
    DeactivateRpc(DeactivateRpcOptions),
    /// Create a sanitized test database from the latest backup
    Provision(ProvisionOptions),
}

/// Where the database connection comes from. The application config file
/// and a container are mutually exclusive; the `--db-*` flags apply when
/// neither is given.
#[derive(Debug, Clone, Args)]
struct SourceArgs {
    /// Application configuration file
    #[arg(short = 'o', long, value_name = "path", group = "source")]
    odoo_config: Option<PathBuf>,

    /// Container holding the application configuration
    #[arg(short = 'f', long, value_name = "container", group = "source")]
    from_docker: Option<String>,

    #[arg(long, value_name = "host", conflicts_with = "source")]
    db_host: Option<String>,

    #[arg(long, value_name = "port", conflicts_with = "source")]
    db_port: Option<u16>,

    #[arg(long, value_name = "user", conflicts_with = "source")]
    db_user: Option<String>,

    #[arg(long, value_name = "password", conflicts_with = "source")]
    db_password: Option<String>,
}

impl SourceArgs {
    fn descriptor(&self, settings: &Settings) -> Result<ConnectionDescriptor> {
        let descriptor = if let Some(path) = &self.odoo_config {
            config::app_file::from_config_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?
        } else if let Some(container) = &self.from_docker {
            config::docker::from_container(container, settings)
                .with_context(|| format!("Failed to read configuration of container {container}"))?
        } else {
            ConnectionDescriptor::from_flags(
                self.db_host.clone(),
                self.db_port,
                self.db_user.clone(),
                self.db_password.clone(),
            )
        };
        Ok(descriptor.with_pg_bin_dir(settings.pg_bin_dir.clone()))
    }
}

#[derive(Debug, Clone, Args)]
struct ArchiveArgs {
    /// Where to store backups
    #[arg(short = 'd', long, value_name = "dir", default_value = ".")]
    backup_dir: PathBuf,

    /// Reason for this backup, added to the archive name
    #[arg(short, long)]
    reason: Option<String>,

    /// Temporary working directory
    #[arg(short, long, value_name = "dir")]
    temp_dir: Option<PathBuf>,

    /// Compress with gzip instead of bzip2
    #[arg(long)]
    gzip: bool,
}

impl ArchiveArgs {
    fn request(&self) -> BackupRequest {
        BackupRequest {
            dest_folder: self.backup_dir.clone(),
            reason: self.reason.clone(),
            tmp_dir: self.temp_dir.clone().unwrap_or_else(std::env::temp_dir),
            format: if self.gzip {
                ArchiveFormat::Gzip
            } else {
                ArchiveFormat::Bzip2
            },
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ServerArgs {
    /// Host running the application server
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// XML-RPC port
    #[arg(short, long, default_value_t = 8069)]
    port: u16,
}

#[derive(Debug, Clone, Args)]
struct BackupOptions {
    /// Comma separated database names
    #[arg(value_name = "dbs")]
    databases: String,

    #[command(flatten)]
    archive: ArchiveArgs,

    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Debug, Clone, Args)]
struct BackupRpcOptions {
    /// Comma separated database names
    #[arg(value_name = "dbs")]
    databases: String,

    #[command(flatten)]
    archive: ArchiveArgs,

    #[command(flatten)]
    server: ServerArgs,

    /// Super user (database manager) password
    #[arg(short = 'w', long, default_value = "admin")]
    password: String,
}

#[derive(Debug, Clone, Args)]
struct RestoreOptions {
    /// Database name to restore the backup into
    #[arg(short, long)]
    database: String,

    /// Backup file to be restored
    #[arg(short, long, value_name = "file")]
    backup: PathBuf,

    /// Temporary working directory
    #[arg(short, long, value_name = "dir")]
    temp_dir: Option<PathBuf>,

    /// Drop an existing database and its attachments first
    #[arg(long)]
    replace: bool,

    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Debug, Clone, Args)]
struct RestoreRpcOptions {
    /// Database to create on the application server
    #[arg(value_name = "db")]
    database: String,

    /// Backup file produced by backup-rpc
    #[arg(short, long, value_name = "file")]
    backup: PathBuf,

    /// Temporary working directory
    #[arg(short, long, value_name = "dir")]
    temp_dir: Option<PathBuf>,

    #[command(flatten)]
    server: ServerArgs,

    /// Super user (database manager) password
    #[arg(short = 'w', long, default_value = "admin")]
    password: String,
}

#[derive(Debug, Clone, Args)]
struct DeactivateOptions {
    /// Database name
    #[arg(short, long)]
    database: String,

    /// Comma separated actions: partner, out_mail, in_mail, pac, cron, ir_action
    #[arg(short, long)]
    actions: Option<String>,

    /// Generate random passwords for users
    #[arg(short, long)]
    rpass: bool,

    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Debug, Clone, Args)]
struct DeactivateRpcOptions {
    /// Database name
    #[arg(value_name = "db")]
    database: String,

    #[command(flatten)]
    server: ServerArgs,

    /// Application super user
    #[arg(short, long, default_value = "admin")]
    user: String,

    /// Application super user password
    #[arg(short = 'w', long, default_value = "admin")]
    password: String,
}

#[derive(Debug, Clone, Args)]
struct ProvisionOptions {
    /// Backup file to restore
    #[arg(
        short = 'b',
        long,
        value_name = "file",
        required_unless_present = "backup_path",
        conflicts_with = "backup_path"
    )]
    backup_file: Option<PathBuf>,

    /// Directory whose most recent backup is restored
    #[arg(short = 'p', long, value_name = "dir")]
    backup_path: Option<PathBuf>,

    /// Prefix of the new database name
    #[arg(long)]
    prefix: String,

    /// Temporary working directory
    #[arg(short, long, value_name = "dir")]
    temp_dir: Option<PathBuf>,

    #[command(flatten)]
    source: SourceArgs,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let layer = fmt::layer().compact();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(layer).with(filter).init();
}

/// Main entry point for the instance tool
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing(cli.verbose);

    match run_app(cli).await {
        Ok(true) => {
            info!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            error!("❌ Operation finished with failures.");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

/// Runs the selected command; `Ok(false)` means some batch item failed.
async fn run_app(cli: Cli) -> Result<bool> {
    let settings = Settings::load_from_json(&cli.settings)?;

    match cli.command {
        Command::Backup(opts) => {
            info!("🚀 Starting Backup Process...");
            let databases = parse_database_list(&opts.databases);
            if databases.is_empty() {
                bail!("No databases specified to back up.");
            }
            let descriptor = opts.source.descriptor(&settings)?;
            let report = backup::run_backup_flow(&descriptor, &databases, &opts.archive.request())
                .await
                .context("Backup process failed")?;
            Ok(!report.has_failures())
        }
        Command::BackupRpc(opts) => {
            info!("🚀 Starting Backup Process through the application server...");
            let databases = parse_database_list(&opts.databases);
            if databases.is_empty() {
                bail!("No databases specified to back up.");
            }
            let client = RpcClient::new(&opts.server.host, opts.server.port)?;
            let report = backup::run_rpc_backup_flow(&client, &databases, &opts.password, &opts.archive.request())
                .await
                .context("Backup process failed")?;
            Ok(!report.has_failures())
        }
        Command::Restore(opts) => {
            info!("🔄 Starting Restore Process...");
            let descriptor = opts.source.descriptor(&settings)?.with_database(&opts.database);
            let request = RestoreRequest {
                archive: opts.backup,
                working_dir: opts.temp_dir.unwrap_or_else(std::env::temp_dir),
                replace: opts.replace,
            };
            info!("Restore target: {}, Archive: {}", opts.database, request.archive.display());
            restore::run_restore_flow(&descriptor, &request, &settings)
                .await
                .context("Restore process failed")?;
            Ok(true)
        }
        Command::RestoreRpc(opts) => {
            info!("🔄 Starting Restore Process through the application server...");
            let client = RpcClient::new(&opts.server.host, opts.server.port)?;
            let version = client.server_version().await?;
            info!("✅ Connected to application server {} (version {})", client.base_url(), version);
            let working_dir = opts.temp_dir.unwrap_or_else(std::env::temp_dir);
            restore::restore_archive_rpc(&client, &opts.backup, &working_dir, &opts.database, &opts.password)
                .await
                .context("Restore process failed")?;
            Ok(true)
        }
        Command::Deactivate(opts) => {
            info!("Starting deactivate process");
            let descriptor = opts.source.descriptor(&settings)?.with_database(&opts.database);
            let ctx = PgContext::new(&descriptor)?;
            if !check_db_connection(&ctx).await {
                bail!("Cannot reach the database server, aborting deactivation");
            }
            let mut conn = connect(&ctx)
                .await
                .with_context(|| format!("Failed to connect to {}", opts.database))?;

            let actions = deactivate::parse_action_list(opts.actions.as_deref());
            let mut report = deactivate::deactivate(&mut conn, &actions).await;
            if opts.rpass {
                report.push("passwords", deactivate::randomize_passwords(&mut conn).await);
            }
            report.log_summary("Deactivation");
            Ok(!report.has_failures())
        }
        Command::DeactivateRpc(opts) => {
            info!("Starting deactivate process through the application server");
            let client = RpcClient::new(&opts.server.host, opts.server.port)?;
            let report = deactivate::deactivate_database_rpc(
                &client,
                &opts.database,
                &opts.user,
                &opts.password,
                settings.cron_write_attempts,
            )
            .await?;
            report.log_summary("Deactivation");
            Ok(!report.has_failures())
        }
        Command::Provision(opts) => {
            let source = opts
                .backup_file
                .or(opts.backup_path)
                .context("Either --backup-file or --backup-path is required")?;
            let descriptor = opts.source.descriptor(&settings)?;
            let working_dir = opts.temp_dir.unwrap_or_else(std::env::temp_dir);
            let (database, report) =
                provision::provision(&source, &opts.prefix, &descriptor, &working_dir, &settings).await?;
            info!("Database {} created", database);
            Ok(!report.has_failures())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_file_and_container_are_exclusive() {
        let err = Cli::try_parse_from(["instancetool", "restore", "-d", "acme", "-b", "a.tar.bz2", "-o", "odoo.conf", "-f", "web"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);

        let err = Cli::try_parse_from(["instancetool", "backup", "acme", "-o", "odoo.conf", "--db-host", "db"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn backup_defaults() {
        let cli = Cli::try_parse_from(["instancetool", "backup", "acme,beta", "-f", "web", "-r", "nightly"]).unwrap();
        let Command::Backup(opts) = cli.command else {
            panic!("expected backup");
        };
        assert_eq!(cli.settings, PathBuf::from(DEFAULT_SETTINGS_FILE));
        assert_eq!(parse_database_list(&opts.databases), ["acme", "beta"]);
        assert_eq!(opts.source.from_docker.as_deref(), Some("web"));

        let request = opts.archive.request();
        assert_eq!(request.dest_folder, PathBuf::from("."));
        assert_eq!(request.reason.as_deref(), Some("nightly"));
        assert_eq!(request.format, ArchiveFormat::Bzip2);
    }

    #[test]
    fn flags_build_a_descriptor() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "instancetool", "deactivate", "-d", "acme", "--db-host", "db", "--db-port", "6432", "-a", "cron", "-r",
        ])?;
        let Command::Deactivate(opts) = cli.command else {
            panic!("expected deactivate");
        };
        assert!(opts.rpass);
        let descriptor = opts.source.descriptor(&Settings::default())?;
        assert_eq!(descriptor.db_host, "db");
        assert_eq!(descriptor.db_port, 6432);
        Ok(())
    }

    #[test]
    fn provision_needs_exactly_one_backup_source() {
        let err = Cli::try_parse_from(["instancetool", "provision", "--prefix", "test"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let err = Cli::try_parse_from(["instancetool", "provision", "--prefix", "test", "-b", "a.tar.bz2", "-p", "/b"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);

        assert!(Cli::try_parse_from(["instancetool", "provision", "--prefix", "test", "-p", "/b"]).is_ok());
    }

    #[test]
    fn rpc_commands_have_server_defaults() {
        let cli = Cli::try_parse_from(["instancetool", "deactivate-rpc", "acme"]).unwrap();
        let Command::DeactivateRpc(opts) = cli.command else {
            panic!("expected deactivate-rpc");
        };
        assert_eq!(opts.server.host, "localhost");
        assert_eq!(opts.server.port, 8069);
        assert_eq!(opts.user, "admin");
    }

    #[test]
    fn restore_rpc_takes_database_and_archive() {
        let cli = Cli::try_parse_from(["instancetool", "restore-rpc", "acme", "-b", "acme_20240115_093000.tar.bz2", "-p", "8070"])
            .unwrap();
        let Command::RestoreRpc(opts) = cli.command else {
            panic!("expected restore-rpc");
        };
        assert_eq!(opts.database, "acme");
        assert_eq!(opts.backup, PathBuf::from("acme_20240115_093000.tar.bz2"));
        assert_eq!(opts.server.port, 8070);
        assert_eq!(opts.password, "admin");

        let err = Cli::try_parse_from(["instancetool", "restore-rpc", "acme"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn settings_tool_directory_reaches_the_descriptor() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["instancetool", "backup", "acme", "--db-host", "db"])?;
        let Command::Backup(opts) = cli.command else {
            panic!("expected backup");
        };
        let settings = Settings {
            pg_bin_dir: Some(PathBuf::from("/usr/lib/postgresql/16/bin")),
            ..Settings::default()
        };
        let descriptor = opts.source.descriptor(&settings)?;
        assert_eq!(descriptor.pg_bin_dir, Some(PathBuf::from("/usr/lib/postgresql/16/bin")));
        Ok(())
    }

    #[test]
    fn help_is_not_an_error() {
        let err = Cli::try_parse_from(["instancetool", "--help"]).unwrap_err();
        assert!(!err.use_stderr());
    }
}
