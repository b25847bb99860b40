// instancetool/src/restore/db_restore.rs
use sqlx::{Connection, PgConnection};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use tracing::{error, info, warn};

use crate::errors::{DriverError, ToolFailure};
use crate::utils::pg::{MAINTENANCE_DB, PgContext};

/// `createdb -T template1 -E utf8 <database>`.
pub fn create_database(ctx: &PgContext) -> Result<(), DriverError> {
    info!("Creating database '{}'...", ctx.database());
    ctx.run("createdb", ["-T", "template1", "-E", "utf8", ctx.database()])?;
    info!("✓ Database '{}' created.", ctx.database());
    Ok(())
}

fn psql_args(database: &str, dump: &Path) -> Vec<OsString> {
    vec![
        "-X".into(), // Do not read psqlrc
        "-q".into(),
        "-v".into(),
        "ON_ERROR_STOP=1".into(), // Exit on first error
        "-d".into(),
        database.into(),
        "-f".into(),
        dump.as_os_str().to_os_string(),
    ]
}

/// Executes a SQL dump against the context's database with `psql`.
pub fn apply_dump(ctx: &PgContext, dump: &Path) -> Result<(), DriverError> {
    info!(
        "Executing SQL file with psql: {} on database {}...",
        dump.display(),
        ctx.database()
    );
    ctx.run("psql", psql_args(ctx.database(), dump))?;
    info!("✓ Successfully executed SQL file with psql: {}", dump.display());
    Ok(())
}

/// Creates the database and loads `dump` into it. A failed load drops the
/// half-restored database before the error is returned.
pub fn restore_database(ctx: &PgContext, dump: &Path) -> Result<(), DriverError> {
    if !dump.is_file() {
        return Err(DriverError::DumpNotFound(dump.to_path_buf()));
    }

    create_database(ctx)?;
    if let Err(load_error) = apply_dump(ctx, dump) {
        error!("Restore of '{}' failed: {}", ctx.database(), load_error);
        let dropped = match drop_database(ctx) {
            Ok(()) => true,
            Err(drop_error) => {
                error!("Could not drop database, error message: {}", drop_error);
                false
            }
        };
        return Err(DriverError::RestoreFailed {
            database: ctx.database().to_string(),
            reason: load_error.to_string(),
            dropped,
        });
    }
    Ok(())
}

/// `dropdb <database>`; a database that is already gone counts as dropped.
pub fn drop_database(ctx: &PgContext) -> Result<(), DriverError> {
    info!("Dropping database '{}'...", ctx.database());
    match ctx.run("dropdb", [OsStr::new(ctx.database())]) {
        Ok(()) => {
            info!("✓ Database '{}' dropped.", ctx.database());
            Ok(())
        }
        Err(err) if matches!(err.tool_failure(), Some(ToolFailure::DoesNotExist(_))) => {
            warn!("Database '{}' does not exist, nothing to drop", ctx.database());
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Looks the database up in `pg_database` through the maintenance database.
pub async fn database_exists(ctx: &PgContext) -> Result<bool, DriverError> {
    let mut conn = PgConnection::connect_with(&ctx.connect_options(MAINTENANCE_DB)).await?;
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(ctx.database())
            .fetch_one(&mut conn)
            .await?;
    let _ = conn.close().await;
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionDescriptor;

    #[test]
    fn missing_dump_fails_before_any_tool_runs() {
        let descriptor = ConnectionDescriptor::from_flags(None, None, None, None).with_database("acme");
        let ctx = PgContext::new(&descriptor).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("database_dump.sql");

        match restore_database(&ctx, &dump) {
            Err(DriverError::DumpNotFound(path)) => assert_eq!(path, dump),
            other => panic!("expected DumpNotFound, got {other:?}"),
        }
    }

    #[test]
    fn psql_stops_on_first_error() {
        let args = psql_args("acme", Path::new("/w/dump.sql"));
        assert_eq!(
            args,
            ["-X", "-q", "-v", "ON_ERROR_STOP=1", "-d", "acme", "-f", "/w/dump.sql"]
                .map(OsString::from)
        );
    }

    #[cfg(unix)]
    fn dump_file(dir: &Path) -> anyhow::Result<std::path::PathBuf> {
        let dump = dir.join("database_dump.sql");
        std::fs::write(&dump, "garbage;\n")?;
        Ok(dump)
    }

    #[cfg(unix)]
    #[test]
    fn failed_load_drops_the_new_database() -> anyhow::Result<()> {
        use crate::utils::pg::fake_tools;

        let bin = tempfile::tempdir()?;
        let work = tempfile::tempdir()?;
        let dump = dump_file(work.path())?;
        fake_tools::install(bin.path(), "createdb", "exit 0")?;
        fake_tools::install(
            bin.path(),
            "psql",
            r#"echo 'psql:dump.sql:1: ERROR:  syntax error at or near "garbage"' >&2
exit 3"#,
        )?;
        fake_tools::install(bin.path(), "dropdb", "exit 0")?;

        let ctx = fake_tools::context(bin.path(), "ghost");
        match restore_database(&ctx, &dump) {
            Err(DriverError::RestoreFailed { database, reason, dropped }) => {
                assert_eq!(database, "ghost");
                assert!(reason.contains("syntax error"));
                assert!(dropped);
            }
            other => panic!("expected RestoreFailed, got {other:?}"),
        }

        let calls = fake_tools::calls(bin.path());
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], "createdb -h localhost -p 5432 -w -T template1 -E utf8 ghost");
        assert!(calls[1].starts_with("psql -h localhost -p 5432 -w -X -q -v ON_ERROR_STOP=1 -d ghost -f "));
        assert_eq!(calls[2], "dropdb -h localhost -p 5432 -w ghost");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failed_create_stops_before_loading() -> anyhow::Result<()> {
        use crate::utils::pg::fake_tools;

        let bin = tempfile::tempdir()?;
        let work = tempfile::tempdir()?;
        let dump = dump_file(work.path())?;
        fake_tools::install(
            bin.path(),
            "createdb",
            r#"echo 'createdb: error: database creation failed: ERROR:  database "acme" already exists' >&2
exit 1"#,
        )?;
        fake_tools::install(bin.path(), "psql", "exit 0")?;
        fake_tools::install(bin.path(), "dropdb", "exit 0")?;

        let ctx = fake_tools::context(bin.path(), "acme");
        let err = restore_database(&ctx, &dump).unwrap_err();
        assert!(matches!(err.tool_failure(), Some(ToolFailure::AlreadyExists(_))));
        assert_eq!(fake_tools::calls(bin.path()).len(), 1);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn dropping_a_missing_database_succeeds() -> anyhow::Result<()> {
        use crate::utils::pg::fake_tools;

        let bin = tempfile::tempdir()?;
        fake_tools::install(
            bin.path(),
            "dropdb",
            r#"echo 'dropdb: error: database removal failed: ERROR:  database "ghost" does not exist' >&2
exit 1"#,
        )?;
        drop_database(&fake_tools::context(bin.path(), "ghost"))?;

        fake_tools::install(bin.path(), "dropdb", "echo 'dropdb: error: permission denied' >&2\nexit 1")?;
        assert!(drop_database(&fake_tools::context(bin.path(), "acme")).is_err());
        Ok(())
    }
}
