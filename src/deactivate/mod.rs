// instancetool/src/deactivate/mod.rs
//! Neutralizes a restored database so it cannot reach the outside world:
//! outgoing and incoming mail, invoicing providers, scheduled jobs.

mod rpc;

pub use rpc::deactivate_database_rpc;

use sqlx::PgConnection;
use tracing::{debug, error, info, warn};

use crate::report::{BatchReport, ItemOutcome};

/// The closed set of sanitizing actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Partner,
    OutMail,
    InMail,
    Pac,
    Cron,
    IrAction,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Partner,
        Action::OutMail,
        Action::InMail,
        Action::Pac,
        Action::Cron,
        Action::IrAction,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Partner => "partner",
            Self::OutMail => "out_mail",
            Self::InMail => "in_mail",
            Self::Pac => "pac",
            Self::Cron => "cron",
            Self::IrAction => "ir_action",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name.trim())
    }

    pub fn statement(self) -> &'static str {
        match self {
            Self::Partner => "UPDATE res_partner SET opt_out = TRUE WHERE opt_out IS NOT TRUE",
            Self::OutMail => {
                "UPDATE ir_mail_server SET active = FALSE, smtp_user = 'user', smtp_pass = 'pass' \
                 WHERE active IS NOT FALSE OR smtp_user IS DISTINCT FROM 'user' \
                 OR smtp_pass IS DISTINCT FROM 'pass'"
            }
            Self::InMail => {
                "UPDATE fetchmail_server SET active = FALSE, \"user\" = 'user', password = 'pass' \
                 WHERE active IS NOT FALSE OR \"user\" IS DISTINCT FROM 'user' \
                 OR password IS DISTINCT FROM 'pass'"
            }
            Self::Pac => "UPDATE params_pac SET active = FALSE WHERE active IS NOT FALSE",
            Self::Cron => {
                "UPDATE ir_cron SET active = FALSE \
                 WHERE active IS NOT FALSE AND model IS DISTINCT FROM 'osv_memory.autovacuum'"
            }
            Self::IrAction => {
                "UPDATE base_action_rule SET active = FALSE \
                 WHERE active IS NOT FALSE AND name LIKE '%Create Sale from Purchase%'"
            }
        }
    }
}

/// Comma separated action names; empty input means the whole catalog.
pub fn parse_action_list(list: Option<&str>) -> Vec<String> {
    let names: Vec<String> = list
        .unwrap_or_default()
        .split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        Action::ALL.iter().map(|a| a.name().to_string()).collect()
    } else {
        names
    }
}

/// Undefined table (`42P01`) or column (`42703`): the module providing it is
/// not installed in this database.
pub fn is_missing_relation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("42P01") | Some("42703"))
                || db.message().contains("does not exist")
        }
        _ => false,
    }
}

/// Runs the named actions in order. Each statement commits on its own; a
/// failing one is recorded and the loop continues.
pub async fn deactivate(conn: &mut PgConnection, names: &[String]) -> BatchReport {
    info!("Executing queries");
    let mut report = BatchReport::new();
    for name in names {
        let Some(action) = Action::parse(name) else {
            warn!("Unknown action '{}', skipping", name);
            report.push(name.as_str(), ItemOutcome::Skipped("unknown action".into()));
            continue;
        };

        info!(" - Executing {}", action.name());
        debug!("Query: \"{}\"", action.statement());
        let outcome = match sqlx::query(action.statement()).execute(&mut *conn).await {
            Ok(done) => ItemOutcome::Succeeded(format!("{} row(s) updated", done.rows_affected())),
            Err(e) if is_missing_relation(&e) => {
                warn!("Couldn't be executed in database: {}", e);
                ItemOutcome::Skipped(e.to_string())
            }
            Err(e) => {
                error!("❌ {} failed: {}", action.name(), e);
                ItemOutcome::Failed(e.to_string())
            }
        };
        report.push(action.name(), outcome);
    }
    report
}

const USERS_TABLE: &str = "res_users";

/// Six upper-case hex characters.
pub fn random_password() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .to_uppercase()
        .chars()
        .take(6)
        .collect()
}

async fn password_column(conn: &mut PgConnection) -> Result<Option<&'static str>, sqlx::Error> {
    let columns: Vec<String> = sqlx::query_scalar(
        "SELECT column_name::text FROM information_schema.columns \
         WHERE table_name = $1 AND column_name IN ('password', 'password_crypt')",
    )
    .bind(USERS_TABLE)
    .fetch_all(&mut *conn)
    .await?;

    if columns.iter().any(|c| c == "password_crypt") {
        let populated: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM res_users WHERE password_crypt IS NOT NULL AND password_crypt <> '')",
        )
        .fetch_one(&mut *conn)
        .await?;
        if populated {
            return Ok(Some("password_crypt"));
        }
    }
    Ok(columns.iter().any(|c| c == "password").then_some("password"))
}

/// Gives every user a fresh random password.
pub async fn randomize_passwords(conn: &mut PgConnection) -> ItemOutcome {
    info!("Updating users' passwords");
    match update_passwords(conn).await {
        Ok(Some(count)) => ItemOutcome::Succeeded(format!("{count} password(s) updated")),
        Ok(None) => {
            warn!("No password column found in {}", USERS_TABLE);
            ItemOutcome::Skipped(format!("{USERS_TABLE} has no password column"))
        }
        Err(e) if is_missing_relation(&e) => {
            warn!("Couldn't be executed in database: {}", e);
            ItemOutcome::Skipped(e.to_string())
        }
        Err(e) => {
            error!("❌ Updating passwords failed: {}", e);
            ItemOutcome::Failed(e.to_string())
        }
    }
}

async fn update_passwords(conn: &mut PgConnection) -> Result<Option<u64>, sqlx::Error> {
    let Some(column) = password_column(conn).await? else {
        return Ok(None);
    };
    let ids: Vec<i32> = sqlx::query_scalar("SELECT id FROM res_users ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;

    let update = format!("UPDATE res_users SET {column} = $1 WHERE id = $2");
    for id in &ids {
        debug!(" - Updating {}", id);
        sqlx::query(&update)
            .bind(random_password())
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(Some(ids.len() as u64))
}
