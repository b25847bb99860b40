// instancetool/src/deactivate/rpc.rs
use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{debug, error, info, warn};

use crate::errors::RpcError;
use crate::report::{BatchReport, ItemOutcome};
use crate::rpc::{RpcClient, Session, Value, domain_term};

const AUTOVACUUM_MODEL: &str = "osv_memory.autovacuum";

/// Runs `op` up to `attempts` times while it fails with a transient fault.
pub async fn retry_transient<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    "Error while trying to deactivate cron jobs, let's try again ({}/{}): {}",
                    attempt, attempts, e
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn set(field: &str, value: impl Into<Value>) -> BTreeMap<String, Value> {
    BTreeMap::from([(field.to_string(), value.into())])
}

fn written(ids: &[i64]) -> ItemOutcome {
    ItemOutcome::Succeeded(format!("{} record(s) updated", ids.len()))
}

async fn disable_mail_servers(session: &Session) -> Result<ItemOutcome, RpcError> {
    info!("Deactivating mail servers");
    let ids = session
        .search("ir.mail_server", vec![domain_term("active", "=", true)])
        .await?;
    if !ids.is_empty() {
        debug!("Mail server ids {:?}", ids);
        session.write("ir.mail_server", &ids, set("active", false)).await?;
    }
    Ok(written(&ids))
}

async fn opt_out_partners(session: &Session) -> Result<ItemOutcome, RpcError> {
    if !session.has_field("res.partner", "opt_out").await? {
        return Ok(ItemOutcome::Skipped("res.partner has no opt_out field".into()));
    }
    info!("Deactivating partner mailing");
    let ids = session
        .search("res.partner", vec![domain_term("opt_out", "=", false)])
        .await?;
    if !ids.is_empty() {
        debug!("Partner ids {:?}", ids);
        session.write("res.partner", &ids, set("opt_out", true)).await?;
    }
    Ok(written(&ids))
}

async fn disable_pac(session: &Session) -> Result<ItemOutcome, RpcError> {
    let installed = session
        .search("ir.model", vec![domain_term("model", "=", "params.pac")])
        .await?;
    if installed.is_empty() {
        return Ok(ItemOutcome::Skipped("model params.pac is not installed".into()));
    }
    info!("Deactivating PAC params");
    let ids = session
        .search("params.pac", vec![domain_term("active", "=", true)])
        .await?;
    if !ids.is_empty() {
        debug!("Pac ids {:?}", ids);
        session.write("params.pac", &ids, set("active", false)).await?;
    }
    Ok(written(&ids))
}

async fn disable_crons(session: &Session, attempts: u32) -> Result<ItemOutcome, RpcError> {
    info!("Deactivating cron jobs");
    let ids = session
        .search(
            "ir.cron",
            vec![
                domain_term("model", "!=", AUTOVACUUM_MODEL),
                domain_term("active", "=", true),
            ],
        )
        .await?;
    if !ids.is_empty() {
        debug!("Cron ids {:?}", ids);
        retry_transient(attempts, || session.write("ir.cron", &ids, set("active", false))).await?;
    }
    Ok(written(&ids))
}

/// Sanitizes a database through the application server. Each step is
/// reported on its own; a failing step does not stop the others.
pub async fn deactivate_rpc(session: &Session, cron_attempts: u32) -> BatchReport {
    let mut report = BatchReport::new();
    let steps = [
        ("out_mail", disable_mail_servers(session).await),
        ("partner", opt_out_partners(session).await),
        ("pac", disable_pac(session).await),
        ("cron", disable_crons(session, cron_attempts).await),
    ];
    for (name, result) in steps {
        let outcome = result.unwrap_or_else(|e| {
            error!("❌ {} failed: {}", name, e);
            ItemOutcome::Failed(e.to_string())
        });
        report.push(name, outcome);
    }
    report
}

/// Logs in as `user` on `database` and runs [`deactivate_rpc`].
pub async fn deactivate_database_rpc(
    client: &RpcClient,
    database: &str,
    user: &str,
    password: &str,
    cron_attempts: u32,
) -> Result<BatchReport> {
    let exists = client
        .database_exists(database)
        .await
        .with_context(|| format!("Cannot connect to the application server at {}", client.base_url()))?;
    if !exists {
        bail!("Database '{database}' does not exist, check name and try again");
    }
    let session = client
        .login(database, user, password)
        .await
        .with_context(|| format!("Login to {database} failed"))?;
    info!("Logged in to {} as uid {}", session.database(), session.uid());
    Ok(deactivate_rpc(&session, cron_attempts).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault(code: i64, message: &str) -> RpcError {
        RpcError::Fault { code, message: message.to_string() }
    }

    #[tokio::test]
    async fn transient_faults_are_retried_until_success() {
        let mut calls = 0;
        let result = retry_transient(3, || {
            calls += 1;
            let call = calls;
            async move {
                if call < 3 {
                    Err(fault(1, "could not serialize access due to concurrent update"))
                } else {
                    Ok(call)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let mut calls = 0;
        let result: Result<(), RpcError> = retry_transient(3, || {
            calls += 1;
            async { Err(fault(1, "busy")) }
        })
        .await;
        assert!(matches!(result, Err(RpcError::Fault { code: 1, .. })));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn other_faults_fail_immediately() {
        let mut calls = 0;
        let result: Result<(), RpcError> = retry_transient(3, || {
            calls += 1;
            async { Err(fault(2, "AccessDenied")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let mut calls = 0;
        let result = retry_transient(0, || {
            calls += 1;
            async { Ok::<_, RpcError>("done") }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 1);
    }

    #[test]
    fn write_values_are_single_member_structs() {
        let values = set("active", false);
        assert_eq!(values.len(), 1);
        assert_eq!(values["active"], Value::Bool(false));
    }
}
