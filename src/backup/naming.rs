// instancetool/src/backup/naming.rs
use chrono::{Local, NaiveDateTime};
use regex::Regex;
use std::sync::LazyLock;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

static TIMESTAMP_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)_(\d{8}_\d{6})$").expect("timestamp pattern is valid")
});

/// `database[_reason]_YYYYMMDD_HHMMSS`.
///
/// Whitespace and path separators in the reason are replaced with `-` so the
/// result stays a single file name.
pub fn generate_backup_name(database: &str, reason: Option<&str>, now: NaiveDateTime) -> String {
    let stamp = now.format(TIMESTAMP_FORMAT);
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => {
            let reason: String = reason
                .chars()
                .map(|c| if c.is_whitespace() || c == '/' { '-' } else { c })
                .collect();
            format!("{database}_{reason}_{stamp}")
        }
        None => format!("{database}_{stamp}"),
    }
}

pub fn backup_name_now(database: &str, reason: Option<&str>) -> String {
    generate_backup_name(database, reason, Local::now().naive_local())
}

/// File name without directory or `.tar.bz2`/`.tar.gz` suffix.
pub fn strip_archive_extension(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.strip_suffix(".tar.bz2")
        .or_else(|| base.strip_suffix(".tar.gz"))
        .unwrap_or(base)
}

/// The `YYYYMMDD_HHMMSS` token at the end of a backup name.
pub fn timestamp_token(name: &str) -> Option<&str> {
    TIMESTAMP_SUFFIX
        .captures(strip_archive_extension(name))
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str())
}

pub fn parse_backup_timestamp(name: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(timestamp_token(name)?, TIMESTAMP_FORMAT).ok()
}

/// The name without its leading database field, e.g. `pre-migration_20240115_093000`
/// for `acme_pre-migration_20240115_093000.tar.bz2`.
pub fn strip_database_prefix(name: &str) -> Option<&str> {
    strip_archive_extension(name)
        .split_once('_')
        .map(|(_, rest)| rest)
        .filter(|rest| !rest.is_empty())
}
