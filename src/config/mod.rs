// instancetool/src/config/mod.rs
pub(crate) mod app_file; // Application ini file (`[options]` section)
pub(crate) mod docker; // Descriptor discovery from a running container

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::ConfigError;

pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_SETTINGS_FILE: &str = "instancetool.json";

/// Where a descriptor came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorSource {
    ConfigFile(PathBuf),
    Container(ContainerSource),
    Flags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSource {
    pub id: String,
    /// Data directory as seen from inside the container.
    pub data_dir: PathBuf,
    /// System user owning the attachments inside the container.
    pub owner: String,
}

/// Normalized connection record consumed by the dump/restore driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub database: Option<String>,
    pub data_dir: Option<PathBuf>,
    /// Directory holding `pg_dump`, `psql` and friends; `PATH` when unset.
    pub pg_bin_dir: Option<PathBuf>,
    pub source: DescriptorSource,
}

impl ConnectionDescriptor {
    pub fn from_flags(
        host: Option<String>,
        port: Option<u16>,
        user: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            db_host: host
                .filter(|h| !is_unset(h))
                .unwrap_or_else(|| "localhost".to_string()),
            db_port: port.unwrap_or(DEFAULT_DB_PORT),
            db_user: user.filter(|u| !is_unset(u)),
            db_password: password.filter(|p| !is_unset(p)),
            database: None,
            data_dir: None,
            pg_bin_dir: None,
            source: DescriptorSource::Flags,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_pg_bin_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.pg_bin_dir = dir;
        self
    }

    pub fn require_database(&self) -> Result<&str, ConfigError> {
        self.database
            .as_deref()
            .filter(|db| !db.trim().is_empty())
            .ok_or(ConfigError::DatabaseNotSet)
    }

    /// `<data_dir>/filestore/<database>`, when both are known.
    pub fn filestore_dir(&self) -> Option<PathBuf> {
        let data_dir = self.data_dir.as_ref()?;
        let database = self.database.as_ref()?;
        Some(data_dir.join("filestore").join(database))
    }

    pub fn container(&self) -> Option<&ContainerSource> {
        match &self.source {
            DescriptorSource::Container(container) => Some(container),
            _ => None,
        }
    }
}

/// Values the application writes for "not configured".
pub fn is_unset(value: &str) -> bool {
    let value = value.trim();
    value.is_empty()
        || value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("none")
        || value.eq_ignore_ascii_case("unset")
}

pub fn parse_port(value: &str) -> Result<u16, ConfigError> {
    if is_unset(value) {
        return Ok(DEFAULT_DB_PORT);
    }
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidPort(value.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostRewrite {
    pub from: String,
    pub to: String,
}

/// Tool-level settings, read from an optional JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Container-reported database hosts that must be replaced when the tool
    /// runs on the docker host (bridge gateway addresses and the like).
    pub host_rewrites: Vec<HostRewrite>,
    /// Path fragment identifying the application's data directory mount.
    pub data_dir_fragment: String,
    /// Data directory used inside a container when no mount matches.
    pub container_data_dir: PathBuf,
    pub container_owner: String,
    pub docker_binary: String,
    /// PostgreSQL client tools directory, e.g. `/usr/lib/postgresql/16/bin`.
    pub pg_bin_dir: Option<PathBuf>,
    pub cron_write_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host_rewrites: vec![HostRewrite {
                from: "172.17.42.1".to_string(),
                to: "127.0.0.1".to_string(),
            }],
            data_dir_fragment: ".local/share/Odoo".to_string(),
            container_data_dir: PathBuf::from("/home/odoo/.local/share/Odoo"),
            container_owner: "odoo".to_string(),
            docker_binary: "docker".to_string(),
            pg_bin_dir: None,
            cron_write_attempts: 3,
        }
    }
}

impl Settings {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            debug!("No settings file at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read settings file at {}", config_path.display()))?;
        let settings: Settings = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from settings file at {}",
                config_path.display()
            )
        })?;
        info!("Loaded settings from {}", config_path.display());
        Ok(settings)
    }

    pub fn rewrite_host(&self, host: &str) -> String {
        self.host_rewrites
            .iter()
            .find(|rule| rule.from == host)
            .map(|rule| {
                debug!("Rewriting database host {} to {}", rule.from, rule.to);
                rule.to.clone()
            })
            .unwrap_or_else(|| host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn unset_sentinels() {
        for value in ["", "  ", "False", "false", "None", "unset", "UNSET"] {
            assert!(is_unset(value), "{value:?} should be unset");
        }
        assert!(!is_unset("db.internal"));
    }

    #[test]
    fn port_defaults_and_validation() {
        assert_eq!(parse_port("").unwrap(), 5432);
        assert_eq!(parse_port("False").unwrap(), 5432);
        assert_eq!(parse_port(" 6543 ").unwrap(), 6543);
        assert!(matches!(parse_port("abc"), Err(ConfigError::InvalidPort(_))));
    }

    #[test]
    fn flags_descriptor_defaults() {
        let descriptor = ConnectionDescriptor::from_flags(None, None, Some("odoo".into()), Some("False".into()));
        assert_eq!(descriptor.db_host, "localhost");
        assert_eq!(descriptor.db_port, DEFAULT_DB_PORT);
        assert_eq!(descriptor.db_user.as_deref(), Some("odoo"));
        assert_eq!(descriptor.db_password, None);
        assert_eq!(descriptor.source, DescriptorSource::Flags);
        assert!(matches!(descriptor.require_database(), Err(ConfigError::DatabaseNotSet)));
    }

    #[test]
    fn filestore_dir_needs_data_dir_and_database() {
        let mut descriptor = ConnectionDescriptor::from_flags(None, None, None, None).with_database("acme");
        assert_eq!(descriptor.filestore_dir(), None);

        descriptor.data_dir = Some(PathBuf::from("/data"));
        assert_eq!(
            descriptor.filestore_dir(),
            Some(PathBuf::from("/data/filestore/acme"))
        );
        assert_eq!(descriptor.require_database().unwrap(), "acme");
    }

    #[test]
    fn settings_default_when_file_missing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = Settings::load_from_json(&dir.path().join("missing.json"))?;
        assert_eq!(settings.cron_write_attempts, 3);
        assert_eq!(settings.rewrite_host("172.17.42.1"), "127.0.0.1");
        assert_eq!(settings.rewrite_host("db"), "db");
        Ok(())
    }

    #[test]
    fn settings_partial_file_keeps_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.json");
        let mut file = fs::File::create(&path)?;
        writeln!(
            file,
            r#"{{"host_rewrites": [{{"from": "10.0.0.1", "to": "127.0.0.1"}}], "docker_binary": "podman"}}"#
        )?;

        let settings = Settings::load_from_json(&path)?;
        assert_eq!(settings.docker_binary, "podman");
        assert_eq!(settings.rewrite_host("10.0.0.1"), "127.0.0.1");
        assert_eq!(settings.rewrite_host("172.17.42.1"), "172.17.42.1");
        assert_eq!(settings.data_dir_fragment, ".local/share/Odoo");
        assert_eq!(settings.pg_bin_dir, None);
        Ok(())
    }
}
