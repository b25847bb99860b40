// instancetool/src/config/app_file.rs
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use super::{ConnectionDescriptor, DescriptorSource, is_unset, parse_port};
use crate::errors::ConfigError;

const OPTIONS_SECTION: &str = "options";

/// Builds a descriptor from the application's ini-style configuration file.
///
/// `db_host` left empty (or set to an unset sentinel such as `False`) means
/// `localhost`, and an unset `db_port` means 5432.
pub fn from_config_file(path: &Path) -> Result<ConnectionDescriptor, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            error!("configuration file \"{}\" not found", path.display());
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let options = parse_section(&content, OPTIONS_SECTION)
        .ok_or_else(|| ConfigError::MissingOptions(path.to_path_buf()))?;
    let value = |key: &str| options.get(key).map(String::as_str).unwrap_or("");

    let db_host = if is_unset(value("db_host")) {
        "localhost".to_string()
    } else {
        value("db_host").trim().to_string()
    };
    let set_or_none = |key: &str| {
        let v = value(key);
        (!is_unset(v)).then(|| v.trim().to_string())
    };

    let descriptor = ConnectionDescriptor {
        db_host,
        db_port: parse_port(value("db_port"))?,
        db_user: set_or_none("db_user"),
        db_password: set_or_none("db_password"),
        database: None,
        data_dir: set_or_none("data_dir").map(PathBuf::from),
        pg_bin_dir: None,
        source: DescriptorSource::ConfigFile(path.to_path_buf()),
    };
    debug!(
        "Parsed {}: host={} port={} user={:?} data_dir={:?}",
        path.display(),
        descriptor.db_host,
        descriptor.db_port,
        descriptor.db_user,
        descriptor.data_dir
    );
    Ok(descriptor)
}

/// `data_dir` from the `[options]` section of a config file's content.
pub(crate) fn data_dir_from_content(content: &str) -> Option<PathBuf> {
    parse_section(content, OPTIONS_SECTION)?
        .get("data_dir")
        .filter(|dir| !is_unset(dir))
        .map(PathBuf::from)
}

/// Returns the keys of one `[section]`, lower-cased, or `None` when the
/// section is absent.
pub(crate) fn parse_section(content: &str, wanted: &str) -> Option<HashMap<String, String>> {
    let mut current: Option<String> = None;
    let mut found = false;
    let mut values = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            found |= name == wanted;
            current = Some(name);
            continue;
        }
        if current.as_deref() != Some(wanted) {
            continue;
        }
        let split_at = line.find(|c: char| c == '=' || c == ':');
        if let Some(index) = split_at {
            let (key, rest) = line.split_at(index);
            values.insert(key.trim().to_lowercase(), rest[1..].trim().to_string());
        }
    }

    found.then_some(values)
}
