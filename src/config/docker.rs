// instancetool/src/config/docker.rs
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, error, warn};

use super::app_file::data_dir_from_content;
use super::{
    ConnectionDescriptor, ContainerSource, DescriptorSource, Settings, is_unset, parse_port,
};
use crate::errors::ConfigError;
use crate::utils::docker::DockerCli;

/// Environment variable naming the application's config file in the image.
const CONFIG_FILE_VAR: &str = "ODOO_CONFIG_FILE";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Inspected {
    config: InspectedConfig,
    #[serde(default)]
    mounts: Vec<Mount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedConfig {
    #[serde(default)]
    env: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Mount {
    #[serde(default)]
    source: String,
    destination: String,
}

/// Resolves a descriptor from a running container's environment and mounts.
/// Nothing is cached; every call inspects the container again.
pub fn from_container(container: &str, settings: &Settings) -> Result<ConnectionDescriptor, ConfigError> {
    let docker = DockerCli::new(&settings.docker_binary);
    let raw = docker.inspect(container)?;
    descriptor_from_inspect(container, &raw, settings, |config_file| {
        docker
            .read_file(container, config_file)
            .map_err(|e| error!("Could not get the config file '{}': {:#}", config_file, e))
            .ok()
    })
}

/// `read_config` fetches the application's config file from inside the
/// container; its `data_dir` is where attachments live there.
pub(crate) fn descriptor_from_inspect(
    container: &str,
    raw: &str,
    settings: &Settings,
    read_config: impl FnOnce(&str) -> Option<String>,
) -> Result<ConnectionDescriptor, ConfigError> {
    let inspected: Vec<Inspected> = serde_json::from_str(raw)?;
    let inspected = inspected
        .into_iter()
        .next()
        .ok_or_else(|| ConfigError::NoSuchContainer(container.to_string()))?;

    let env: HashMap<String, String> = inspected
        .config
        .env
        .unwrap_or_default()
        .into_iter()
        .filter_map(|var| {
            var.split_once('=')
                .map(|(name, value)| (name.to_string(), value.to_string()))
        })
        .collect();
    let var = |name: &str| env.get(name).filter(|v| !is_unset(v)).cloned();

    let db_host = var("DB_HOST")
        .map(|host| settings.rewrite_host(&host))
        .unwrap_or_else(|| "localhost".to_string());
    let db_port = parse_port(env.get("DB_PORT").map(String::as_str).unwrap_or(""))?;

    let data_mount = inspected
        .mounts
        .iter()
        .find(|mount| mount.destination.contains(&settings.data_dir_fragment) && !mount.source.is_empty());
    let (data_dir, mounted_data_dir) = match data_mount {
        Some(mount) => {
            debug!("Data directory {} mounted from {}", mount.destination, mount.source);
            (Some(PathBuf::from(&mount.source)), Some(PathBuf::from(&mount.destination)))
        }
        None => {
            error!(
                "The attachments directory was not mounted from the host, won't be able to back up attachments"
            );
            (None, None)
        }
    };

    let configured_data_dir = match var(CONFIG_FILE_VAR) {
        Some(config_file) => {
            let dir = read_config(&config_file).and_then(|content| data_dir_from_content(&content));
            if dir.is_none() {
                warn!("No data_dir in {} of container {}", config_file, container);
            }
            dir
        }
        None => None,
    };
    let container_data_dir = configured_data_dir.or(mounted_data_dir).unwrap_or_else(|| {
        warn!(
            "Datadir not found in container {}, assuming {}",
            container,
            settings.container_data_dir.display()
        );
        settings.container_data_dir.clone()
    });

    Ok(ConnectionDescriptor {
        db_host,
        db_port,
        db_user: var("DB_USER").or_else(|| Some("odoo".to_string())),
        db_password: var("DB_PASSWORD"),
        database: None,
        data_dir,
        pg_bin_dir: None,
        source: DescriptorSource::Container(ContainerSource {
            id: container.to_string(),
            data_dir: container_data_dir,
            owner: var("ODOO_USER").unwrap_or_else(|| settings.container_owner.clone()),
        }),
    })
}
