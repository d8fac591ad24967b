//! `xrdmux config` and config resolution for the other commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use xrd_core::config::{self, load_config, save_config};
use xrd_core::{ClientConfig, ConfigError};

use crate::output::{print_error, print_info, print_success, print_warning};

fn resolve(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Load the client configuration.
///
/// An explicit path must exist and parse. The default path is optional; a
/// broken file there is reported and replaced by defaults.
pub fn load_client_config(config_path: Option<&Path>) -> Result<ClientConfig> {
    if let Some(path) = config_path {
        return load_config(path).with_context(|| format!("Failed to load config from {:?}", path));
    }

    let path = config::default_config_path();
    match load_config(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => {
            tracing::debug!("no config at {:?}, using defaults", path);
            Ok(ClientConfig::default())
        }
        Err(e) => {
            tracing::warn!("Failed to load config from {:?}: {}", path, e);
            Ok(ClientConfig::default())
        }
    }
}

/// Print the config file location
pub fn config_path(config_path: Option<&Path>) {
    println!("{}", resolve(config_path).display());
}

/// Print the effective configuration as TOML
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve(config_path);
    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file at {:?}; showing defaults", path));
    }

    let config = load_client_config(config_path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
    println!("{}", rendered);
    Ok(())
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve(config_path);
    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    save_config(&path, &ClientConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}
