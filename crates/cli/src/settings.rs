// Configuration loading: conveyor.toml layered under CONVEYOR__* environment variables

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use conveyor_core::config::QueueConfig;
use std::path::Path;

/// Looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "conveyor.toml";

const ENV_PREFIX: &str = "CONVEYOR";

/// Load the queue configuration
///
/// An explicit `path` must exist; the default file is optional. Environment
/// variables win over the file, e.g. `CONVEYOR__WORKER__CONCURRENCY=4`.
pub fn load(path: Option<&Path>) -> Result<QueueConfig> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let mut config: QueueConfig = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("queue_names"),
        )
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Invalid configuration")?;

    config.connection.database_url = expand_database_url(&config.connection.database_url);
    Ok(config)
}

/// Expand `~` in the path part of a `sqlite://` URL
pub fn expand_database_url(url: &str) -> String {
    match url.strip_prefix("sqlite://") {
        Some(path) => format!("sqlite://{}", shellexpand::tilde(path)),
        None => url.to_string(),
    }
}

/// Create the directory holding a file database, if there is one
pub fn ensure_database_dir(url: &str) -> Result<()> {
    let Some(path) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.contains(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}
