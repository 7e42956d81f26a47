use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ServerConfig;

/// Prefix for environment overrides, e.g. `QUAY__LISTEN_ADDR` or
/// `QUAY__FRONTEND__CONFIG_DIR`.
pub const ENV_PREFIX: &str = "QUAY";

/// Load configuration from a file using the config crate, then apply
/// environment overrides. Supports YAML, JSON and TOML.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously. The file must exist.
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    build(Path::new(config_path), true)
}

/// Like [`load_config_sync`], but a missing file falls back to defaults plus
/// environment overrides.
pub fn load_config_or_default(config_path: &str) -> Result<ServerConfig> {
    build(Path::new(config_path), false)
}

fn build(config_path: &Path, required: bool) -> Result<ServerConfig> {
    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Toml,
    };

    let path_str = config_path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?;

    let settings = Config::builder()
        .add_source(File::new(path_str, format).required(required))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("frontend.args"),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let server_config: ServerConfig = settings
        .try_deserialize()
        .with_context(|| {
            format!(
                "Failed to deserialize config from {}",
                config_path.display()
            )
        })?;

    Ok(server_config)
}
