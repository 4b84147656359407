use anyhow::{Context, Result};
use ::config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Loads configuration from a file into a struct.
/// Supports TOML, YAML, JSON, etc. based on file extension.
///
/// Values can be overridden from the environment with `{env_prefix}__KEY`,
/// nested keys separated by `__` (e.g. `MULTIFAUCET__HTTP_PORT=9000`).
pub fn load_config<T: DeserializeOwned, P: AsRef<Path>>(path: P, env_prefix: &str) -> Result<T> {
    let path_str = path.as_ref().to_str().context("Invalid config path")?;

    let settings = Config::builder()
        .add_source(File::with_name(path_str))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("Failed to build configuration from {}", path_str))?;

    settings
        .try_deserialize::<T>()
        .context("Failed to deserialize configuration")
}
