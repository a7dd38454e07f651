use anyhow::{Context, Result};
use ::config::{Config, File};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Loads a file on top of `defaults`, so the file only needs to name the
/// keys it overrides. Supports TOML, YAML, JSON, etc. based on file extension.
pub fn load_config_over<T, P>(defaults: &T, path: P) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let base = Config::try_from(defaults).context("Failed to serialize default configuration")?;

    let settings = Config::builder()
        .add_source(base)
        .add_source(File::from(path))
        .build()
        .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

    settings.try_deserialize::<T>().context("Failed to deserialize configuration")
}
