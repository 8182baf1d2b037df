//! Top-level configuration file and per-component sections

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::path::Path;
use tracing::info;

/// Name of the main configuration file
pub const CONFIG_FILE: &str = "configuration.yaml";

/// Load `configuration.yaml` from `config_dir`
///
/// A missing file yields an empty mapping so the hub can run unconfigured.
pub fn load_configuration(config_dir: impl AsRef<Path>) -> ConfigResult<Value> {
    let config_dir = config_dir.as_ref();
    if !config_dir.join(CONFIG_FILE).exists() {
        info!("No {} in {:?}, using defaults", CONFIG_FILE, config_dir);
        return Ok(Value::Mapping(serde_yaml::Mapping::new()));
    }

    let mut loader = YamlLoader::new(config_dir)?;
    match loader.load_file(CONFIG_FILE)? {
        Value::Null => Ok(Value::Mapping(serde_yaml::Mapping::new())),
        value => Ok(value),
    }
}

/// Deserialize the top-level `domain` section of `root`
///
/// A missing or empty section gives `T::default()`.
pub fn component_config<T>(root: &Value, domain: &str) -> ConfigResult<T>
where
    T: DeserializeOwned + Default,
{
    let section = match root {
        Value::Mapping(map) => map.get(domain),
        Value::Null => None,
        _ => {
            return Err(ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: "configuration must be a mapping".to_string(),
            })
        }
    };

    match section {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_yaml::from_value(value.clone()).map_err(|e| ConfigError::InvalidValue {
                key: domain.to_string(),
                reason: e.to_string(),
            })
        }
    }
}
