//! Values for the `!secret` tag
//!
//! `secrets.yaml` is a flat mapping kept next to `configuration.yaml` so that
//! sockets, user ids and similar values can stay out of the shared file.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name looked up in the configuration directory
pub const SECRETS_FILE: &str = "secrets.yaml";

/// Secrets read from `secrets.yaml`
///
/// Every value is held as a string; numbers and booleans are converted on
/// load so that `!secret` always substitutes a scalar.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: HashMap<String, String>,
    /// Where the values came from; `None` when no file was read
    path: Option<PathBuf>,
}

impl Secrets {
    /// Read `<config_dir>/secrets.yaml`
    ///
    /// A missing or empty file gives an empty set.
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join(SECRETS_FILE);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No {:?}, continuing without secrets", path);
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        let secrets = Self::parse(&content, &path)?;
        debug!("Read {} secrets from {:?}", secrets.len(), path);
        Ok(secrets)
    }

    /// Parse secrets from YAML text; `path` is only used for errors
    pub fn parse(content: &str, path: &Path) -> ConfigResult<Self> {
        let parsed: Option<HashMap<String, Value>> =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;

        let values = parsed
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, scalar_string(value)))
            .collect();

        Ok(Self {
            values,
            path: Some(path.to_path_buf()),
        })
    }

    /// The value stored under `key`
    pub fn get(&self, key: &str) -> ConfigResult<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingSecret(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The file the secrets were read from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn scalar_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        // Nested values are kept as their YAML text
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
