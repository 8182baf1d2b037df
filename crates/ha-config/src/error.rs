//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Why a configuration file could not be turned into a value
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration or secrets file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file is not valid YAML
    #[error("{path} is not valid YAML: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `!secret` names a key that `secrets.yaml` does not define
    #[error("secret '{0}' is not defined in secrets.yaml")]
    MissingSecret(String),

    /// `!env_var` without a default names an unset variable
    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    /// A file includes itself, directly or through other files
    #[error("include cycle: {}", display_chain(.0))]
    IncludeCycle(Vec<PathBuf>),

    /// A tag was given something other than a string
    #[error("{tag} expects a string, got {found}")]
    TagArgument { tag: &'static str, found: String },

    /// A section does not have the expected shape
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

fn display_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
