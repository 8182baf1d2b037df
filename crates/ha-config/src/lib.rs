//! YAML configuration loading
//!
//! `configuration.yaml` is read with three tags resolved: `!include path`,
//! `!secret key` and `!env_var NAME [default]`. Components then pull their
//! own top-level section out of the result.
//!
//! # Example
//!
//! ```ignore
//! use ha_config::{component_config, load_configuration};
//!
//! let root = load_configuration("/config")?;
//! let hub: XiaozhiConfig = component_config(&root, "xiaozhi")?;
//! ```

mod component;
mod error;
mod loader;
mod secrets;

pub use component::{component_config, load_configuration, CONFIG_FILE};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, load_yaml_string, YamlLoader};
pub use secrets::{Secrets, SECRETS_FILE};

pub use serde_yaml::Value;
