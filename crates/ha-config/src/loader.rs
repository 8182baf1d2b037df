//! YAML loading with tag substitution
//!
//! Three tags are resolved while loading:
//!
//! - `!include path` is replaced by the contents of another file, relative
//!   to the file that includes it
//! - `!secret key` is replaced by a value from `secrets.yaml`
//! - `!env_var NAME [default]` is replaced by an environment variable
//!
//! Any other tag is kept on the value untouched.

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Include,
    Secret,
    EnvVar,
}

impl Tag {
    fn from_tagged(tagged: &TaggedValue) -> Option<Self> {
        let name = tagged.tag.to_string();
        match name.trim_start_matches('!') {
            "include" => Some(Self::Include),
            "secret" => Some(Self::Secret),
            "env_var" => Some(Self::EnvVar),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Include => "!include",
            Self::Secret => "!secret",
            Self::EnvVar => "!env_var",
        }
    }
}

/// Loads YAML files from a configuration directory
pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files being loaded, outermost first
    chain: Vec<PathBuf>,
}

impl YamlLoader {
    /// Loader for `config_dir`, reading its `secrets.yaml`
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            chain: Vec::new(),
        }
    }

    /// Load a file; relative paths are taken from the configuration directory
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.config_dir.join(path.as_ref());
        self.read(path)
    }

    /// Load YAML text as if it were read from `source`
    pub fn load_string(&mut self, content: &str, source: &Path) -> ConfigResult<Value> {
        let source = self.config_dir.join(source);
        self.parse(content, &source)
    }

    fn read(&mut self, path: PathBuf) -> ConfigResult<Value> {
        if self.chain.contains(&path) {
            let mut cycle = self.chain.clone();
            cycle.push(path);
            return Err(ConfigError::IncludeCycle(cycle));
        }

        debug!("Loading {:?}", path);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        self.chain.push(path.clone());
        let loaded = self.parse(&content, &path);
        self.chain.pop();
        loaded
    }

    /// `path` is where `content` came from, already joined to the config dir
    fn parse(&mut self, content: &str, path: &Path) -> ConfigResult<Value> {
        let value = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;

        let base = path.parent().unwrap_or(&self.config_dir).to_path_buf();
        self.resolve(value, &base)
    }

    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn resolve(&mut self, value: Value, base: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => match Tag::from_tagged(&tagged) {
                Some(tag) => self.substitute(tag, tagged.value, base),
                None => {
                    let TaggedValue { tag, value } = *tagged;
                    let value = self.resolve(value, base)?;
                    Ok(Value::Tagged(Box::new(TaggedValue { tag, value })))
                }
            },
            Value::Mapping(map) => {
                let mut resolved = Mapping::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(self.resolve(key, base)?, self.resolve(value, base)?);
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.resolve(item, base))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            scalar => Ok(scalar),
        }
    }

    fn substitute(&mut self, tag: Tag, argument: Value, base: &Path) -> ConfigResult<Value> {
        let argument = string_argument(tag, argument)?;
        trace!("Resolving {} {}", tag.name(), argument);

        match tag {
            Tag::Include => self.read(base.join(argument)),
            Tag::Secret => self
                .secrets
                .get(&argument)
                .map(|secret| Value::String(secret.to_string())),
            Tag::EnvVar => env_var(&argument).map(Value::String),
        }
    }
}

fn string_argument(tag: Tag, argument: Value) -> ConfigResult<String> {
    match argument {
        Value::String(s) => Ok(s.trim().to_string()),
        other => Err(ConfigError::TagArgument {
            tag: tag.name(),
            found: serde_yaml::to_string(&other)
                .map(|s| s.trim_end().to_string())
                .unwrap_or_default(),
        }),
    }
}

/// `NAME` or `NAME default`; the default is everything after the name
fn env_var(argument: &str) -> ConfigResult<String> {
    let (name, default) = match argument.split_once(char::is_whitespace) {
        Some((name, default)) => (name, Some(default.trim())),
        None => (argument, None),
    };

    match (std::env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => {
            debug!("{} not set, using its default", name);
            Ok(default.to_string())
        }
        (Err(_), None) => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

/// Load `file` from `config_dir` with tags resolved
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}

/// Load YAML text with tags resolved; includes are relative to `config_dir`
pub fn load_yaml_string(
    config_dir: impl Into<PathBuf>,
    content: &str,
    source_name: &str,
) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_string(content, Path::new(source_name))
}
