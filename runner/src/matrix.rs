pub mod settings;
pub mod value;

#[cfg(test)]
mod expand_test;

pub use settings::{SettingField, Settings, SettingsError, SettingsSchema};
pub use value::{Reference, Value, ValueKind};

use crate::fingerprint::{fingerprint, Fingerprint};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};

/// name which may not be used as a parameter, it is reserved for the shared settings
pub const RESERVED_PARAMETER: &str = "settings";

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("matrix must contain a non-empty `parameters` mapping")]
    MissingParameters,
    #[error("`{0}` is a reserved parameter name")]
    ReservedName(String),
    #[error("exclude rule {index} references unknown parameter `{key}`")]
    UnknownExcludeKey { index: usize, key: String },
    #[error("keys must be strings, found {0}")]
    InvalidKey(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("parameter `{0}` must be a list of values")]
    NotAList(String),
    #[error("failed to read matrix file")]
    Read(#[from] std::io::Error),
    #[error("failed to parse matrix document: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Declarative parameter grid with shared settings and exclusion rules
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    pub parameters: IndexMap<String, Vec<Value>>,
    pub settings: Settings,
    pub exclude: Vec<IndexMap<String, Value>>,
}

/// Raw shape of a matrix document, values are converted with [`Value::from_yaml`]
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct MatrixDocument {
    parameters: Option<serde_yaml::Mapping>,
    #[serde(default)]
    settings: serde_yaml::Mapping,
    #[serde(default)]
    exclude: Vec<serde_yaml::Mapping>,
}

impl Matrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameter<V: Into<Value>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.parameters
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn setting(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(name, value);
        self
    }

    pub fn exclude<K: Into<String>, V: Into<Value>>(
        mut self,
        rule: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.exclude.push(
            rule.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, MatrixError> {
        let document: MatrixDocument = serde_yaml::from_str(input)?;
        let parameters = document.parameters.ok_or(MatrixError::MissingParameters)?;

        let parameters = parameters
            .iter()
            .map(|(key, values)| {
                let key = key
                    .as_str()
                    .ok_or_else(|| MatrixError::InvalidKey(format!("{key:?}")))?;

                match values {
                    serde_yaml::Value::Sequence(values) => Ok((
                        key.to_owned(),
                        values
                            .iter()
                            .map(Value::from_yaml)
                            .collect::<Result<Vec<_>, _>>()?,
                    )),
                    _ => Err(MatrixError::NotAList(key.to_owned())),
                }
            })
            .collect::<Result<IndexMap<_, _>, MatrixError>>()?;

        let settings = Value::map_from_yaml(&document.settings)?
            .into_iter()
            .collect::<Settings>();

        let exclude = document
            .exclude
            .iter()
            .map(|rule| {
                rule.iter()
                    .map(|(key, value)| {
                        let key = key
                            .as_str()
                            .ok_or_else(|| MatrixError::InvalidKey(format!("{key:?}")))?;

                        Ok((key.to_owned(), Value::from_yaml(value)?))
                    })
                    .collect::<Result<IndexMap<_, _>, MatrixError>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            parameters,
            settings,
            exclude,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MatrixError> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    /// Setup-time checks, run before anything is expanded or scheduled
    pub fn validate(&self) -> Result<(), MatrixError> {
        if self.parameters.is_empty() {
            return Err(MatrixError::MissingParameters);
        }

        if self.parameters.contains_key(RESERVED_PARAMETER) {
            return Err(MatrixError::ReservedName(RESERVED_PARAMETER.to_owned()));
        }

        for (name, values) in self.parameters.iter() {
            if values.is_empty() {
                warn!("Parameter {name} has no values, the matrix expands to nothing");
            }
        }

        for (index, rule) in self.exclude.iter().enumerate() {
            if let Some(key) = rule.keys().find(|key| !self.parameters.contains_key(*key)) {
                return Err(MatrixError::UnknownExcludeKey {
                    index,
                    key: key.clone(),
                });
            }
        }

        Ok(())
    }

    /// Cartesian product over `parameters` in declared order (last key varies fastest) minus
    /// every combination matching at least one exclude rule
    pub fn expand(&self) -> Result<Vec<Configuration>, MatrixError> {
        self.validate()?;

        let settings = Arc::new(self.settings.clone());
        let names = self.parameters.keys().collect_vec();

        let configurations = self
            .parameters
            .values()
            .map(|values| values.iter())
            .multi_cartesian_product()
            .map(|combination| {
                names
                    .iter()
                    .map(|name| (*name).clone())
                    .zip(combination.into_iter().cloned())
                    .collect::<IndexMap<_, _>>()
            })
            .filter(|values| !self.exclude.iter().any(|rule| matches(rule, values)))
            .map(|values| Configuration {
                values,
                settings: settings.clone(),
            })
            .collect_vec();

        debug!(
            "Expanded {} parameters into {} configurations",
            names.len(),
            configurations.len()
        );

        Ok(configurations)
    }

    /// number of combinations before exclusion
    pub fn size(&self) -> usize {
        self.parameters.values().map(Vec::len).product()
    }
}

/// every key of the rule must equal the configuration's value, missing keys are wildcards
fn matches(rule: &IndexMap<String, Value>, values: &IndexMap<String, Value>) -> bool {
    rule.iter()
        .all(|(key, expected)| values.get(key) == Some(expected))
}

/// One concrete assignment drawn from a [`Matrix`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    values: IndexMap<String, Value>,
    settings: Arc<Settings>,
}

impl Configuration {
    pub fn new(values: IndexMap<String, Value>, settings: Arc<Settings>) -> Self {
        Self { values, settings }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn shares_settings(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.settings, &other.settings)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(self)
    }
}

/// Human readable form for logs, never used for identity
impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (key, value)) in self.values.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        f.write_str("}")
    }
}
