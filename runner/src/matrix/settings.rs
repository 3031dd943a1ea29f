use super::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("setting `{0}` is not declared by the job")]
    Unknown(String),
    #[error("setting `{0}` is required but missing")]
    Missing(String),
    #[error("setting `{key}` must be {expected}, found {found}")]
    WrongKind {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

/// Shared, non-expanded values of a matrix
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings(BTreeMap<String, Value>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    fn typed<'a, T>(
        &'a self,
        key: &str,
        expected: ValueKind,
        convert: impl Fn(&'a Value) -> Option<T>,
    ) -> Result<T, SettingsError> {
        let value = self
            .0
            .get(key)
            .ok_or_else(|| SettingsError::Missing(key.to_owned()))?;

        convert(value).ok_or_else(|| SettingsError::WrongKind {
            key: key.to_owned(),
            expected,
            found: value.kind(),
        })
    }

    pub fn bool(&self, key: &str) -> Result<bool, SettingsError> {
        self.typed(key, ValueKind::Bool, Value::as_bool)
    }

    pub fn i64(&self, key: &str) -> Result<i64, SettingsError> {
        self.typed(key, ValueKind::Int, Value::as_i64)
    }

    pub fn f64(&self, key: &str) -> Result<f64, SettingsError> {
        self.typed(key, ValueKind::Float, Value::as_f64)
    }

    pub fn str(&self, key: &str) -> Result<&str, SettingsError> {
        self.typed(key, ValueKind::String, Value::as_str)
    }

    /// Check every key and kind against `schema`, collecting all problems instead of stopping
    /// at the first one
    pub fn validate(&self, schema: &SettingsSchema) -> Result<(), Vec<SettingsError>> {
        let mut errors = Vec::new();

        for (key, value) in self.0.iter() {
            match schema.fields.get(key) {
                None => errors.push(SettingsError::Unknown(key.clone())),
                Some(field) if !field.accepts(value.kind()) => {
                    errors.push(SettingsError::WrongKind {
                        key: key.clone(),
                        expected: field.kind,
                        found: value.kind(),
                    })
                }
                Some(_) => {}
            }
        }

        for (key, field) in schema.fields.iter() {
            if field.required && !self.0.contains_key(key) {
                errors.push(SettingsError::Missing(key.clone()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl FromIterator<(String, Value)> for Settings {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingField {
    pub kind: ValueKind,
    pub required: bool,
}

impl SettingField {
    fn accepts(&self, found: ValueKind) -> bool {
        found == self.kind || (self.kind == ValueKind::Float && found == ValueKind::Int)
    }
}

/// Settings keys a job understands, declared when the job is registered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsSchema {
    fields: BTreeMap<String, SettingField>,
}

impl SettingsSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.insert(
            key.into(),
            SettingField {
                kind,
                required: true,
            },
        );
        self
    }

    pub fn optional(mut self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.insert(
            key.into(),
            SettingField {
                kind,
                required: false,
            },
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        let mut settings = Settings::new();
        settings.insert("epochs", 10);
        settings.insert("rate", 0.5);
        settings.insert("name", "baseline");
        settings
    }

    #[test]
    fn typed_access() {
        let settings = settings();

        assert_eq!(settings.i64("epochs"), Ok(10));
        assert_eq!(settings.f64("epochs"), Ok(10.0));
        assert_eq!(settings.str("name"), Ok("baseline"));
        assert_eq!(
            settings.i64("name"),
            Err(SettingsError::WrongKind {
                key: "name".to_owned(),
                expected: ValueKind::Int,
                found: ValueKind::String,
            })
        );
        assert_eq!(
            settings.bool("verbose"),
            Err(SettingsError::Missing("verbose".to_owned()))
        );
    }

    #[test]
    fn schema_catches_typos_and_kinds() {
        let schema = SettingsSchema::new()
            .required("epochs", ValueKind::Int)
            .optional("rate", ValueKind::Float)
            .required("seed", ValueKind::Int);

        let errors = settings().validate(&schema).unwrap_err();

        assert_eq!(
            errors,
            vec![
                SettingsError::Unknown("name".to_owned()),
                SettingsError::Missing("seed".to_owned()),
            ]
        );
    }

    #[test]
    fn float_fields_accept_integers() {
        let schema = SettingsSchema::new()
            .required("epochs", ValueKind::Float)
            .optional("rate", ValueKind::Float)
            .optional("name", ValueKind::String);

        assert!(settings().validate(&schema).is_ok());
    }
}
