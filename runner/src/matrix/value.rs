use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

use super::MatrixError;

/// A single parameter or settings value.
///
/// Literals are compared and fingerprinted by content. Anything that stands for code (a model
/// type, a preprocessing pipeline, ...) is a [`Reference`] to an id registered in the
/// [`Registry`](crate::registry::Registry), so it keeps the same identity across processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Ref(Reference),
}

/// Reference to a registered component, optionally with (recursively canonical) arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    List,
    Map,
    Ref,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::List => "list",
            Self::Map => "map",
            Self::Ref => "ref",
        };

        f.write_str(name)
    }
}

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::String(_) => ValueKind::String,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
            Self::Ref(_) => ValueKind::Ref,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// integers are widened, everything else is `None`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Self::Ref(reference) => Some(reference),
            _ => None,
        }
    }

    /// visit every reference contained in this value, including nested arguments
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a Reference>) {
        match self {
            Self::List(values) => values
                .iter()
                .for_each(|value| value.collect_references(found)),
            Self::Map(map) => map
                .values()
                .for_each(|value| value.collect_references(found)),
            Self::Ref(reference) => {
                found.push(reference);
                reference
                    .args
                    .values()
                    .for_each(|value| value.collect_references(found));
            }
            _ => {}
        }
    }

    /// Convert a YAML node. References are written as `!ref id` or
    /// `!ref { id: ..., args: { ... } }`.
    pub fn from_yaml(yaml: &serde_yaml::Value) -> Result<Self, MatrixError> {
        match yaml {
            serde_yaml::Value::Null => Ok(Self::Null),
            serde_yaml::Value::Bool(value) => Ok(Self::Bool(*value)),
            serde_yaml::Value::Number(number) => {
                if let Some(value) = number.as_i64() {
                    Ok(Self::Int(value))
                } else {
                    // u64 beyond i64::MAX and real numbers
                    number
                        .as_f64()
                        .map(Self::Float)
                        .ok_or_else(|| MatrixError::InvalidValue(number.to_string()))
                }
            }
            serde_yaml::Value::String(value) => Ok(Self::String(value.clone())),
            serde_yaml::Value::Sequence(sequence) => sequence
                .iter()
                .map(Self::from_yaml)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            serde_yaml::Value::Mapping(mapping) => Self::map_from_yaml(mapping).map(Self::Map),
            serde_yaml::Value::Tagged(tagged) => {
                if tagged.tag != "ref" {
                    return Err(MatrixError::InvalidValue(format!(
                        "unsupported tag {}",
                        tagged.tag
                    )));
                }

                match &tagged.value {
                    serde_yaml::Value::String(id) => Ok(Self::Ref(Reference::new(id.clone()))),
                    serde_yaml::Value::Mapping(mapping) => {
                        let mut fields = Self::map_from_yaml(mapping)?;
                        let id = match fields.remove("id") {
                            Some(Self::String(id)) => id,
                            _ => {
                                return Err(MatrixError::InvalidValue(
                                    "!ref mappings need a string `id`".to_owned(),
                                ))
                            }
                        };
                        let args = match fields.remove("args") {
                            Some(Self::Map(args)) => args,
                            None => BTreeMap::new(),
                            Some(other) => {
                                return Err(MatrixError::InvalidValue(format!(
                                    "!ref args must be a mapping, found {}",
                                    other.kind()
                                )))
                            }
                        };

                        if let Some(key) = fields.keys().next() {
                            return Err(MatrixError::InvalidValue(format!(
                                "unknown field `{key}` in !ref {id}"
                            )));
                        }

                        Ok(Self::Ref(Reference { id, args }))
                    }
                    other => Err(MatrixError::InvalidValue(format!(
                        "!ref expects an id or a mapping, found {other:?}"
                    ))),
                }
            }
        }
    }

    pub(crate) fn map_from_yaml(
        mapping: &serde_yaml::Mapping,
    ) -> Result<BTreeMap<String, Self>, MatrixError> {
        mapping
            .iter()
            .map(|(key, value)| {
                let key = key
                    .as_str()
                    .ok_or_else(|| MatrixError::InvalidKey(format!("{key:?}")))?;

                Ok((key.to_owned(), Self::from_yaml(value)?))
            })
            .collect()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::List(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => write_map(f, map),
            Self::Ref(reference) => write!(f, "{reference}"),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)?;

        if !self.args.is_empty() {
            write_map(f, &self.args)?;
        }

        Ok(())
    }
}

fn write_map(f: &mut fmt::Formatter<'_>, map: &BTreeMap<String, Value>) -> fmt::Result {
    f.write_str("{")?;
    for (index, (key, value)) in map.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{key}: {value}")?;
    }
    f.write_str("}")
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Reference> for Value {
    fn from(reference: Reference) -> Self {
        Self::Ref(reference)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}
