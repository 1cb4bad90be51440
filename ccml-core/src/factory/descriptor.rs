//! Declarative object descriptors and dotted paths.

use crate::error::{CcmlError, Result};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Keyword parameters passed to a constructor.
pub type Params = serde_json::Map<String, Value>;

const TYPE_KEY: &str = "type";
const FUNCTION_KEY: &str = "function";
const PARAMS_KEY: &str = "params";

/// How to obtain an object from the registry.
///
/// In configuration files this is either `{"type": "a.b.C", "params": {...}}`
/// or `{"function": "a.b.f"}`. When both keys are present `type` wins.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectDescriptor {
    /// Call the constructor registered at `path` with `params`.
    Construct { path: String, params: Params },
    /// Return the member registered at `path` as is.
    Lookup { path: String },
}

impl ObjectDescriptor {
    pub fn construct(path: impl Into<String>, params: Params) -> Self {
        Self::Construct {
            path: path.into(),
            params,
        }
    }

    pub fn lookup(path: impl Into<String>) -> Self {
        Self::Lookup { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Construct { path, .. } | Self::Lookup { path } => path,
        }
    }

    /// Parse a descriptor from a configuration mapping.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| CcmlError::config(format!("descriptor must be a mapping, got {value}")))?;

        if let Some(path) = map.get(TYPE_KEY) {
            let path = path_string(TYPE_KEY, path)?;
            let params = match map.get(PARAMS_KEY) {
                None | Some(Value::Null) => Params::new(),
                Some(Value::Object(params)) => params.clone(),
                Some(other) => {
                    return Err(CcmlError::config(format!(
                        "params of {path} must be a mapping, got {other}"
                    )));
                }
            };
            Ok(Self::Construct { path, params })
        } else if let Some(path) = map.get(FUNCTION_KEY) {
            Ok(Self::Lookup {
                path: path_string(FUNCTION_KEY, path)?,
            })
        } else {
            Err(CcmlError::config(
                "Neither type nor function keyword in descriptor",
            ))
        }
    }

    /// Render back to the configuration mapping form.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        match self {
            Self::Construct { path, params } => {
                map.insert(TYPE_KEY.into(), Value::String(path.clone()));
                if !params.is_empty() {
                    map.insert(PARAMS_KEY.into(), Value::Object(params.clone()));
                }
            }
            Self::Lookup { path } => {
                map.insert(FUNCTION_KEY.into(), Value::String(path.clone()));
            }
        }
        Value::Object(map)
    }
}

fn path_string(key: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CcmlError::config(format!("'{key}' must be a dotted path string, got {value}")))
}

impl<'de> Deserialize<'de> for ObjectDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(de::Error::custom)
    }
}

impl Serialize for ObjectDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// A `module.member` path, split on the last dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DottedPath<'a> {
    pub module: &'a str,
    pub member: &'a str,
}

impl<'a> DottedPath<'a> {
    pub fn parse(path: &'a str) -> Result<Self> {
        match path.rsplit_once('.') {
            Some((module, member)) if !module.is_empty() && !member.is_empty() => {
                Ok(Self { module, member })
            }
            _ => Err(CcmlError::config(format!(
                "'{path}' is not a dotted module.member path"
            ))),
        }
    }
}

impl fmt::Display for DottedPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.member)
    }
}

/// Deserialize constructor keyword parameters into a typed config struct.
pub fn from_params<T: DeserializeOwned>(path: &str, params: &Params) -> Result<T> {
    serde_json::from_value(Value::Object(params.clone()))
        .map_err(|e| CcmlError::config(format!("invalid params for {path}: {e}")))
}
