//! Typed coercion of incoming message payloads
//!
//! A [`MessageSchema`] is published as a symbol in a remote JSON artifact:
//!
//! ```json
//! { "Imgdata": { "device_id": "str", "timestamp": "float", "width": "int", "tags": "list?" } }
//! ```
//!
//! A trailing `?` marks the field optional. Payload values are converted to
//! the declared type where the conversion is unambiguous; fields the schema
//! does not mention pass through untouched.

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATETIME_OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("Unknown field type '{0}'")]
    UnknownType(String),

    #[error("Missing required field '{0}'")]
    MissingField(String),

    #[error("Field {field} expects a {expected} value, got {value}")]
    InvalidValue {
        field: String,
        expected: FieldType,
        value: String,
    },

    #[error("Payload is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Int,
    Float,
    Bool,
    List,
    Datetime,
}

impl FieldType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Datetime => "datetime",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "str" => Ok(Self::Str),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "bool" => Ok(Self::Bool),
            "list" => Ok(Self::List),
            "datetime" => Ok(Self::Datetime),
            other => Err(SchemaError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub required: bool,
}

impl FromStr for FieldSpec {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_suffix('?') {
            Some(base) => Ok(Self {
                field_type: base.parse()?,
                required: false,
            }),
            None => Ok(Self {
                field_type: s.parse()?,
                required: true,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>")]
pub struct MessageSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl TryFrom<BTreeMap<String, String>> for MessageSchema {
    type Error = SchemaError;

    fn try_from(raw: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        let fields = raw
            .into_iter()
            .map(|(name, spec)| Ok((name, spec.parse()?)))
            .collect::<Result<_, SchemaError>>()?;
        Ok(Self { fields })
    }
}

impl MessageSchema {
    pub fn new(fields: impl IntoIterator<Item = (String, FieldSpec)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Coerce every declared field of `payload` to its declared type.
    pub fn coerce(&self, payload: &Value) -> Result<Map<String, Value>, SchemaError> {
        let Value::Object(object) = payload else {
            return Err(SchemaError::NotAnObject);
        };

        let mut coerced = object.clone();
        for (name, spec) in &self.fields {
            match coerced.get(name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(SchemaError::MissingField(name.clone()));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    let converted = coerce_value(name, spec.field_type, value)?;
                    coerced.insert(name.clone(), converted);
                }
            }
        }
        Ok(coerced)
    }
}

fn coerce_value(field: &str, field_type: FieldType, value: &Value) -> Result<Value, SchemaError> {
    let invalid = || SchemaError::InvalidValue {
        field: field.to_string(),
        expected: field_type,
        value: value.to_string(),
    };

    match (field_type, value) {
        (FieldType::Str, Value::String(_)) => Ok(value.clone()),
        (FieldType::Str, other) => Ok(Value::String(other.to_string())),

        (FieldType::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        (FieldType::Int, Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| Value::from(f.trunc() as i64))
            .ok_or_else(invalid),
        (FieldType::Int, Value::String(s)) => {
            s.trim().parse::<i64>().map(Value::from).map_err(|_| invalid())
        }

        (FieldType::Float, Value::Number(n)) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        (FieldType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),

        (FieldType::Bool, Value::Bool(_)) => Ok(value.clone()),
        (FieldType::Bool, Value::String(s)) => {
            Ok(Value::Bool(s.trim().eq_ignore_ascii_case("true")))
        }

        (FieldType::List, Value::Array(_)) => Ok(value.clone()),
        (FieldType::List, Value::String(s)) => match serde_json::from_str(&s.replace('\'', "\"")) {
            Ok(list @ Value::Array(_)) => Ok(list),
            _ => Err(invalid()),
        },

        (FieldType::Datetime, Value::String(s)) => NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT)
            .map(|dt| Value::String(dt.format(DATETIME_OUTPUT_FORMAT).to_string()))
            .map_err(|_| invalid()),

        _ => Err(invalid()),
    }
}
