//! Per-type payload validation
//!
//! Each entity compiles into an [`EntityValidator`]: a field manifest plus
//! the checks `validate` runs over caller payloads. Validation is closed by
//! default; unknown fields are rejected unless the entity opts into `open`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{MnemonError, Result};
use crate::schema::EntitySpec;

/// Declared type of a payload field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Datetime,
    Date,
    Enum,
    Tags,
    Vector,
    Ref,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Datetime => "datetime",
            FieldType::Date => "date",
            FieldType::Enum => "enum",
            FieldType::Tags => "tags",
            FieldType::Vector => "vector",
            FieldType::Ref => "ref",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" | "str" | "text" => Ok(FieldType::String),
            "int" | "integer" => Ok(FieldType::Int),
            "float" | "double" => Ok(FieldType::Float),
            "bool" | "boolean" => Ok(FieldType::Bool),
            "datetime" | "timestamp" => Ok(FieldType::Datetime),
            "date" => Ok(FieldType::Date),
            "enum" => Ok(FieldType::Enum),
            "tags" => Ok(FieldType::Tags),
            "vector" => Ok(FieldType::Vector),
            "ref" | "reference" => Ok(FieldType::Ref),
            _ => Err(format!("Unknown field type: {}", s)),
        }
    }
}

/// Normalized field specification
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub required: bool,
    /// Legal values for enum fields
    pub choices: Option<Vec<String>>,
    /// Character cap for string-like fields
    pub max_length: Option<usize>,
    /// Injected when an optional field is absent
    pub default: Option<Value>,
    /// Expected length for vector fields
    pub dim: Option<usize>,
    /// Runtime-managed; never accepted from callers
    pub system: bool,
}

/// Raw YAML shape of a field spec: a bare type name or the full map
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum RawFieldSpec {
    Type(String),
    Full(RawFieldSpecFull),
}

#[derive(Deserialize, Default)]
pub(crate) struct RawFieldSpecFull {
    #[serde(rename = "type")]
    field_type: Option<String>,
    required: Option<bool>,
    choices: Option<Vec<String>>,
    max_length: Option<usize>,
    default: Option<serde_yaml::Value>,
    dim: Option<usize>,
    #[serde(default)]
    system: bool,
}

impl RawFieldSpec {
    /// A bare field entry: string type, nothing else
    pub(crate) fn bare() -> Self {
        RawFieldSpec::Full(RawFieldSpecFull::default())
    }

    /// Normalize into a [`FieldSpec`]. `required_override` comes from the
    /// required/optional split form and wins over the inline flag.
    pub(crate) fn normalize(self, required_override: Option<bool>) -> Result<FieldSpec> {
        let full = match self {
            RawFieldSpec::Type(name) => RawFieldSpecFull {
                field_type: Some(name),
                ..Default::default()
            },
            RawFieldSpec::Full(full) => full,
        };

        let field_type = match full.field_type {
            Some(name) => name
                .parse::<FieldType>()
                .map_err(MnemonError::Schema)?,
            None => FieldType::String,
        };

        let default = match full.default {
            Some(v) => Some(
                serde_json::to_value(v)
                    .map_err(|e| MnemonError::Schema(format!("bad default value: {}", e)))?,
            ),
            None => None,
        };

        Ok(FieldSpec {
            field_type,
            required: required_override.or(full.required).unwrap_or(false),
            choices: full.choices,
            max_length: full.max_length,
            default,
            dim: full.dim,
            system: full.system,
        })
    }
}

/// Compiled validator for one entity type
#[derive(Debug, Clone)]
pub struct EntityValidator {
    entity: String,
    open: bool,
    fields: BTreeMap<String, FieldSpec>,
}

impl EntityValidator {
    /// Compile the manifest for an entity
    pub fn compile(spec: &EntitySpec) -> Self {
        Self {
            entity: spec.name.clone(),
            open: spec.open,
            fields: spec.fields.clone(),
        }
    }

    /// Field manifest
    pub fn fields(&self) -> &BTreeMap<String, FieldSpec> {
        &self.fields
    }

    /// Validate and clean a caller payload.
    ///
    /// System fields are stripped, unknown fields rejected (unless open),
    /// required fields checked for presence and non-emptiness, values type
    /// checked, and defaults injected for absent optional fields.
    pub fn validate(&self, payload: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>> {
        let mut cleaned: BTreeMap<String, Value> = BTreeMap::new();

        for (name, value) in payload {
            match self.fields.get(name) {
                Some(spec) if spec.system => continue,
                Some(spec) => {
                    let checked = self.check_value(name, spec, value)?;
                    cleaned.insert(name.clone(), checked);
                }
                None if self.open => {
                    cleaned.insert(name.clone(), value.clone());
                }
                None => {
                    return Err(MnemonError::Validation(format!(
                        "unknown field {:?} for type {:?}",
                        name, self.entity
                    )))
                }
            }
        }

        for (name, spec) in &self.fields {
            if spec.system {
                continue;
            }
            let present = match cleaned.get(name) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };
            if present {
                continue;
            }
            if spec.required {
                return Err(MnemonError::Validation(format!(
                    "missing required field {:?} for type {:?}",
                    name, self.entity
                )));
            }
            cleaned.remove(name);
            if let Some(default) = &spec.default {
                let checked = self.check_value(name, spec, default)?;
                cleaned.insert(name.clone(), checked);
            }
        }

        Ok(cleaned)
    }

    fn check_value(&self, name: &str, spec: &FieldSpec, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let fail = |want: &str| {
            Err(MnemonError::Validation(format!(
                "field {:?} of type {:?} expects {}, got {}",
                name, self.entity, want, value
            )))
        };

        match spec.field_type {
            FieldType::String => match value {
                Value::String(s) => {
                    if let Some(max) = spec.max_length {
                        if s.chars().count() > max {
                            return Err(MnemonError::Validation(format!(
                                "field {:?} exceeds max_length {} ({} chars)",
                                name,
                                max,
                                s.chars().count()
                            )));
                        }
                    }
                    Ok(value.clone())
                }
                _ => fail("a string"),
            },
            FieldType::Int => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                _ => fail("an integer"),
            },
            FieldType::Float => match value {
                Value::Number(_) => Ok(value.clone()),
                _ => fail("a number"),
            },
            FieldType::Bool => match value {
                Value::Bool(_) => Ok(value.clone()),
                _ => fail("a boolean"),
            },
            FieldType::Datetime => match value {
                Value::String(s) if DateTime::parse_from_rfc3339(s).is_ok() => Ok(value.clone()),
                _ => fail("an RFC 3339 datetime string"),
            },
            FieldType::Date => match value {
                Value::String(s)
                    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() =>
                {
                    Ok(value.clone())
                }
                _ => fail("a YYYY-MM-DD date string"),
            },
            FieldType::Enum => match value {
                Value::String(s) => {
                    let choices = spec.choices.as_deref().unwrap_or(&[]);
                    if choices.iter().any(|c| c == s) {
                        Ok(value.clone())
                    } else {
                        Err(MnemonError::Validation(format!(
                            "invalid value {:?} for field {:?} of type {:?}; legal choices: {}",
                            s,
                            name,
                            self.entity,
                            choices.join(", ")
                        )))
                    }
                }
                _ => fail("an enum string"),
            },
            FieldType::Tags => match value {
                Value::Array(items) => {
                    let mut tags = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::String(s) if !s.trim().is_empty() => {
                                tags.push(s.trim().to_string())
                            }
                            _ => return fail("an array of non-empty strings"),
                        }
                    }
                    tags.sort();
                    tags.dedup();
                    Ok(Value::Array(tags.into_iter().map(Value::String).collect()))
                }
                _ => fail("an array of strings"),
            },
            FieldType::Vector => match value {
                Value::Array(items) => {
                    if !items.iter().all(|v| v.is_number()) {
                        return fail("an array of numbers");
                    }
                    if let Some(dim) = spec.dim {
                        if items.len() != dim {
                            return Err(MnemonError::Validation(format!(
                                "field {:?} expects a vector of dim {}, got {}",
                                name,
                                dim,
                                items.len()
                            )));
                        }
                    }
                    Ok(value.clone())
                }
                _ => fail("an array of numbers"),
            },
            FieldType::Ref => match value {
                Value::String(s) if !s.trim().is_empty() => Ok(value.clone()),
                _ => fail("a non-empty reference string"),
            },
        }
    }
}
