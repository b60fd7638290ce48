//! Structural validator for capability input/output schemas.
//!
//! Schemas arrive as JSON-Schema-like documents and are parsed into a small
//! tagged enum. Only the constructs below are supported; anything else is
//! rejected at registration time rather than silently ignored.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Error raised while parsing a schema document
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema must be a JSON object")]
    NotAnObject,

    #[error("unsupported schema type: {0}")]
    UnsupportedType(String),

    #[error("invalid keyword {keyword}: {reason}")]
    InvalidKeyword { keyword: String, reason: String },
}

/// A single validation failure, with a JSON-pointer-like path to the offending value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{path}: {reason}")]
pub struct Violation {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Any,
    Null,
    Boolean,
    Integer {
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Number {
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
        allowed: Option<Vec<String>>,
    },
    Array {
        items: Box<Schema>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    Object {
        properties: BTreeMap<String, Schema>,
        required: Vec<String>,
        additional_properties: bool,
    },
    OneOf(Vec<Schema>),
}

impl Schema {
    /// Parse a JSON-Schema-like document.
    ///
    /// `{}` accepts anything. Descriptive keywords (`description`, `title`, ...) are ignored.
    pub fn from_json(doc: &Value) -> Result<Self, SchemaError> {
        let obj = doc.as_object().ok_or(SchemaError::NotAnObject)?;

        if let Some(variants) = obj.get("oneOf") {
            let variants = variants.as_array().ok_or_else(|| SchemaError::InvalidKeyword {
                keyword: "oneOf".to_string(),
                reason: "expected an array".to_string(),
            })?;
            let parsed = variants
                .iter()
                .map(Schema::from_json)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Schema::OneOf(parsed));
        }

        let Some(ty) = obj.get("type") else {
            return Ok(Schema::Any);
        };
        let ty = ty.as_str().ok_or_else(|| SchemaError::InvalidKeyword {
            keyword: "type".to_string(),
            reason: "expected a single type name".to_string(),
        })?;

        match ty {
            "null" => Ok(Schema::Null),
            "boolean" => Ok(Schema::Boolean),
            "integer" => Ok(Schema::Integer {
                minimum: number_keyword(obj, "minimum")?,
                maximum: number_keyword(obj, "maximum")?,
            }),
            "number" => Ok(Schema::Number {
                minimum: number_keyword(obj, "minimum")?,
                maximum: number_keyword(obj, "maximum")?,
            }),
            "string" => {
                let allowed = match obj.get("enum") {
                    None => None,
                    Some(Value::Array(values)) => Some(
                        values
                            .iter()
                            .map(|v| {
                                v.as_str().map(str::to_string).ok_or_else(|| {
                                    SchemaError::InvalidKeyword {
                                        keyword: "enum".to_string(),
                                        reason: "string enums must list strings".to_string(),
                                    }
                                })
                            })
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                    Some(_) => {
                        return Err(SchemaError::InvalidKeyword {
                            keyword: "enum".to_string(),
                            reason: "expected an array".to_string(),
                        })
                    }
                };
                Ok(Schema::String {
                    min_length: size_keyword(obj, "minLength")?,
                    max_length: size_keyword(obj, "maxLength")?,
                    allowed,
                })
            }
            "array" => {
                let items = match obj.get("items") {
                    Some(items) => Schema::from_json(items)?,
                    None => Schema::Any,
                };
                Ok(Schema::Array {
                    items: Box::new(items),
                    min_items: size_keyword(obj, "minItems")?,
                    max_items: size_keyword(obj, "maxItems")?,
                })
            }
            "object" => {
                let mut properties = BTreeMap::new();
                if let Some(props) = obj.get("properties") {
                    let props = props.as_object().ok_or_else(|| SchemaError::InvalidKeyword {
                        keyword: "properties".to_string(),
                        reason: "expected an object".to_string(),
                    })?;
                    for (name, prop) in props {
                        properties.insert(name.clone(), Schema::from_json(prop)?);
                    }
                }

                let required = match obj.get("required") {
                    None => Vec::new(),
                    Some(Value::Array(names)) => names
                        .iter()
                        .map(|n| {
                            n.as_str().map(str::to_string).ok_or_else(|| {
                                SchemaError::InvalidKeyword {
                                    keyword: "required".to_string(),
                                    reason: "expected property names".to_string(),
                                }
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(_) => {
                        return Err(SchemaError::InvalidKeyword {
                            keyword: "required".to_string(),
                            reason: "expected an array".to_string(),
                        })
                    }
                };

                let additional_properties = match obj.get("additionalProperties") {
                    None => true,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => {
                        return Err(SchemaError::InvalidKeyword {
                            keyword: "additionalProperties".to_string(),
                            reason: "only boolean values are supported".to_string(),
                        })
                    }
                };

                Ok(Schema::Object {
                    properties,
                    required,
                    additional_properties,
                })
            }
            other => Err(SchemaError::UnsupportedType(other.to_string())),
        }
    }

    /// Validate a value, reporting the first violation found
    pub fn validate(&self, value: &Value) -> Result<(), Violation> {
        validate_at(self, value, "$")
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validate(value).is_ok()
    }
}

/// Validate `value` against `schema`.
pub fn validate(schema: &Schema, value: &Value) -> bool {
    schema.is_valid(value)
}

fn number_keyword(obj: &Map<String, Value>, keyword: &str) -> Result<Option<f64>, SchemaError> {
    match obj.get(keyword) {
        None => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| SchemaError::InvalidKeyword {
            keyword: keyword.to_string(),
            reason: "expected a number".to_string(),
        }),
    }
}

fn size_keyword(obj: &Map<String, Value>, keyword: &str) -> Result<Option<usize>, SchemaError> {
    match obj.get(keyword) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| SchemaError::InvalidKeyword {
                keyword: keyword.to_string(),
                reason: "expected a non-negative integer".to_string(),
            }),
    }
}

fn violation(path: &str, reason: impl Into<String>) -> Violation {
    Violation {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_range(
    path: &str,
    n: f64,
    minimum: Option<f64>,
    maximum: Option<f64>,
) -> Result<(), Violation> {
    if let Some(min) = minimum {
        if n < min {
            return Err(violation(path, format!("{} is below minimum {}", n, min)));
        }
    }
    if let Some(max) = maximum {
        if n > max {
            return Err(violation(path, format!("{} is above maximum {}", n, max)));
        }
    }
    Ok(())
}

fn validate_at(schema: &Schema, value: &Value, path: &str) -> Result<(), Violation> {
    match (schema, value) {
        (Schema::Any, _) => Ok(()),
        (Schema::Null, Value::Null) => Ok(()),
        (Schema::Boolean, Value::Bool(_)) => Ok(()),
        (Schema::Integer { minimum, maximum }, Value::Number(n)) => {
            if !(n.is_i64() || n.is_u64()) {
                return Err(violation(path, "expected integer"));
            }
            let n = n.as_f64().unwrap_or_default();
            check_range(path, n, *minimum, *maximum)
        }
        (Schema::Number { minimum, maximum }, Value::Number(n)) => {
            let n = n.as_f64().unwrap_or_default();
            check_range(path, n, *minimum, *maximum)
        }
        (
            Schema::String {
                min_length,
                max_length,
                allowed,
            },
            Value::String(s),
        ) => {
            let len = s.chars().count();
            if let Some(min) = min_length {
                if len < *min {
                    return Err(violation(path, format!("shorter than {} characters", min)));
                }
            }
            if let Some(max) = max_length {
                if len > *max {
                    return Err(violation(path, format!("longer than {} characters", max)));
                }
            }
            if let Some(allowed) = allowed {
                if !allowed.iter().any(|a| a == s) {
                    return Err(violation(path, format!("{:?} is not an allowed value", s)));
                }
            }
            Ok(())
        }
        (
            Schema::Array {
                items,
                min_items,
                max_items,
            },
            Value::Array(values),
        ) => {
            if let Some(min) = min_items {
                if values.len() < *min {
                    return Err(violation(path, format!("fewer than {} items", min)));
                }
            }
            if let Some(max) = max_items {
                if values.len() > *max {
                    return Err(violation(path, format!("more than {} items", max)));
                }
            }
            for (i, item) in values.iter().enumerate() {
                validate_at(items, item, &format!("{}[{}]", path, i))?;
            }
            Ok(())
        }
        (
            Schema::Object {
                properties,
                required,
                additional_properties,
            },
            Value::Object(map),
        ) => {
            for name in required {
                if !map.contains_key(name) {
                    return Err(violation(path, format!("missing required property {}", name)));
                }
            }
            for (name, field) in map {
                let field_path = format!("{}.{}", path, name);
                match properties.get(name) {
                    Some(prop) => validate_at(prop, field, &field_path)?,
                    None if !additional_properties => {
                        return Err(violation(&field_path, "unexpected property"));
                    }
                    None => {}
                }
            }
            Ok(())
        }
        (Schema::OneOf(variants), _) => {
            let matching = variants
                .iter()
                .filter(|v| validate_at(v, value, path).is_ok())
                .count();
            match matching {
                1 => Ok(()),
                0 => Err(violation(path, "matches none of the allowed variants")),
                _ => Err(violation(path, "matches more than one variant")),
            }
        }
        (expected, actual) => Err(violation(
            path,
            format!("expected {}, got {}", expected_name(expected), type_name(actual)),
        )),
    }
}

fn expected_name(schema: &Schema) -> &'static str {
    match schema {
        Schema::Any => "any",
        Schema::Null => "null",
        Schema::Boolean => "boolean",
        Schema::Integer { .. } => "integer",
        Schema::Number { .. } => "number",
        Schema::String { .. } => "string",
        Schema::Array { .. } => "array",
        Schema::Object { .. } => "object",
        Schema::OneOf(_) => "oneOf",
    }
}
