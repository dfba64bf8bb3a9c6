//! Tool definitions and the compiled parameter validator.
//!
//! Parameter schemas are declared as a JSON object of the form
//! `{ "type": "object", "properties": {..}, "required": [..], "additionalProperties": false }`.
//! [`ParameterValidator::compile`] turns that declaration into a typed
//! validator once, at registration time; calls are then checked against the
//! compiled form without re-reading the schema.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::error::{RelayError, RelayResult};

pub const DESCRIPTION_MIN_CHARS: usize = 10;
pub const DESCRIPTION_MAX_CHARS: usize = 500;

/// How a validated call is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionHandler {
    /// Broadcast to connected peers and wait for the first correlated response.
    #[serde(rename = "websocket_extension_call", alias = "relay")]
    PeerRelay,
}

/// Declarative tool definition as submitted for registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Namespaced unique name, e.g. `mcp:tool.console_hello`.
    pub name: String,
    pub description: String,
    /// Semantic version, `MAJOR.MINOR.PATCH`.
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Parameter schema declaration.
    pub parameters: Value,
    /// Return-shape schema (documentation only).
    #[serde(default)]
    pub returns: Value,
    pub execution_handler: ExecutionHandler,
}

impl ToolDefinition {
    /// Parse a definition from raw JSON, reporting shape errors as `InvalidDefinition`.
    pub fn from_value(value: Value) -> RelayResult<Self> {
        serde_json::from_value(value).map_err(|error| RelayError::InvalidDefinition(error.to_string()))
    }

    /// Check the registration contract and compile the parameter validator.
    pub fn validate(&self) -> RelayResult<ParameterValidator> {
        if !tool_name_pattern().is_match(&self.name) {
            return Err(invalid_definition(format!(
                "name \"{}\" must match mcp:tool.<identifier>",
                self.name
            )));
        }

        let description_len = self.description.chars().count();
        if description_len < DESCRIPTION_MIN_CHARS {
            return Err(invalid_definition(format!(
                "description must be at least {DESCRIPTION_MIN_CHARS} characters long"
            )));
        }
        if description_len > DESCRIPTION_MAX_CHARS {
            return Err(invalid_definition(format!(
                "description must be at most {DESCRIPTION_MAX_CHARS} characters long"
            )));
        }

        if !version_pattern().is_match(&self.version) {
            return Err(invalid_definition(format!(
                "version \"{}\" must be MAJOR.MINOR.PATCH",
                self.version
            )));
        }

        ParameterValidator::compile(&self.parameters)
    }
}

fn tool_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^mcp:tool\.[a-zA-Z_][a-zA-Z0-9_]*$").expect("tool name pattern is valid")
    })
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("version pattern is valid"))
}

/// Type and bounds of a single parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
        allowed: Option<Vec<String>>,
    },
    Number {
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Integer {
        minimum: Option<i64>,
        maximum: Option<i64>,
    },
    Boolean,
    Object,
    Array,
    /// Unknown or missing `type`: any JSON value is accepted.
    Any,
}

/// Compiled spec for one declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub default: Option<Value>,
}

impl ParamSpec {
    fn compile(name: &str, raw: &Value) -> RelayResult<Self> {
        let obj = raw.as_object().ok_or_else(|| {
            invalid_definition(format!("property \"{name}\" must be an object"))
        })?;

        let kind = match obj.get("type").and_then(Value::as_str) {
            Some("string") => {
                let min_length = usize_field(name, obj, "minLength")?;
                let max_length = usize_field(name, obj, "maxLength")?;
                if let (Some(min), Some(max)) = (min_length, max_length) {
                    if min > max {
                        return Err(invalid_definition(format!(
                            "property \"{name}\" has minLength greater than maxLength"
                        )));
                    }
                }
                let allowed = match obj.get("enum") {
                    None | Some(Value::Null) => None,
                    Some(Value::Array(items)) => Some(
                        items
                            .iter()
                            .map(|item| {
                                item.as_str().map(str::to_string).ok_or_else(|| {
                                    invalid_definition(format!(
                                        "property \"{name}\" enum values must be strings"
                                    ))
                                })
                            })
                            .collect::<RelayResult<Vec<_>>>()?,
                    ),
                    Some(_) => {
                        return Err(invalid_definition(format!(
                            "property \"{name}\" enum must be an array"
                        )))
                    }
                };
                ParamKind::String {
                    min_length,
                    max_length,
                    allowed,
                }
            }
            Some("number") => {
                let minimum = f64_field(name, obj, "minimum")?;
                let maximum = f64_field(name, obj, "maximum")?;
                if let (Some(min), Some(max)) = (minimum, maximum) {
                    if min > max {
                        return Err(invalid_definition(format!(
                            "property \"{name}\" has minimum greater than maximum"
                        )));
                    }
                }
                ParamKind::Number { minimum, maximum }
            }
            Some("integer") => {
                let minimum = i64_field(name, obj, "minimum")?;
                let maximum = i64_field(name, obj, "maximum")?;
                if let (Some(min), Some(max)) = (minimum, maximum) {
                    if min > max {
                        return Err(invalid_definition(format!(
                            "property \"{name}\" has minimum greater than maximum"
                        )));
                    }
                }
                ParamKind::Integer { minimum, maximum }
            }
            Some("boolean") => ParamKind::Boolean,
            Some("object") => ParamKind::Object,
            Some("array") => ParamKind::Array,
            _ => ParamKind::Any,
        };

        let mut spec = ParamSpec {
            kind,
            default: None,
        };
        if let Some(default) = obj.get("default") {
            let normalized = spec.check(name, default).map_err(|error| {
                invalid_definition(format!("default for \"{name}\" is invalid: {error}"))
            })?;
            spec.default = Some(normalized);
        }
        Ok(spec)
    }

    /// Check and coerce a supplied value.
    pub fn check(&self, name: &str, value: &Value) -> RelayResult<Value> {
        match &self.kind {
            ParamKind::String {
                min_length,
                max_length,
                allowed,
            } => {
                let text = value
                    .as_str()
                    .ok_or_else(|| invalid_parameters(format!("\"{name}\" must be a string")))?;
                let len = text.chars().count();
                if let Some(min) = min_length {
                    if len < *min {
                        return Err(invalid_parameters(format!(
                            "\"{name}\" length must be at least {min} characters long"
                        )));
                    }
                }
                if let Some(max) = max_length {
                    if len > *max {
                        return Err(invalid_parameters(format!(
                            "\"{name}\" length must be less than or equal to {max} characters long"
                        )));
                    }
                }
                if let Some(allowed) = allowed {
                    if !allowed.iter().any(|candidate| candidate == text) {
                        return Err(invalid_parameters(format!(
                            "\"{name}\" must be one of [{}]",
                            allowed.join(", ")
                        )));
                    }
                }
                Ok(value.clone())
            }
            ParamKind::Number { minimum, maximum } => {
                let (number, normalized) = coerce_number(value)
                    .ok_or_else(|| invalid_parameters(format!("\"{name}\" must be a number")))?;
                check_bounds(name, number, *minimum, *maximum)?;
                Ok(normalized)
            }
            ParamKind::Integer { minimum, maximum } => {
                let number = coerce_integer(value)
                    .ok_or_else(|| invalid_parameters(format!("\"{name}\" must be an integer")))?;
                check_bounds(
                    name,
                    number as f64,
                    minimum.map(|m| m as f64),
                    maximum.map(|m| m as f64),
                )?;
                Ok(Value::from(number))
            }
            ParamKind::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(text) if text.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
                Value::String(text) if text.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
                _ => Err(invalid_parameters(format!("\"{name}\" must be a boolean"))),
            },
            ParamKind::Object => {
                if value.is_object() {
                    Ok(value.clone())
                } else {
                    Err(invalid_parameters(format!("\"{name}\" must be of type object")))
                }
            }
            ParamKind::Array => {
                if value.is_array() {
                    Ok(value.clone())
                } else {
                    Err(invalid_parameters(format!("\"{name}\" must be an array")))
                }
            }
            ParamKind::Any => Ok(value.clone()),
        }
    }
}

/// Typed validator built from a parameter schema declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterValidator {
    properties: Vec<(String, ParamSpec)>,
    required: Vec<String>,
    additional_properties: bool,
}

impl ParameterValidator {
    pub fn compile(schema: &Value) -> RelayResult<Self> {
        let obj = schema
            .as_object()
            .ok_or_else(|| invalid_definition("parameters must be an object"))?;

        if obj.get("type").and_then(Value::as_str) != Some("object") {
            return Err(invalid_definition("parameters.type must be \"object\""));
        }

        let declared = match obj.get("properties") {
            Some(Value::Object(map)) => map,
            Some(_) => return Err(invalid_definition("parameters.properties must be an object")),
            None => return Err(invalid_definition("parameters.properties is required")),
        };
        let properties = declared
            .iter()
            .map(|(name, raw)| Ok((name.clone(), ParamSpec::compile(name, raw)?)))
            .collect::<RelayResult<Vec<_>>>()?;

        let required = match obj.get("required") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        invalid_definition("parameters.required must contain only strings")
                    })
                })
                .collect::<RelayResult<Vec<_>>>()?,
            Some(_) => return Err(invalid_definition("parameters.required must be an array")),
        };
        for name in &required {
            if !properties.iter().any(|(declared, _)| declared == name) {
                return Err(invalid_definition(format!(
                    "required parameter \"{name}\" is not declared in properties"
                )));
            }
        }

        let additional_properties = match obj.get("additionalProperties") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(_) => {
                return Err(invalid_definition(
                    "parameters.additionalProperties must be a boolean",
                ))
            }
        };

        Ok(Self {
            properties,
            required,
            additional_properties,
        })
    }

    /// Validate raw call parameters, returning the normalized set with defaults applied.
    ///
    /// `null` is treated as an empty object. The first violated constraint is reported.
    pub fn validate(&self, raw: &Value) -> RelayResult<Map<String, Value>> {
        let empty = Map::new();
        let input = match raw {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(invalid_parameters(format!(
                    "parameters must be an object, got {}",
                    json_type_name(other)
                )))
            }
        };

        if !self.additional_properties {
            if let Some(key) = input.keys().find(|key| self.spec(key).is_none()) {
                return Err(invalid_parameters(format!("\"{key}\" is not allowed")));
            }
        }

        let mut normalized = Map::new();
        for (name, spec) in &self.properties {
            match input.get(name) {
                Some(value) => {
                    normalized.insert(name.clone(), spec.check(name, value)?);
                }
                None => {
                    if let Some(default) = &spec.default {
                        normalized.insert(name.clone(), default.clone());
                    } else if self.required.iter().any(|required| required == name) {
                        return Err(invalid_parameters(format!("\"{name}\" is required")));
                    }
                }
            }
        }

        if self.additional_properties {
            for (key, value) in input {
                if !normalized.contains_key(key) {
                    normalized.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(normalized)
    }

    pub fn spec(&self, name: &str) -> Option<&ParamSpec> {
        self.properties
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|(_, spec)| spec)
    }

    /// Declared parameter names, in declaration order.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|(name, _)| name.as_str())
    }
}

fn coerce_number(value: &Value) -> Option<(f64, Value)> {
    match value {
        Value::Number(number) => number.as_f64().map(|n| (n, value.clone())),
        Value::String(text) => {
            let trimmed = text.trim();
            if let Ok(integer) = trimmed.parse::<i64>() {
                return Some((integer as f64, Value::from(integer)));
            }
            let parsed = trimmed.parse::<f64>().ok().filter(|n| n.is_finite())?;
            serde_json::Number::from_f64(parsed).map(|n| (parsed, Value::Number(n)))
        }
        _ => None,
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|n| n.fract() == 0.0 && n.abs() < i64::MAX as f64)
                .map(|n| n as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn check_bounds(name: &str, number: f64, minimum: Option<f64>, maximum: Option<f64>) -> RelayResult<()> {
    if let Some(min) = minimum {
        if number < min {
            return Err(invalid_parameters(format!(
                "\"{name}\" must be greater than or equal to {min}"
            )));
        }
    }
    if let Some(max) = maximum {
        if number > max {
            return Err(invalid_parameters(format!(
                "\"{name}\" must be less than or equal to {max}"
            )));
        }
    }
    Ok(())
}

fn usize_field(name: &str, obj: &Map<String, Value>, field: &str) -> RelayResult<Option<usize>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                invalid_definition(format!(
                    "property \"{name}\" {field} must be a non-negative integer"
                ))
            }),
    }
}

fn f64_field(name: &str, obj: &Map<String, Value>, field: &str) -> RelayResult<Option<f64>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            invalid_definition(format!("property \"{name}\" {field} must be a number"))
        }),
    }
}

fn i64_field(name: &str, obj: &Map<String, Value>, field: &str) -> RelayResult<Option<i64>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            invalid_definition(format!("property \"{name}\" {field} must be an integer"))
        }),
    }
}

fn invalid_definition(message: impl Into<String>) -> RelayError {
    RelayError::InvalidDefinition(message.into())
}

fn invalid_parameters(message: impl Into<String>) -> RelayError {
    RelayError::InvalidParameters(message.into())
}

/// Returns a human-readable name for the JSON type of a value.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
