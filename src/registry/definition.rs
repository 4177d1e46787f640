//! Tool definitions: typed metadata and argument validation.
//!
//! The gateway owns tool *metadata* (not implementations, those live in the
//! backends). Arguments are checked against the parameter schema before any
//! backend I/O happens.

use crate::types::{BackendId, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

// =============================================================================
// Parameter types
// =============================================================================

/// Parameter type for tool inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    /// Validate a JSON value against this parameter type.
    pub fn validate(self, value: &Value) -> std::result::Result<(), String> {
        let ok = match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "expected {}, got {}",
                self.display_name(),
                value_type_name(value)
            ))
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        }
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Parameter definition
// =============================================================================

/// A single parameter definition for a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

// =============================================================================
// Tool definition
// =============================================================================

/// Complete metadata for one tool in the merged catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub owner_id: BackendId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameter_schema: Vec<ParamDef>,
    /// Presentation-only grouping; never used for routing.
    #[serde(default)]
    pub category: String,
}

/// Tool as advertised by a backend's `tools.list` (owner is implied).
#[derive(Debug, Clone, Deserialize)]
pub struct AdvertisedTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameter_schema: Vec<ParamDef>,
    #[serde(default)]
    pub category: Option<String>,
}

impl AdvertisedTool {
    /// Attach ownership, falling back to the backend's configured category.
    pub fn into_definition(self, owner: &BackendId, default_category: Option<&str>) -> ToolDefinition {
        ToolDefinition {
            name: self.name,
            owner_id: owner.clone(),
            description: self.description,
            parameter_schema: self.parameter_schema,
            category: self
                .category
                .or_else(|| default_category.map(str::to_string))
                .unwrap_or_else(|| "general".to_string()),
        }
    }
}

impl ToolDefinition {
    /// Structural checks applied when loading or merging.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("tool name cannot be empty".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for param in &self.parameter_schema {
            if param.name.is_empty() {
                return Err(format!("tool '{}' has a parameter with no name", self.name));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(format!(
                    "tool '{}' declares parameter '{}' twice",
                    self.name, param.name
                ));
            }
        }
        Ok(())
    }

    /// Validate call arguments against this tool's parameter schema.
    ///
    /// An empty schema accepts any object.
    pub fn validate_args(&self, args: &Value) -> Result<()> {
        let empty = Map::new();
        let arg_map = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(Error::invalid_arguments(format!(
                    "{}: arguments must be a JSON object, got {}",
                    self.name,
                    value_type_name(other)
                )))
            }
        };

        if self.parameter_schema.is_empty() {
            return Ok(());
        }

        let mut errors = Vec::new();

        for param in &self.parameter_schema {
            if param.required && !arg_map.contains_key(&param.name) {
                errors.push(format!("missing required parameter: {}", param.name));
            }
        }

        let known: HashMap<&str, &ParamDef> = self
            .parameter_schema
            .iter()
            .map(|p| (p.name.as_str(), p))
            .collect();

        for (key, value) in arg_map {
            match known.get(key.as_str()) {
                Some(param) => {
                    // Optional parameters may be passed explicitly as null.
                    if value.is_null() && !param.required {
                        continue;
                    }
                    if let Err(e) = param.param_type.validate(value) {
                        errors.push(format!("parameter '{}': {}", key, e));
                    }
                }
                None => errors.push(format!("unknown parameter: {}", key)),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_arguments(format!(
                "{}: {}",
                self.name,
                errors.join("; ")
            )))
        }
    }

    /// One-line signature, e.g. `search(query: string, limit?: integer)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .parameter_schema
            .iter()
            .map(|p| {
                let optional = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, optional, p.param_type.display_name())
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

// =============================================================================
// Tests
// =============================================================================
