//! Execution context validation and sanitization
//!
//! A context is a caller-supplied JSON map. Before a workflow sees it the
//! engine checks the identifier fields, scans every value for oversized
//! strings, excessive nesting and injection-shaped content, and trims
//! surrounding whitespace from string values. A validation failure is
//! surfaced immediately and never retried.

use serde_json::Value;
use std::collections::HashMap;

use crate::{FlowguardError, Result};

/// Longest accepted identifier (workflow_name, execution_id)
const MAX_IDENTIFIER_LEN: usize = 128;
/// Longest accepted string value inside the context
const MAX_STRING_LEN: usize = 10_000;
/// Deepest accepted nesting of objects/arrays inside the context
const MAX_DEPTH: usize = 8;

/// Substrings that mark a value as injection-shaped, matched
/// case-insensitively anywhere in string values and map keys
const FORBIDDEN_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "drop table",
    "delete from",
    "insert into",
    "exec(",
    "eval(",
    "../",
];

/// Validated, sanitized input for one workflow execution
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    workflow_name: String,
    execution_id: Option<String>,
    parameters: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Validate and sanitize a caller-supplied context map.
    ///
    /// The map must carry a string `workflow_name` matching `name`; an
    /// optional string `execution_id` is extracted when present. All other
    /// fields become the workflow's parameters.
    pub fn from_map(name: &str, mut raw: HashMap<String, Value>) -> Result<Self> {
        let workflow_name = match raw.remove("workflow_name") {
            Some(Value::String(s)) => s,
            Some(_) => {
                return Err(validation("workflow_name", "must be a string"));
            }
            None => name.to_string(),
        };
        validate_identifier("workflow_name", &workflow_name)?;
        if workflow_name != name {
            return Err(validation(
                "workflow_name",
                "does not match the requested workflow",
            ));
        }

        let execution_id = match raw.remove("execution_id") {
            Some(Value::String(s)) => {
                validate_identifier("execution_id", &s)?;
                Some(s)
            }
            Some(_) => return Err(validation("execution_id", "must be a string")),
            None => None,
        };

        let mut parameters = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            check_string("parameter key", &key)?;
            parameters.insert(key, sanitize_value(value, 0)?);
        }

        Ok(Self {
            workflow_name,
            execution_id,
            parameters,
        })
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }
}

fn validation(field: &str, reason: &str) -> FlowguardError {
    FlowguardError::Validation {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

pub(crate) fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(validation(field, "must not be empty"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(validation(field, "exceeds maximum length"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(validation(
            field,
            "contains characters outside [A-Za-z0-9_.-]",
        ));
    }
    Ok(())
}

fn check_string(field: &str, value: &str) -> Result<()> {
    if value.len() > MAX_STRING_LEN {
        return Err(validation(field, "string value exceeds maximum length"));
    }
    let lowered = value.to_lowercase();
    for pattern in FORBIDDEN_PATTERNS {
        if lowered.contains(pattern) {
            return Err(validation(
                field,
                &format!("contains forbidden content '{}'", pattern),
            ));
        }
    }
    Ok(())
}

/// Recursively validate a value and return its sanitized form
/// (string values trimmed of surrounding whitespace).
fn sanitize_value(value: Value, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(validation("parameters", "nesting exceeds maximum depth"));
    }
    match value {
        Value::String(s) => {
            check_string("parameters", &s)?;
            Ok(Value::String(s.trim().to_string()))
        }
        Value::Array(items) => {
            let mut sanitized = Vec::with_capacity(items.len());
            for item in items {
                sanitized.push(sanitize_value(item, depth + 1)?);
            }
            Ok(Value::Array(sanitized))
        }
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                check_string("parameter key", &key)?;
                sanitized.insert(key, sanitize_value(item, depth + 1)?);
            }
            Ok(Value::Object(sanitized))
        }
        other => Ok(other),
    }
}
