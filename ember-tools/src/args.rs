//! Declared tool parameters and argument validation.

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Primitive JSON types a parameter can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl ArgType {
    /// Type of a concrete JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => ArgType::String,
            Value::Number(_) => ArgType::Number,
            Value::Bool(_) => ArgType::Boolean,
            Value::Array(_) => ArgType::Array,
            Value::Object(_) => ArgType::Object,
            Value::Null => ArgType::Null,
        }
    }

    /// Name used in JSON Schema and in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
            ArgType::Array => "array",
            ArgType::Object => "object",
            ArgType::Null => "null",
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A required parameter of a tool.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ArgType,
    pub description: &'static str,
}

/// Why a tool call's arguments were rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgError {
    #[error("arguments must be a JSON object: {0}")]
    Malformed(String),

    #[error("this tool requires argument \"{name}\", but it was not provided")]
    Missing { name: String },

    #[error("argument \"{name}\" must be of type {expected}, but got {actual}")]
    WrongType {
        name: String,
        expected: ArgType,
        actual: ArgType,
    },

    #[error("argument \"{name}\" must not be empty")]
    Empty { name: String },
}

/// Parse raw argument text and check it against the declared parameters.
///
/// Empty argument text is treated as an empty object.
pub fn validate_args(raw: &str, params: &[ParamSpec]) -> Result<Map<String, Value>, ArgError> {
    let raw = raw.trim();
    let value: Value = if raw.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(raw).map_err(|e| ArgError::Malformed(e.to_string()))?
    };

    let args = match value {
        Value::Object(args) => args,
        other => return Err(ArgError::Malformed(format!("got {}", ArgType::of(&other)))),
    };

    for param in params {
        let Some(arg) = args.get(param.name) else {
            return Err(ArgError::Missing {
                name: param.name.to_string(),
            });
        };
        let actual = ArgType::of(arg);
        if actual != param.kind {
            return Err(ArgError::WrongType {
                name: param.name.to_string(),
                expected: param.kind,
                actual,
            });
        }
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHAT: &[ParamSpec] = &[ParamSpec {
        name: "what",
        kind: ArgType::String,
        description: "fact",
    }];

    #[test]
    fn accepts_matching_args() {
        let args = validate_args(r#"{"what":"likes tea","extra":1}"#, WHAT).unwrap();
        assert_eq!(args["what"], "likes tea");
    }

    #[test]
    fn reports_missing_key() {
        let err = validate_args(r#"{"content":"x"}"#, WHAT).unwrap_err();
        assert_eq!(
            err,
            ArgError::Missing {
                name: "what".into()
            }
        );
        assert!(err.to_string().contains("\"what\""));
    }

    #[test]
    fn empty_text_is_empty_object() {
        let err = validate_args("  ", WHAT).unwrap_err();
        assert!(matches!(err, ArgError::Missing { .. }));
        assert!(validate_args("", &[]).unwrap().is_empty());
    }

    #[test]
    fn reports_expected_and_actual_type() {
        let err = validate_args(r#"{"what":42}"#, WHAT).unwrap_err();
        assert_eq!(
            err.to_string(),
            "argument \"what\" must be of type string, but got number"
        );

        let err = validate_args(r#"{"what":null}"#, WHAT).unwrap_err();
        assert!(err.to_string().ends_with("but got null"));
    }

    #[test]
    fn rejects_non_object_and_bad_json() {
        assert!(matches!(
            validate_args("[1,2]", WHAT).unwrap_err(),
            ArgError::Malformed(_)
        ));
        assert!(matches!(
            validate_args("{\"what\":", WHAT).unwrap_err(),
            ArgError::Malformed(_)
        ));
    }

    #[test]
    fn arg_type_names() {
        assert_eq!(ArgType::of(&Value::Bool(true)), ArgType::Boolean);
        assert_eq!(ArgType::of(&serde_json::json!([])).as_str(), "array");
        assert_eq!(ArgType::Object.to_string(), "object");
    }
}
