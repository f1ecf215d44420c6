//! The closed set of tools.

use crate::args::{validate_args, ArgError, ArgType, ParamSpec};
use crate::traits::{ToolResult, ToolSpec};
use ember_common::UserId;
use ember_memory::MemoryStore;
use serde_json::{json, Map, Value};

/// Every tool the model can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    CreateMemory,
}

const CREATE_MEMORY_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "what",
    kind: ArgType::String,
    description: "The fact to remember, phrased so it makes sense on its own later",
}];

/// A tool call whose arguments passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    CreateMemory { what: String },
}

impl Tool {
    pub const ALL: &'static [Tool] = &[Tool::CreateMemory];

    /// Resolve a model-supplied name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tool::CreateMemory => "create_memory",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tool::CreateMemory => {
                "Create a long-term memory about the user. Takes one argument, \
                 the content to remember."
            }
        }
    }

    pub fn params(&self) -> &'static [ParamSpec] {
        match self {
            Tool::CreateMemory => CREATE_MEMORY_PARAMS,
        }
    }

    /// Function-calling schema built from the declared parameters.
    pub fn spec(&self) -> ToolSpec {
        let mut properties = Map::new();
        for param in self.params() {
            properties.insert(
                param.name.to_string(),
                json!({ "type": param.kind.as_str(), "description": param.description }),
            );
        }
        let required: Vec<&str> = self.params().iter().map(|p| p.name).collect();

        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: json!({
                "type": "object",
                "properties": Value::Object(properties),
                "required": required,
            }),
        }
    }

    /// Check raw argument text and build a typed invocation.
    pub fn validate(&self, raw_args: &str) -> Result<ToolInvocation, ArgError> {
        let args = validate_args(raw_args, self.params())?;
        match self {
            Tool::CreateMemory => {
                let what = string_arg(&args, "what")?;
                if what.trim().is_empty() {
                    return Err(ArgError::Empty {
                        name: "what".into(),
                    });
                }
                Ok(ToolInvocation::CreateMemory {
                    what: what.to_string(),
                })
            }
        }
    }
}

fn string_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str, ArgError> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ArgError::WrongType {
            name: name.to_string(),
            expected: ArgType::String,
            actual: ArgType::of(other),
        }),
        None => Err(ArgError::Missing {
            name: name.to_string(),
        }),
    }
}

impl ToolInvocation {
    /// Run the side effect for `user_id`.
    ///
    /// Storage failures are returned as failed results, never as errors.
    pub async fn execute(&self, user_id: UserId, memory: &dyn MemoryStore) -> ToolResult {
        match self {
            ToolInvocation::CreateMemory { what } => {
                match memory.create_memory(user_id, what).await {
                    Ok(record) => {
                        tracing::info!(user_id, memory_id = record.id, content = %what, "Memory stored");
                        ToolResult::success(format!(
                            "memory \"{}\" was stored (id {}).",
                            what, record.id
                        ))
                    }
                    Err(e) => {
                        tracing::error!(user_id, error = %e, "Failed to store memory");
                        ToolResult::failure(format!(
                            "memory \"{}\" could not be stored: {:#}",
                            what, e
                        ))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_names_only() {
        assert_eq!(Tool::from_name("create_memory"), Some(Tool::CreateMemory));
        assert_eq!(Tool::from_name("delete_everything"), None);
        assert_eq!(Tool::from_name("Create_Memory"), None);
    }

    #[test]
    fn spec_declares_required_string() {
        let spec = Tool::CreateMemory.spec();
        assert_eq!(spec.name, "create_memory");
        assert_eq!(spec.parameters["type"], "object");
        assert_eq!(spec.parameters["properties"]["what"]["type"], "string");
        assert_eq!(spec.parameters["required"], json!(["what"]));
    }

    #[test]
    fn validate_builds_invocation() {
        let inv = Tool::CreateMemory
            .validate(r#"{"what":"likes tea"}"#)
            .unwrap();
        assert_eq!(
            inv,
            ToolInvocation::CreateMemory {
                what: "likes tea".into()
            }
        );
    }

    #[test]
    fn validate_rejects_blank_fact() {
        let err = Tool::CreateMemory.validate(r#"{"what":"   "}"#).unwrap_err();
        assert!(matches!(err, ArgError::Empty { .. }));
    }

    #[test]
    fn validate_rejects_wrong_type() {
        let err = Tool::CreateMemory.validate(r#"{"what":["a"]}"#).unwrap_err();
        assert_eq!(
            err,
            ArgError::WrongType {
                name: "what".into(),
                expected: ArgType::String,
                actual: ArgType::Array,
            }
        );
    }
}
