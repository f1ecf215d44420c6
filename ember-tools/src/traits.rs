//! Tool result and schema types.

use serde::{Deserialize, Serialize};

/// Result from executing a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool succeeded.
    pub success: bool,
    /// Result text shown to the model.
    pub output: String,
    /// Error message if failed.
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// Create a failed result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Text placed in the tool-result turn.
    pub fn to_content(&self) -> String {
        if self.success {
            format!("Success: {}", self.output)
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown failure"))
        }
    }
}

/// Tool specification for LLM function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name the model calls.
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_success() {
        let result = ToolResult::success("done");
        assert!(result.success);
        assert_eq!(result.output, "done");
        assert!(result.error.is_none());
        assert_eq!(result.to_content(), "Success: done");
    }

    #[test]
    fn tool_result_failure() {
        let result = ToolResult::failure("something went wrong");
        assert!(!result.success);
        assert!(result.output.is_empty());
        assert_eq!(result.error.as_deref(), Some("something went wrong"));
        assert_eq!(result.to_content(), "Error: something went wrong");
    }
}
