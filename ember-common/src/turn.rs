//! Conversation turns.
//!
//! A [`Turn`] serialises to the OpenAI chat message format. The same JSON is
//! sent to the model and written to durable history, so a turn read back from
//! storage is exactly the turn that was written.

use serde::{Deserialize, Deserializer, Serialize};

/// A single role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Turn {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, deserialize_with = "null_as_empty")]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text exactly as the model produced it.
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".into()
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Turn::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Turn::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Turn::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Turn::User { .. })
    }

    pub fn content(&self) -> &str {
        match self {
            Turn::System { content }
            | Turn::User { content }
            | Turn::Assistant { content, .. }
            | Turn::Tool { content, .. } => content,
        }
    }

    /// Tool calls carried by an assistant turn; empty for every other role.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Turn::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Serialise to the persisted JSON form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a persisted JSON payload.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_with_tool_calls_wire_format() {
        let turn = Turn::assistant(
            "",
            vec![ToolCall::new("call_1", "create_memory", r#"{"what":"likes tea"}"#)],
        );
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "create_memory", "arguments": "{\"what\":\"likes tea\"}"}
                }]
            })
        );
    }

    #[test]
    fn test_plain_assistant_omits_tool_calls() {
        let value = serde_json::to_value(Turn::assistant("hi", vec![])).unwrap();
        assert_eq!(value, json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn test_tool_turn_wire_format() {
        let value = serde_json::to_value(Turn::tool("call_1", "ok")).unwrap();
        assert_eq!(
            value,
            json!({"role": "tool", "tool_call_id": "call_1", "content": "ok"})
        );
    }

    #[test]
    fn test_null_assistant_content_parses() {
        let turn = Turn::from_json(
            r#"{"role":"assistant","content":null,"tool_calls":[{"id":"c","type":"function","function":{"name":"x","arguments":"{}"}}]}"#,
        )
        .unwrap();
        assert_eq!(turn.content(), "");
        assert_eq!(turn.tool_calls().len(), 1);
        assert_eq!(turn.tool_calls()[0].name(), "x");
    }

    #[test]
    fn test_persisted_payload_restores_same_turn() {
        let turn = Turn::assistant(
            "checking",
            vec![
                ToolCall::new("a", "create_memory", "{\"what\": \"x\"}"),
                ToolCall::new("b", "create_memory", "{}"),
            ],
        );
        let restored = Turn::from_json(&turn.to_json().unwrap()).unwrap();
        assert_eq!(restored, turn);
    }

    #[test]
    fn test_role_helpers() {
        assert!(Turn::user("hey").is_user());
        assert!(!Turn::system("t").is_user());
        assert!(!Turn::tool("id", "r").is_user());
        assert!(Turn::user("x").tool_calls().is_empty());
    }
}
