//! Core types for transcripts, tool calls and stream events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// One transcript entry.
///
/// Messages are immutable once appended to a session; the orchestrator only
/// ever produces new ones for the caller to persist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub can_retry: bool,
    /// Set on the final assistant message when the turn stopped early
    #[serde(default)]
    pub incomplete: bool,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_call_id: None,
            name: None,
            tool_calls: Vec::new(),
            error: None,
            can_retry: false,
            incomplete: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, text)
    }

    /// Assistant message that requests tool calls
    pub fn assistant_with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::assistant(text)
        }
    }

    /// Result of one tool call, linked back by `tool_call_id`
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }

    /// Mark a message as the remains of a failed turn
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.can_retry = true;
        self
    }

    pub fn with_incomplete(mut self, incomplete: bool) -> Self {
        self.incomplete = incomplete;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A model-emitted request to invoke a named function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

/// Function name plus raw JSON-encoded arguments, as on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn arguments(&self) -> &str {
        &self.function.arguments
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Completed,
    Failed,
}

/// Lifecycle record of one tool call: `pending` until the invoker settles it,
/// then `completed` or `failed`. A settled execution never changes again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallExecution {
    pub id: String,
    pub tool_call: ToolCall,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ToolCallExecution {
    pub fn pending(tool_call: ToolCall) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool_call,
            status: ExecutionStatus::Pending,
            result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status != ExecutionStatus::Pending
    }

    /// Settle as completed. No effect if already settled.
    pub fn complete(&mut self, result: impl Into<String>) {
        if self.is_settled() {
            return;
        }
        self.status = ExecutionStatus::Completed;
        self.result = Some(result.into());
        self.timestamp = Utc::now();
    }

    /// Settle as failed. No effect if already settled.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.is_settled() {
            return;
        }
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.timestamp = Utc::now();
    }

    /// Text handed back to the model in the `tool` message
    pub fn message_content(&self) -> String {
        match self.status {
            ExecutionStatus::Completed => self.result.clone().unwrap_or_default(),
            ExecutionStatus::Failed => format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
            ExecutionStatus::Pending => String::new(),
        }
    }
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Raw tool-call fragment relayed from the stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_fragment: Option<String>,
}

/// One incremental event from a streaming provider call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkEvent {
    pub content: Option<String>,
    pub tool_call_deltas: Vec<ToolCallDelta>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl ChunkEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_call_deltas: vec![delta],
            ..Self::default()
        }
    }
}

/// Finish reasons that mean "the model wants tools run"
pub fn is_tool_use_finish(reason: Option<&str>) -> bool {
    matches!(reason, Some("tool_calls") | Some("function_call"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "Hello");
        assert!(!msg.id.is_empty());
        assert!(!msg.can_retry);

        let msg = Message::tool("call_1", "get_weather", "{\"temp\":21}");
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("get_weather"));
    }

    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(Message::user("a").id, Message::user("a").id);
    }

    #[test]
    fn test_with_error_marks_retryable() {
        let msg = Message::assistant("partial").with_error("API error 500: boom");
        assert_eq!(msg.error.as_deref(), Some("API error 500: boom"));
        assert!(msg.can_retry);
        assert_eq!(msg.content, "partial");
    }

    #[test]
    fn test_message_serialization_camel_case() {
        let msg = Message::tool("call_9", "search", "ok");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["toolCallId"], "call_9");
        assert!(json.get("toolCalls").is_none());
        assert_eq!(json["canRetry"], false);
    }

    #[test]
    fn test_tool_call_serialization() {
        let call = ToolCall::new("call_1", "get_weather", r#"{"city":"Paris"}"#);
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "get_weather");
        assert_eq!(json["function"]["arguments"], r#"{"city":"Paris"}"#);
    }

    #[test]
    fn test_execution_lifecycle_never_reverts() {
        let mut exec = ToolCallExecution::pending(ToolCall::new("c", "t", "{}"));
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert!(!exec.is_settled());

        exec.complete("done");
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.message_content(), "done");

        exec.fail("too late");
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.error.is_none());
    }

    #[test]
    fn test_failed_execution_content() {
        let mut exec = ToolCallExecution::pending(ToolCall::new("c", "t", "{}"));
        exec.fail("Tool 't' not found");
        assert_eq!(exec.message_content(), "Error: Tool 't' not found");
    }

    #[test]
    fn test_tool_use_finish_reasons() {
        assert!(is_tool_use_finish(Some("tool_calls")));
        assert!(is_tool_use_finish(Some("function_call")));
        assert!(!is_tool_use_finish(Some("stop")));
        assert!(!is_tool_use_finish(Some("length")));
        assert!(!is_tool_use_finish(None));
    }

    #[test]
    fn test_usage_add() {
        let mut total = Usage::default();
        total.add(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.add(&Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        });
        assert_eq!(total.total_tokens, 17);
    }
}
