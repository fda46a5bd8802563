//! Provider contracts and the request/response types they exchange.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use genflow_jobs::JobKind;

use crate::capability::{Capabilities, Capability};
use crate::error::ProviderError;

/// One chat turn, for callers that send a conversation instead of a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Normalised input handed to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub kind: JobKind,
    pub prompt: String,
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Text,
            prompt: prompt.into(),
            messages: Vec::new(),
            model: None,
            max_tokens: None,
        }
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The text a backend should respond to.
    ///
    /// An explicit prompt wins; otherwise the conversation is flattened as
    /// `role: content` lines.
    pub fn effective_prompt(&self) -> String {
        if !self.prompt.trim().is_empty() || self.messages.is_empty() {
            return self.prompt.clone();
        }
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
}

/// A callable tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: JsonValue,
}

/// Tool-choice policy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    /// Force a call to the named function.
    Function(String),
}

impl ToolChoice {
    /// Parse the wire forms `"auto" | "none" | "required"`,
    /// `{"type":"function","function":{"name":..}}` and `{"name":..}`.
    pub fn from_json(value: &JsonValue) -> Result<Self, ProviderError> {
        match value {
            JsonValue::Null => Ok(ToolChoice::Auto),
            JsonValue::String(s) => match s.as_str() {
                "auto" => Ok(ToolChoice::Auto),
                "none" => Ok(ToolChoice::None),
                "required" => Ok(ToolChoice::Required),
                other => Err(ProviderError::invalid(format!("unknown toolChoice '{other}'"))),
            },
            JsonValue::Object(obj) => {
                let name = obj
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .or_else(|| obj.get("name"))
                    .and_then(JsonValue::as_str)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| {
                        ProviderError::invalid("toolChoice object must name a function")
                    })?;
                Ok(ToolChoice::Function(name.to_string()))
            }
            _ => Err(ProviderError::invalid("toolChoice must be a string or object")),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: JsonValue,
}

/// Final output and token totals of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub content: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<ToolCall>,
}

/// Receives incremental text while a stream is in progress.
pub trait ChunkSink: Send {
    fn send_chunk(&mut self, chunk: &str);
}

impl<F> ChunkSink for F
where
    F: FnMut(&str) + Send,
{
    fn send_chunk(&mut self, chunk: &str) {
        self(chunk)
    }
}

/// Base contract every backend implements.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    async fn is_available(&self) -> bool;

    async fn execute(&self, request: &GenerationRequest) -> Result<Generation, ProviderError>;

    fn as_streaming(&self) -> Option<&dyn StreamingProvider> {
        None
    }

    fn as_tool_calling(&self) -> Option<&dyn ToolCallingProvider> {
        None
    }

    fn as_model_lister(&self) -> Option<&dyn ModelLister> {
        None
    }

    /// Capability query. Derived from the accessors so the two never disagree.
    fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::execute_only();
        if self.as_streaming().is_some() {
            caps = caps.with(Capability::Stream);
        }
        if self.as_tool_calling().is_some() {
            caps = caps.with(Capability::Tools);
        }
        if self.as_model_lister().is_some() {
            caps = caps.with(Capability::ListModels);
        }
        caps
    }
}

/// Chunked completion. Chunks are pushed to `sink` before totals are returned.
#[async_trait]
pub trait StreamingProvider: Send + Sync {
    async fn stream(
        &self,
        request: &GenerationRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<Generation, ProviderError>;
}

#[async_trait]
pub trait ToolCallingProvider: Send + Sync {
    async fn complete_with_tools(
        &self,
        request: &GenerationRequest,
        tools: &[ToolDefinition],
        choice: &ToolChoice,
    ) -> Result<Generation, ProviderError>;
}

#[async_trait]
pub trait ModelLister: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;
}

impl dyn Provider {
    fn unsupported(&self, capability: Capability) -> ProviderError {
        ProviderError::CapabilityNotSupported {
            provider: self.name().to_string(),
            capability,
        }
    }

    pub fn require_streaming(&self) -> Result<&dyn StreamingProvider, ProviderError> {
        self.as_streaming()
            .ok_or_else(|| self.unsupported(Capability::Stream))
    }

    pub fn require_tools(&self) -> Result<&dyn ToolCallingProvider, ProviderError> {
        self.as_tool_calling()
            .ok_or_else(|| self.unsupported(Capability::Tools))
    }

    pub fn require_model_lister(&self) -> Result<&dyn ModelLister, ProviderError> {
        self.as_model_lister()
            .ok_or_else(|| self.unsupported(Capability::ListModels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_choice_parses_wire_forms() {
        assert_eq!(ToolChoice::from_json(&json!("auto")).unwrap(), ToolChoice::Auto);
        assert_eq!(ToolChoice::from_json(&json!("none")).unwrap(), ToolChoice::None);
        assert_eq!(ToolChoice::from_json(&json!("required")).unwrap(), ToolChoice::Required);
        assert_eq!(
            ToolChoice::from_json(&json!({
                "type": "function",
                "function": {"name": "lookup"}
            }))
            .unwrap(),
            ToolChoice::Function("lookup".into())
        );
        assert_eq!(
            ToolChoice::from_json(&json!({"name": "lookup"})).unwrap(),
            ToolChoice::Function("lookup".into())
        );
        assert_eq!(ToolChoice::from_json(&JsonValue::Null).unwrap(), ToolChoice::Auto);
    }

    #[test]
    fn tool_choice_rejects_unknown() {
        assert!(ToolChoice::from_json(&json!("sometimes")).is_err());
        assert!(ToolChoice::from_json(&json!({"type": "function"})).is_err());
        assert!(ToolChoice::from_json(&json!(3)).is_err());
    }

    #[test]
    fn messages_flatten_when_prompt_missing() {
        let req = GenerationRequest::text("").with_messages(vec![
            ChatMessage { role: "system".into(), content: "be brief".into() },
            ChatMessage { role: "user".into(), content: "hi".into() },
        ]);
        assert_eq!(req.effective_prompt(), "system: be brief\nuser: hi");

        let req = GenerationRequest::text("explicit").with_messages(vec![ChatMessage {
            role: "user".into(),
            content: "ignored".into(),
        }]);
        assert_eq!(req.effective_prompt(), "explicit");
    }
}
