//! Built-in providers that need no network access.
//!
//! `stub` implements every capability with deterministic output and is the
//! development default. `echo` only implements the base contract.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use genflow_jobs::JobKind;

use crate::error::ProviderError;
use crate::provider::{
    ChunkSink, FinishReason, Generation, GenerationRequest, ModelLister, Provider,
    StreamingProvider, ToolCall, ToolCallingProvider, ToolChoice, ToolDefinition,
};

fn count_tokens(text: &str) -> u64 {
    text.split_whitespace().count().max(1) as u64
}

/// Deterministic, fully capable provider.
#[derive(Debug, Clone)]
pub struct StubProvider {
    name: String,
    models: Vec<String>,
    chunk_delay: Option<Duration>,
    failure: Option<String>,
    available: bool,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            name: "stub".to_string(),
            models: vec!["stub-1".to_string(), "stub-large".to_string()],
            chunk_delay: None,
            failure: None,
            available: true,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sleep between streamed chunks.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Make every call fail with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    fn check(&self) -> Result<(), ProviderError> {
        match &self.failure {
            Some(message) => Err(ProviderError::upstream(&self.name, message.clone())),
            None => Ok(()),
        }
    }

    fn model_for(&self, request: &GenerationRequest) -> String {
        request
            .model
            .clone()
            .unwrap_or_else(|| self.models[0].clone())
    }

    /// The full output for a request, honouring `max_tokens`.
    fn render(&self, request: &GenerationRequest) -> (String, FinishReason) {
        let prompt = request.effective_prompt();
        let full = match request.kind {
            JobKind::Text => format!("Stub response to: {}", prompt.trim()),
            JobKind::Image => {
                let slug = prompt.split_whitespace().collect::<Vec<_>>().join("-");
                format!("stub://images/{slug}.png")
            }
        };

        match request.max_tokens {
            Some(max) if (max as u64) < count_tokens(&full) => {
                let truncated = full
                    .split_inclusive(' ')
                    .take(max as usize)
                    .collect::<String>()
                    .trim_end()
                    .to_string();
                (truncated, FinishReason::Length)
            }
            _ => (full, FinishReason::Stop),
        }
    }

    fn generation(
        &self,
        request: &GenerationRequest,
        content: String,
        finish_reason: FinishReason,
    ) -> Generation {
        Generation {
            tokens_in: count_tokens(&request.effective_prompt()),
            tokens_out: count_tokens(&content),
            model: self.model_for(request),
            content,
            finish_reason,
            tool_calls: Vec::new(),
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.models[0]
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn execute(&self, request: &GenerationRequest) -> Result<Generation, ProviderError> {
        self.check()?;
        let (content, finish) = self.render(request);
        Ok(self.generation(request, content, finish))
    }

    fn as_streaming(&self) -> Option<&dyn StreamingProvider> {
        Some(self)
    }

    fn as_tool_calling(&self) -> Option<&dyn ToolCallingProvider> {
        Some(self)
    }

    fn as_model_lister(&self) -> Option<&dyn ModelLister> {
        Some(self)
    }
}

#[async_trait]
impl StreamingProvider for StubProvider {
    async fn stream(
        &self,
        request: &GenerationRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<Generation, ProviderError> {
        self.check()?;
        let (content, finish) = self.render(request);

        for chunk in content.split_inclusive(' ') {
            sink.send_chunk(chunk);
            match self.chunk_delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
        }

        Ok(self.generation(request, content, finish))
    }
}

#[async_trait]
impl ToolCallingProvider for StubProvider {
    async fn complete_with_tools(
        &self,
        request: &GenerationRequest,
        tools: &[ToolDefinition],
        choice: &ToolChoice,
    ) -> Result<Generation, ProviderError> {
        self.check()?;
        let prompt = request.effective_prompt();

        let chosen = match choice {
            ToolChoice::None => None,
            ToolChoice::Auto => tools.iter().find(|t| prompt.contains(t.name.as_str())),
            ToolChoice::Required => Some(
                tools
                    .first()
                    .ok_or_else(|| {
                        ProviderError::invalid("toolChoice 'required' needs at least one tool")
                    })?,
            ),
            ToolChoice::Function(name) => Some(
                tools
                    .iter()
                    .find(|t| &t.name == name)
                    .ok_or_else(|| {
                        ProviderError::invalid(format!("tool '{name}' is not defined"))
                    })?,
            ),
        };

        match chosen {
            Some(tool) => {
                let mut generation =
                    self.generation(request, String::new(), FinishReason::ToolCalls);
                generation.tool_calls = vec![ToolCall {
                    id: format!("call_{}", tool.name),
                    name: tool.name.clone(),
                    arguments: json!({ "prompt": prompt }),
                }];
                generation.tokens_out = 1;
                Ok(generation)
            }
            None => {
                let (content, finish) = self.render(request);
                Ok(self.generation(request, content, finish))
            }
        }
    }
}

#[async_trait]
impl ModelLister for StubProvider {
    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.check()?;
        Ok(self.models.clone())
    }
}

/// Base-contract-only provider that returns the prompt unchanged.
#[derive(Debug, Clone)]
pub struct EchoProvider {
    name: String,
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoProvider {
    pub fn new() -> Self {
        Self {
            name: "echo".to_string(),
        }
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        "echo-1"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn execute(&self, request: &GenerationRequest) -> Result<Generation, ProviderError> {
        let content = request.effective_prompt();
        let tokens = count_tokens(&content);
        Ok(Generation {
            model: request.model.clone().unwrap_or_else(|| "echo-1".to_string()),
            tokens_in: tokens,
            tokens_out: tokens,
            content,
            finish_reason: FinishReason::Stop,
            tool_calls: Vec::new(),
        })
    }
}
