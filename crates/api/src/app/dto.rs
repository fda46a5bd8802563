//! Request bodies and their mapping onto service inputs.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use genflow_auth::Scope;
use genflow_infra::queue::Lane;
use genflow_infra::{CompletionRequest, SubmitJob};
use genflow_jobs::JobKind;
use genflow_providers::{ChatMessage, ProviderError, ToolChoice, ToolDefinition};

/// Body of `POST /v1/completions` and `POST /v1/completions/stream`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionBody {
    #[serde(default, rename = "type")]
    pub kind: Option<JobKind>,
    pub prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub tool_choice: JsonValue,
}

impl CompletionBody {
    pub fn into_request(self) -> Result<CompletionRequest, ProviderError> {
        Ok(CompletionRequest {
            kind: self.kind,
            prompt: self.prompt,
            messages: self.messages,
            provider: self.provider,
            model: self.model,
            max_tokens: self.max_tokens,
            tools: self.tools,
            tool_choice: ToolChoice::from_json(&self.tool_choice)?,
        })
    }

    pub fn has_input(&self) -> bool {
        self.prompt.as_deref().is_some_and(|p| !p.trim().is_empty()) || !self.messages.is_empty()
    }
}

/// Body of `POST /v1/jobs`. `prompt` is accepted as an alias of `input`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobBody {
    #[serde(default = "default_kind", rename = "type")]
    pub kind: JobKind,
    #[serde(alias = "prompt")]
    pub input: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub lane: Lane,
}

fn default_kind() -> JobKind {
    JobKind::Text
}

impl From<SubmitJobBody> for SubmitJob {
    fn from(body: SubmitJobBody) -> Self {
        SubmitJob {
            kind: body.kind,
            input: body.input,
            provider: body.provider,
            model: body.model,
            max_tokens: body.max_tokens,
            lane: body.lane,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyBody {
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateKeyBody {
    /// Requested scopes, `read` when none are given.
    pub fn parsed_scopes(&self) -> Result<Vec<Scope>, genflow_auth::AuthError> {
        if self.scopes.is_empty() {
            return Ok(vec![Scope::READ]);
        }
        let mut scopes = self
            .scopes
            .iter()
            .map(|s| Scope::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        scopes.sort();
        scopes.dedup();
        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_body_maps_tool_choice() {
        let body: CompletionBody = serde_json::from_value(json!({
            "prompt": "weather?",
            "maxTokens": 20,
            "tools": [{ "name": "weather" }],
            "toolChoice": { "type": "function", "function": { "name": "weather" } }
        }))
        .unwrap();
        assert!(body.has_input());
        let req = body.into_request().unwrap();
        assert_eq!(req.max_tokens, Some(20));
        assert_eq!(req.tool_choice, ToolChoice::Function("weather".into()));
    }

    #[test]
    fn submit_body_accepts_prompt_alias_and_lane() {
        let body: SubmitJobBody =
            serde_json::from_value(json!({ "prompt": "hi", "lane": "critical" })).unwrap();
        let job = SubmitJob::from(body);
        assert_eq!(job.input, "hi");
        assert_eq!(job.kind, JobKind::Text);
        assert_eq!(job.lane, Lane::Critical);
    }

    #[test]
    fn key_scopes_default_to_read_and_reject_unknown() {
        let body: CreateKeyBody = serde_json::from_value(json!({ "name": "ci" })).unwrap();
        assert_eq!(body.parsed_scopes().unwrap(), vec![Scope::READ]);

        let duplicated = json!({ "name": "ci", "scopes": ["write", "read", "write"] });
        let body: CreateKeyBody = serde_json::from_value(duplicated).unwrap();
        assert_eq!(body.parsed_scopes().unwrap(), vec![Scope::READ, Scope::WRITE]);

        let body: CreateKeyBody =
            serde_json::from_value(json!({ "name": "ci", "scopes": ["root"] })).unwrap();
        assert!(body.parsed_scopes().is_err());
    }
}
