use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use tracing::{debug, warn};

use crate::agent::{AgentError, Reasoner};
use crate::decision::{Decision, DecisionRequest, DECISION_PROMPT, PLANNER_PROMPT};

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub api_base: String,   // e.g. "https://openrouter.ai/api/v1"
    pub api_key: String,    // env OPENROUTER_API_KEY
    pub plan_model: String, // e.g. "openai/gpt-4o-mini"
    pub action_model: String,
    pub plan_temperature: f32,
    pub action_temperature: f32,
    pub action_max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| "https://openrouter.ai/api/v1".into()),
            api_key: env::var("OPENROUTER_API_KEY").unwrap_or_default(),
            plan_model: env::var("STEER_PLAN_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".into()),
            action_model: env::var("STEER_ACTION_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".into()),
            plan_temperature: 0.5,
            action_temperature: 0.0,
            action_max_tokens: 250,
        }
    }
}

/// Chat-completions client for the planning and action-decision requests.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    cfg: ChatConfig,
}

impl ChatClient {
    pub fn new(cfg: ChatConfig) -> Result<Self, AgentError> {
        if cfg.api_key.trim().is_empty() {
            return Err(AgentError::Config("OPENROUTER_API_KEY missing".into()));
        }
        Ok(Self { http: Client::new(), cfg })
    }

    pub fn plan_body(&self, objective: &str) -> Value {
        json!({
            "model": self.cfg.plan_model,
            "messages": [
                { "role": "system", "content": PLANNER_PROMPT },
                { "role": "user", "content": objective }
            ],
            "temperature": self.cfg.plan_temperature
        })
    }

    pub fn decision_body(&self, request: &DecisionRequest<'_>) -> Value {
        let text = request.user_text();
        let content = match &request.state.screenshot {
            Some(data_url) => json!([
                { "type": "text", "text": text },
                { "type": "image_url", "image_url": { "url": data_url } }
            ]),
            None => Value::String(text),
        };
        json!({
            "model": self.cfg.action_model,
            "messages": [
                { "role": "system", "content": DECISION_PROMPT },
                { "role": "user", "content": content }
            ],
            "temperature": self.cfg.action_temperature,
            "max_tokens": self.cfg.action_max_tokens,
            "response_format": { "type": "json_object" }
        })
    }

    async fn complete(&self, body: &Value) -> Result<String, AgentError> {
        let url = format!("{}/chat/completions", self.cfg.api_base.trim_end_matches('/'));
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        message_content(status.as_u16(), &text)
    }
}

/// Classify a chat-completions response and pull out the first choice's
/// message content. Checked in order: status, refusal, choices, content.
pub fn message_content(status: u16, body: &str) -> Result<String, AgentError> {
    if !(200..300).contains(&status) {
        warn!(status, body, "backend error response");
        return Err(AgentError::BackendUnavailable { status, body: body.to_string() });
    }
    let v: Value = serde_json::from_str(body)
        .map_err(|e| AgentError::BackendMalformed(format!("response is not JSON: {e}")))?;

    if let Some(refusal) = refusal_text(v.get("refusal")) {
        return Err(AgentError::BackendRefused(refusal));
    }
    let first = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or(AgentError::BackendEmpty)?;
    if let Some(refusal) = refusal_text(first.pointer("/message/refusal")) {
        return Err(AgentError::BackendRefused(refusal));
    }
    first
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or(AgentError::BackendEmpty)
}

fn refusal_text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl Reasoner for ChatClient {
    async fn plan(&self, objective: &str) -> Result<String, AgentError> {
        let content = self.complete(&self.plan_body(objective)).await?;
        let plan = content.trim();
        if plan.is_empty() {
            return Err(AgentError::BackendEmpty);
        }
        Ok(plan.to_string())
    }

    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision, AgentError> {
        let content = self.complete(&self.decision_body(request)).await?;
        debug!(content = %content, "decision content");
        Decision::parse(&content)
    }
}
