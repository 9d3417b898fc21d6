//! HTTP capability providers.
//!
//! Every role talks to an OpenAI-compatible `/chat/completions` endpoint.
//! Producer roles must answer with a `StepPayload` JSON object; voters answer
//! in free text that the consensus classifier reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use coordination::{
    AgentInvoker, AgentRole, CapabilityError, InvocationExtra, InvocationOutput, PipelineState,
    PipelineStep, RoleBindings, VoterPanel,
};
use serde_json::Value;
use tracing::debug;

use crate::config::{Endpoint, SwarmConfig};
use crate::contracts::parse_step_payload;
use crate::prompts::{system_prompt, user_prompt};

const MAX_TOKENS: u32 = 2048;

/// One chat-completions endpoint serving any role.
pub struct ChatCompletionsInvoker {
    name: String,
    endpoint: Endpoint,
    client: reqwest::Client,
}

impl ChatCompletionsInvoker {
    pub fn new(endpoint: Endpoint, http_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            name: format!("{}@{}", endpoint.model, endpoint.url),
            endpoint,
            client,
        })
    }

    fn request_body(&self, role: AgentRole, state: &PipelineState, extra: &InvocationExtra) -> Value {
        serde_json::json!({
            "model": self.endpoint.model,
            "messages": [
                {"role": "system", "content": system_prompt(role)},
                {"role": "user", "content": user_prompt(role, state, extra)}
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": self.endpoint.temperature
        })
    }
}

/// Pull `choices[0].message.content` out of a completion response.
pub fn completion_content(resp: &Value) -> Result<String, CapabilityError> {
    resp["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CapabilityError::ParseError("response has no choices[0].message.content".into()))
}

/// Turn reply text into the output shape the role expects.
pub fn interpret_reply(role: AgentRole, content: String) -> Result<InvocationOutput, CapabilityError> {
    if role == AgentRole::ValidationVote {
        return Ok(InvocationOutput::Judgment(content));
    }
    let payload = parse_step_payload(&content).map_err(|e| CapabilityError::ParseError(e.to_string()))?;
    let step: PipelineStep = payload.into();
    Ok(InvocationOutput::Step(step.with_role(role)))
}

#[async_trait]
impl AgentInvoker for ChatCompletionsInvoker {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        role: AgentRole,
        state: &PipelineState,
        extra: &InvocationExtra,
    ) -> Result<InvocationOutput, CapabilityError> {
        let start = Instant::now();
        let mut request = self
            .client
            .post(self.endpoint.completions_url())
            .header("Content-Type", "application/json")
            .json(&self.request_body(role, state, extra));
        if let Some(key) = &self.endpoint.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                CapabilityError::Unavailable(e.to_string())
            } else {
                CapabilityError::RequestFailed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::RequestFailed(format!(
                "{} returned {}: {}",
                self.name, status, body
            )));
        }

        let resp_json: Value = response
            .json()
            .await
            .map_err(|e| CapabilityError::ParseError(e.to_string()))?;
        let content = completion_content(&resp_json)?;

        debug!(
            provider = %self.name,
            role = %role,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "completion received"
        );
        interpret_reply(role, content)
    }
}

/// Routes validation votes to per-voter providers by `voter_id`.
pub struct PanelInvoker {
    voters: HashMap<String, Arc<dyn AgentInvoker>>,
    fallback: Arc<dyn AgentInvoker>,
}

impl PanelInvoker {
    pub fn new(fallback: Arc<dyn AgentInvoker>) -> Self {
        Self {
            voters: HashMap::new(),
            fallback,
        }
    }

    pub fn with_voter(mut self, id: impl Into<String>, invoker: Arc<dyn AgentInvoker>) -> Self {
        self.voters.insert(id.into(), invoker);
        self
    }

    fn route(&self, extra: &InvocationExtra) -> &Arc<dyn AgentInvoker> {
        extra
            .voter_id
            .as_deref()
            .and_then(|id| self.voters.get(id))
            .unwrap_or(&self.fallback)
    }
}

#[async_trait]
impl AgentInvoker for PanelInvoker {
    fn provider(&self) -> &str {
        "panel"
    }

    async fn invoke(
        &self,
        role: AgentRole,
        state: &PipelineState,
        extra: &InvocationExtra,
    ) -> Result<InvocationOutput, CapabilityError> {
        self.route(extra).invoke(role, state, extra).await
    }
}

/// Bind every role to its configured endpoint and build the voter panel.
pub fn build_bindings(config: &SwarmConfig) -> Result<(RoleBindings, VoterPanel)> {
    let http_timeout = Duration::from_secs(config.http_timeout_secs);
    let mut bindings = RoleBindings::new();

    for role in AgentRole::ALL {
        if role == AgentRole::ValidationVote {
            continue;
        }
        let invoker = ChatCompletionsInvoker::new(config.endpoint_for(role).clone(), http_timeout)?;
        bindings.insert(role, Arc::new(invoker));
    }

    let vote_endpoint = config.endpoint_for(AgentRole::ValidationVote).clone();
    let mut panel = PanelInvoker::new(Arc::new(ChatCompletionsInvoker::new(vote_endpoint, http_timeout)?));
    for voter in &config.voters {
        if let Some(endpoint) = &voter.endpoint {
            panel = panel.with_voter(
                voter.id.clone(),
                Arc::new(ChatCompletionsInvoker::new(endpoint.clone(), http_timeout)?),
            );
        }
    }
    bindings.insert(AgentRole::ValidationVote, Arc::new(panel));

    Ok((bindings, config.voter_panel()?))
}
