//! Capability boundary to external reasoning providers.
//!
//! Every role (refinement, chain steps, voters, gap resolution) goes through
//! the same `AgentInvoker` trait. Providers are selected per role from a
//! declarative `RoleBindings` table, and every call is wrapped by `CallPolicy`
//! (per-call timeout plus one retry on timeout).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CapabilityError, CoordinationError, CoordinationResult};
use crate::state::{Gap, PipelineState, PipelineStep};

/// Roles a capability provider can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    PromptRefinement,
    Ingestion,
    Cleaning,
    Transformation,
    ValidationVote,
    GapResolution,
}

impl AgentRole {
    pub const ALL: [AgentRole; 6] = [
        Self::PromptRefinement,
        Self::Ingestion,
        Self::Cleaning,
        Self::Transformation,
        Self::ValidationVote,
        Self::GapResolution,
    ];

    /// Roles whose steps materialize an artifact that later steps consume.
    pub fn produces_artifact(self) -> bool {
        matches!(self, Self::Ingestion | Self::Cleaning | Self::Transformation)
    }

    /// Roles that get retrieved context before invocation.
    pub fn uses_retrieval(self) -> bool {
        matches!(self, Self::Ingestion | Self::Cleaning | Self::Transformation)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PromptRefinement => "prompt_refinement",
            Self::Ingestion => "ingestion",
            Self::Cleaning => "cleaning",
            Self::Transformation => "transformation",
            Self::ValidationVote => "validation_vote",
            Self::GapResolution => "gap_resolution",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| format!("unknown agent role: {s}"))
    }
}

/// Role-specific parameters carried alongside the state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationExtra {
    /// Set for validation votes
    pub voter_id: Option<String>,
    /// Set for gap resolution
    pub gap: Option<Gap>,
    /// Artifact the step should consume
    pub input_path: Option<String>,
    pub input_format: Option<String>,
    /// Retrieval-service snippets, possibly empty
    pub retrieved_context: Vec<String>,
    /// "MUST address these gaps: ..." digest from the previous round
    pub feedback_summary: Option<String>,
    /// Validation-tool issues handed to voters
    pub validation_issues: Vec<String>,
    /// Free-form provider parameters
    pub params: HashMap<String, String>,
}

impl InvocationExtra {
    pub fn for_voter(voter_id: impl Into<String>, issues: Vec<String>) -> Self {
        Self {
            voter_id: Some(voter_id.into()),
            validation_issues: issues,
            ..Default::default()
        }
    }

    pub fn for_gap(gap: Gap) -> Self {
        Self {
            gap: Some(gap),
            ..Default::default()
        }
    }
}

/// What a provider returns: a step for producers, free text for voters.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutput {
    Step(PipelineStep),
    Judgment(String),
}

impl InvocationOutput {
    pub fn into_step(self, role: AgentRole) -> Result<PipelineStep, CapabilityError> {
        match self {
            Self::Step(step) => Ok(step),
            Self::Judgment(_) => Err(CapabilityError::UnexpectedOutput {
                role,
                expected: "step",
            }),
        }
    }

    /// Voters may answer with a step; its rationale is then the judgment.
    pub fn into_judgment(self) -> String {
        match self {
            Self::Judgment(text) => text,
            Self::Step(step) => step.rationale,
        }
    }
}

/// Opaque capability call.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Name of the backing provider, for logs and events.
    fn provider(&self) -> &str;

    async fn invoke(
        &self,
        role: AgentRole,
        state: &PipelineState,
        extra: &InvocationExtra,
    ) -> Result<InvocationOutput, CapabilityError>;
}

/// Declarative role -> provider table.
#[derive(Clone, Default)]
pub struct RoleBindings {
    bindings: HashMap<AgentRole, Arc<dyn AgentInvoker>>,
}

impl RoleBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, role: AgentRole, invoker: Arc<dyn AgentInvoker>) -> Self {
        self.bindings.insert(role, invoker);
        self
    }

    pub fn insert(&mut self, role: AgentRole, invoker: Arc<dyn AgentInvoker>) {
        self.bindings.insert(role, invoker);
    }

    pub fn get(&self, role: AgentRole) -> Option<&Arc<dyn AgentInvoker>> {
        self.bindings.get(&role)
    }

    pub fn resolve(&self, role: AgentRole) -> Result<Arc<dyn AgentInvoker>, CapabilityError> {
        self.bindings
            .get(&role)
            .cloned()
            .ok_or(CapabilityError::Unbound(role))
    }

    pub fn is_bound(&self, role: AgentRole) -> bool {
        self.bindings.contains_key(&role)
    }

    /// Fail fast if any of `roles` has no provider.
    pub fn require(&self, roles: &[AgentRole]) -> CoordinationResult<()> {
        let missing: Vec<String> = roles
            .iter()
            .filter(|r| !self.is_bound(**r))
            .map(|r| r.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoordinationError::Configuration(format!(
                "no provider bound for role(s): {}",
                missing.join(", ")
            )))
        }
    }
}

impl fmt::Debug for RoleBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        let mut roles: Vec<_> = self.bindings.iter().collect();
        roles.sort_by_key(|(role, _)| **role);
        for (role, invoker) in roles {
            map.entry(&role.as_str(), &invoker.provider());
        }
        map.finish()
    }
}

/// Per-call time budget with a bounded retry on timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    /// Extra attempts after a timeout. Provider errors are never retried.
    pub timeout_retries: u32,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            timeout_retries: 1,
        }
    }
}

impl CallPolicy {
    pub fn new(timeout: Duration, timeout_retries: u32) -> Self {
        Self {
            timeout,
            timeout_retries,
        }
    }

    /// Invoke `invoker` under this policy.
    pub async fn call(
        &self,
        invoker: &dyn AgentInvoker,
        role: AgentRole,
        state: &PipelineState,
        extra: &InvocationExtra,
    ) -> CoordinationResult<InvocationOutput> {
        let max_attempts = self.timeout_retries + 1;
        for attempt in 1..=max_attempts {
            match tokio::time::timeout(self.timeout, invoker.invoke(role, state, extra)).await {
                Ok(Ok(output)) => {
                    debug!(%role, provider = invoker.provider(), attempt, "capability call succeeded");
                    return Ok(output);
                }
                Ok(Err(e)) => {
                    warn!(%role, provider = invoker.provider(), error = %e, "capability call failed");
                    return Err(CoordinationError::capability(role, e));
                }
                Err(_) => {
                    warn!(
                        %role,
                        provider = invoker.provider(),
                        attempt,
                        max_attempts,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "capability call timed out"
                    );
                }
            }
        }
        Err(CoordinationError::timeout(role, self.timeout, max_attempts))
    }
}
