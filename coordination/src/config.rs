//! Refinement policy: every threshold the control loop consults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinationError, CoordinationResult};
use crate::invoker::{AgentRole, CallPolicy};

/// Tunables for one run. Deserializable so the binary can load it from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementPolicy {
    /// Round limit. `round` never exceeds this.
    pub max_rounds: u32,
    /// Similarity above which a gap counts as persistent
    pub persistence_threshold: f64,
    /// A gap must be first seen more than this many rounds ago to escalate
    pub min_persistence_rounds: u32,
    /// K: at most this many gaps per escalation, and the worker bound
    pub escalation_top_k: usize,
    /// N: gaps returned by the analyzer
    pub gap_top_n: usize,
    /// Multiplier for terms in a sentence with a deficiency cue
    pub cue_boost: f64,
    pub call_timeout_ms: u64,
    pub timeout_retries: u32,
    /// Cap on how many rounds may escalate
    pub max_escalation_rounds: u32,
    /// Snippets requested from the retrieval service per call
    pub retrieval_limit: usize,
    /// Fixed role order of the agent chain
    pub chain: Vec<AgentRole>,
}

impl Default for RefinementPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            persistence_threshold: 0.3,
            min_persistence_rounds: 2,
            escalation_top_k: 3,
            gap_top_n: 3,
            cue_boost: 1.5,
            call_timeout_ms: 120_000,
            timeout_retries: 1,
            max_escalation_rounds: 2,
            retrieval_limit: 5,
            chain: vec![
                AgentRole::PromptRefinement,
                AgentRole::Ingestion,
                AgentRole::Cleaning,
                AgentRole::Transformation,
            ],
        }
    }
}

impl RefinementPolicy {
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy::new(Duration::from_millis(self.call_timeout_ms), self.timeout_retries)
    }

    /// Last artifact-producing role in the chain. It is exempt from the
    /// output-reporting half of the continuity check.
    pub fn last_producer(&self) -> Option<AgentRole> {
        self.chain.iter().rev().copied().find(|r| r.produces_artifact())
    }

    pub fn validate(&self) -> CoordinationResult<()> {
        if self.max_rounds == 0 {
            return Err(CoordinationError::Configuration(
                "max_rounds must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.persistence_threshold) {
            return Err(CoordinationError::Configuration(format!(
                "persistence_threshold must be within [0, 1], got {}",
                self.persistence_threshold
            )));
        }
        if self.escalation_top_k == 0 {
            return Err(CoordinationError::Configuration(
                "escalation_top_k must be at least 1".into(),
            ));
        }
        if self.gap_top_n == 0 {
            return Err(CoordinationError::Configuration(
                "gap_top_n must be at least 1".into(),
            ));
        }
        if !self.cue_boost.is_finite() || self.cue_boost < 1.0 {
            return Err(CoordinationError::Configuration(format!(
                "cue_boost must be >= 1.0, got {}",
                self.cue_boost
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(CoordinationError::Configuration(
                "call_timeout_ms must be positive".into(),
            ));
        }
        if self.chain.is_empty() {
            return Err(CoordinationError::Configuration(
                "agent chain must contain at least one role".into(),
            ));
        }
        if let Some(role) = self
            .chain
            .iter()
            .find(|r| matches!(r, AgentRole::ValidationVote | AgentRole::GapResolution))
        {
            return Err(CoordinationError::Configuration(format!(
                "role {role} cannot be part of the agent chain"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let policy = RefinementPolicy::default();
        policy.validate().unwrap();
        assert_eq!(policy.last_producer(), Some(AgentRole::Transformation));
        assert_eq!(policy.call_policy().timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let policy = RefinementPolicy {
            persistence_threshold: 1.2,
            ..Default::default()
        };
        assert!(policy.validate().unwrap_err().is_fatal());
    }

    #[test]
    fn test_rejects_zero_k_and_voter_in_chain() {
        let zero_k = RefinementPolicy {
            escalation_top_k: 0,
            ..Default::default()
        };
        assert!(zero_k.validate().is_err());

        let voter_chain = RefinementPolicy {
            chain: vec![AgentRole::Ingestion, AgentRole::ValidationVote],
            ..Default::default()
        };
        assert!(voter_chain.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let policy: RefinementPolicy =
            serde_json::from_str(r#"{"max_rounds": 8, "chain": ["ingestion", "cleaning"]}"#).unwrap();
        assert_eq!(policy.max_rounds, 8);
        assert_eq!(policy.escalation_top_k, 3);
        assert_eq!(policy.last_producer(), Some(AgentRole::Cleaning));
    }
}
