//! Round state machine: phases, transitions and session tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoordinationError, CoordinationResult};

/// Phase of a refinement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Run created, nothing invoked yet.
    Init,
    /// Sequential role chain is building the artifact.
    AgentChain,
    /// First validation of the round.
    Validate,
    /// Rejected: extracting gaps and checking persistence.
    GapCheck,
    /// Concurrent gap resolution in flight.
    Escalate,
    /// Re-validation after an escalation merge, same round.
    IntraRoundValidate,
    /// Recording feedback and advancing the round counter.
    NextRound,
    /// Quorum reached.
    Accepted,
    /// Round limit reached without quorum.
    Exhausted,
    /// Stopped by an invariant violation.
    Aborted,
}

impl RoundPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Exhausted | Self::Aborted)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [RoundPhase] {
        match self {
            Self::Init => &[Self::AgentChain, Self::Aborted],
            Self::AgentChain => &[Self::Validate, Self::Aborted],
            Self::Validate => &[Self::Accepted, Self::GapCheck, Self::Aborted],
            Self::GapCheck => &[Self::Escalate, Self::NextRound, Self::Aborted],
            Self::Escalate => &[Self::IntraRoundValidate, Self::NextRound, Self::Aborted],
            Self::IntraRoundValidate => &[Self::Accepted, Self::NextRound, Self::Aborted],
            Self::NextRound => &[Self::AgentChain, Self::Exhausted, Self::Aborted],
            Self::Accepted | Self::Exhausted | Self::Aborted => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::AgentChain => "agent_chain",
            Self::Validate => "validate",
            Self::GapCheck => "gap_check",
            Self::Escalate => "escalate",
            Self::IntraRoundValidate => "intra_round_validate",
            Self::NextRound => "next_round",
            Self::Accepted => "accepted",
            Self::Exhausted => "exhausted",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: RoundPhase,
    pub to: RoundPhase,
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Tracks the current phase and every transition of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSession {
    pub run_id: String,
    pub phase: RoundPhase,
    pub max_rounds: u32,
    /// Number of rounds in which an escalation ran
    pub escalation_rounds: u32,
    pub transitions: Vec<PhaseTransition>,
    pub created_at: DateTime<Utc>,
}

impl RoundSession {
    pub fn new(run_id: &str, max_rounds: u32) -> Self {
        Self {
            run_id: run_id.to_string(),
            phase: RoundPhase::Init,
            max_rounds,
            escalation_rounds: 0,
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Move to `to`, or fail if the table does not allow it.
    pub fn transition(&mut self, to: RoundPhase, round: u32, reason: &str) -> CoordinationResult<RoundPhase> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(CoordinationError::InvalidTransition(format!(
                "{} → {} (allowed: {:?})",
                self.phase,
                to,
                self.phase.valid_transitions()
            )));
        }
        let from = self.phase;
        self.transitions.push(PhaseTransition {
            from,
            to,
            round,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        if to == RoundPhase::Escalate {
            self.escalation_rounds += 1;
        }
        Ok(from)
    }

    /// Force the terminal `Aborted` phase. No-op once terminal.
    pub fn abort(&mut self, round: u32, reason: &str) -> Option<RoundPhase> {
        if self.phase.is_terminal() {
            return None;
        }
        let from = self.phase;
        self.transitions.push(PhaseTransition {
            from,
            to: RoundPhase::Aborted,
            round,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = RoundPhase::Aborted;
        Some(from)
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Phases visited, in order, starting from `Init`.
    pub fn path(&self) -> Vec<RoundPhase> {
        std::iter::once(RoundPhase::Init)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} transition(s) | {} escalation round(s) | run={}",
            self.phase,
            self.transitions.len(),
            self.escalation_rounds,
            self.run_id
        )
    }
}
