//! Error taxonomy for the refinement loop.
//!
//! Capability-level failures are contained where they happen and degrade the
//! current round. Only invariant violations abort a run. Callers classify
//! with `is_fatal()` / `retry_category()` rather than matching on strings.
//!
//! | Error                 | Fatal | Handling                                  |
//! |-----------------------|-------|-------------------------------------------|
//! | CapabilityTimeout     | no    | retried once, then treated as step failure |
//! | Capability            | no    | step/vote/resolution dropped for the round |
//! | EscalationExhausted   | no    | ordinary rejected round                    |
//! | VoteParse             | no    | vote classified as abstain                 |
//! | Continuity            | yes   | run aborted                                |
//! | InvalidTransition     | yes   | run aborted                                |
//! | MalformedState        | yes   | run aborted                                |
//! | Configuration         | yes   | rejected before the run starts             |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::invoker::AgentRole;

/// Failure reported by a capability provider behind an `AgentInvoker`.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("No provider bound for role {0}")]
    Unbound(AgentRole),

    #[error("Unexpected output for role {role}: expected {expected}")]
    UnexpectedOutput { role: AgentRole, expected: &'static str },
}

/// How the controller treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// A single call exceeded its budget; one retry is allowed.
    Timeout,
    /// Provider-side failure; contained, not retried.
    Degrade,
    /// Round-level outcome that is handled as a rejection.
    Rejection,
    /// Invariant violation; the run stops.
    Fatal,
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Degrade => write!(f, "degrade"),
            Self::Rejection => write!(f, "rejection"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Unified error type for the coordination core.
#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    /// A single invoker call exceeded its time budget (after the retry).
    #[error("Capability timeout: {role} exceeded {timeout_ms}ms after {attempts} attempt(s)")]
    CapabilityTimeout {
        role: AgentRole,
        timeout_ms: u64,
        attempts: u32,
    },

    /// A provider returned an error.
    #[error("Capability failure [{role}]: {source}")]
    Capability {
        role: AgentRole,
        #[source]
        source: CapabilityError,
    },

    /// A step broke the output-propagation invariant.
    #[error("Continuity violation at step '{step}': {reason}")]
    Continuity { step: String, reason: String },

    /// Every concurrent resolution call failed.
    #[error("Escalation exhausted: all {attempted} resolution call(s) failed")]
    EscalationExhausted { attempted: usize },

    /// A voter's judgment could not be classified.
    #[error("Vote from '{voter}' could not be classified: {excerpt}")]
    VoteParse { voter: String, excerpt: String },

    /// The round state machine was asked to make an illegal move.
    #[error("Invalid phase transition: {0}")]
    InvalidTransition(String),

    /// Run state is inconsistent.
    #[error("Malformed state: {0}")]
    MalformedState(String),

    /// Policy or binding configuration is unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CoordinationError {
    pub fn capability(role: AgentRole, source: CapabilityError) -> Self {
        Self::Capability { role, source }
    }

    pub fn timeout(role: AgentRole, timeout: Duration, attempts: u32) -> Self {
        Self::CapabilityTimeout {
            role,
            timeout_ms: timeout.as_millis() as u64,
            attempts,
        }
    }

    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::CapabilityTimeout { .. } => RetryCategory::Timeout,
            Self::Capability { .. } | Self::VoteParse { .. } => RetryCategory::Degrade,
            Self::EscalationExhausted { .. } => RetryCategory::Rejection,
            Self::Continuity { .. }
            | Self::InvalidTransition(_)
            | Self::MalformedState(_)
            | Self::Configuration(_) => RetryCategory::Fatal,
        }
    }

    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        self.retry_category() == RetryCategory::Fatal
    }

    /// Short machine-readable code used in events and run results.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapabilityTimeout { .. } => "capability_timeout",
            Self::Capability { .. } => "capability_failure",
            Self::Continuity { .. } => "continuity_error",
            Self::EscalationExhausted { .. } => "escalation_exhausted",
            Self::VoteParse { .. } => "vote_parse_error",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::MalformedState(_) => "malformed_state",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

/// Result alias for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;
