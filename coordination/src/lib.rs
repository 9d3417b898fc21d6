//! Refinement Swarm Coordination Library
//!
//! Deterministic core of a quorum-gated refinement loop:
//! - `controller`: round state machine driving the agent chain, validation,
//!   gap checks and escalation to a terminal phase
//! - `invoker`: uniform capability boundary (`AgentInvoker`), role binding
//!   table and per-call timeout policy
//! - `gaps`: TF-IDF gap extraction and cross-round persistence memory
//! - `escalation`: concurrent top-K gap resolution with deterministic merge
//! - `consensus`: vote classification and ceil(2n/3) quorum tally
//! - `events`: phase-transition events over a broadcast bus
//!
//! # Usage
//!
//! ```ignore
//! use coordination::{RefinementPolicy, RoleBindings, RoundController, VoterPanel, PipelineState};
//!
//! let controller = RoundController::new(RefinementPolicy::default(), bindings, VoterPanel::default())?;
//! let report = controller.run(PipelineState::new("Load orders.csv and aggregate revenue")).await;
//! println!("{}", report.result.summary_line());
//! ```

pub mod config;
pub mod consensus;
pub mod controller;
pub mod error;
pub mod escalation;
pub mod events;
pub mod gaps;
pub mod invoker;
pub mod retrieval;
pub mod state;

pub use config::RefinementPolicy;
pub use consensus::{ConsensusEvaluator, StructuralValidator, ValidationTool, VoterPanel};
pub use controller::{RoundController, RoundPhase, RoundSession, RunReport};
pub use error::{CapabilityError, CoordinationError, CoordinationResult, RetryCategory};
pub use escalation::{EscalationManager, EscalationReport, ResolutionPatch};
pub use events::{EventBus, PhaseEvent, SharedEventBus};
pub use gaps::{GapAnalyzer, KeywordOverlapMemory, PersistenceCheck, SimilarityMemory};
pub use invoker::{AgentInvoker, AgentRole, CallPolicy, InvocationExtra, InvocationOutput, RoleBindings};
pub use retrieval::{ContextRetriever, NoRetrieval};
pub use state::{
    ConsensusResult, Gap, PipelineState, PipelineStep, RunResult, TerminalReason, ValidationReport,
    Vote, VoteDecision,
};
