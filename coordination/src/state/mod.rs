//! Run state for the refinement loop
//!
//! Everything a run reads or writes lives here: the pipeline steps, the
//! round counter, the append-only feedback history, and the run result
//! written when the controller reaches a terminal phase.

pub mod types;

pub use types::{
    ConsensusResult, Gap, PipelineState, PipelineStep, RunId, RunResult, TerminalReason,
    ValidationReport, Vote, VoteDecision,
};
