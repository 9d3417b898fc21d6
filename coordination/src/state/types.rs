//! Core records threaded through one refinement run.
//!
//! `PipelineState` has exactly one writer (the round controller). Escalation
//! workers only ever see an `Arc` snapshot of it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::invoker::AgentRole;

/// Unique identifier for a run
pub type RunId = String;

/// One unit of work produced by an agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Step name as reported by the provider
    pub name: String,
    /// Code or text payload
    pub artifact: String,
    /// Why the step exists / what it does
    pub rationale: String,
    /// Where the step materialized its output, if anywhere
    #[serde(default)]
    pub output_path: Option<String>,
    /// Format of the materialized output (csv, parquet, ...)
    #[serde(default)]
    pub output_format: Option<String>,
    /// Artifact this step consumed. Filled by the controller when the
    /// provider leaves it empty.
    #[serde(default)]
    pub input_path: Option<String>,
    /// Role that produced the step
    #[serde(default)]
    pub role: Option<AgentRole>,
}

impl PipelineStep {
    /// Create a step with no materialized output.
    pub fn new(name: impl Into<String>, artifact: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifact: artifact.into(),
            rationale: rationale.into(),
            output_path: None,
            output_format: None,
            input_path: None,
            role: None,
        }
    }

    /// Attach the materialized output location.
    pub fn with_output(mut self, path: impl Into<String>, format: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self.output_format = Some(format.into());
        self
    }

    pub fn with_input(mut self, path: impl Into<String>) -> Self {
        self.input_path = Some(path.into());
        self
    }

    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Whether the step reports both an output path and format.
    pub fn has_output(&self) -> bool {
        self.output_path.as_deref().is_some_and(|p| !p.is_empty())
            && self.output_format.as_deref().is_some_and(|f| !f.is_empty())
    }
}

/// A recurring deficiency extracted from rejection rationales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    /// Normalized keyword
    pub key: String,
    /// Term weight in [0, 1]
    pub score: f64,
    /// Round in which this gap (or its matched predecessor) was first seen
    pub first_seen_round: u32,
    /// Set once a resolution for it has been merged
    pub resolved: bool,
}

impl Gap {
    pub fn new(key: impl Into<String>, score: f64, first_seen_round: u32) -> Self {
        Self {
            key: key.into(),
            score: score.clamp(0.0, 1.0),
            first_seen_round,
            resolved: false,
        }
    }
}

/// A voter's three-way decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    Accept,
    Reject,
    Abstain,
}

impl std::fmt::Display for VoteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Reject => write!(f, "reject"),
            Self::Abstain => write!(f, "abstain"),
        }
    }
}

/// One voter's judgment for the current validation call. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: String,
    pub decision: VoteDecision,
    pub rationale: String,
}

impl Vote {
    pub fn new(voter_id: impl Into<String>, decision: VoteDecision, rationale: impl Into<String>) -> Self {
        Self {
            voter_id: voter_id.into(),
            decision,
            rationale: rationale.into(),
        }
    }
}

/// Structured output of the validation tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
        }
    }

    pub fn invalid(issues: Vec<String>) -> Self {
        Self {
            valid: false,
            issues,
        }
    }
}

/// Outcome of one validation call (initial or intra-round).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Final decision for this validation call
    pub accepted: bool,
    /// Votes in panel order
    pub votes: Vec<Vote>,
    /// Whether the accept count reached the quorum
    pub quorum_met: bool,
    /// Number of accept votes
    pub accept_count: usize,
    /// Accept votes required for quorum
    pub required: usize,
    /// Structural check handed to the voters
    pub validation: ValidationReport,
}

impl ConsensusResult {
    /// Rationales of the voters that rejected, in panel order.
    pub fn rejection_rationales(&self) -> Vec<String> {
        self.votes
            .iter()
            .filter(|v| v.decision == VoteDecision::Reject)
            .map(|v| v.rationale.clone())
            .collect()
    }

    /// Aggregate rationale appended to the feedback history on rejection.
    pub fn rejection_summary(&self) -> String {
        let rejects = self.rejection_rationales();
        let mut summary = format!(
            "{}/{} accept (needs {})",
            self.accept_count,
            self.votes.len(),
            self.required
        );
        if !rejects.is_empty() {
            summary.push_str(": ");
            summary.push_str(&rejects.join(" | "));
        }
        summary
    }

    pub fn count(&self, decision: VoteDecision) -> usize {
        self.votes.iter().filter(|v| v.decision == decision).count()
    }
}

/// The single mutable record for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: RunId,
    /// Original request
    pub task: String,
    /// Output of the prompt-refinement role (empty until it runs)
    pub refined_task: String,
    /// Ordered, append-only except for a trailing escalation replacement
    pub steps: Vec<PipelineStep>,
    /// Completed rounds
    pub round: u32,
    /// Rejection rationales, one per rejected round
    pub feedback_history: Vec<String>,
    /// Gap key -> number of times it was handed to escalation
    pub gap_escalation_count: BTreeMap<String, u32>,
    pub consensus_reached: bool,
    /// Latest materialized artifact
    pub current_artifact_path: Option<String>,
    pub current_format: Option<String>,
    /// Digest of the last round's gaps handed to agents on the next round
    pub feedback_summary: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl PipelineState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
            refined_task: String::new(),
            steps: Vec::new(),
            round: 0,
            feedback_history: Vec::new(),
            gap_escalation_count: BTreeMap::new(),
            consensus_reached: false,
            current_artifact_path: None,
            current_format: None,
            feedback_summary: None,
            started_at: Utc::now(),
        }
    }

    /// Seed the pipeline with an input artifact.
    pub fn with_artifact(mut self, path: impl Into<String>, format: impl Into<String>) -> Self {
        self.current_artifact_path = Some(path.into());
        self.current_format = Some(format.into());
        self
    }

    /// Text agents should work from: the refined task once available.
    pub fn effective_task(&self) -> &str {
        if self.refined_task.is_empty() {
            &self.task
        } else {
            &self.refined_task
        }
    }

    pub fn last_step(&self) -> Option<&PipelineStep> {
        self.steps.last()
    }

    /// Append a step and advance the artifact pointer if it materialized output.
    pub fn push_step(&mut self, step: PipelineStep) {
        if step.has_output() {
            self.current_artifact_path = step.output_path.clone();
            self.current_format = step.output_format.clone();
        }
        self.steps.push(step);
    }

    /// Replace the trailing step (escalation merge). Appends if there is none.
    pub fn replace_last_step(&mut self, step: PipelineStep) {
        if step.has_output() {
            self.current_artifact_path = step.output_path.clone();
            self.current_format = step.output_format.clone();
        }
        match self.steps.last_mut() {
            Some(last) => *last = step,
            None => self.steps.push(step),
        }
    }

    /// Hex blake3 fingerprint of the step sequence.
    pub fn artifact_digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for step in &self.steps {
            hasher.update(step.name.as_bytes());
            hasher.update(&[0]);
            hasher.update(step.artifact.as_bytes());
            hasher.update(&[0]);
            hasher.update(step.rationale.as_bytes());
            hasher.update(&[0xff]);
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Most recent feedback entries, oldest first.
    pub fn recent_feedback(&self, n: usize) -> &[String] {
        let start = self.feedback_history.len().saturating_sub(n);
        &self.feedback_history[start..]
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalReason {
    /// A validation call reached quorum.
    Accepted,
    /// The round limit was reached without quorum.
    Exhausted,
    /// An invariant violation stopped the run.
    Aborted { code: String, message: String },
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Aborted { code, .. } => write!(f, "aborted ({})", code),
        }
    }
}

/// Persisted at run end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub task: String,
    pub steps: Vec<PipelineStep>,
    pub consensus_reached: bool,
    pub rounds_used: u32,
    pub gap_escalation_count: BTreeMap<String, u32>,
    pub terminal_reason: TerminalReason,
    pub artifact_digest: String,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn from_state(state: &PipelineState, rounds_used: u32, terminal_reason: TerminalReason) -> Self {
        Self {
            run_id: state.run_id.clone(),
            task: state.task.clone(),
            steps: state.steps.clone(),
            consensus_reached: state.consensus_reached,
            rounds_used,
            gap_escalation_count: state.gap_escalation_count.clone(),
            terminal_reason,
            artifact_digest: state.artifact_digest(),
            finished_at: Utc::now(),
        }
    }

    /// Compact summary line.
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] {} round(s) | {} step(s) | run={}",
            self.terminal_reason,
            self.rounds_used,
            self.steps.len(),
            self.run_id
        )
    }
}
