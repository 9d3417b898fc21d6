//! Quorum voting over the current pipeline
//!
//! A fixed, odd-sized panel of voters judges the step list. Each judgment is
//! free text classified into accept / reject / abstain; anything that cannot
//! be classified, and any voter whose call fails, counts as an abstention.
//! The artifact is accepted when accepts >= ceil(2n/3), with abstentions in
//! the denominator only.

pub mod classifier;
pub mod validation;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{CoordinationError, CoordinationResult};
use crate::invoker::{AgentInvoker, AgentRole, CallPolicy, InvocationExtra};
use crate::state::{ConsensusResult, PipelineState, ValidationReport, Vote, VoteDecision};

pub use classifier::classify_judgment;
pub use validation::{StructuralValidator, ValidationTool};

/// Accept votes required out of `total`.
pub fn quorum_required(total: usize) -> usize {
    (2 * total).div_ceil(3)
}

/// Tally votes into a result. Pure.
pub fn tally(votes: Vec<Vote>, validation: ValidationReport) -> ConsensusResult {
    let required = quorum_required(votes.len());
    let accept_count = votes
        .iter()
        .filter(|v| v.decision == VoteDecision::Accept)
        .count();
    let quorum_met = !votes.is_empty() && accept_count >= required;
    ConsensusResult {
        accepted: quorum_met,
        votes,
        quorum_met,
        accept_count,
        required,
        validation,
    }
}

/// Turn one voter's raw judgment into a vote.
pub fn vote_from_judgment(voter_id: &str, judgment: &str) -> Vote {
    match classify_judgment(judgment) {
        Some(decision) => Vote::new(voter_id, decision, judgment.trim()),
        None => {
            let err = CoordinationError::VoteParse {
                voter: voter_id.to_string(),
                excerpt: judgment.chars().take(80).collect(),
            };
            warn!(voter = voter_id, error = %err, "unclassifiable judgment, recording abstention");
            Vote::new(voter_id, VoteDecision::Abstain, judgment.trim())
        }
    }
}

/// Ordered voter ids. Always odd and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterPanel {
    voters: Vec<String>,
}

impl VoterPanel {
    pub fn new<I, S>(voters: I) -> CoordinationResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let voters: Vec<String> = voters.into_iter().map(Into::into).collect();
        if voters.is_empty() {
            return Err(CoordinationError::Configuration("voter panel is empty".into()));
        }
        if voters.len() % 2 == 0 {
            return Err(CoordinationError::Configuration(format!(
                "voter panel must have an odd size, got {}",
                voters.len()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = voters.iter().find(|v| !seen.insert(v.as_str())) {
            return Err(CoordinationError::Configuration(format!(
                "duplicate voter id '{dup}'"
            )));
        }
        Ok(Self { voters })
    }

    /// `voter-1` .. `voter-n`.
    pub fn numbered(n: usize) -> CoordinationResult<Self> {
        Self::new((1..=n).map(|i| format!("voter-{i}")))
    }

    pub fn voters(&self) -> &[String] {
        &self.voters
    }

    pub fn len(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    pub fn required(&self) -> usize {
        quorum_required(self.voters.len())
    }
}

impl Default for VoterPanel {
    fn default() -> Self {
        Self {
            voters: vec!["voter-1".into(), "voter-2".into(), "voter-3".into()],
        }
    }
}

/// Runs the validation tool, polls the panel, tallies.
pub struct ConsensusEvaluator {
    panel: VoterPanel,
    validator: Arc<dyn ValidationTool>,
    call_policy: CallPolicy,
}

impl ConsensusEvaluator {
    pub fn new(panel: VoterPanel, validator: Arc<dyn ValidationTool>, call_policy: CallPolicy) -> Self {
        Self {
            panel,
            validator,
            call_policy,
        }
    }

    pub fn panel(&self) -> &VoterPanel {
        &self.panel
    }

    /// Evaluate the current steps. Voters are polled in panel order.
    pub async fn evaluate(&self, state: &PipelineState, invoker: &dyn AgentInvoker) -> ConsensusResult {
        let validation = match self.validator.validate(&state.steps).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "validation tool failed, voters get no structural report");
                ValidationReport::ok()
            }
        };
        debug!(valid = validation.valid, issues = validation.issues.len(), "validation tool report");

        let mut votes = Vec::with_capacity(self.panel.len());
        for voter in self.panel.voters() {
            let extra = InvocationExtra::for_voter(voter.clone(), validation.issues.clone());
            let vote = match self
                .call_policy
                .call(invoker, AgentRole::ValidationVote, state, &extra)
                .await
            {
                Ok(output) => vote_from_judgment(voter, &output.into_judgment()),
                Err(e) => {
                    warn!(voter = %voter, error = %e, "voter call failed, recording abstention");
                    Vote::new(voter.clone(), VoteDecision::Abstain, format!("voter unavailable: {e}"))
                }
            };
            debug!(voter = %vote.voter_id, decision = %vote.decision, "vote recorded");
            votes.push(vote);
        }

        let result = tally(votes, validation);
        info!(
            accepts = result.accept_count,
            rejects = result.count(VoteDecision::Reject),
            abstains = result.count(VoteDecision::Abstain),
            required = result.required,
            accepted = result.accepted,
            "consensus evaluated"
        );
        result
    }
}
