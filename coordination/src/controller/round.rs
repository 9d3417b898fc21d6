//! The round controller: drives one run from `Init` to a terminal phase.
//!
//! ```text
//! Init → AgentChain → Validate ─┬─ quorum ──────────────────────────▶ Accepted
//!             ▲                 └─ GapCheck ─┬─ eligible gaps ─▶ Escalate
//!             │                              │                     │
//!             │                              │        IntraRoundValidate ─ quorum ─▶ Accepted
//!             │                              ▼                     │
//!             └──────────────────────── NextRound ◀────────────────┘
//!                                            └─ round == max ─▶ Exhausted
//! ```
//!
//! The controller is the only writer of `PipelineState`. The one parallel
//! region is `Escalate`, which works on an `Arc` snapshot and hands back
//! patches that are merged here after the join.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::phase::{RoundPhase, RoundSession};
use crate::config::RefinementPolicy;
use crate::consensus::{ConsensusEvaluator, StructuralValidator, ValidationTool, VoterPanel};
use crate::error::{CoordinationError, CoordinationResult};
use crate::escalation::{merge_patches, EscalationManager};
use crate::events::{PhaseEvent, SharedEventBus};
use crate::gaps::{GapAnalyzer, KeywordOverlapMemory, PersistenceCheck, SimilarityMemory};
use crate::invoker::{AgentRole, CallPolicy, InvocationExtra, RoleBindings};
use crate::retrieval::{retrieve_or_empty, ContextRetriever, NoRetrieval};
use crate::state::{ConsensusResult, Gap, PipelineState, PipelineStep, RunResult, TerminalReason};

/// Everything a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub result: RunResult,
    pub state: PipelineState,
    pub session: RoundSession,
}

/// A gap selected for escalation together with its memory match.
#[derive(Debug, Clone)]
struct EligibleGap {
    gap: Gap,
    check: PersistenceCheck,
}

pub struct RoundController {
    policy: RefinementPolicy,
    bindings: RoleBindings,
    evaluator: ConsensusEvaluator,
    analyzer: GapAnalyzer,
    escalation: EscalationManager,
    retriever: Arc<dyn ContextRetriever>,
    call_policy: CallPolicy,
    events: Option<SharedEventBus>,
}

impl RoundController {
    /// Build a controller. Fails if the policy is unusable or a required
    /// role has no provider.
    pub fn new(policy: RefinementPolicy, bindings: RoleBindings, panel: VoterPanel) -> CoordinationResult<Self> {
        policy.validate()?;
        let mut required = policy.chain.clone();
        required.extend([AgentRole::ValidationVote, AgentRole::GapResolution]);
        bindings.require(&required)?;

        let call_policy = policy.call_policy();
        Ok(Self {
            evaluator: ConsensusEvaluator::new(panel, Arc::new(StructuralValidator), call_policy),
            analyzer: GapAnalyzer::new(policy.gap_top_n, policy.cue_boost),
            escalation: EscalationManager::new(policy.escalation_top_k, call_policy),
            retriever: Arc::new(NoRetrieval),
            call_policy,
            events: None,
            policy,
            bindings,
        })
    }

    pub fn with_validator(mut self, validator: Arc<dyn ValidationTool>) -> Self {
        let panel = self.evaluator.panel().clone();
        self.evaluator = ConsensusEvaluator::new(panel, validator, self.call_policy);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn policy(&self) -> &RefinementPolicy {
        &self.policy
    }

    /// Run with a fresh keyword-overlap memory.
    pub async fn run(&self, state: PipelineState) -> RunReport {
        let mut memory = KeywordOverlapMemory::new(self.policy.persistence_threshold);
        self.run_with_memory(state, &mut memory).await
    }

    /// Run with a caller-supplied memory. The memory must be fresh for this run.
    pub async fn run_with_memory(&self, mut state: PipelineState, memory: &mut dyn SimilarityMemory) -> RunReport {
        state.round = 0;
        state.consensus_reached = false;
        let mut session = RoundSession::new(&state.run_id, self.policy.max_rounds);

        info!(
            run_id = %state.run_id,
            max_rounds = self.policy.max_rounds,
            chain = ?self.policy.chain,
            "refinement run started"
        );
        self.publish(&state, None, RoundPhase::Init, "started", None);

        let terminal = match self.drive(&mut state, &mut session, memory).await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(run_id = %state.run_id, round = state.round, error = %e, "run aborted");
                if let Some(from) = session.abort(state.round, &e.to_string()) {
                    self.publish(&state, Some(from), RoundPhase::Aborted, e.code(), Some(e.to_string()));
                }
                TerminalReason::Aborted {
                    code: e.code().to_string(),
                    message: e.to_string(),
                }
            }
        };

        let rounds_used = match terminal {
            TerminalReason::Exhausted => state.round,
            _ => state.round + 1,
        };
        let result = RunResult::from_state(&state, rounds_used, terminal);
        info!(
            run_id = %result.run_id,
            terminal = %result.terminal_reason,
            rounds_used,
            steps = result.steps.len(),
            digest = %result.artifact_digest,
            "refinement run finished"
        );
        RunReport {
            result,
            state,
            session,
        }
    }

    /// The loop. `Err` is only returned for fatal errors.
    async fn drive(
        &self,
        state: &mut PipelineState,
        session: &mut RoundSession,
        memory: &mut dyn SimilarityMemory,
    ) -> CoordinationResult<TerminalReason> {
        loop {
            let round = state.round;
            self.advance(session, state, RoundPhase::AgentChain, "chain_started", None)?;
            self.run_chain(state).await?;

            self.advance(session, state, RoundPhase::Validate, "chain_complete", None)?;
            let verdict = self.evaluator.evaluate(state, self.voter_invoker()?.as_ref()).await;
            if verdict.accepted {
                state.consensus_reached = true;
                self.advance(
                    session,
                    state,
                    RoundPhase::Accepted,
                    "quorum_met",
                    Some(vote_detail(&verdict)),
                )?;
                return Ok(TerminalReason::Accepted);
            }

            self.advance(session, state, RoundPhase::GapCheck, "rejected", Some(vote_detail(&verdict)))?;
            let (gaps, eligible) = self.check_gaps(state, memory, &verdict);
            state.feedback_summary = feedback_summary(&gaps);

            let mut rejection = verdict;
            if eligible.is_empty() {
                debug!(round, gaps = gaps.len(), "no gap eligible for escalation");
            } else if session.escalation_rounds >= self.policy.max_escalation_rounds {
                info!(
                    round,
                    cap = self.policy.max_escalation_rounds,
                    "escalation round cap reached, not escalating"
                );
            } else {
                let keys: Vec<&str> = eligible.iter().map(|e| e.gap.key.as_str()).collect();
                self.advance(session, state, RoundPhase::Escalate, "persistent_gaps", Some(keys.join(", ")))?;
                match self.escalate(state, memory, eligible).await {
                    Ok(()) => {
                        self.advance(session, state, RoundPhase::IntraRoundValidate, "merged", None)?;
                        let again = self.evaluator.evaluate(state, self.voter_invoker()?.as_ref()).await;
                        if again.accepted {
                            state.consensus_reached = true;
                            state.feedback_summary = Some(format!(
                                "Resolver solution validated: {}",
                                state.last_step().map(|s| s.name.as_str()).unwrap_or("gap_resolution")
                            ));
                            self.advance(
                                session,
                                state,
                                RoundPhase::Accepted,
                                "quorum_met_after_escalation",
                                Some(vote_detail(&again)),
                            )?;
                            return Ok(TerminalReason::Accepted);
                        }
                        state.feedback_summary = Some(resolver_feedback(&again));
                        rejection = again;
                    }
                    Err(e) if !e.is_fatal() => {
                        warn!(round, error = %e, "escalation produced nothing, treating as rejection");
                    }
                    Err(e) => return Err(e),
                }
            }

            self.advance(session, state, RoundPhase::NextRound, "rejected", Some(vote_detail(&rejection)))?;
            state.feedback_history.push(rejection.rejection_summary());
            state.round += 1;
            if state.round >= self.policy.max_rounds {
                self.advance(session, state, RoundPhase::Exhausted, "round_limit", None)?;
                return Ok(TerminalReason::Exhausted);
            }
        }
    }

    /// Invoke each chain role in order, enforcing pipeline continuity.
    async fn run_chain(&self, state: &mut PipelineState) -> CoordinationResult<()> {
        let last_producer = self.policy.last_producer();
        for role in self.policy.chain.iter().copied() {
            let invoker = self
                .bindings
                .resolve(role)
                .map_err(|e| CoordinationError::capability(role, e))?;

            let mut extra = InvocationExtra {
                input_path: state.current_artifact_path.clone(),
                input_format: state.current_format.clone(),
                feedback_summary: state.feedback_summary.clone(),
                ..Default::default()
            };
            if role.uses_retrieval() {
                let query = format!("{} {}", role, state.effective_task());
                extra.retrieved_context =
                    retrieve_or_empty(self.retriever.as_ref(), &query, self.policy.retrieval_limit).await;
            }

            let output = match self.call_policy.call(invoker.as_ref(), role, state, &extra).await {
                Ok(output) => output,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(%role, round = state.round, error = %e, "chain step failed, continuing without it");
                    continue;
                }
            };
            let mut step = match output.into_step(role) {
                Ok(step) => step.with_role(role),
                Err(e) => {
                    warn!(%role, error = %e, "chain step returned no step, continuing without it");
                    continue;
                }
            };

            if role.produces_artifact() {
                check_continuity(&mut step, state, Some(role) == last_producer)?;
            }
            if role == AgentRole::PromptRefinement && !step.rationale.trim().is_empty() {
                state.refined_task = step.rationale.trim().to_string();
            }
            debug!(%role, step = %step.name, output = ?step.output_path, "step appended");
            state.push_step(step);
        }
        Ok(())
    }

    /// Extract gaps from the round's rejections and pick the eligible ones.
    fn check_gaps(
        &self,
        state: &PipelineState,
        memory: &mut dyn SimilarityMemory,
        verdict: &ConsensusResult,
    ) -> (Vec<Gap>, Vec<EligibleGap>) {
        let round = state.round;
        let rationales = verdict.rejection_rationales();
        let gaps = {
            let lookup: &dyn SimilarityMemory = memory;
            self.analyzer
                .analyze(&rationales, &state.feedback_history, round, |key| lookup.first_seen(key))
        };

        let mut eligible: Vec<EligibleGap> = Vec::new();
        for gap in &gaps {
            let check = memory.record_and_check(gap, round);
            let aged = check.age(round) > self.policy.min_persistence_rounds;
            let duplicate = eligible.iter().any(|e| e.check.matched_key == check.matched_key);
            debug!(
                round,
                gap = %gap.key,
                score = gap.score,
                persistent = check.is_persistent,
                first_seen = check.first_seen_round,
                already_escalated = check.already_escalated,
                "gap checked"
            );
            if check.is_persistent && aged && !check.already_escalated && !duplicate {
                let mut gap = gap.clone();
                gap.first_seen_round = check.first_seen_round;
                eligible.push(EligibleGap { gap, check });
            }
        }
        eligible.truncate(self.policy.escalation_top_k);
        (gaps, eligible)
    }

    /// Fan out, join, merge into the trailing step, update memory and counts.
    async fn escalate(
        &self,
        state: &mut PipelineState,
        memory: &mut dyn SimilarityMemory,
        eligible: Vec<EligibleGap>,
    ) -> CoordinationResult<()> {
        for e in &eligible {
            memory.mark_escalated(&e.check.matched_key);
            *state.gap_escalation_count.entry(e.gap.key.clone()).or_insert(0) += 1;
        }

        let invoker = self
            .bindings
            .resolve(AgentRole::GapResolution)
            .map_err(|e| CoordinationError::capability(AgentRole::GapResolution, e))?;
        let snapshot = Arc::new(state.clone());
        let gaps: Vec<Gap> = eligible.iter().map(|e| e.gap.clone()).collect();
        let report = self.escalation.escalate(snapshot, gaps, invoker).await?;

        let merged = merge_patches(state.last_step(), &report.patches);
        state.replace_last_step(merged);
        for patch in &report.patches {
            if let Some(e) = eligible.get(patch.rank) {
                memory.mark_resolved(&e.check.matched_key);
            }
        }
        info!(
            round = state.round,
            resolved = ?report.resolved_keys(),
            failed = report.failed.len(),
            digest = %state.artifact_digest(),
            "escalation merged into trailing step"
        );
        Ok(())
    }

    fn voter_invoker(&self) -> CoordinationResult<Arc<dyn crate::invoker::AgentInvoker>> {
        self.bindings
            .resolve(AgentRole::ValidationVote)
            .map_err(|e| CoordinationError::capability(AgentRole::ValidationVote, e))
    }

    fn advance(
        &self,
        session: &mut RoundSession,
        state: &PipelineState,
        to: RoundPhase,
        outcome: &str,
        detail: Option<String>,
    ) -> CoordinationResult<()> {
        let from = session.transition(to, state.round, outcome)?;
        info!(run_id = %state.run_id, round = state.round, from = %from, phase = %to, outcome, "phase transition");
        self.publish(state, Some(from), to, outcome, detail);
        Ok(())
    }

    fn publish(
        &self,
        state: &PipelineState,
        from: Option<RoundPhase>,
        phase: RoundPhase,
        outcome: &str,
        detail: Option<String>,
    ) {
        if let Some(bus) = &self.events {
            bus.publish(PhaseEvent {
                timestamp: Utc::now(),
                run_id: state.run_id.clone(),
                round: state.round,
                from,
                phase,
                outcome: outcome.to_string(),
                detail,
                artifact_digest: state.artifact_digest(),
            });
        }
    }
}

/// Fill the step's input and verify it chains onto the current artifact.
fn check_continuity(step: &mut PipelineStep, state: &PipelineState, is_last_producer: bool) -> CoordinationResult<()> {
    match (step.input_path.as_deref(), state.current_artifact_path.as_deref()) {
        (Some(input), Some(current)) if input != current => {
            return Err(CoordinationError::Continuity {
                step: step.name.clone(),
                reason: format!("reads '{input}' but the current artifact is '{current}'"),
            });
        }
        (None, Some(current)) => step.input_path = Some(current.to_string()),
        _ => {}
    }
    if !is_last_producer && !step.has_output() {
        return Err(CoordinationError::Continuity {
            step: step.name.clone(),
            reason: "artifact-producing step did not report output_path and output_format".into(),
        });
    }
    Ok(())
}

fn feedback_summary(gaps: &[Gap]) -> Option<String> {
    if gaps.is_empty() {
        None
    } else {
        let keys: Vec<&str> = gaps.iter().map(|g| g.key.as_str()).collect();
        Some(format!("MUST address these gaps: {}", keys.join("; ")))
    }
}

/// Longest rejection digest carried into the next round after escalation.
const RESOLVER_FEEDBACK_CHARS: usize = 200;

fn resolver_feedback(result: &ConsensusResult) -> String {
    let summary: String = result.rejection_summary().chars().take(RESOLVER_FEEDBACK_CHARS).collect();
    format!("Resolver applied but needs refinement: {summary}")
}

fn vote_detail(result: &ConsensusResult) -> String {
    format!("{}/{} accept (needs {})", result.accept_count, result.votes.len(), result.required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuity_fills_input_path() {
        let state = PipelineState::new("t").with_artifact("data/in.csv", "csv");
        let mut step = PipelineStep::new("ingest", "load()", "").with_output("out/a.parquet", "parquet");
        check_continuity(&mut step, &state, false).unwrap();
        assert_eq!(step.input_path.as_deref(), Some("data/in.csv"));
    }

    #[test]
    fn test_continuity_rejects_missing_output_for_intermediate_step() {
        let state = PipelineState::new("t");
        let mut step = PipelineStep::new("clean", "dropna()", "");
        let err = check_continuity(&mut step, &state, false).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.code(), "continuity_error");

        let mut last = PipelineStep::new("transform", "agg()", "");
        check_continuity(&mut last, &state, true).unwrap();
    }

    #[test]
    fn test_continuity_rejects_foreign_input() {
        let state = PipelineState::new("t").with_artifact("out/a.parquet", "parquet");
        let mut step = PipelineStep::new("clean", "x", "")
            .with_input("out/other.parquet")
            .with_output("out/b.parquet", "parquet");
        assert!(check_continuity(&mut step, &state, false).is_err());
    }

    #[test]
    fn test_resolver_feedback_is_bounded() {
        let result = crate::consensus::tally(
            vec![
                crate::state::Vote::new("v1", crate::state::VoteDecision::Reject, "x".repeat(500)),
            ],
            crate::state::ValidationReport::ok(),
        );
        let text = resolver_feedback(&result);
        assert!(text.starts_with("Resolver applied but needs refinement: 0/1 accept"));
        assert_eq!(
            text.chars().count(),
            "Resolver applied but needs refinement: ".len() + RESOLVER_FEEDBACK_CHARS
        );
    }

    #[test]
    fn test_feedback_summary_format() {
        assert_eq!(feedback_summary(&[]), None);
        let gaps = vec![Gap::new("validation", 1.0, 0), Gap::new("logging", 0.5, 0)];
        assert_eq!(
            feedback_summary(&gaps).as_deref(),
            Some("MUST address these gaps: validation; logging")
        );
    }
}
