//! Concurrent fan-out of gap-resolution calls.
//!
//! ```text
//! gaps[0..K] ──► JoinSet::spawn(resolve(gap_i)) × K   (Semaphore(K))
//!                         │ full join
//!                         ▼
//!            patches sorted by rank ──► merge_patches
//! ```
//!
//! Workers read an `Arc` snapshot of the state and return patches; nothing
//! is written until the join completes. A failed or timed-out call only
//! drops its own gap. When every call fails the escalation is exhausted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::merge::ResolutionPatch;
use crate::error::{CoordinationError, CoordinationResult};
use crate::invoker::{AgentInvoker, AgentRole, CallPolicy, InvocationExtra};
use crate::state::{Gap, PipelineState};

/// A resolution call that produced nothing usable.
#[derive(Debug, Clone)]
pub struct FailedResolution {
    pub rank: usize,
    pub gap: Gap,
    pub error: CoordinationError,
}

/// Joined outcome of one escalation.
#[derive(Debug, Clone, Default)]
pub struct EscalationReport {
    /// Successful patches in rank order; their gaps are marked resolved
    pub patches: Vec<ResolutionPatch>,
    /// Failures in rank order
    pub failed: Vec<FailedResolution>,
}

impl EscalationReport {
    pub fn attempted(&self) -> usize {
        self.patches.len() + self.failed.len()
    }

    pub fn resolved_keys(&self) -> Vec<&str> {
        self.patches.iter().map(|p| p.gap.key.as_str()).collect()
    }
}

type WorkerOutcome = (usize, Gap, CoordinationResult<ResolutionPatch>);

pub struct EscalationManager {
    max_parallel: usize,
    call_policy: CallPolicy,
}

impl EscalationManager {
    /// `max_parallel` is K; at most K resolution calls are in flight.
    pub fn new(max_parallel: usize, call_policy: CallPolicy) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            call_policy,
        }
    }

    /// Resolve `gaps` (already ranked, at most K) concurrently and join.
    ///
    /// Returns `EscalationExhausted` when no call succeeded.
    pub async fn escalate(
        &self,
        snapshot: Arc<PipelineState>,
        gaps: Vec<Gap>,
        invoker: Arc<dyn AgentInvoker>,
    ) -> CoordinationResult<EscalationReport> {
        let attempted = gaps.len();
        if attempted == 0 {
            return Err(CoordinationError::EscalationExhausted { attempted: 0 });
        }

        let sem = Arc::new(Semaphore::new(self.max_parallel));
        let mut join_set: JoinSet<WorkerOutcome> = JoinSet::new();
        let mut pending: BTreeMap<usize, Gap> = BTreeMap::new();
        let started = Instant::now();

        for (rank, gap) in gaps.into_iter().enumerate() {
            pending.insert(rank, gap.clone());
            let sem = sem.clone();
            let snapshot = snapshot.clone();
            let invoker = invoker.clone();
            let policy = self.call_policy;

            join_set.spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let err = CoordinationError::MalformedState("escalation semaphore closed".into());
                        return (rank, gap, Err(err));
                    }
                };
                let extra = InvocationExtra::for_gap(gap.clone());
                let result = policy
                    .call(invoker.as_ref(), AgentRole::GapResolution, &snapshot, &extra)
                    .await
                    .and_then(|output| {
                        output
                            .into_step(AgentRole::GapResolution)
                            .map_err(|e| CoordinationError::capability(AgentRole::GapResolution, e))
                    })
                    .map(|step| ResolutionPatch {
                        rank,
                        gap: Gap {
                            resolved: true,
                            ..gap.clone()
                        },
                        step: step.with_role(AgentRole::GapResolution),
                    });
                (rank, gap, result)
            });
        }

        let mut report = EscalationReport::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((rank, gap, Ok(patch))) => {
                    debug!(rank, gap = %gap.key, "gap resolution succeeded");
                    pending.remove(&rank);
                    report.patches.push(patch);
                }
                Ok((rank, gap, Err(error))) => {
                    warn!(rank, gap = %gap.key, error = %error, "gap resolution failed");
                    pending.remove(&rank);
                    report.failed.push(FailedResolution { rank, gap, error });
                }
                Err(e) => {
                    // Panicked worker; its gap is reported from `pending` below.
                    warn!(error = %e, "gap resolution worker panicked");
                }
            }
        }
        for (rank, gap) in pending {
            report.failed.push(FailedResolution {
                rank,
                gap,
                error: CoordinationError::MalformedState("resolution worker panicked".into()),
            });
        }

        report.patches.sort_by_key(|p| p.rank);
        report.failed.sort_by_key(|f| f.rank);

        info!(
            attempted,
            resolved = report.patches.len(),
            failed = report.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "escalation joined"
        );

        if report.patches.is_empty() {
            return Err(CoordinationError::EscalationExhausted { attempted });
        }
        Ok(report)
    }
}
