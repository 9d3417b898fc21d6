//! Event record published on every round-phase transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::controller::RoundPhase;
use crate::state::RunId;

/// One phase transition of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: RunId,
    pub round: u32,
    /// Phase being left (`None` for the first event of a run)
    pub from: Option<RoundPhase>,
    /// Phase entered
    pub phase: RoundPhase,
    /// Short outcome tag, e.g. `rejected`, `escalation_exhausted`
    pub outcome: String,
    /// Free-form detail (vote counts, gap keys, error text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Step-sequence fingerprint at the time of the transition
    pub artifact_digest: String,
}

impl PhaseEvent {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn event_type(&self) -> &'static str {
        self.phase.as_str()
    }
}
