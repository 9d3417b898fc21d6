//! Gap escalation
//!
//! When the same deficiency survives several rejected rounds, the top-K
//! eligible gaps are handed to concurrent resolution calls and the results
//! are merged back into the trailing pipeline step.

pub mod manager;
pub mod merge;

pub use manager::{EscalationManager, EscalationReport, FailedResolution};
pub use merge::{merge_patches, ResolutionPatch};
