//! Round controller and its state machine.

pub mod phase;
pub mod round;

pub use phase::{PhaseTransition, RoundPhase, RoundSession};
pub use round::{RoundController, RunReport};
