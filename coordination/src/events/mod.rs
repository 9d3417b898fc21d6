//! Phase-transition events
//!
//! The round controller publishes one `PhaseEvent` per transition on a
//! tokio broadcast `EventBus`. Sinks (JSONL files, dashboards) subscribe.
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ RoundController  │────▶│  Event Bus   │────▶│  Subscribers │
//! │    (publish)     │     │  (broadcast) │     │    (recv)    │
//! └──────────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::PhaseEvent;
