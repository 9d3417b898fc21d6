//! ETL pipeline generation on top of the `coordination` refinement loop.
//!
//! Wires OpenAI-compatible endpoints into the role table, provides the
//! structured step contract and prompts, a keyword retriever over local
//! documents, and run artifact writers.

pub mod config;
pub mod contracts;
pub mod profile;
pub mod prompts;
pub mod providers;
pub mod retrieval;
pub mod telemetry;

pub use config::{Endpoint, SwarmConfig};
pub use contracts::{parse_step_payload, StepPayload};
pub use providers::{build_bindings, ChatCompletionsInvoker, PanelInvoker};
pub use retrieval::KeywordRetriever;
