//! Gap detection: extraction from rejection rationales and cross-round
//! persistence tracking.

pub mod analyzer;
pub mod memory;

pub use analyzer::{tokenize, GapAnalyzer};
pub use memory::{KeywordOverlapMemory, MemoryEntry, PersistenceCheck, SimilarityMemory};
