//! Retrieval-service contract.
//!
//! Context roles query this before invocation. Failures never fail the
//! call that asked for context: they degrade to an empty snippet list.

use async_trait::async_trait;
use tracing::warn;

use crate::error::CapabilityError;

#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, CapabilityError>;
}

/// Retriever that never has anything to say.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetrieval;

#[async_trait]
impl ContextRetriever for NoRetrieval {
    async fn retrieve(&self, _query: &str, _limit: usize) -> Result<Vec<String>, CapabilityError> {
        Ok(Vec::new())
    }
}

/// Query `retriever`, mapping any failure to no context.
pub async fn retrieve_or_empty(retriever: &dyn ContextRetriever, query: &str, limit: usize) -> Vec<String> {
    match retriever.retrieve(query, limit).await {
        Ok(mut snippets) => {
            snippets.truncate(limit);
            snippets
        }
        Err(e) => {
            warn!(error = %e, "retrieval failed, continuing without context");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait]
    impl ContextRetriever for Broken {
        async fn retrieve(&self, _query: &str, _limit: usize) -> Result<Vec<String>, CapabilityError> {
            Err(CapabilityError::Unavailable("index offline".into()))
        }
    }

    struct Chatty;

    #[async_trait]
    impl ContextRetriever for Chatty {
        async fn retrieve(&self, _query: &str, _limit: usize) -> Result<Vec<String>, CapabilityError> {
            Ok(vec!["a".into(), "b".into(), "c".into()])
        }
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty() {
        assert!(retrieve_or_empty(&Broken, "q", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_limit_enforced() {
        assert_eq!(retrieve_or_empty(&Chatty, "q", 2).await, vec!["a", "b"]);
        assert!(retrieve_or_empty(&NoRetrieval, "q", 2).await.is_empty());
    }
}
