//! Keyword-overlap retriever over local reference documents.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use coordination::gaps::tokenize;
use coordination::{CapabilityError, ContextRetriever};
use tracing::info;

#[derive(Debug, Clone)]
struct Passage {
    text: String,
    terms: HashSet<String>,
}

/// Paragraph index scored by shared terms with the query.
#[derive(Debug, Clone, Default)]
pub struct KeywordRetriever {
    passages: Vec<Passage>,
}

impl KeywordRetriever {
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let passages = texts
            .into_iter()
            .flat_map(|text| {
                text.as_ref()
                    .split("\n\n")
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .map(|text| Passage {
                terms: tokenize(&text).into_iter().collect(),
                text,
            })
            .collect();
        Self { passages }
    }

    pub fn load(paths: &[impl AsRef<Path>]) -> Result<Self> {
        let mut texts = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            texts.push(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read retrieval document {}", path.display()))?,
            );
        }
        let retriever = Self::from_texts(texts);
        info!(documents = paths.len(), passages = retriever.len(), "retrieval index built");
        Ok(retriever)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Top passages by overlap count; ties keep document order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<String> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        let mut scored: Vec<(usize, usize)> = self
            .passages
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.terms.intersection(&query_terms).count()))
            .filter(|(_, score)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(limit)
            .map(|(i, _)| self.passages[i].text.clone())
            .collect()
    }
}

#[async_trait]
impl ContextRetriever for KeywordRetriever {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, CapabilityError> {
        Ok(self.search(query, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "Deduplicate orders on order_id before aggregation.\n\n\
        Parquet output should be partitioned by date.\n\n\
        Validate currency codes against ISO 4217 and deduplicate customers.";

    #[test]
    fn test_search_ranks_by_overlap() {
        let retriever = KeywordRetriever::from_texts([DOC]);
        assert_eq!(retriever.len(), 3);
        let hits = retriever.search("deduplicate orders by order_id", 2);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].starts_with("Deduplicate orders"));
    }

    #[test]
    fn test_search_without_overlap_is_empty() {
        let retriever = KeywordRetriever::from_texts([DOC]);
        assert!(retriever.search("kafka streaming", 5).is_empty());
    }

    #[tokio::test]
    async fn test_load_and_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, DOC).unwrap();
        let retriever = KeywordRetriever::load(&[&path]).unwrap();
        let hits = retriever.retrieve("parquet partitioned output", 1).await.unwrap();
        assert_eq!(hits, vec!["Parquet output should be partitioned by date.".to_string()]);
        assert!(KeywordRetriever::load(&[dir.path().join("missing.md")]).is_err());
    }
}
