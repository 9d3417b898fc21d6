//! TF-IDF gap extraction over rejection rationales.
//!
//! Each rejecting voter's rationale is one document. Term frequency is taken
//! per rationale, weighted by a smoothed IDF over the run's feedback history,
//! summed across rationales and normalized by the maximum so the top gap
//! scores 1.0. Terms in a sentence that names a deficiency ("missing",
//! "lacks", ...) are boosted before normalization.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::state::Gap;

/// Words that mark a sentence as describing a deficiency. Never gap keys.
const CUE_WORDS: &[&str] = &[
    "missing",
    "lacks",
    "lack",
    "lacking",
    "needs",
    "need",
    "requires",
    "require",
    "required",
    "incomplete",
    "absent",
    "without",
    "should",
    "must",
    "insufficient",
    "fails",
    "doesn",
];

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "his", "how", "its", "may", "new", "now", "old", "see",
    "two", "way", "who", "did", "get", "let", "say", "she", "too", "use", "this", "that", "with",
    "from", "they", "them", "then", "than", "there", "their", "these", "those", "what", "when",
    "where", "which", "while", "will", "would", "could", "also", "into", "only", "some", "such",
    "very", "been", "being", "does", "done", "each", "more", "most", "other", "over", "same",
    "still", "just", "about", "after", "before", "again", "because", "include",
    "includes", "including", "pipeline", "step", "steps", "reject", "rejected", "accept",
    "approve", "vote", "yes", "here", "well", "make", "made",
];

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z][a-z0-9_]+").expect("TOKEN_RE regex should compile"));

static SENTENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.;!?\n]+").expect("SENTENCE_RE regex should compile"));

fn is_cue(word: &str) -> bool {
    CUE_WORDS.contains(&word)
}

fn is_candidate(word: &str) -> bool {
    word.len() >= 3 && !is_cue(word) && !STOP_WORDS.contains(&word)
}

/// Lowercased candidate terms of `text`, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| is_candidate(w))
        .map(String::from)
        .collect()
}

/// Extracts and ranks gaps. Pure and deterministic.
#[derive(Debug, Clone)]
pub struct GapAnalyzer {
    top_n: usize,
    cue_boost: f64,
}

impl GapAnalyzer {
    pub fn new(top_n: usize, cue_boost: f64) -> Self {
        Self {
            top_n: top_n.max(1),
            cue_boost: cue_boost.max(1.0),
        }
    }

    /// Rank gaps in `rationales`.
    ///
    /// `corpus` is the reference set for IDF (prior rationales). `first_seen`
    /// resolves an already-known key to the round it was first seen; unknown
    /// keys get `round`.
    pub fn analyze<F>(&self, rationales: &[String], corpus: &[String], round: u32, first_seen: F) -> Vec<Gap>
    where
        F: Fn(&str) -> Option<u32>,
    {
        let weights = self.term_weights(rationales, corpus);
        let max = weights.values().copied().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return Vec::new();
        }

        let mut gaps: Vec<Gap> = weights
            .into_iter()
            .map(|(key, w)| {
                let seen = first_seen(&key).unwrap_or(round);
                Gap::new(key, w / max, seen)
            })
            .collect();

        gaps.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.first_seen_round.cmp(&b.first_seen_round))
                .then_with(|| a.key.cmp(&b.key))
        });
        gaps.truncate(self.top_n);
        gaps
    }

    /// Unnormalized tf * idf summed across rationales.
    fn term_weights(&self, rationales: &[String], corpus: &[String]) -> BTreeMap<String, f64> {
        let doc_sets: Vec<BTreeSet<String>> = corpus
            .iter()
            .map(|doc| tokenize(doc).into_iter().collect())
            .collect();
        let n = doc_sets.len() as f64;
        let idf = |term: &str| {
            let df = doc_sets.iter().filter(|d| d.contains(term)).count() as f64;
            ((1.0 + n) / (1.0 + df)).ln() + 1.0
        };

        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for rationale in rationales {
            let tf = self.boosted_tf(rationale);
            for (term, freq) in tf {
                let w = freq * idf(&term);
                *totals.entry(term).or_insert(0.0) += w;
            }
        }
        totals
    }

    /// Per-rationale term frequency with cue-sentence boosting.
    fn boosted_tf(&self, rationale: &str) -> BTreeMap<String, f64> {
        let lower = rationale.to_lowercase();
        let mut counts: BTreeMap<String, f64> = BTreeMap::new();
        let mut total = 0usize;

        for sentence in SENTENCE_RE.split(&lower) {
            let words: Vec<&str> = TOKEN_RE.find_iter(sentence).map(|m| m.as_str()).collect();
            let boost = if words.iter().any(|w| is_cue(w)) {
                self.cue_boost
            } else {
                1.0
            };
            for word in words.into_iter().filter(|w| is_candidate(w)) {
                *counts.entry(word.to_string()).or_insert(0.0) += boost;
                total += 1;
            }
        }

        if total > 0 {
            let total = total as f64;
            for value in counts.values_mut() {
                *value /= total;
            }
        }
        counts
    }
}

impl Default for GapAnalyzer {
    fn default() -> Self {
        Self::new(3, 1.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_tokenize_drops_cues_and_stopwords() {
        let tokens = tokenize("The pipeline is missing a validation step, and lacks error handling.");
        assert_eq!(tokens, vec!["validation", "error", "handling"]);
    }

    #[test]
    fn test_top_gap_normalized_to_one() {
        let analyzer = GapAnalyzer::new(3, 1.5);
        let gaps = analyzer.analyze(
            &s(&[
                "Missing validation of null values. Validation is required.",
                "Needs validation before load.",
            ]),
            &[],
            0,
            |_| None,
        );
        assert_eq!(gaps[0].key, "validation");
        assert!((gaps[0].score - 1.0).abs() < 1e-12);
        assert!(gaps.iter().all(|g| (0.0..=1.0).contains(&g.score)));
        assert!(gaps.len() <= 3);
    }

    #[test]
    fn test_cue_sentence_boost_outranks_plain_mention() {
        let analyzer = GapAnalyzer::new(5, 1.5);
        let gaps = analyzer.analyze(&s(&["Schema looks fine. Missing deduplication."]), &[], 0, |_| None);
        assert_eq!(gaps[0].key, "deduplication");
        assert!(gaps[1].score < 1.0);
    }

    #[test]
    fn test_idf_dampens_terms_seen_everywhere() {
        let analyzer = GapAnalyzer::new(5, 1.0);
        let corpus = s(&["data issues", "data is bad", "data again"]);
        let gaps = analyzer.analyze(&s(&["data logging"]), &corpus, 3, |_| None);
        assert_eq!(gaps[0].key, "logging");
    }

    #[test]
    fn test_ties_break_on_first_seen_then_key() {
        let analyzer = GapAnalyzer::new(3, 1.0);
        let gaps = analyzer.analyze(&s(&["alpha beta gamma"]), &[], 5, |key| match key {
            "gamma" => Some(1),
            _ => None,
        });
        let keys: Vec<_> = gaps.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["gamma", "alpha", "beta"]);
        assert_eq!(gaps[0].first_seen_round, 1);
        assert_eq!(gaps[1].first_seen_round, 5);
    }

    #[test]
    fn test_empty_input_yields_no_gaps() {
        let analyzer = GapAnalyzer::default();
        assert!(analyzer.analyze(&[], &[], 0, |_| None).is_empty());
        assert!(analyzer.analyze(&s(&["the and but"]), &[], 0, |_| None).is_empty());
    }

    proptest! {
        #[test]
        fn prop_analysis_is_deterministic(
            rationales in prop::collection::vec("[a-z ]{0,60}", 0..5),
            corpus in prop::collection::vec("[a-z ]{0,60}", 0..5),
            round in 0u32..10,
        ) {
            let analyzer = GapAnalyzer::new(3, 1.5);
            let a = analyzer.analyze(&rationales, &corpus, round, |_| None);
            let b = analyzer.analyze(&rationales, &corpus, round, |_| None);
            prop_assert_eq!(&a, &b);
            prop_assert!(a.len() <= 3);
            for window in a.windows(2) {
                prop_assert!(window[0].score >= window[1].score);
            }
        }
    }
}
