//! Deterministic classification of free-text voter judgments.
//!
//! Rules, first match wins:
//! 1. a JSON object with a `decision`, `vote` or `verdict` string field
//! 2. a `VOTE:` / `DECISION:` / `VERDICT:` line
//! 3. a cue-word scan with negation ("not approve" counts as reject)
//!
//! Negation is scoped to the clause (split on punctuation and "but"). A
//! negator right before a cue flips it. A negator further back in the same
//! clause turns an accept cue into a reject and makes a reject cue
//! unparseable, so a distant negator never yields an accept.
//!
//! Rule 3 only classifies when exactly one class is present. Anything else
//! is unparseable and the caller records an abstention.

use std::sync::LazyLock;

use regex::Regex;

use crate::state::VoteDecision;

static JSON_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{.*\}").expect("JSON_OBJECT_RE regex should compile")
});

static DECISION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*[*#>\-\s]*(?:vote|decision|verdict)\s*\**\s*[:=]\s*\**\s*([a-z]+)")
        .expect("DECISION_LINE_RE regex should compile")
});

static CLAUSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.;,:!?\n]+|\bbut\b").expect("CLAUSE_RE regex should compile"));

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z']+").expect("WORD_RE regex should compile"));

const NEGATORS: &[&str] = &[
    "not", "never", "cannot", "can't", "don't", "doesn't", "won't", "wouldn't", "shouldn't",
    "couldn't", "isn't",
];

/// How far back (in words) a negator is tied to a cue.
const NEGATION_WINDOW: usize = 2;

fn map_word(word: &str) -> Option<VoteDecision> {
    match word.to_ascii_lowercase().as_str() {
        "accept" | "accepted" | "approve" | "approved" | "yes" | "pass" | "lgtm" => {
            Some(VoteDecision::Accept)
        }
        "reject" | "rejected" | "no" | "deny" | "denied" | "fail" | "disapprove" => {
            Some(VoteDecision::Reject)
        }
        "abstain" | "abstained" | "undecided" => Some(VoteDecision::Abstain),
        _ => None,
    }
}

fn cue_class(word: &str) -> Option<VoteDecision> {
    match word {
        "accept" | "accepted" | "accepting" | "approve" | "approved" | "approving" | "lgtm" => {
            Some(VoteDecision::Accept)
        }
        "reject" | "rejected" | "rejecting" | "deny" | "denied" | "disapprove" => {
            Some(VoteDecision::Reject)
        }
        "abstain" | "abstaining" | "abstained" | "undecided" => Some(VoteDecision::Abstain),
        _ => None,
    }
}

fn from_json(text: &str) -> Option<VoteDecision> {
    let candidate = JSON_OBJECT_RE.find(text)?;
    let value: serde_json::Value = serde_json::from_str(candidate.as_str()).ok()?;
    let object = value.as_object()?;
    ["decision", "vote", "verdict"]
        .iter()
        .filter_map(|field| object.get(*field))
        .filter_map(|v| v.as_str())
        .find_map(|s| map_word(s.trim()))
}

fn from_decision_line(text: &str) -> Option<VoteDecision> {
    DECISION_LINE_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .find_map(|m| map_word(m.as_str()))
}

fn from_cues(text: &str) -> Option<VoteDecision> {
    let lower = text.to_lowercase();

    let (mut accept, mut reject, mut abstain) = (false, false, false);
    for clause in CLAUSE_RE.split(&lower) {
        let words: Vec<&str> = WORD_RE.find_iter(clause).map(|m| m.as_str()).collect();
        for (idx, word) in words.iter().enumerate() {
            let Some(class) = cue_class(word) else {
                continue;
            };
            let tied = words[idx.saturating_sub(NEGATION_WINDOW)..idx]
                .iter()
                .any(|w| NEGATORS.contains(w));
            let distant = !tied && words[..idx].iter().any(|w| NEGATORS.contains(w));
            match (class, tied, distant) {
                (VoteDecision::Abstain, _, _) => abstain = true,
                (VoteDecision::Accept, false, false) | (VoteDecision::Reject, true, _) => accept = true,
                (VoteDecision::Reject, false, false) | (VoteDecision::Accept, _, _) => reject = true,
                (VoteDecision::Reject, false, true) => return None,
            }
        }
    }

    match (accept, reject, abstain) {
        (true, false, false) => Some(VoteDecision::Accept),
        (false, true, false) => Some(VoteDecision::Reject),
        (false, false, true) => Some(VoteDecision::Abstain),
        _ => None,
    }
}

/// Classify `text`. `None` means unparseable.
pub fn classify_judgment(text: &str) -> Option<VoteDecision> {
    from_json(text)
        .or_else(|| from_decision_line(text))
        .or_else(|| from_cues(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_field() {
        assert_eq!(
            classify_judgment(r#"{"vote": "Yes", "rationale": "complete"}"#),
            Some(VoteDecision::Accept)
        );
        assert_eq!(
            classify_judgment("Result:\n```json\n{\"decision\": \"reject\", \"rationale\": \"no dedup\"}\n```"),
            Some(VoteDecision::Reject)
        );
    }

    #[test]
    fn test_decision_line() {
        assert_eq!(
            classify_judgment("The pipeline loads data.\nVOTE: ACCEPT\nRationale: fine"),
            Some(VoteDecision::Accept)
        );
        assert_eq!(
            classify_judgment("**Verdict**: reject\nI would not approve this."),
            Some(VoteDecision::Reject)
        );
    }

    #[test]
    fn test_cue_scan_with_negation() {
        assert_eq!(classify_judgment("I cannot approve this pipeline."), Some(VoteDecision::Reject));
        assert_eq!(classify_judgment("I approve, looks complete."), Some(VoteDecision::Accept));
        assert_eq!(classify_judgment("I would not reject it outright."), Some(VoteDecision::Accept));
        assert_eq!(classify_judgment("I abstain."), Some(VoteDecision::Abstain));
        assert_eq!(
            classify_judgment("I would not be able to approve this pipeline."),
            Some(VoteDecision::Reject)
        );
        assert_eq!(
            classify_judgment("I don't think we can approve this yet."),
            Some(VoteDecision::Reject)
        );
        assert_eq!(
            classify_judgment("Not something I could ever approve."),
            Some(VoteDecision::Reject)
        );
    }

    #[test]
    fn test_negation_is_scoped_to_clause() {
        assert_eq!(
            classify_judgment("Nothing is missing, I don't see problems. I approve."),
            Some(VoteDecision::Accept)
        );
        assert_eq!(
            classify_judgment("It is not perfect but I approve."),
            Some(VoteDecision::Accept)
        );
    }

    #[test]
    fn test_distant_negator_never_accepts() {
        assert_eq!(classify_judgment("I don't think we should reject this."), None);
    }

    #[test]
    fn test_ambiguous_or_empty_is_unparseable() {
        assert_eq!(classify_judgment("I approve the ingestion but reject the cleaning."), None);
        assert_eq!(classify_judgment("The weather is nice."), None);
        assert_eq!(classify_judgment(""), None);
    }

    #[test]
    fn test_json_without_known_value_falls_through() {
        assert_eq!(
            classify_judgment(r#"{"vote": "maybe"} but overall I approve"#),
            Some(VoteDecision::Accept)
        );
    }
}
