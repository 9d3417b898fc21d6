//! System and user prompts for each swarm role.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content changes
//! so a run result can be traced back to the prompts that produced it.

use coordination::{AgentRole, InvocationExtra, PipelineState};

use crate::contracts::step_schema_json;
use crate::profile::InputProfile;

pub const PROMPT_VERSION: &str = "1.3.0";

/// Maximum characters of prior step code echoed into a prompt.
const MAX_STEP_CODE_CHARS: usize = 1_500;

pub const PROMPT_REFINEMENT_PREAMBLE: &str = "\
You refine user requests for data engineering tasks. Rewrite the request so it is \
structured and unambiguous, state inputs, outputs and formats explicitly, and add ETL \
practices that matter for it (data lineage, idempotent loads, scalability). \
Put the refined request in `rationale` and leave `code_snippet` empty.";

pub const INGESTION_PREAMBLE: &str = "\
You write the ingestion step of an ETL pipeline. Load the input artifact in its \
declared format, apply schema inference or enforcement, and write the loaded data to a \
new file. Always report `output_file_path` and `output_format`.";

pub const CLEANING_PREAMBLE: &str = "\
You write the cleaning step of an ETL pipeline. Read the artifact produced by the \
previous step, handle missing values, duplicates, type coercion and outliers, and \
write the cleaned data to a new file. Always report `output_file_path` and `output_format`.";

pub const TRANSFORMATION_PREAMBLE: &str = "\
You write the transformation step of an ETL pipeline. Read the cleaned artifact and \
produce the aggregations, joins or derived columns the task asks for. Report \
`output_file_path` and `output_format` if you write a file.";

pub const VALIDATION_PREAMBLE: &str = "\
You are one voter on a review panel for a generated ETL pipeline. Judge whether the \
steps, taken together, fully and correctly implement the task. Start your answer with \
a line `VOTE: accept` or `VOTE: reject` (or `VOTE: abstain` if you cannot judge), then \
give a short rationale. When rejecting, name each missing or incorrect element \
explicitly, e.g. \"Missing deduplication of order rows\".";

pub const GAP_RESOLUTION_PREAMBLE: &str = "\
You resolve one persistent gap that reviewers keep raising against a generated ETL \
pipeline. Produce a focused addition to the final step that fixes exactly this gap \
(validation logic, missing loads, error handling, transformation fixes). Do not \
rewrite the whole pipeline.";

pub fn system_prompt(role: AgentRole) -> String {
    let preamble = match role {
        AgentRole::PromptRefinement => PROMPT_REFINEMENT_PREAMBLE,
        AgentRole::Ingestion => INGESTION_PREAMBLE,
        AgentRole::Cleaning => CLEANING_PREAMBLE,
        AgentRole::Transformation => TRANSFORMATION_PREAMBLE,
        AgentRole::ValidationVote => return VALIDATION_PREAMBLE.to_string(),
        AgentRole::GapResolution => GAP_RESOLUTION_PREAMBLE,
    };
    format!(
        "{preamble}\n\nRespond with a single JSON object matching this schema and nothing else:\n{}",
        step_schema_json()
    )
}

/// Code patterns offered to the resolver, keyed by words in the gap text.
const GAP_HINTS: &[(&[&str], &str)] = &[
    (
        &["validation", "validate", "quality", "null", "duplicate"],
        "Data quality checks: assert no nulls in key columns, fail on duplicate keys, \
         and report row counts before and after.",
    ),
    (
        &["load", "bigquery", "warehouse", "sink", "upload"],
        "Warehouse load: write the final frame to the target table with an explicit \
         schema, append or truncate mode, and an idempotent job id.",
    ),
    (
        &["transform", "transformation", "missing", "aggregation", "business"],
        "Business rules: derive the missing columns or aggregates in a dedicated \
         function and apply it to the frame before it is written.",
    ),
];

/// Patterns whose keywords occur in `text`, in table order.
pub fn gap_hints(text: &str) -> Vec<&'static str> {
    let lower = text.to_lowercase();
    GAP_HINTS
        .iter()
        .filter(|(words, _)| words.iter().any(|w| lower.contains(w)))
        .map(|(_, hint)| *hint)
        .collect()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}\n... (truncated)")
    }
}

fn render_steps(state: &PipelineState) -> String {
    if state.steps.is_empty() {
        return "(no steps yet)".to_string();
    }
    state
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let io = match (&step.input_path, &step.output_path) {
                (Some(i), Some(o)) => format!(" [{i} -> {o}]"),
                (None, Some(o)) => format!(" [-> {o}]"),
                (Some(i), None) => format!(" [{i} ->]"),
                (None, None) => String::new(),
            };
            format!(
                "{}. {}{}\n   rationale: {}\n   code:\n{}",
                i + 1,
                step.name,
                io,
                step.rationale,
                truncate(&step.artifact, MAX_STEP_CODE_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// User message for one invocation.
pub fn user_prompt(role: AgentRole, state: &PipelineState, extra: &InvocationExtra) -> String {
    let mut sections = Vec::new();

    match role {
        AgentRole::PromptRefinement => {
            if let Some(summary) = &extra.feedback_summary {
                sections.push(format!("## Reviewer feedback\n{summary}\nAddress the gaps above in your refinement."));
            }
            sections.push(format!("## Original request\n{}", state.task));
        }
        AgentRole::Ingestion | AgentRole::Cleaning | AgentRole::Transformation => {
            sections.push(format!("## Task\n{}", state.effective_task()));
            match (&extra.input_path, &extra.input_format) {
                (Some(path), Some(format)) => sections.push(format!("## Input artifact\n{path} ({format})")),
                (Some(path), None) => sections.push(format!("## Input artifact\n{path}")),
                _ => sections.push("## Input artifact\nnone; choose a sensible source".to_string()),
            }
            if role == AgentRole::Ingestion {
                let profile = extra
                    .input_path
                    .as_deref()
                    .and_then(|path| InputProfile::inspect(path, extra.input_format.as_deref()));
                if let Some(profile) = profile {
                    sections.push(format!("## Input profile\n{}", profile.render()));
                }
            }
            if let Some(last) = state.last_step() {
                sections.push(format!("## Previous step\n{}: {}", last.name, last.rationale));
            }
            if let Some(summary) = &extra.feedback_summary {
                sections.push(format!("## Reviewer feedback\n{summary}"));
            }
            if !extra.retrieved_context.is_empty() {
                sections.push(format!("## Reference material\n{}", extra.retrieved_context.join("\n---\n")));
            }
        }
        AgentRole::ValidationVote => {
            sections.push(format!("## Task\n{}", state.effective_task()));
            sections.push(format!("## Pipeline steps\n{}", render_steps(state)));
            if extra.validation_issues.is_empty() {
                sections.push("## Structural validation\nno issues".to_string());
            } else {
                sections.push(format!(
                    "## Structural validation\n{}",
                    extra
                        .validation_issues
                        .iter()
                        .map(|i| format!("- {i}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                ));
            }
        }
        AgentRole::GapResolution => {
            sections.push(format!("## Task\n{}", state.effective_task()));
            if let Some(gap) = &extra.gap {
                sections.push(format!(
                    "## Persistent gap\n`{}` (score {:.2}, first raised in round {})",
                    gap.key, gap.score, gap.first_seen_round
                ));
            }
            let history: Vec<&String> = state.recent_feedback(3).iter().collect();
            if !history.is_empty() {
                sections.push(format!(
                    "## Recent rejections\n{}",
                    history.iter().map(|h| format!("- {h}")).collect::<Vec<_>>().join("\n")
                ));
            }
            let gap_key = extra.gap.as_ref().map(|g| g.key.as_str()).unwrap_or_default();
            let latest = history.last().map(|h| h.as_str()).unwrap_or_default();
            let hints = gap_hints(&format!("{gap_key} {latest}"));
            if !hints.is_empty() {
                sections.push(format!(
                    "## Suggested code patterns\n{}",
                    hints.iter().map(|h| format!("- {h}")).collect::<Vec<_>>().join("\n")
                ));
            }
            if let Some(last) = state.last_step() {
                sections.push(format!(
                    "## Final step to extend\n{}\n{}",
                    last.name,
                    truncate(&last.artifact, MAX_STEP_CODE_CHARS)
                ));
            }
        }
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::{Gap, PipelineStep};

    #[test]
    fn test_producer_prompts_embed_schema() {
        for role in [AgentRole::Ingestion, AgentRole::Cleaning, AgentRole::GapResolution] {
            assert!(system_prompt(role).contains("output_file_path"), "{role}");
        }
        assert!(!system_prompt(AgentRole::ValidationVote).contains("step_name"));
    }

    #[test]
    fn test_refinement_prompt_carries_feedback() {
        let state = PipelineState::new("aggregate revenue");
        let extra = InvocationExtra {
            feedback_summary: Some("MUST address these gaps: deduplication".into()),
            ..Default::default()
        };
        let prompt = user_prompt(AgentRole::PromptRefinement, &state, &extra);
        assert!(prompt.contains("MUST address these gaps: deduplication"));
        assert!(prompt.contains("aggregate revenue"));
    }

    #[test]
    fn test_vote_prompt_lists_steps_and_issues() {
        let mut state = PipelineState::new("t");
        state.push_step(PipelineStep::new("ingest", "read()", "loads").with_output("out/a.parquet", "parquet"));
        let extra = InvocationExtra::for_voter("voter-1", vec!["Step 'x' is empty".into()]);
        let prompt = user_prompt(AgentRole::ValidationVote, &state, &extra);
        assert!(prompt.contains("1. ingest [-> out/a.parquet]"));
        assert!(prompt.contains("- Step 'x' is empty"));
    }

    #[test]
    fn test_gap_prompt_names_gap() {
        let state = PipelineState::new("t");
        let extra = InvocationExtra::for_gap(Gap::new("deduplication", 0.8, 1));
        let prompt = user_prompt(AgentRole::GapResolution, &state, &extra);
        assert!(prompt.contains("`deduplication` (score 0.80, first raised in round 1)"));
    }

    #[test]
    fn test_gap_hints_match_gap_text() {
        assert_eq!(gap_hints("validation").len(), 1);
        assert!(gap_hints("BigQuery load").iter().any(|h| h.starts_with("Warehouse load")));
        assert_eq!(gap_hints("Missing data validation and load step").len(), 3);
        assert!(gap_hints("logging").is_empty());
    }

    #[test]
    fn test_gap_prompt_suggests_patterns() {
        let state = PipelineState::new("t");
        let extra = InvocationExtra::for_gap(Gap::new("quality", 0.7, 2));
        let prompt = user_prompt(AgentRole::GapResolution, &state, &extra);
        assert!(prompt.contains("## Suggested code patterns\n- Data quality checks"));

        let extra = InvocationExtra::for_gap(Gap::new("currency", 0.7, 2));
        assert!(!user_prompt(AgentRole::GapResolution, &state, &extra).contains("Suggested code patterns"));
    }

    #[test]
    fn test_ingestion_prompt_profiles_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        std::fs::write(&path, "order_id,amount\n1,10\n2,12\n3,9\n").unwrap();
        let extra = InvocationExtra {
            input_path: Some(path.to_string_lossy().into_owned()),
            input_format: Some("csv".into()),
            ..Default::default()
        };
        let state = PipelineState::new("t");
        let prompt = user_prompt(AgentRole::Ingestion, &state, &extra);
        assert!(prompt.contains("## Input profile"));
        assert!(prompt.contains("shape: 3 rows x 2 columns"));
        assert!(prompt.contains("single-pass"));
        assert!(!user_prompt(AgentRole::Cleaning, &state, &extra).contains("## Input profile"));
    }

    #[test]
    fn test_truncate_long_code() {
        let long = "x".repeat(MAX_STEP_CODE_CHARS + 10);
        assert!(truncate(&long, MAX_STEP_CODE_CHARS).ends_with("(truncated)"));
    }
}
