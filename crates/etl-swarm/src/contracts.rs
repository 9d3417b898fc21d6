//! Structured step contract exchanged with providers.
//!
//! Producer roles must answer with a JSON object matching `StepPayload`.
//! The JSON schema is embedded in the prompt; the reply is parsed fail-closed
//! (anything that does not deserialize is a parse error, never a step).

use std::sync::LazyLock;

use coordination::PipelineStep;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ```json ... ``` fence around a reply.
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").expect("FENCE_RE regex should compile")
});

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("no JSON object found in response")]
    NoJson,

    #[error("response does not match the step schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("step is missing a name")]
    MissingName,
}

/// One pipeline step as produced by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepPayload {
    /// Short snake_case name of the step.
    pub step_name: String,
    /// Code implementing the step (may be empty for prompt refinement).
    #[serde(default)]
    pub code_snippet: String,
    /// Why the step exists and what it does.
    pub rationale: String,
    /// File the step reads, if any.
    #[serde(default)]
    pub input_file_path: Option<String>,
    /// File the step writes, if any.
    #[serde(default)]
    pub output_file_path: Option<String>,
    /// Format of `output_file_path` (csv, parquet, json, ...).
    #[serde(default)]
    pub output_format: Option<String>,
}

impl From<StepPayload> for PipelineStep {
    fn from(payload: StepPayload) -> Self {
        let mut step = PipelineStep::new(payload.step_name, payload.code_snippet, payload.rationale);
        step.input_path = payload.input_file_path.filter(|p| !p.trim().is_empty());
        step.output_path = payload.output_file_path.filter(|p| !p.trim().is_empty());
        step.output_format = payload.output_format.filter(|f| !f.trim().is_empty());
        step
    }
}

/// Pretty JSON schema for `StepPayload`, embedded in producer prompts.
pub fn step_schema_json() -> String {
    let schema = schemars::schema_for!(StepPayload);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// Parse a model reply into a step payload.
pub fn parse_step_payload(raw: &str) -> Result<StepPayload, ContractError> {
    let candidate = match FENCE_RE.captures(raw).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => {
            let start = raw.find('{').ok_or(ContractError::NoJson)?;
            let end = raw.rfind('}').ok_or(ContractError::NoJson)?;
            if end < start {
                return Err(ContractError::NoJson);
            }
            &raw[start..=end]
        }
    };
    let payload: StepPayload = serde_json::from_str(candidate)?;
    if payload.step_name.trim().is_empty() {
        return Err(ContractError::MissingName);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let payload = parse_step_payload(
            r#"{"step_name": "ingest_orders", "code_snippet": "pd.read_csv(p)", "rationale": "load",
                "output_file_path": "out/orders.parquet", "output_format": "parquet"}"#,
        )
        .unwrap();
        assert_eq!(payload.step_name, "ingest_orders");
        let step: PipelineStep = payload.into();
        assert!(step.has_output());
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let raw = "Here is the step:\n```json\n{\"step_name\": \"clean\", \"rationale\": \"drop nulls\"}\n```\nDone.";
        let payload = parse_step_payload(raw).unwrap();
        assert_eq!(payload.step_name, "clean");
        assert_eq!(payload.code_snippet, "");
    }

    #[test]
    fn test_parse_rejects_prose_and_nameless_steps() {
        assert!(matches!(parse_step_payload("I think you should clean it"), Err(ContractError::NoJson)));
        assert!(matches!(
            parse_step_payload(r#"{"step_name": " ", "rationale": "x"}"#),
            Err(ContractError::MissingName)
        ));
        assert!(matches!(parse_step_payload(r#"{"rationale": "x"}"#), Err(ContractError::Schema(_))));
    }

    #[test]
    fn test_empty_paths_become_none() {
        let step: PipelineStep = StepPayload {
            step_name: "transform".into(),
            code_snippet: "agg()".into(),
            rationale: "aggregate".into(),
            input_file_path: Some(String::new()),
            output_file_path: Some(" ".into()),
            output_format: None,
        }
        .into();
        assert_eq!(step.input_path, None);
        assert_eq!(step.output_path, None);
    }

    #[test]
    fn test_schema_mentions_fields() {
        let schema = step_schema_json();
        assert!(schema.contains("step_name"));
        assert!(schema.contains("output_file_path"));
    }
}
