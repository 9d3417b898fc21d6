//! Validation tool: a structural check run before voters are polled.

use async_trait::async_trait;

use crate::error::CapabilityError;
use crate::state::{PipelineStep, ValidationReport};

#[async_trait]
pub trait ValidationTool: Send + Sync {
    async fn validate(&self, steps: &[PipelineStep]) -> Result<ValidationReport, CapabilityError>;
}

/// Checks the step list itself: presence, non-empty payloads, and that each
/// producer consumes what the previous producer wrote.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    pub fn check(steps: &[PipelineStep]) -> ValidationReport {
        if steps.is_empty() {
            return ValidationReport::invalid(vec!["No steps provided".to_string()]);
        }

        let mut issues = Vec::new();
        let mut previous_output: Option<&str> = None;
        for step in steps {
            if step.name.trim().is_empty() {
                issues.push("Step with empty name".to_string());
            }
            if step.artifact.trim().is_empty() && step.rationale.trim().is_empty() {
                issues.push(format!("Step '{}' has neither artifact nor rationale", step.name));
            }
            if let (Some(input), Some(prev)) = (step.input_path.as_deref(), previous_output) {
                if input != prev {
                    issues.push(format!(
                        "Step '{}' reads '{}' but the previous output is '{}'",
                        step.name, input, prev
                    ));
                }
            }
            if step.has_output() {
                previous_output = step.output_path.as_deref();
            }
        }

        if issues.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::invalid(issues)
        }
    }
}

#[async_trait]
impl ValidationTool for StructuralValidator {
    async fn validate(&self, steps: &[PipelineStep]) -> Result<ValidationReport, CapabilityError> {
        Ok(Self::check(steps))
    }
}
