//! Deterministic merge of gap resolutions into the trailing step.

use serde::{Deserialize, Serialize};

use crate::state::{Gap, PipelineStep};

/// One successful resolution, tagged with its rank in the escalated set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPatch {
    /// 0 = highest-ranked gap
    pub rank: usize,
    pub gap: Gap,
    pub step: PipelineStep,
}

/// Fold `patches` into `base` in rank order.
///
/// The result keeps the base step's identity and I/O paths; each patch adds a
/// `# resolves: <key>` section to the artifact and a clause to the rationale.
/// Completion order of the resolution calls is irrelevant.
pub fn merge_patches(base: Option<&PipelineStep>, patches: &[ResolutionPatch]) -> PipelineStep {
    let mut ordered: Vec<&ResolutionPatch> = patches.iter().collect();
    ordered.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.gap.key.cmp(&b.gap.key)));

    let mut merged = match base {
        Some(step) => step.clone(),
        None => PipelineStep::new("gap_resolution", "", ""),
    };

    for patch in ordered {
        if !merged.artifact.is_empty() {
            merged.artifact.push_str("\n\n");
        }
        merged.artifact.push_str("# resolves: ");
        merged.artifact.push_str(&patch.gap.key);
        merged.artifact.push('\n');
        merged.artifact.push_str(patch.step.artifact.trim_end());

        let clause = format!("resolved '{}': {}", patch.gap.key, patch.step.rationale.trim());
        if merged.rationale.is_empty() {
            merged.rationale = clause;
        } else {
            merged.rationale.push_str("; ");
            merged.rationale.push_str(&clause);
        }

        if !merged.has_output() && patch.step.has_output() {
            merged.output_path = patch.step.output_path.clone();
            merged.output_format = patch.step.output_format.clone();
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn patch(rank: usize, key: &str, code: &str) -> ResolutionPatch {
        ResolutionPatch {
            rank,
            gap: Gap::new(key, 1.0 - rank as f64 * 0.1, 0),
            step: PipelineStep::new(format!("fix_{key}"), code, format!("adds {key}")),
        }
    }

    #[test]
    fn test_merge_appends_sections_in_rank_order() {
        let base = PipelineStep::new("transform", "df = agg(df)", "aggregate")
            .with_input("out/clean.parquet");
        let merged = merge_patches(
            Some(&base),
            &[patch(1, "logging", "log(df)"), patch(0, "validation", "check(df)")],
        );
        assert_eq!(merged.name, "transform");
        assert_eq!(merged.input_path.as_deref(), Some("out/clean.parquet"));
        assert_eq!(
            merged.artifact,
            "df = agg(df)\n\n# resolves: validation\ncheck(df)\n\n# resolves: logging\nlog(df)"
        );
        assert!(merged.rationale.starts_with("aggregate; resolved 'validation'"));
    }

    #[test]
    fn test_merge_without_base_creates_step() {
        let merged = merge_patches(None, &[patch(0, "schema", "enforce(schema)")]);
        assert_eq!(merged.name, "gap_resolution");
        assert_eq!(merged.artifact, "# resolves: schema\nenforce(schema)");
    }

    fn ranked(keys: std::collections::BTreeSet<String>) -> Vec<ResolutionPatch> {
        keys.iter()
            .enumerate()
            .map(|(rank, key)| patch(rank, key, &format!("fix({key})")))
            .collect()
    }

    proptest! {
        #[test]
        fn prop_merge_independent_of_completion_order(
            (patches, shuffled) in prop::collection::btree_set("[a-z]{3,8}", 1..6)
                .prop_map(ranked)
                .prop_flat_map(|p| (Just(p.clone()), Just(p).prop_shuffle()))
        ) {
            let base = PipelineStep::new("transform", "base()", "base");
            prop_assert_eq!(
                merge_patches(Some(&base), &patches),
                merge_patches(Some(&base), &shuffled)
            );
        }
    }
}
