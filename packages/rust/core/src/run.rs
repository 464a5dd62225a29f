//! Run-level data types shared by the three strategies.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;

use errscribe_shared::{BookletId, ErrorBatch, Finding, ResearchBooklet, StageKind};
use errscribe_stages::{AlertSeverity, SynthesisResponse};

/// Timing-map key for the persistence step.
pub const SAVE_TIMING_KEY: &str = "save";

/// Input to one pipeline run, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    /// Raw compiler/build output to parse.
    pub raw_compiler_output: &'a str,
    /// Source surrounding the failing locations.
    pub code_context: &'a str,
    /// Project metadata (typically the project file XML).
    pub project_metadata: &'a str,
    /// One-paragraph description of the codebase.
    pub codebase_summary: &'a str,
    /// Free-form batch hints forwarded to every stage.
    pub hints: &'a BTreeMap<String, String>,
}

/// The externally visible success value of a pipeline run.
#[derive(Debug, Clone)]
pub struct BookletGenerationResult {
    pub booklet: ResearchBooklet,
    /// Absolute path the booklet was persisted to.
    pub persisted_path: PathBuf,
    pub total_elapsed_ms: u64,
    /// Wall-clock per stage, keyed by stage name plus [`SAVE_TIMING_KEY`].
    pub per_stage_elapsed_ms: BTreeMap<String, u64>,
    /// Fully-parallel strategy only: sum of the three analysis durations
    /// minus the actual parallel wall-clock, saturating at zero.
    pub time_saved_ms: Option<u64>,
}

/// Build the booklet from a completed run. Called exactly once per
/// successful run; the booklet is immutable afterwards.
pub(crate) fn assemble_booklet(
    batch: ErrorBatch,
    findings: Vec<Finding>,
    synthesis: SynthesisResponse,
    metadata: BTreeMap<String, String>,
) -> ResearchBooklet {
    let title = format!("Build error research: {}", batch.summary);
    let mut sections = synthesis.sections;
    sections.sort_by_key(|s| s.ordinal);

    ResearchBooklet {
        id: BookletId::new(),
        title,
        created_at: Utc::now(),
        original_errors: batch,
        findings,
        sections,
        metadata,
    }
}

/// Fold one stage's response metadata into the booklet metadata, prefixed
/// by the stage name.
pub(crate) fn merge_stage_metadata(
    target: &mut BTreeMap<String, String>,
    kind: StageKind,
    summary: &str,
    stage_metadata: &BTreeMap<String, String>,
) {
    target.insert(format!("{}.summary", kind.name()), summary.to_string());
    for (key, value) in stage_metadata {
        target.insert(format!("{}.{key}", kind.name()), value.clone());
    }
}

/// Alert severity owed to a typed failure of `kind`, if any.
///
/// Documentation failures warn (the caller can retry cheaply); synthesis
/// failures are critical (most completed work is discarded); the middle
/// stages alert only when configured.
pub(crate) fn stage_alert_severity(
    kind: StageKind,
    alert_on_analysis_stages: bool,
) -> Option<AlertSeverity> {
    match kind {
        StageKind::Documentation => Some(AlertSeverity::Warning),
        StageKind::Synthesis => Some(AlertSeverity::Critical),
        StageKind::Context | StageKind::Pattern => {
            alert_on_analysis_stages.then_some(AlertSeverity::Warning)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use errscribe_shared::{BatchId, BookletSection};

    fn sample_batch() -> ErrorBatch {
        errscribe_parser::parse(
            "Program.cs(10,5): error CS0103: The name 'Console' does not exist\n\
             Program.cs(22,1): error CS0246: The type or namespace 'Foo' could not be found\n\
             Helpers.cs(3,17): warning CS0168: The variable 'x' is declared but never used",
        )
    }

    fn sample_synthesis() -> SynthesisResponse {
        SynthesisResponse {
            sections: vec![
                BookletSection {
                    title: "second".into(),
                    body: String::new(),
                    ordinal: 2,
                },
                BookletSection {
                    title: "first".into(),
                    body: String::new(),
                    ordinal: 1,
                },
            ],
            summary: "s".into(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn assemble_sorts_sections_by_ordinal() {
        let booklet =
            assemble_booklet(sample_batch(), vec![], sample_synthesis(), BTreeMap::new());
        assert_eq!(booklet.sections[0].title, "first");
        assert_eq!(booklet.sections[1].title, "second");
        assert!(booklet.title.contains("CS0103"));
    }

    #[test]
    fn assemble_keeps_every_parsed_error() {
        let batch = sample_batch();
        assert_eq!(batch.errors.len(), 3);

        let expected_id: BatchId = batch.id;
        let booklet = assemble_booklet(batch, vec![], sample_synthesis(), BTreeMap::new());
        assert_eq!(booklet.original_errors.errors.len(), 3);
        assert_eq!(booklet.original_errors.id, expected_id);
        assert_eq!(
            booklet.original_errors.distinct_codes,
            vec!["CS0103", "CS0246", "CS0168"]
        );
    }

    #[test]
    fn merge_prefixes_stage_metadata() {
        let mut target = BTreeMap::new();
        let stage_meta = BTreeMap::from([("model".to_string(), "mistral".to_string())]);

        merge_stage_metadata(&mut target, StageKind::Documentation, "looked up docs", &stage_meta);

        assert_eq!(
            target.get("documentation.model").map(String::as_str),
            Some("mistral")
        );
        assert_eq!(
            target.get("documentation.summary").map(String::as_str),
            Some("looked up docs")
        );
    }

    #[test]
    fn alert_severity_policy() {
        assert_eq!(
            stage_alert_severity(StageKind::Documentation, false),
            Some(AlertSeverity::Warning)
        );
        assert_eq!(
            stage_alert_severity(StageKind::Synthesis, false),
            Some(AlertSeverity::Critical)
        );
        assert_eq!(stage_alert_severity(StageKind::Context, false), None);
        assert_eq!(
            stage_alert_severity(StageKind::Pattern, true),
            Some(AlertSeverity::Warning)
        );
    }
}
