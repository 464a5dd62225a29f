//! Core domain types for errscribe research booklets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for error-batch identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// Generate a new time-sortable batch identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BatchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A UUID v7 wrapper for booklet identifiers. Assigned exactly once at
/// booklet creation and used as the idempotency key for persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookletId(pub Uuid);

impl BookletId {
    /// Generate a new time-sortable booklet identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BookletId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BookletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BookletId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Parsed diagnostics
// ---------------------------------------------------------------------------

/// Diagnostic severity as reported by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// Position of a diagnostic within a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A single structured compiler diagnostic. Created once by the parser and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerError {
    /// Diagnostic code (e.g., `CS0103`), or `unspecified` when the
    /// toolchain emitted none.
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub location: SourceLocation,
    /// The original line the diagnostic was parsed from.
    pub raw_text: String,
}

/// An ordered batch of parsed diagnostics from one raw submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBatch {
    pub id: BatchId,
    /// Diagnostics in the order they appeared in the raw output.
    pub errors: Vec<CompilerError>,
    /// Human-readable one-line description of the batch.
    pub summary: String,
    pub error_count: usize,
    pub warning_count: usize,
    /// Distinct diagnostic codes in first-seen order.
    pub distinct_codes: Vec<String>,
}

impl ErrorBatch {
    /// True when the raw output contained no recognizable diagnostics.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Occurrence counts keyed by diagnostic code.
    pub fn occurrences_by_code(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for error in &self.errors {
            *counts.entry(error.code.clone()).or_insert(0) += 1;
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Stages and findings
// ---------------------------------------------------------------------------

/// The four AI analysis stages of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Documentation,
    Context,
    Pattern,
    Synthesis,
}

impl StageKind {
    /// The three independent analysis stages, in chain order.
    pub const ANALYSIS: [StageKind; 3] = [Self::Documentation, Self::Context, Self::Pattern];

    /// Stable stage name used for provenance, timing keys, and grouping.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Documentation => "documentation",
            Self::Context => "context",
            Self::Pattern => "pattern",
            Self::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single style/pattern problem reported by the pattern validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternIssue {
    pub code: String,
    pub title: String,
    pub severity: Severity,
    pub description: String,
}

/// One piece of analysis output, tagged by the stage that produced it.
///
/// The enum tag carries stage provenance; `source` records the model that
/// generated the finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum Finding {
    Documentation {
        source: String,
        title: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference_url: Option<String>,
    },
    Context {
        source: String,
        title: String,
        location_summary: String,
        suggested_fix: String,
        rationale: String,
    },
    Pattern {
        source: String,
        title: String,
        content: String,
        issues: Vec<PatternIssue>,
        recommendations: Vec<String>,
    },
}

impl Finding {
    /// The stage that produced this finding.
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Documentation { .. } => StageKind::Documentation,
            Self::Context { .. } => StageKind::Context,
            Self::Pattern { .. } => StageKind::Pattern,
        }
    }

    /// Display title, regardless of variant.
    pub fn title(&self) -> &str {
        match self {
            Self::Documentation { title, .. }
            | Self::Context { title, .. }
            | Self::Pattern { title, .. } => title,
        }
    }
}

// ---------------------------------------------------------------------------
// Booklet
// ---------------------------------------------------------------------------

/// A narrative section of the booklet, produced during synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookletSection {
    pub title: String,
    pub body: String,
    /// Sections are rendered in ascending ordinal order.
    pub ordinal: u32,
}

/// The final composed research artifact for one error batch.
///
/// Created exactly once per successful pipeline run; immutable thereafter.
/// Invariant: `findings` holds at least one entry per analysis stage that
/// completed, and none for a stage that did not run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchBooklet {
    pub id: BookletId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub original_errors: ErrorBatch,
    pub findings: Vec<Finding>,
    /// Sorted ascending by ordinal.
    pub sections: Vec<BookletSection>,
    pub metadata: BTreeMap<String, String>,
}

impl ResearchBooklet {
    /// Findings produced by the given stage.
    pub fn findings_for(&self, kind: StageKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_error(code: &str) -> CompilerError {
        CompilerError {
            code: code.into(),
            message: "The name 'Console' does not exist".into(),
            severity: Severity::Error,
            location: SourceLocation {
                file: "Program.cs".into(),
                line: 10,
                column: 5,
            },
            raw_text: format!("Program.cs(10,5): error {code}: ..."),
        }
    }

    #[test]
    fn batch_id_roundtrip() {
        let id = BatchId::new();
        let s = id.to_string();
        let parsed: BatchId = s.parse().expect("parse BatchId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn occurrences_by_code_counts() {
        let batch = ErrorBatch {
            id: BatchId::new(),
            errors: vec![
                sample_error("CS0103"),
                sample_error("CS0103"),
                sample_error("CS0246"),
            ],
            summary: "3 errors".into(),
            error_count: 3,
            warning_count: 0,
            distinct_codes: vec!["CS0103".into(), "CS0246".into()],
        };

        let counts = batch.occurrences_by_code();
        assert_eq!(counts.get("CS0103"), Some(&2));
        assert_eq!(counts.get("CS0246"), Some(&1));
    }

    #[test]
    fn finding_serialization_carries_stage_tag() {
        let finding = Finding::Documentation {
            source: "mistral".into(),
            title: "CS0103 reference".into(),
            content: "The name does not exist in the current context.".into(),
            reference_url: Some("https://learn.microsoft.com/dotnet/csharp".into()),
        };

        let json = serde_json::to_string(&finding).expect("serialize");
        assert!(json.contains(r#""stage":"documentation"#));

        let parsed: Finding = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.kind(), StageKind::Documentation);
        assert_eq!(parsed.title(), "CS0103 reference");
    }

    #[test]
    fn booklet_findings_for_filters_by_stage() {
        let booklet = ResearchBooklet {
            id: BookletId::new(),
            title: "test".into(),
            created_at: Utc::now(),
            original_errors: ErrorBatch {
                id: BatchId::new(),
                errors: vec![sample_error("CS0103")],
                summary: "1 error".into(),
                error_count: 1,
                warning_count: 0,
                distinct_codes: vec!["CS0103".into()],
            },
            findings: vec![
                Finding::Documentation {
                    source: "mistral".into(),
                    title: "doc".into(),
                    content: "c".into(),
                    reference_url: None,
                },
                Finding::Pattern {
                    source: "codegemma".into(),
                    title: "pat".into(),
                    content: "c".into(),
                    issues: vec![],
                    recommendations: vec![],
                },
            ],
            sections: vec![],
            metadata: BTreeMap::new(),
        };

        assert_eq!(booklet.findings_for(StageKind::Documentation).count(), 1);
        assert_eq!(booklet.findings_for(StageKind::Context).count(), 0);
        assert_eq!(booklet.findings_for(StageKind::Pattern).count(), 1);
    }
}
