//! AI stage clients for the errscribe pipeline.
//!
//! Each of the four analysis stages is a request/response call to a local
//! Ollama-style model-serving endpoint. This crate provides:
//! - [`StageSuite`] — the four analyzers, built from [`ModelsConfig`]
//! - [`ModelHealthClient`] — per-model availability probe
//! - [`AlertPublisher`] — the fire-and-forget notification seam

mod analyzers;
mod client;

pub mod alert;
pub mod health;

use std::collections::BTreeMap;

use errscribe_shared::{BookletSection, ErrorBatch, Finding, StageKind};

pub use alert::{
    AlertPublisher, AlertSeverity, LogAlertPublisher, RecordedAlert, RecordingAlertPublisher,
};
pub use analyzers::{
    BookletSynthesizer, ContextAnalyzer, DocumentationAnalyzer, PatternValidator, StageSuite,
};
pub use health::ModelHealthClient;

// ---------------------------------------------------------------------------
// Request/response envelopes
// ---------------------------------------------------------------------------

/// Input to one stage call, borrowed from the coordinator's run state.
///
/// A request never outlives its pipeline run and is never shared across runs.
#[derive(Debug, Clone, Copy)]
pub struct StageRequest<'a> {
    pub errors: &'a ErrorBatch,
    pub code_context: &'a str,
    /// Project metadata (typically the project file XML).
    pub project_metadata: &'a str,
    pub codebase_summary: &'a str,
    pub hints: &'a BTreeMap<String, String>,
    /// Findings from stages that already completed (empty for the first
    /// stage, and for all stages when running fully parallel).
    pub prior_findings: &'a [Finding],
}

/// Response envelope for the three analysis stages.
#[derive(Debug, Clone)]
pub struct StageResponse {
    pub findings: Vec<Finding>,
    pub summary: String,
    /// Stage bookkeeping (model name, latency, ...).
    pub metadata: BTreeMap<String, String>,
}

/// Response envelope for the synthesis stage: narrative sections instead of
/// findings.
#[derive(Debug, Clone)]
pub struct SynthesisResponse {
    /// Sections in ascending ordinal order.
    pub sections: Vec<BookletSection>,
    pub summary: String,
    pub metadata: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Stage failures
// ---------------------------------------------------------------------------

/// A typed stage failure, attributable to the stage that raised it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} stage failed: {message}")]
pub struct StageError {
    pub kind: StageKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: StageKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of a stage call that did not produce a response.
///
/// Cancellation is kept distinct from typed stage errors: the strategies
/// translate it into their own catch-all code rather than a stage code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageFailure {
    /// The run's cancellation token fired before or during the call.
    Cancelled,
    /// The stage itself failed (transport, HTTP status, decode, timeout).
    Error(StageError),
}

impl From<StageError> for StageFailure {
    fn from(err: StageError) -> Self {
        Self::Error(err)
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("stage call cancelled"),
            Self::Error(err) => write!(f, "{err}"),
        }
    }
}
