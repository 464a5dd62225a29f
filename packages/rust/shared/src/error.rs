//! Error model for errscribe.
//!
//! [`PipelineError`] is the externally visible failure value of a pipeline
//! run: a closed set of codes plus a human-readable message. Library crates
//! construct it via the helper constructors; the CLI wraps it with
//! `color-eyre` for rich diagnostics.

use serde::{Deserialize, Serialize};

use crate::types::StageKind;

/// Closed set of pipeline failure codes returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineErrorCode {
    /// The raw output contained no recognizable diagnostics. Terminal,
    /// non-retryable, never alerted.
    NoErrorsFound,
    /// Documentation analysis stage failed (recoverable by caller retry).
    DocError,
    /// Context analysis stage failed (recoverable by caller retry).
    ContextError,
    /// Pattern validation stage failed (recoverable by caller retry).
    PatternError,
    /// Synthesis stage failed; most upstream work is lost.
    SynthesisError,
    /// The booklet was built but could not be persisted.
    SaveError,
    /// Catch-all for the sequential strategy: anything that is not a typed
    /// stage failure, including cancellation.
    SequentialUnexpectedError,
    /// Catch-all for the concurrent-throttled strategy. Stage failures in
    /// this strategy are also normalized to this code (continuation-chain
    /// aggregation); the failing stage survives only in the message.
    ConcurrentOrchestratorError,
    /// Catch-all for the fully-parallel strategy, same normalization as the
    /// concurrent code.
    ParallelOrchestratorError,
}

impl PipelineErrorCode {
    /// The wire/code string for this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoErrorsFound => "NO_ERRORS_FOUND",
            Self::DocError => "DOC_ERROR",
            Self::ContextError => "CONTEXT_ERROR",
            Self::PatternError => "PATTERN_ERROR",
            Self::SynthesisError => "SYNTHESIS_ERROR",
            Self::SaveError => "SAVE_ERROR",
            Self::SequentialUnexpectedError => "SEQUENTIAL_UNEXPECTED_ERROR",
            Self::ConcurrentOrchestratorError => "CONCURRENT_ORCHESTRATOR_ERROR",
            Self::ParallelOrchestratorError => "PARALLEL_ORCHESTRATOR_ERROR",
        }
    }

    /// The code a typed stage failure maps to under direct attribution.
    pub fn for_stage(kind: StageKind) -> Self {
        match kind {
            StageKind::Documentation => Self::DocError,
            StageKind::Context => Self::ContextError,
            StageKind::Pattern => Self::PatternError,
            StageKind::Synthesis => Self::SynthesisError,
        }
    }
}

impl std::fmt::Display for PipelineErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The externally visible failure value of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct PipelineError {
    /// One of the closed taxonomy codes.
    pub code: PipelineErrorCode,
    /// Human-readable detail, preserved verbatim from the failure origin.
    pub message: String,
}

impl PipelineError {
    /// Create an error with an explicit code.
    pub fn new(code: PipelineErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Terminal zero-diagnostics outcome.
    pub fn no_errors_found() -> Self {
        Self::new(
            PipelineErrorCode::NoErrorsFound,
            "no compiler errors were found in the submitted output",
        )
    }

    /// Directly attributed stage failure (sequential strategy).
    pub fn stage(kind: StageKind, message: impl Into<String>) -> Self {
        Self::new(PipelineErrorCode::for_stage(kind), message)
    }

    /// Persistence failure, message passed through from the store.
    pub fn save(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorCode::SaveError, message)
    }
}
