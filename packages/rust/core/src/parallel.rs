//! Fully-parallel strategy.
//!
//! Documentation, context, and pattern analysis are treated as independent
//! analyses over the same batch and launched concurrently; none receives
//! another's findings. Synthesis is the join point and never starts before
//! all three have settled. The join is fail-fast: the first stage failure
//! short-circuits it and synthesis is not invoked. The strategy reports a
//! derived time-saved metric: the sum of the three analysis durations minus
//! the actual parallel wall-clock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use errscribe_artifacts::{ArtifactStore, suggested_file_name};
use errscribe_shared::{Finding, PipelineError, PipelineErrorCode, StageKind};
use errscribe_stages::{
    AlertPublisher, AlertSeverity, StageFailure, StageRequest, StageResponse, StageSuite,
};

use crate::factory::{CoordinatorMode, base_status};
use crate::run::{
    BookletGenerationResult, GenerateRequest, SAVE_TIMING_KEY, assemble_booklet,
    merge_stage_metadata, stage_alert_severity,
};

/// Alert source tag for this strategy.
const ALERT_SOURCE: &str = "pipeline.parallel";

pub struct ParallelCoordinator {
    stages: StageSuite,
    store: Arc<dyn ArtifactStore>,
    alerts: Arc<dyn AlertPublisher>,
    alert_on_analysis_stages: bool,
}

/// A failure from one branch of the parallel join.
struct BranchFailure {
    stage: StageKind,
    failure: StageFailure,
}

impl ParallelCoordinator {
    pub(crate) fn new(
        stages: StageSuite,
        store: Arc<dyn ArtifactStore>,
        alerts: Arc<dyn AlertPublisher>,
        alert_on_analysis_stages: bool,
    ) -> Self {
        Self {
            stages,
            store,
            alerts,
            alert_on_analysis_stages,
        }
    }

    #[instrument(skip_all, fields(strategy = "parallel"))]
    pub async fn generate_booklet(
        &self,
        req: &GenerateRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<BookletGenerationResult, PipelineError> {
        let run_started = Instant::now();

        let batch = errscribe_parser::parse(req.raw_compiler_output);
        if batch.is_empty() {
            let err = PipelineError::no_errors_found();
            error!(code = %err.code, "pipeline terminated: {}", err.message);
            return Err(err);
        }

        info!(batch_id = %batch.id, summary = %batch.summary, "starting parallel pipeline");

        self.check_live(cancel, "analysis")?;

        // The three analyses run over the same inputs with no prior
        // findings; first failure short-circuits the join.
        let analysis_request = StageRequest {
            errors: &batch,
            code_context: req.code_context,
            project_metadata: req.project_metadata,
            codebase_summary: req.codebase_summary,
            hints: req.hints,
            prior_findings: &[],
        };

        let parallel_started = Instant::now();
        let joined = tokio::try_join!(
            timed_branch(StageKind::Documentation, async {
                self.stages.documentation.analyze(&analysis_request, cancel).await
            }),
            timed_branch(StageKind::Context, async {
                self.stages.context.analyze(&analysis_request, cancel).await
            }),
            timed_branch(StageKind::Pattern, async {
                self.stages.pattern.analyze(&analysis_request, cancel).await
            }),
        );

        let ((doc, doc_ms), (context, context_ms), (pattern, pattern_ms)) =
            joined.map_err(|f| self.branch_failed(f))?;
        let parallel_wall_ms = parallel_started.elapsed().as_millis() as u64;
        let time_saved_ms = (doc_ms + context_ms + pattern_ms).saturating_sub(parallel_wall_ms);

        info!(
            doc_ms,
            context_ms,
            pattern_ms,
            parallel_wall_ms,
            time_saved_ms,
            "parallel analyses complete"
        );

        let mut timings: BTreeMap<String, u64> = BTreeMap::from([
            (StageKind::Documentation.name().to_string(), doc_ms),
            (StageKind::Context.name().to_string(), context_ms),
            (StageKind::Pattern.name().to_string(), pattern_ms),
        ]);
        let mut metadata: BTreeMap<String, String> =
            BTreeMap::from([("strategy".to_string(), "parallel".to_string())]);
        merge_stage_metadata(&mut metadata, StageKind::Documentation, &doc.summary, &doc.metadata);
        merge_stage_metadata(
            &mut metadata,
            StageKind::Context,
            &context.summary,
            &context.metadata,
        );
        merge_stage_metadata(
            &mut metadata,
            StageKind::Pattern,
            &pattern.summary,
            &pattern.metadata,
        );

        let mut findings: Vec<Finding> = Vec::new();
        findings.extend(doc.findings);
        findings.extend(context.findings);
        findings.extend(pattern.findings);

        // --- Synthesis: the join point ---
        self.check_live(cancel, "synthesis")?;
        let synthesis_request = StageRequest {
            prior_findings: &findings,
            ..analysis_request
        };
        let started = Instant::now();
        let synthesis = self
            .stages
            .synthesis
            .synthesize(&synthesis_request, cancel)
            .await
            .map_err(|f| {
                self.branch_failed(BranchFailure {
                    stage: StageKind::Synthesis,
                    failure: f,
                })
            })?;
        timings.insert(
            StageKind::Synthesis.name().into(),
            started.elapsed().as_millis() as u64,
        );
        merge_stage_metadata(
            &mut metadata,
            StageKind::Synthesis,
            &synthesis.summary,
            &synthesis.metadata,
        );
        metadata.insert("time_saved_ms".into(), time_saved_ms.to_string());

        // --- Persist ---
        self.check_live(cancel, "save")?;
        let booklet = assemble_booklet(batch, findings, synthesis, metadata);
        let rel_path = suggested_file_name(&booklet);

        let started = Instant::now();
        let persisted_path = self
            .store
            .save(&booklet, &rel_path, cancel)
            .await
            .map_err(|e| {
                warn!("booklet exists in memory but is not durable");
                error!(code = "SAVE_ERROR", "booklet persistence failed: {}", e.message);
                PipelineError::save(e.message)
            })?;
        timings.insert(SAVE_TIMING_KEY.into(), started.elapsed().as_millis() as u64);

        let total_elapsed_ms = run_started.elapsed().as_millis() as u64;
        info!(
            booklet_id = %booklet.id,
            path = %persisted_path.display(),
            total_elapsed_ms,
            time_saved_ms,
            "parallel pipeline complete"
        );

        Ok(BookletGenerationResult {
            booklet,
            persisted_path,
            total_elapsed_ms,
            per_stage_elapsed_ms: timings,
            time_saved_ms: Some(time_saved_ms),
        })
    }

    /// Static capability flags for health dashboards.
    pub fn status(&self) -> BTreeMap<String, bool> {
        base_status(CoordinatorMode::FullyParallel)
    }

    fn check_live(&self, cancel: &CancellationToken, phase: &str) -> Result<(), PipelineError> {
        if !cancel.is_cancelled() {
            return Ok(());
        }
        let err = PipelineError::new(
            PipelineErrorCode::ParallelOrchestratorError,
            format!("run cancelled before {phase}"),
        );
        self.raise_unexpected(&err.message);
        error!(code = %err.code, "pipeline terminated: {}", err.message);
        Err(err)
    }

    fn branch_failed(&self, branch: BranchFailure) -> PipelineError {
        let err = match branch.failure {
            StageFailure::Cancelled => {
                let err = PipelineError::new(
                    PipelineErrorCode::ParallelOrchestratorError,
                    format!("run cancelled during {} stage", branch.stage),
                );
                self.raise_unexpected(&err.message);
                err
            }
            StageFailure::Error(stage_err) => {
                if let Some(severity) =
                    stage_alert_severity(branch.stage, self.alert_on_analysis_stages)
                {
                    let context = BTreeMap::from([
                        ("stage".to_string(), serde_json::json!(branch.stage.name())),
                        ("strategy".to_string(), serde_json::json!("parallel")),
                    ]);
                    self.alerts
                        .raise(severity, ALERT_SOURCE, &stage_err.message, &context);
                }
                PipelineError::new(
                    PipelineErrorCode::ParallelOrchestratorError,
                    format!("{} stage failed: {}", branch.stage, stage_err.message),
                )
            }
        };

        error!(code = %err.code, stage = %branch.stage, "pipeline failed: {}", err.message);
        err
    }

    fn raise_unexpected(&self, message: &str) {
        let context = BTreeMap::from([
            ("reason".to_string(), serde_json::json!("unexpected")),
            ("strategy".to_string(), serde_json::json!("parallel")),
        ]);
        self.alerts
            .raise(AlertSeverity::Critical, ALERT_SOURCE, message, &context);
    }
}

/// Wrap one analysis branch with its own duration measurement.
async fn timed_branch<F>(
    stage: StageKind,
    call: F,
) -> Result<(StageResponse, u64), BranchFailure>
where
    F: Future<Output = Result<StageResponse, StageFailure>>,
{
    let started = Instant::now();
    call.await
        .map(|response| (response, started.elapsed().as_millis() as u64))
        .map_err(|failure| BranchFailure { stage, failure })
}
