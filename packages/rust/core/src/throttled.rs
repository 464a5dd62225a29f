//! Concurrent-throttled strategy.
//!
//! Same dependency chain as the sequential strategy, but every stage call
//! runs as a spawned continuation task holding a permit from a bounded
//! concurrency gate, so concurrent pipeline runs cannot overwhelm the model
//! backend. All failures raised anywhere in the continuation chain are
//! normalized at the top level into `CONCURRENT_ORCHESTRATOR_ERROR`
//! (`NO_ERRORS_FOUND` and `SAVE_ERROR` pass through verbatim); the failing
//! stage survives only in the message. A model health probe runs alongside
//! each pipeline run and feeds the status query without ever blocking it.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use errscribe_artifacts::{ArtifactStore, StoreError, suggested_file_name};
use errscribe_shared::{ErrorBatch, Finding, PipelineError, PipelineErrorCode, StageKind};
use errscribe_stages::{
    AlertPublisher, AlertSeverity, ModelHealthClient, StageError, StageFailure, StageRequest,
    StageSuite,
};

use crate::factory::{CoordinatorMode, base_status};
use crate::run::{
    BookletGenerationResult, GenerateRequest, SAVE_TIMING_KEY, assemble_booklet,
    merge_stage_metadata, stage_alert_severity,
};

/// Alert source tag for this strategy.
const ALERT_SOURCE: &str = "pipeline.concurrent";

pub struct ThrottledCoordinator {
    stages: StageSuite,
    store: Arc<dyn ArtifactStore>,
    alerts: Arc<dyn AlertPublisher>,
    alert_on_analysis_stages: bool,
    /// Process-wide concurrency gate, shared by every run through this
    /// coordinator. Permits are RAII: released exactly once per acquire on
    /// success, failure, or cancellation.
    gate: Arc<Semaphore>,
    health: ModelHealthClient,
    model_names: Vec<String>,
    /// Last health-probe result, surfaced by [`Self::status`].
    health_cache: Arc<RwLock<BTreeMap<String, bool>>>,
}

/// A failure anywhere in the continuation chain, collected for top-level
/// normalization.
enum ChainFailure {
    Stage(StageError),
    Cancelled { phase: &'static str },
    Save(StoreError),
    Unexpected(String),
}

/// Owned snapshot of one stage's inputs, movable into a spawned task.
#[derive(Clone)]
struct OwnedStageInput {
    batch: ErrorBatch,
    code_context: String,
    project_metadata: String,
    codebase_summary: String,
    hints: BTreeMap<String, String>,
    prior_findings: Vec<Finding>,
}

impl OwnedStageInput {
    fn capture(req: &GenerateRequest<'_>, batch: &ErrorBatch, prior: &[Finding]) -> Self {
        Self {
            batch: batch.clone(),
            code_context: req.code_context.to_string(),
            project_metadata: req.project_metadata.to_string(),
            codebase_summary: req.codebase_summary.to_string(),
            hints: req.hints.clone(),
            prior_findings: prior.to_vec(),
        }
    }

    fn request(&self) -> StageRequest<'_> {
        StageRequest {
            errors: &self.batch,
            code_context: &self.code_context,
            project_metadata: &self.project_metadata,
            codebase_summary: &self.codebase_summary,
            hints: &self.hints,
            prior_findings: &self.prior_findings,
        }
    }
}

impl ThrottledCoordinator {
    pub(crate) fn new(
        stages: StageSuite,
        store: Arc<dyn ArtifactStore>,
        alerts: Arc<dyn AlertPublisher>,
        alert_on_analysis_stages: bool,
        max_in_flight: usize,
        health: ModelHealthClient,
    ) -> Self {
        let model_names = stages.model_names();
        Self {
            stages,
            store,
            alerts,
            alert_on_analysis_stages,
            gate: Arc::new(Semaphore::new(max_in_flight.max(1))),
            health,
            model_names,
            health_cache: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    #[instrument(skip_all, fields(strategy = "concurrent"))]
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

        info!(batch_id = %batch.id, summary = %batch.summary, "starting throttled pipeline");

        // Probe model availability alongside the run; its outcome only feeds
        // the status query and never blocks pipeline execution.
        self.spawn_health_probe();

        match self.run_chain(req, &batch, cancel, run_started).await {
            Ok(result) => {
                info!(
                    booklet_id = %result.booklet.id,
                    total_elapsed_ms = result.total_elapsed_ms,
                    "throttled pipeline complete"
                );
                Ok(result)
            }
            Err(failure) => Err(self.normalize(failure)),
        }
    }

    /// Static capability flags plus the cached per-model availability.
    pub fn status(&self) -> BTreeMap<String, bool> {
        let mut status = base_status(CoordinatorMode::ConcurrentThrottled);
        if let Ok(cache) = self.health_cache.read() {
            for (model, available) in cache.iter() {
                status.insert(format!("model:{model}"), *available);
            }
        }
        status
    }

    fn spawn_health_probe(&self) {
        let health = self.health.clone();
        let models = self.model_names.clone();
        let cache = Arc::clone(&self.health_cache);
        tokio::spawn(async move {
            let report = health.probe(&models).await;
            if let Ok(mut cache) = cache.write() {
                *cache = report;
            }
        });
    }

    /// The continuation chain. Every failure funnels into [`ChainFailure`]
    /// for the single top-level normalization point.
    async fn run_chain(
        &self,
        req: &GenerateRequest<'_>,
        batch: &ErrorBatch,
        cancel: &CancellationToken,
        run_started: Instant,
    ) -> Result<BookletGenerationResult, ChainFailure> {
        let mut timings: BTreeMap<String, u64> = BTreeMap::new();
        let mut metadata: BTreeMap<String, String> =
            BTreeMap::from([("strategy".to_string(), "concurrent".to_string())]);
        let mut findings: Vec<Finding> = Vec::new();

        // --- Documentation ---
        self.check_live(cancel, StageKind::Documentation)?;
        let input = OwnedStageInput::capture(req, batch, &findings);
        let analyzer = self.stages.documentation.clone();
        let child_cancel = cancel.clone();
        let (doc, elapsed) = self
            .run_gated(StageKind::Documentation, async move {
                analyzer.analyze(&input.request(), &child_cancel).await
            })
            .await?;
        timings.insert(StageKind::Documentation.name().into(), elapsed);
        merge_stage_metadata(&mut metadata, StageKind::Documentation, &doc.summary, &doc.metadata);
        findings.extend(doc.findings);

        // --- Context ---
        self.check_live(cancel, StageKind::Context)?;
        let input = OwnedStageInput::capture(req, batch, &findings);
        let analyzer = self.stages.context.clone();
        let child_cancel = cancel.clone();
        let (context, elapsed) = self
            .run_gated(StageKind::Context, async move {
                analyzer.analyze(&input.request(), &child_cancel).await
            })
            .await?;
        timings.insert(StageKind::Context.name().into(), elapsed);
        merge_stage_metadata(
            &mut metadata,
            StageKind::Context,
            &context.summary,
            &context.metadata,
        );
        findings.extend(context.findings);

        // --- Pattern validation ---
        self.check_live(cancel, StageKind::Pattern)?;
        let input = OwnedStageInput::capture(req, batch, &findings);
        let analyzer = self.stages.pattern.clone();
        let child_cancel = cancel.clone();
        let (pattern, elapsed) = self
            .run_gated(StageKind::Pattern, async move {
                analyzer.analyze(&input.request(), &child_cancel).await
            })
            .await?;
        timings.insert(StageKind::Pattern.name().into(), elapsed);
        merge_stage_metadata(
            &mut metadata,
            StageKind::Pattern,
            &pattern.summary,
            &pattern.metadata,
        );
        findings.extend(pattern.findings);

        // --- Synthesis ---
        self.check_live(cancel, StageKind::Synthesis)?;
        let input = OwnedStageInput::capture(req, batch, &findings);
        let synthesizer = self.stages.synthesis.clone();
        let child_cancel = cancel.clone();
        let (synthesis, elapsed) = self
            .run_gated(StageKind::Synthesis, async move {
                synthesizer.synthesize(&input.request(), &child_cancel).await
            })
            .await?;
        timings.insert(StageKind::Synthesis.name().into(), elapsed);
        merge_stage_metadata(
            &mut metadata,
            StageKind::Synthesis,
            &synthesis.summary,
            &synthesis.metadata,
        );

        // --- Persist ---
        if cancel.is_cancelled() {
            return Err(ChainFailure::Cancelled { phase: SAVE_TIMING_KEY });
        }
        let booklet = assemble_booklet(batch.clone(), findings, synthesis, metadata);
        let rel_path = suggested_file_name(&booklet);

        let started = Instant::now();
        let persisted_path = self
            .store
            .save(&booklet, &rel_path, cancel)
            .await
            .map_err(ChainFailure::Save)?;
        timings.insert(SAVE_TIMING_KEY.into(), started.elapsed().as_millis() as u64);

        Ok(BookletGenerationResult {
            booklet,
            persisted_path,
            total_elapsed_ms: run_started.elapsed().as_millis() as u64,
            per_stage_elapsed_ms: timings,
            time_saved_ms: None,
        })
    }

    /// Run one stage call as a spawned task under the concurrency gate.
    async fn run_gated<T, F>(&self, kind: StageKind, call: F) -> Result<(T, u64), ChainFailure>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, StageFailure>> + Send + 'static,
    {
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ChainFailure::Unexpected(format!("throttle gate closed: {e}")))?;

        let handle = tokio::spawn(async move {
            // Permit held for the whole stage call; dropped exactly once
            // when the task ends, on every path.
            let _permit = permit;
            let started = Instant::now();
            call.await
                .map(|value| (value, started.elapsed().as_millis() as u64))
        });

        match handle.await {
            Ok(Ok(pair)) => Ok(pair),
            Ok(Err(StageFailure::Cancelled)) => Err(ChainFailure::Cancelled { phase: kind.name() }),
            Ok(Err(StageFailure::Error(err))) => Err(ChainFailure::Stage(err)),
            Err(join_err) => Err(ChainFailure::Unexpected(format!(
                "{kind} stage task failed: {join_err}"
            ))),
        }
    }

    fn check_live(
        &self,
        cancel: &CancellationToken,
        next_stage: StageKind,
    ) -> Result<(), ChainFailure> {
        if cancel.is_cancelled() {
            return Err(ChainFailure::Cancelled { phase: next_stage.name() });
        }
        Ok(())
    }

    /// The single top-level normalization point for chain failures.
    fn normalize(&self, failure: ChainFailure) -> PipelineError {
        let err = match failure {
            ChainFailure::Stage(stage_err) => {
                if let Some(severity) =
                    stage_alert_severity(stage_err.kind, self.alert_on_analysis_stages)
                {
                    let context = BTreeMap::from([
                        ("stage".to_string(), serde_json::json!(stage_err.kind.name())),
                        ("strategy".to_string(), serde_json::json!("concurrent")),
                    ]);
                    self.alerts
                        .raise(severity, ALERT_SOURCE, &stage_err.message, &context);
                }
                PipelineError::new(
                    PipelineErrorCode::ConcurrentOrchestratorError,
                    format!("{} stage failed: {}", stage_err.kind, stage_err.message),
                )
            }
            ChainFailure::Cancelled { phase } => {
                let err = PipelineError::new(
                    PipelineErrorCode::ConcurrentOrchestratorError,
                    format!("run cancelled at {phase}"),
                );
                self.raise_unexpected(&err.message);
                err
            }
            ChainFailure::Unexpected(message) => {
                let err =
                    PipelineError::new(PipelineErrorCode::ConcurrentOrchestratorError, message);
                self.raise_unexpected(&err.message);
                err
            }
            ChainFailure::Save(store_err) => {
                warn!("booklet exists in memory but is not durable");
                PipelineError::save(store_err.message)
            }
        };

        error!(code = %err.code, "pipeline failed: {}", err.message);
        err
    }

    fn raise_unexpected(&self, message: &str) {
        let context = BTreeMap::from([
            ("reason".to_string(), serde_json::json!("unexpected")),
            ("strategy".to_string(), serde_json::json!("concurrent")),
        ]);
        self.alerts
            .raise(AlertSeverity::Critical, ALERT_SOURCE, message, &context);
    }
}
