//! Sequential strategy.
//!
//! Strict linear chain, terminal on first failure:
//! `Parsed → DocAnalyzed → ContextAnalyzed → PatternValidated → Synthesized
//! → Persisted → Done`. Each transition's output is the exclusive input to
//! the next; after an upstream failure no downstream stage client is ever
//! invoked. Typed stage failures map 1:1 onto their own error codes;
//! everything else (including cancellation) becomes
//! `SEQUENTIAL_UNEXPECTED_ERROR`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use errscribe_artifacts::{ArtifactStore, suggested_file_name};
use errscribe_shared::{Finding, PipelineError, PipelineErrorCode, StageKind};
use errscribe_stages::{AlertPublisher, AlertSeverity, StageFailure, StageRequest, StageSuite};

use crate::factory::{CoordinatorMode, base_status};
use crate::run::{
    BookletGenerationResult, GenerateRequest, SAVE_TIMING_KEY, assemble_booklet,
    merge_stage_metadata, stage_alert_severity,
};

/// Alert source tag for this strategy.
const ALERT_SOURCE: &str = "pipeline.sequential";

pub struct SequentialCoordinator {
    stages: StageSuite,
    store: Arc<dyn ArtifactStore>,
    alerts: Arc<dyn AlertPublisher>,
    alert_on_analysis_stages: bool,
}

impl SequentialCoordinator {
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

    #[instrument(skip_all, fields(strategy = "sequential"))]
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

        info!(batch_id = %batch.id, summary = %batch.summary, "starting sequential pipeline");

        let mut timings: BTreeMap<String, u64> = BTreeMap::new();
        let mut metadata: BTreeMap<String, String> =
            BTreeMap::from([("strategy".to_string(), "sequential".to_string())]);
        let mut findings: Vec<Finding> = Vec::new();

        // --- Documentation ---
        self.check_live(cancel, StageKind::Documentation)?;
        let started = Instant::now();
        let doc = self
            .stages
            .documentation
            .analyze(&stage_request(req, &batch, &findings), cancel)
            .await
            .map_err(|f| self.stage_failed(StageKind::Documentation, f))?;
        timings.insert(
            StageKind::Documentation.name().into(),
            started.elapsed().as_millis() as u64,
        );
        merge_stage_metadata(&mut metadata, StageKind::Documentation, &doc.summary, &doc.metadata);
        findings.extend(doc.findings);

        // --- Context (receives documentation findings) ---
        self.check_live(cancel, StageKind::Context)?;
        let started = Instant::now();
        let context = self
            .stages
            .context
            .analyze(&stage_request(req, &batch, &findings), cancel)
            .await
            .map_err(|f| self.stage_failed(StageKind::Context, f))?;
        timings.insert(
            StageKind::Context.name().into(),
            started.elapsed().as_millis() as u64,
        );
        merge_stage_metadata(
            &mut metadata,
            StageKind::Context,
            &context.summary,
            &context.metadata,
        );
        findings.extend(context.findings);

        // --- Pattern validation (receives both prior finding sets) ---
        self.check_live(cancel, StageKind::Pattern)?;
        let started = Instant::now();
        let pattern = self
            .stages
            .pattern
            .analyze(&stage_request(req, &batch, &findings), cancel)
            .await
            .map_err(|f| self.stage_failed(StageKind::Pattern, f))?;
        timings.insert(
            StageKind::Pattern.name().into(),
            started.elapsed().as_millis() as u64,
        );
        merge_stage_metadata(
            &mut metadata,
            StageKind::Pattern,
            &pattern.summary,
            &pattern.metadata,
        );
        findings.extend(pattern.findings);

        // --- Synthesis (receives everything) ---
        self.check_live(cancel, StageKind::Synthesis)?;
        let started = Instant::now();
        let synthesis = self
            .stages
            .synthesis
            .synthesize(&stage_request(req, &batch, &findings), cancel)
            .await
            .map_err(|f| self.stage_failed(StageKind::Synthesis, f))?;
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

        // --- Persist ---
        self.check_live_for_save(cancel)?;
        let booklet = assemble_booklet(batch, findings, synthesis, metadata);
        let rel_path = suggested_file_name(&booklet);

        let started = Instant::now();
        let persisted_path = self
            .store
            .save(&booklet, &rel_path, cancel)
            .await
            .map_err(|e| {
                error!(code = "SAVE_ERROR", "booklet persistence failed: {}", e.message);
                PipelineError::save(e.message)
            })?;
        timings.insert(SAVE_TIMING_KEY.into(), started.elapsed().as_millis() as u64);

        let total_elapsed_ms = run_started.elapsed().as_millis() as u64;
        info!(
            booklet_id = %booklet.id,
            path = %persisted_path.display(),
            total_elapsed_ms,
            "sequential pipeline complete"
        );

        Ok(BookletGenerationResult {
            booklet,
            persisted_path,
            total_elapsed_ms,
            per_stage_elapsed_ms: timings,
            time_saved_ms: None,
        })
    }

    /// Static capability flags for health dashboards.
    pub fn status(&self) -> BTreeMap<String, bool> {
        base_status(CoordinatorMode::Sequential)
    }

    /// Cancellation is checked between transitions; a cancelled run never
    /// starts the next stage.
    fn check_live(
        &self,
        cancel: &CancellationToken,
        next_stage: StageKind,
    ) -> Result<(), PipelineError> {
        self.check_live_at(cancel, next_stage.name())
    }

    fn check_live_for_save(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        self.check_live_at(cancel, SAVE_TIMING_KEY)
    }

    fn check_live_at(
        &self,
        cancel: &CancellationToken,
        phase: &str,
    ) -> Result<(), PipelineError> {
        if !cancel.is_cancelled() {
            return Ok(());
        }
        let err = PipelineError::new(
            PipelineErrorCode::SequentialUnexpectedError,
            format!("run cancelled before {phase}"),
        );
        self.raise_unexpected(&err.message);
        error!(code = %err.code, "pipeline terminated: {}", err.message);
        Err(err)
    }

    fn stage_failed(&self, kind: StageKind, failure: StageFailure) -> PipelineError {
        let err = match failure {
            StageFailure::Cancelled => {
                let err = PipelineError::new(
                    PipelineErrorCode::SequentialUnexpectedError,
                    format!("run cancelled during {kind} stage"),
                );
                self.raise_unexpected(&err.message);
                err
            }
            StageFailure::Error(stage_err) => {
                if let Some(severity) =
                    stage_alert_severity(kind, self.alert_on_analysis_stages)
                {
                    let context = BTreeMap::from([
                        ("stage".to_string(), serde_json::json!(kind.name())),
                        ("strategy".to_string(), serde_json::json!("sequential")),
                    ]);
                    self.alerts
                        .raise(severity, ALERT_SOURCE, &stage_err.message, &context);
                }
                PipelineError::stage(kind, stage_err.message)
            }
        };

        error!(code = %err.code, stage = %kind, "stage failed: {}", err.message);
        err
    }

    fn raise_unexpected(&self, message: &str) {
        let context = BTreeMap::from([
            ("reason".to_string(), serde_json::json!("unexpected")),
            ("strategy".to_string(), serde_json::json!("sequential")),
        ]);
        self.alerts
            .raise(AlertSeverity::Critical, ALERT_SOURCE, message, &context);
    }
}

/// Build the borrowed stage request for the current chain position.
fn stage_request<'a>(
    req: &GenerateRequest<'a>,
    batch: &'a errscribe_shared::ErrorBatch,
    prior: &'a [Finding],
) -> StageRequest<'a> {
    StageRequest {
        errors: batch,
        code_context: req.code_context,
        project_metadata: req.project_metadata,
        codebase_summary: req.codebase_summary,
        hints: req.hints,
        prior_findings: prior,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use errscribe_shared::Severity;
    use errscribe_stages::RecordingAlertPublisher;

    fn coordinator(
        server_uri: &str,
        store: Arc<dyn ArtifactStore>,
        alerts: Arc<RecordingAlertPublisher>,
    ) -> SequentialCoordinator {
        SequentialCoordinator::new(stage_suite(server_uri), store, alerts, false)
    }

    #[tokio::test]
    async fn zero_errors_short_circuits_without_stage_calls() {
        let server = wiremock::MockServer::start().await;
        mount_stage_never(&server, "mistral").await;
        mount_stage_never(&server, "deepseek-coder").await;
        mount_stage_never(&server, "codegemma").await;
        mount_stage_never(&server, "llama3").await;

        let (store, root) = temp_store();
        let store: Arc<dyn ArtifactStore> = Arc::new(store.clone());
        let alerts = Arc::new(RecordingAlertPublisher::new());
        let coord = coordinator(&server.uri(), store.clone(), alerts.clone());

        let hints = BTreeMap::new();
        let err = coord
            .generate_booklet(&request(SCENARIO_B, &hints), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code, PipelineErrorCode::NoErrorsFound);
        assert!(store.list().await.unwrap().is_empty());
        assert!(alerts.recorded().is_empty());

        cleanup(root);
    }

    #[tokio::test]
    async fn doc_failure_stops_the_chain() {
        let server = wiremock::MockServer::start().await;
        mount_stage_error(&server, "mistral", 500).await;
        mount_stage_never(&server, "deepseek-coder").await;
        mount_stage_never(&server, "codegemma").await;
        mount_stage_never(&server, "llama3").await;

        let (store, root) = temp_store();
        let alerts = Arc::new(RecordingAlertPublisher::new());
        let coord = coordinator(&server.uri(), Arc::new(store), alerts.clone());

        let hints = BTreeMap::new();
        let err = coord
            .generate_booklet(&request(SCENARIO_A, &hints), &CancellationToken::new())
            .await
            .unwrap_err();

        // Sequential attributes the failure directly to the stage.
        assert_eq!(err.code, PipelineErrorCode::DocError);
        assert!(err.message.contains("500"));

        let recorded = alerts.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].severity, AlertSeverity::Warning);

        cleanup(root);
    }

    #[tokio::test]
    async fn synthesis_failure_raises_critical_alert() {
        let server = wiremock::MockServer::start().await;
        mount_stage(&server, "mistral", doc_payload()).await;
        mount_stage(&server, "deepseek-coder", context_payload()).await;
        mount_stage(&server, "codegemma", pattern_payload()).await;
        mount_stage_error(&server, "llama3", 500).await;

        let (store, root) = temp_store();
        let alerts = Arc::new(RecordingAlertPublisher::new());
        let coord = coordinator(&server.uri(), Arc::new(store), alerts.clone());

        let hints = BTreeMap::new();
        let err = coord
            .generate_booklet(&request(SCENARIO_A, &hints), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code, PipelineErrorCode::SynthesisError);

        let recorded = alerts.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].severity, AlertSeverity::Critical);

        cleanup(root);
    }

    #[tokio::test]
    async fn full_run_builds_and_persists_booklet() {
        let server = wiremock::MockServer::start().await;
        mount_stage_once(&server, "mistral", doc_payload()).await;
        mount_stage_once(&server, "deepseek-coder", context_payload()).await;
        mount_stage_once(&server, "codegemma", pattern_payload()).await;
        mount_stage_once(&server, "llama3", synthesis_payload()).await;

        let (store, root) = temp_store();
        let store_dyn: Arc<dyn ArtifactStore> = Arc::new(store.clone());
        let alerts = Arc::new(RecordingAlertPublisher::new());
        let coord = coordinator(&server.uri(), store_dyn, alerts.clone());

        let hints = BTreeMap::new();
        let result = coord
            .generate_booklet(&request(SCENARIO_A, &hints), &CancellationToken::new())
            .await
            .unwrap();

        // Scenario A: one parsed error with the expected code.
        let batch = &result.booklet.original_errors;
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].code, "CS0103");
        assert_eq!(batch.errors[0].severity, Severity::Error);

        // One finding per analysis stage plus synthesis sections.
        for kind in StageKind::ANALYSIS {
            assert!(
                result.booklet.findings_for(kind).count() >= 1,
                "missing finding for {kind}"
            );
        }
        assert!(!result.booklet.sections.is_empty());

        // Timing keys for all four stages plus save.
        for key in ["documentation", "context", "pattern", "synthesis", SAVE_TIMING_KEY] {
            assert!(
                result.per_stage_elapsed_ms.contains_key(key),
                "missing timing key {key}"
            );
        }
        assert!(result.time_saved_ms.is_none());

        // Persist-then-list shows the file exactly once.
        let file_name = result
            .persisted_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.iter().filter(|n| **n == file_name).count(), 1);

        assert!(alerts.recorded().is_empty());

        cleanup(root);
    }

    #[tokio::test]
    async fn save_failure_is_returned_verbatim() {
        let server = wiremock::MockServer::start().await;
        mount_stage(&server, "mistral", doc_payload()).await;
        mount_stage(&server, "deepseek-coder", context_payload()).await;
        mount_stage(&server, "codegemma", pattern_payload()).await;
        mount_stage(&server, "llama3", synthesis_payload()).await;

        let alerts = Arc::new(RecordingAlertPublisher::new());
        let coord = coordinator(&server.uri(), Arc::new(FailingStore), alerts);

        let hints = BTreeMap::new();
        let err = coord
            .generate_booklet(&request(SCENARIO_A, &hints), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code, PipelineErrorCode::SaveError);
        assert_eq!(err.message, "disk full");
    }

    #[tokio::test]
    async fn cancelled_run_maps_to_catch_all() {
        let server = wiremock::MockServer::start().await;
        mount_stage_never(&server, "mistral").await;

        let (store, root) = temp_store();
        let alerts = Arc::new(RecordingAlertPublisher::new());
        let coord = coordinator(&server.uri(), Arc::new(store), alerts.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let hints = BTreeMap::new();
        let err = coord
            .generate_booklet(&request(SCENARIO_A, &hints), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.code, PipelineErrorCode::SequentialUnexpectedError);
        assert_eq!(alerts.recorded().len(), 1);
        assert_eq!(alerts.recorded()[0].severity, AlertSeverity::Critical);

        cleanup(root);
    }

    #[tokio::test]
    async fn status_is_idempotent() {
        let server = wiremock::MockServer::start().await;
        let (store, root) = temp_store();
        let alerts = Arc::new(RecordingAlertPublisher::new());
        let coord = coordinator(&server.uri(), Arc::new(store), alerts);

        let first = coord.status();
        let second = coord.status();
        assert_eq!(first, second);
        assert_eq!(first.get("sequential_mode"), Some(&true));
        assert_eq!(first.get("concurrent_mode"), Some(&false));
        assert_eq!(first.get("parallel_mode"), Some(&false));
        assert_eq!(first.get("parse_available"), Some(&true));

        cleanup(root);
    }
}
