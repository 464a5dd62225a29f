//! Pipeline orchestration core for errscribe.
//!
//! Drives the four AI analysis stages over a parsed error batch and
//! assembles their outputs into a persisted research booklet. Three
//! interchangeable strategies implement the same contract:
//!
//! - [`SequentialCoordinator`] — strict linear chain, first failure wins
//! - [`ThrottledCoordinator`] — same chain as spawned continuation tasks
//!   under a bounded concurrency gate
//! - [`ParallelCoordinator`] — the three analyses run concurrently,
//!   synthesis joins them
//!
//! Strategy choice happens at the [`CoordinatorFactory`] seam and is
//! represented as the [`Coordinator`] enum rather than an inheritance
//! hierarchy.

pub mod factory;
pub mod parallel;
pub mod run;
pub mod sequential;
pub mod throttled;

use std::collections::BTreeMap;
use std::fmt;

use tokio_util::sync::CancellationToken;

use errscribe_shared::PipelineError;

pub use factory::{CoordinatorFactory, CoordinatorMode};
pub use parallel::ParallelCoordinator;
pub use run::{BookletGenerationResult, GenerateRequest, SAVE_TIMING_KEY};
pub use sequential::SequentialCoordinator;
pub use throttled::ThrottledCoordinator;

/// A pipeline coordinator: one of the three execution strategies behind a
/// single dispatch surface.
pub enum Coordinator {
    Sequential(SequentialCoordinator),
    Throttled(ThrottledCoordinator),
    Parallel(ParallelCoordinator),
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            Self::Sequential(_) => "Sequential",
            Self::Throttled(_) => "Throttled",
            Self::Parallel(_) => "Parallel",
        };
        f.debug_tuple("Coordinator").field(&variant).finish()
    }
}

impl Coordinator {
    /// Run the full pipeline: parse → analyze → synthesize → persist.
    pub async fn generate_booklet(
        &self,
        request: &GenerateRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<BookletGenerationResult, PipelineError> {
        match self {
            Self::Sequential(c) => c.generate_booklet(request, cancel).await,
            Self::Throttled(c) => c.generate_booklet(request, cancel).await,
            Self::Parallel(c) => c.generate_booklet(request, cancel).await,
        }
    }

    /// Static capability flags for health dashboards. Never fails.
    pub fn status(&self) -> BTreeMap<String, bool> {
        match self {
            Self::Sequential(c) => c.status(),
            Self::Throttled(c) => c.status(),
            Self::Parallel(c) => c.status(),
        }
    }

    /// Which strategy this coordinator runs.
    pub fn mode(&self) -> CoordinatorMode {
        match self {
            Self::Sequential(_) => CoordinatorMode::Sequential,
            Self::Throttled(_) => CoordinatorMode::ConcurrentThrottled,
            Self::Parallel(_) => CoordinatorMode::FullyParallel,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared test harness
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use errscribe_artifacts::{ArtifactStore, FsBookletStore, StoreError};
    use errscribe_shared::{ModelsConfig, ResearchBooklet};
    use errscribe_stages::StageSuite;

    use crate::run::GenerateRequest;

    /// Scenario A input: a single MSBuild-style error line.
    pub(crate) const SCENARIO_A: &str =
        "Program.cs(10,5): error CS0103: The name 'Console' does not exist";

    /// Scenario B input: a successful build with no diagnostics.
    pub(crate) const SCENARIO_B: &str = "Build succeeded. 0 Warning(s) 0 Error(s)";

    pub(crate) fn stage_suite(endpoint: &str) -> StageSuite {
        let models = ModelsConfig {
            endpoint: endpoint.to_string(),
            ..ModelsConfig::default()
        };
        StageSuite::from_config(&models).expect("stage suite")
    }

    pub(crate) fn request<'a>(
        raw: &'a str,
        hints: &'a BTreeMap<String, String>,
    ) -> GenerateRequest<'a> {
        GenerateRequest {
            raw_compiler_output: raw,
            code_context: "using System;\n\nclass Program { static void Main() { } }",
            project_metadata: "<Project Sdk=\"Microsoft.NET.Sdk\" />",
            codebase_summary: "sample console application",
            hints,
        }
    }

    pub(crate) fn temp_store() -> (FsBookletStore, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "errscribe-core-test-{}",
            uuid::Uuid::now_v7()
        ));
        (FsBookletStore::new(&root), root)
    }

    pub(crate) fn cleanup(root: PathBuf) {
        let _ = std::fs::remove_dir_all(root);
    }

    /// Store double for the persistence-failure scenarios.
    pub(crate) struct FailingStore;

    #[async_trait]
    impl ArtifactStore for FailingStore {
        async fn save(
            &self,
            _booklet: &ResearchBooklet,
            _suggested_rel_path: &str,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf, StoreError> {
            Err(StoreError::save("disk full"))
        }

        async fn list(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn ollama_reply(model: &str, inner: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "model": model,
            "response": inner.to_string(),
            "done": true,
        })
    }

    /// Mount a generate mock for `model` with no call-count expectation.
    pub(crate) async fn mount_stage(server: &MockServer, model: &str, payload: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({ "model": model })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ollama_reply(model, payload)))
            .mount(server)
            .await;
    }

    /// Mount a generate mock that must be called exactly once.
    pub(crate) async fn mount_stage_once(
        server: &MockServer,
        model: &str,
        payload: serde_json::Value,
    ) {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({ "model": model })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ollama_reply(model, payload)))
            .expect(1)
            .mount(server)
            .await;
    }

    /// Mount a generate mock that must never be called.
    pub(crate) async fn mount_stage_never(server: &MockServer, model: &str) {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({ "model": model })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ollama_reply(
                model,
                serde_json::json!({"summary": "unused", "findings": []}),
            )))
            .expect(0)
            .mount(server)
            .await;
    }

    /// Mount a generate mock that fails with `status`.
    pub(crate) async fn mount_stage_error(server: &MockServer, model: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({ "model": model })))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    /// Mount a generate mock that answers after `delay_ms`.
    pub(crate) async fn mount_stage_delayed(
        server: &MockServer,
        model: &str,
        payload: serde_json::Value,
        delay_ms: u64,
    ) {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({ "model": model })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ollama_reply(model, payload))
                    .set_delay(std::time::Duration::from_millis(delay_ms)),
            )
            .mount(server)
            .await;
    }

    /// Mount the tag listing used by the health probe.
    pub(crate) async fn mount_tags(server: &MockServer, installed: &[&str]) {
        let models: Vec<serde_json::Value> = installed
            .iter()
            .map(|name| serde_json::json!({ "name": name }))
            .collect();
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "models": models })),
            )
            .mount(server)
            .await;
    }

    pub(crate) fn doc_payload() -> serde_json::Value {
        serde_json::json!({
            "summary": "CS0103 is a name-resolution failure",
            "findings": [{
                "title": "CS0103: name does not exist",
                "content": "The compiler cannot resolve the identifier in scope.",
                "reference_url": "https://learn.microsoft.com/dotnet/csharp/misc/cs0103",
            }],
        })
    }

    pub(crate) fn context_payload() -> serde_json::Value {
        serde_json::json!({
            "summary": "missing using directive",
            "findings": [{
                "title": "Add using System;",
                "location_summary": "Program.cs line 10",
                "suggested_fix": "Add `using System;` at the top of the file.",
                "rationale": "Console lives in the System namespace.",
            }],
        })
    }

    pub(crate) fn pattern_payload() -> serde_json::Value {
        serde_json::json!({
            "summary": "no systemic pattern issues",
            "issues": [{
                "code": "IMPORTS",
                "title": "Inconsistent import hygiene",
                "severity": "warning",
                "description": "Several files rely on fully-qualified names.",
            }],
            "recommendations": ["adopt implicit usings"],
        })
    }

    pub(crate) fn synthesis_payload() -> serde_json::Value {
        serde_json::json!({
            "summary": "single missing-namespace failure",
            "sections": [
                {"title": "Symptoms", "body": "The build fails with CS0103."},
                {"title": "Resolution", "body": "Add the missing using directive."},
            ],
        })
    }
}
