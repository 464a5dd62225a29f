//! The four stage analyzers.
//!
//! Each analyzer wraps the shared [`ModelClient`] with its own model
//! assignment, prompt construction, and response mapping. Model replies are
//! requested as JSON; a lenient fallback wraps non-JSON text so a chatty
//! model degrades into a single finding instead of failing the stage.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use errscribe_shared::{
    BookletSection, ConfigError, ErrorBatch, Finding, ModelsConfig, PatternIssue, Severity,
    StageKind,
};

use crate::client::{CallError, GenerateOutcome, ModelClient};
use crate::{StageError, StageFailure, StageRequest, StageResponse, SynthesisResponse};

/// Cap on code context included in a prompt.
const MAX_CONTEXT_CHARS: usize = 12_000;

/// Cap on diagnostics listed verbatim in a prompt.
const MAX_PROMPT_ERRORS: usize = 25;

// ---------------------------------------------------------------------------
// StageSuite
// ---------------------------------------------------------------------------

/// The four analyzers, sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct StageSuite {
    pub documentation: DocumentationAnalyzer,
    pub context: ContextAnalyzer,
    pub pattern: PatternValidator,
    pub synthesis: BookletSynthesizer,
}

impl StageSuite {
    /// Build the suite from the `[models]` config section.
    pub fn from_config(models: &ModelsConfig) -> Result<Self, ConfigError> {
        let client = ModelClient::new(
            &models.endpoint,
            Duration::from_secs(models.request_timeout_secs),
        )?;

        Ok(Self {
            documentation: DocumentationAnalyzer {
                client: client.clone(),
                model: models.documentation.clone(),
            },
            context: ContextAnalyzer {
                client: client.clone(),
                model: models.context.clone(),
            },
            pattern: PatternValidator {
                client: client.clone(),
                model: models.pattern.clone(),
            },
            synthesis: BookletSynthesizer {
                client,
                model: models.synthesis.clone(),
            },
        })
    }

    /// Configured model names in stage-chain order.
    pub fn model_names(&self) -> Vec<String> {
        vec![
            self.documentation.model.clone(),
            self.context.model.clone(),
            self.pattern.model.clone(),
            self.synthesis.model.clone(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Documentation analyzer
// ---------------------------------------------------------------------------

/// Stage 1: official documentation lookup for each diagnostic code.
#[derive(Debug, Clone)]
pub struct DocumentationAnalyzer {
    pub(crate) client: ModelClient,
    pub(crate) model: String,
}

#[derive(Debug, Deserialize)]
struct DocPayload {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    findings: Vec<DocEntry>,
}

#[derive(Debug, Deserialize)]
struct DocEntry {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    reference_url: Option<String>,
}

impl DocumentationAnalyzer {
    #[instrument(skip_all, fields(model = %self.model, errors = req.errors.errors.len()))]
    pub async fn analyze(
        &self,
        req: &StageRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<StageResponse, StageFailure> {
        let prompt = self.build_prompt(req);
        let outcome = self
            .client
            .generate(&self.model, &prompt, cancel)
            .await
            .map_err(|e| map_call_error(StageKind::Documentation, e))?;

        Ok(self.map_response(req.errors, outcome))
    }

    fn build_prompt(&self, req: &StageRequest<'_>) -> String {
        format!(
            "You are a compiler documentation researcher.\n\
             For each diagnostic code below, report what the official documentation \
             says about it: meaning, common causes, and a reference URL when known.\n\n\
             Diagnostics ({}):\n{}\n\n\
             Project metadata:\n{}\n\n\
             Respond with JSON: {{\"summary\": string, \"findings\": \
             [{{\"title\": string, \"content\": string, \"reference_url\": string|null}}]}}",
            req.errors.summary,
            format_errors(req.errors),
            truncate(req.project_metadata, 2_000),
        )
    }

    fn map_response(&self, errors: &ErrorBatch, outcome: GenerateOutcome) -> StageResponse {
        let text = strip_code_fences(&outcome.text);
        let payload = parse_payload::<DocPayload, DocEntry>(text, |findings| DocPayload {
            summary: None,
            findings,
        });

        let (summary, findings) = match payload {
            Some(p) if !p.findings.is_empty() => {
                let findings = p
                    .findings
                    .into_iter()
                    .map(|e| Finding::Documentation {
                        source: outcome.model.clone(),
                        title: non_empty(e.title, "Documentation reference"),
                        content: e.content,
                        reference_url: e.reference_url.filter(|u| !u.is_empty()),
                    })
                    .collect();
                (
                    p.summary
                        .unwrap_or_else(|| format!("documentation lookup for {}", errors.summary)),
                    findings,
                )
            }
            _ => {
                warn!(model = %outcome.model, "documentation reply was not structured JSON, keeping raw text");
                (
                    format!("documentation lookup for {}", errors.summary),
                    vec![Finding::Documentation {
                        source: outcome.model.clone(),
                        title: "Documentation notes".into(),
                        content: text.to_string(),
                        reference_url: None,
                    }],
                )
            }
        };

        StageResponse {
            findings,
            summary,
            metadata: stage_metadata(&outcome),
        }
    }
}

// ---------------------------------------------------------------------------
// Context analyzer
// ---------------------------------------------------------------------------

/// Stage 2: contextual code analysis with suggested fixes.
#[derive(Debug, Clone)]
pub struct ContextAnalyzer {
    pub(crate) client: ModelClient,
    pub(crate) model: String,
}

#[derive(Debug, Deserialize)]
struct ContextPayload {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    findings: Vec<ContextEntry>,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    #[serde(default)]
    title: String,
    #[serde(default)]
    location_summary: String,
    #[serde(default)]
    suggested_fix: String,
    #[serde(default)]
    rationale: String,
}

impl ContextAnalyzer {
    #[instrument(skip_all, fields(model = %self.model, errors = req.errors.errors.len()))]
    pub async fn analyze(
        &self,
        req: &StageRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<StageResponse, StageFailure> {
        let prompt = self.build_prompt(req);
        let outcome = self
            .client
            .generate(&self.model, &prompt, cancel)
            .await
            .map_err(|e| map_call_error(StageKind::Context, e))?;

        Ok(self.map_response(req.errors, outcome))
    }

    fn build_prompt(&self, req: &StageRequest<'_>) -> String {
        format!(
            "You are a senior engineer diagnosing build failures in their code context.\n\
             Propose a concrete fix per diagnostic, with rationale.\n\n\
             Diagnostics ({}):\n{}\n\n\
             Code context:\n{}\n\n\
             Codebase summary:\n{}\n\n\
             Prior analysis:\n{}\n\n\
             Respond with JSON: {{\"summary\": string, \"findings\": \
             [{{\"title\": string, \"location_summary\": string, \
             \"suggested_fix\": string, \"rationale\": string}}]}}",
            req.errors.summary,
            format_errors(req.errors),
            truncate(req.code_context, MAX_CONTEXT_CHARS),
            truncate(req.codebase_summary, 2_000),
            findings_digest(req.prior_findings),
        )
    }

    fn map_response(&self, errors: &ErrorBatch, outcome: GenerateOutcome) -> StageResponse {
        let text = strip_code_fences(&outcome.text);
        let payload = parse_payload::<ContextPayload, ContextEntry>(text, |findings| {
            ContextPayload {
                summary: None,
                findings,
            }
        });

        let (summary, findings) = match payload {
            Some(p) if !p.findings.is_empty() => {
                let findings = p
                    .findings
                    .into_iter()
                    .map(|e| Finding::Context {
                        source: outcome.model.clone(),
                        title: non_empty(e.title, "Suggested fix"),
                        location_summary: e.location_summary,
                        suggested_fix: e.suggested_fix,
                        rationale: e.rationale,
                    })
                    .collect();
                (
                    p.summary
                        .unwrap_or_else(|| format!("context analysis for {}", errors.summary)),
                    findings,
                )
            }
            _ => {
                warn!(model = %outcome.model, "context reply was not structured JSON, keeping raw text");
                (
                    format!("context analysis for {}", errors.summary),
                    vec![Finding::Context {
                        source: outcome.model.clone(),
                        title: "Context analysis notes".into(),
                        location_summary: String::new(),
                        suggested_fix: text.to_string(),
                        rationale: String::new(),
                    }],
                )
            }
        };

        StageResponse {
            findings,
            summary,
            metadata: stage_metadata(&outcome),
        }
    }
}

// ---------------------------------------------------------------------------
// Pattern validator
// ---------------------------------------------------------------------------

/// Stage 3: pattern/style validation over the batch and prior findings.
#[derive(Debug, Clone)]
pub struct PatternValidator {
    pub(crate) client: ModelClient,
    pub(crate) model: String,
}

#[derive(Debug, Deserialize)]
struct PatternPayload {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    issues: Vec<PatternIssueEntry>,
    #[serde(default)]
    recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PatternIssueEntry {
    #[serde(default)]
    code: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    description: String,
}

impl PatternValidator {
    #[instrument(skip_all, fields(model = %self.model, errors = req.errors.errors.len()))]
    pub async fn analyze(
        &self,
        req: &StageRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<StageResponse, StageFailure> {
        let prompt = self.build_prompt(req);
        let outcome = self
            .client
            .generate(&self.model, &prompt, cancel)
            .await
            .map_err(|e| map_call_error(StageKind::Pattern, e))?;

        Ok(self.map_response(req.errors, outcome))
    }

    fn build_prompt(&self, req: &StageRequest<'_>) -> String {
        format!(
            "You are a code-quality reviewer validating coding patterns and style.\n\
             Given the diagnostics and the analysis so far, identify recurring \
             pattern issues and actionable recommendations.\n\n\
             Diagnostics ({}):\n{}\n\n\
             Code context:\n{}\n\n\
             Prior analysis:\n{}\n\n\
             Respond with JSON: {{\"summary\": string, \"issues\": \
             [{{\"code\": string, \"title\": string, \"severity\": \
             \"error\"|\"warning\", \"description\": string}}], \
             \"recommendations\": [string]}}",
            req.errors.summary,
            format_errors(req.errors),
            truncate(req.code_context, MAX_CONTEXT_CHARS),
            findings_digest(req.prior_findings),
        )
    }

    fn map_response(&self, errors: &ErrorBatch, outcome: GenerateOutcome) -> StageResponse {
        let text = strip_code_fences(&outcome.text);
        let payload: Option<PatternPayload> = serde_json::from_str(text).ok();

        let (summary, content, issues, recommendations) = match payload {
            Some(p) => {
                let issues = p
                    .issues
                    .into_iter()
                    .map(|i| PatternIssue {
                        code: non_empty(i.code, "PATTERN"),
                        title: non_empty(i.title, "Pattern issue"),
                        severity: parse_severity(&i.severity),
                        description: i.description,
                    })
                    .collect::<Vec<_>>();
                let summary = p
                    .summary
                    .unwrap_or_else(|| format!("pattern validation for {}", errors.summary));
                (summary.clone(), summary, issues, p.recommendations)
            }
            None => {
                warn!(model = %outcome.model, "pattern reply was not structured JSON, keeping raw text");
                (
                    format!("pattern validation for {}", errors.summary),
                    text.to_string(),
                    Vec::new(),
                    Vec::new(),
                )
            }
        };

        // Pattern validation always yields exactly one finding that carries
        // the issue list and recommendations.
        let finding = Finding::Pattern {
            source: outcome.model.clone(),
            title: "Pattern and style validation".into(),
            content,
            issues,
            recommendations,
        };

        StageResponse {
            findings: vec![finding],
            summary,
            metadata: stage_metadata(&outcome),
        }
    }
}

// ---------------------------------------------------------------------------
// Booklet synthesizer
// ---------------------------------------------------------------------------

/// Stage 4: narrative synthesis over everything the pipeline produced.
#[derive(Debug, Clone)]
pub struct BookletSynthesizer {
    pub(crate) client: ModelClient,
    pub(crate) model: String,
}

#[derive(Debug, Deserialize)]
struct SynthesisPayload {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    sections: Vec<SectionEntry>,
}

#[derive(Debug, Deserialize)]
struct SectionEntry {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
}

impl BookletSynthesizer {
    #[instrument(skip_all, fields(model = %self.model, findings = req.prior_findings.len()))]
    pub async fn synthesize(
        &self,
        req: &StageRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<SynthesisResponse, StageFailure> {
        let prompt = self.build_prompt(req);
        let outcome = self
            .client
            .generate(&self.model, &prompt, cancel)
            .await
            .map_err(|e| map_call_error(StageKind::Synthesis, e))?;

        Ok(self.map_response(req.errors, outcome))
    }

    fn build_prompt(&self, req: &StageRequest<'_>) -> String {
        format!(
            "You are writing the narrative of a research booklet about a batch \
             of build errors. Compose ordered sections that walk a developer \
             from symptoms to resolution.\n\n\
             Diagnostics ({}):\n{}\n\n\
             All findings:\n{}\n\n\
             Hints:\n{}\n\n\
             Respond with JSON: {{\"summary\": string, \"sections\": \
             [{{\"title\": string, \"body\": string}}]}}",
            req.errors.summary,
            format_errors(req.errors),
            findings_digest(req.prior_findings),
            hints_digest(req.hints),
        )
    }

    fn map_response(&self, errors: &ErrorBatch, outcome: GenerateOutcome) -> SynthesisResponse {
        let text = strip_code_fences(&outcome.text);
        let payload: Option<SynthesisPayload> = serde_json::from_str(text).ok();

        let (summary, sections) = match payload {
            Some(p) if !p.sections.is_empty() => {
                let sections = p
                    .sections
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| BookletSection {
                        title: non_empty(s.title, "Section"),
                        body: s.body,
                        ordinal: (i + 1) as u32,
                    })
                    .collect();
                (
                    p.summary
                        .unwrap_or_else(|| format!("research narrative for {}", errors.summary)),
                    sections,
                )
            }
            _ => {
                warn!(model = %outcome.model, "synthesis reply was not structured JSON, keeping raw text");
                (
                    format!("research narrative for {}", errors.summary),
                    vec![BookletSection {
                        title: "Research narrative".into(),
                        body: text.to_string(),
                        ordinal: 1,
                    }],
                )
            }
        };

        SynthesisResponse {
            sections,
            summary,
            metadata: stage_metadata(&outcome),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared mapping helpers
// ---------------------------------------------------------------------------

fn map_call_error(kind: StageKind, err: CallError) -> StageFailure {
    match err {
        CallError::Cancelled => StageFailure::Cancelled,
        CallError::Failed(message) => StageFailure::Error(StageError::new(kind, message)),
    }
}

fn stage_metadata(outcome: &GenerateOutcome) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("model".to_string(), outcome.model.clone()),
        ("latency_ms".to_string(), outcome.latency_ms.to_string()),
    ])
}

/// Parse a payload object, or a bare entry array wrapped via `from_entries`.
fn parse_payload<P, E>(text: &str, from_entries: impl FnOnce(Vec<E>) -> P) -> Option<P>
where
    P: for<'de> Deserialize<'de>,
    E: for<'de> Deserialize<'de>,
{
    if let Ok(payload) = serde_json::from_str::<P>(text) {
        return Some(payload);
    }
    serde_json::from_str::<Vec<E>>(text).ok().map(from_entries)
}

/// Drop a surrounding markdown code fence, if present.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_severity(s: &str) -> Severity {
    if s.eq_ignore_ascii_case("error") {
        Severity::Error
    } else {
        Severity::Warning
    }
}

fn non_empty(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Diagnostics listed one per line, capped at [`MAX_PROMPT_ERRORS`].
fn format_errors(batch: &ErrorBatch) -> String {
    let mut lines: Vec<String> = batch
        .errors
        .iter()
        .take(MAX_PROMPT_ERRORS)
        .map(|e| format!("- {} {}: {} ({})", e.severity, e.code, e.message, e.location))
        .collect();

    if batch.errors.len() > MAX_PROMPT_ERRORS {
        lines.push(format!(
            "- ... and {} more",
            batch.errors.len() - MAX_PROMPT_ERRORS
        ));
    }

    lines.join("\n")
}

/// Compact digest of prior findings for inclusion in a downstream prompt.
fn findings_digest(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "(none)".to_string();
    }

    findings
        .iter()
        .map(|f| match f {
            Finding::Documentation { title, content, .. } => {
                format!("- [documentation] {}: {}", title, truncate(content, 400))
            }
            Finding::Context {
                title,
                suggested_fix,
                ..
            } => format!("- [context] {}: {}", title, truncate(suggested_fix, 400)),
            Finding::Pattern {
                title,
                content,
                issues,
                ..
            } => format!(
                "- [pattern] {} ({} issues): {}",
                title,
                issues.len(),
                truncate(content, 400)
            ),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn hints_digest(hints: &BTreeMap<String, String>) -> String {
    if hints.is_empty() {
        return "(none)".to_string();
    }
    hints
        .iter()
        .map(|(k, v)| format!("- {k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate content to approximately `max_chars` characters.
fn truncate(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        content.to_string()
    } else {
        let mut end = max_chars;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n[... truncated ...]", &content[..end])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
