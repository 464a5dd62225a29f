//! Booklet-to-markdown rendering.
//!
//! The persisted artifact is a composed text document: title line, a
//! `Generated` timestamp, the batch id, one subsection per distinct
//! diagnostic code with occurrence counts, the findings grouped by
//! producing stage, then the synthesis sections in ordinal order.

use errscribe_shared::{Finding, ResearchBooklet, StageKind};

/// Render the booklet as the persisted markdown document.
pub fn render_markdown(booklet: &ResearchBooklet) -> String {
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n", booklet.title));
    out.push_str(&format!(
        "Generated: {}\n",
        booklet.created_at.to_rfc3339()
    ));
    out.push_str(&format!("Batch: {}\n\n", booklet.original_errors.id));

    render_error_summary(booklet, &mut out);
    render_findings(booklet, &mut out);
    render_sections(booklet, &mut out);

    if !booklet.metadata.is_empty() {
        out.push_str("## Run Metadata\n\n");
        for (key, value) in &booklet.metadata {
            out.push_str(&format!("- {key}: {value}\n"));
        }
        out.push('\n');
    }

    out
}

/// Suggested relative file name for a booklet.
pub fn suggested_file_name(booklet: &ResearchBooklet) -> String {
    format!("booklet-{}.md", booklet.id)
}

fn render_error_summary(booklet: &ResearchBooklet, out: &mut String) {
    let batch = &booklet.original_errors;
    out.push_str("## Error Summary\n\n");
    out.push_str(&format!("{}\n\n", batch.summary));

    for (code, count) in batch.occurrences_by_code() {
        out.push_str(&format!("### {code} ({count} occurrence{})\n\n", plural(count)));
        for error in batch.errors.iter().filter(|e| e.code == code) {
            out.push_str(&format!(
                "- `{}` {}: {}\n",
                error.location, error.severity, error.message
            ));
        }
        out.push('\n');
    }
}

fn render_findings(booklet: &ResearchBooklet, out: &mut String) {
    out.push_str("## Findings\n\n");

    for kind in StageKind::ANALYSIS {
        let findings: Vec<&Finding> = booklet.findings_for(kind).collect();
        if findings.is_empty() {
            continue;
        }

        out.push_str(&format!("### {}\n\n", heading_for(kind)));
        for finding in findings {
            render_finding(finding, out);
        }
    }
}

fn render_finding(finding: &Finding, out: &mut String) {
    match finding {
        Finding::Documentation {
            source,
            title,
            content,
            reference_url,
        } => {
            out.push_str(&format!("#### {title}\n\n{content}\n\n"));
            if let Some(url) = reference_url {
                out.push_str(&format!("Reference: <{url}>\n\n"));
            }
            out.push_str(&format!("_Source: {source}_\n\n"));
        }
        Finding::Context {
            source,
            title,
            location_summary,
            suggested_fix,
            rationale,
        } => {
            out.push_str(&format!("#### {title}\n\n"));
            if !location_summary.is_empty() {
                out.push_str(&format!("Location: {location_summary}\n\n"));
            }
            out.push_str(&format!("Suggested fix:\n\n{suggested_fix}\n\n"));
            if !rationale.is_empty() {
                out.push_str(&format!("Rationale: {rationale}\n\n"));
            }
            out.push_str(&format!("_Source: {source}_\n\n"));
        }
        Finding::Pattern {
            source,
            title,
            content,
            issues,
            recommendations,
        } => {
            out.push_str(&format!("#### {title}\n\n{content}\n\n"));
            for issue in issues {
                out.push_str(&format!(
                    "- **{}** [{}] {}: {}\n",
                    issue.code, issue.severity, issue.title, issue.description
                ));
            }
            if !issues.is_empty() {
                out.push('\n');
            }
            if !recommendations.is_empty() {
                out.push_str("Recommendations:\n\n");
                for rec in recommendations {
                    out.push_str(&format!("- {rec}\n"));
                }
                out.push('\n');
            }
            out.push_str(&format!("_Source: {source}_\n\n"));
        }
    }
}

fn render_sections(booklet: &ResearchBooklet, out: &mut String) {
    if booklet.sections.is_empty() {
        return;
    }

    out.push_str("## Research Narrative\n\n");
    let mut sections: Vec<_> = booklet.sections.iter().collect();
    sections.sort_by_key(|s| s.ordinal);

    for section in sections {
        out.push_str(&format!("### {}\n\n{}\n\n", section.title, section.body));
    }
}

fn heading_for(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Documentation => "Documentation Analysis",
        StageKind::Context => "Context Analysis",
        StageKind::Pattern => "Pattern Validation",
        StageKind::Synthesis => "Synthesis",
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}
