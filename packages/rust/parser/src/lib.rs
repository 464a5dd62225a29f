//! Compiler-output parser.
//!
//! Turns raw compiler/build output into an [`ErrorBatch`] of structured
//! diagnostics. Two line formats are recognized:
//! - MSBuild style: `Program.cs(10,5): error CS0103: message`
//! - GCC/Clang style: `main.c:12:3: error: message [-Wflag]`
//!
//! Parsing never fails; unrecognized lines are ignored and a batch with
//! zero diagnostics is a valid result.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use errscribe_shared::{BatchId, CompilerError, ErrorBatch, Severity, SourceLocation};

/// Code assigned to diagnostics whose toolchain emitted no code.
const UNSPECIFIED_CODE: &str = "unspecified";

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches MSBuild-style diagnostics: `File.cs(line,col): severity CODE: message`.
static MSBUILD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<file>[^(\s][^(]*)\((?P<line>\d+),(?P<col>\d+)\)\s*:\s*(?P<sev>error|warning)\s+(?P<code>[A-Za-z]{1,4}\d{1,5})\s*:\s*(?P<msg>.+?)\s*$",
    )
    .expect("msbuild regex")
});

/// Matches GCC/Clang-style diagnostics: `file:line:col: severity: message [flag]`.
static GCC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<file>[^:\s][^:]*):(?P<line>\d+):(?P<col>\d+):\s*(?:fatal\s+)?(?P<sev>error|warning)\s*:\s*(?P<msg>.+?)(?:\s+\[(?P<flag>[^\]]+)\])?\s*$",
    )
    .expect("gcc regex")
});

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse raw compiler output into a batch of structured diagnostics.
///
/// Duplicate lines are collapsed; diagnostic order follows first appearance.
pub fn parse(raw_output: &str) -> ErrorBatch {
    let mut errors: Vec<CompilerError> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut distinct_codes: Vec<String> = Vec::new();

    for line in raw_output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || !seen.insert(trimmed) {
            continue;
        }

        let Some(error) = parse_line(trimmed) else {
            continue;
        };

        if !distinct_codes.contains(&error.code) {
            distinct_codes.push(error.code.clone());
        }
        errors.push(error);
    }

    let error_count = errors
        .iter()
        .filter(|e| e.severity == Severity::Error)
        .count();
    let warning_count = errors.len() - error_count;
    let summary = summarize(error_count, warning_count, &distinct_codes);

    debug!(
        diagnostics = errors.len(),
        errors = error_count,
        warnings = warning_count,
        "parsed compiler output"
    );

    ErrorBatch {
        id: BatchId::new(),
        errors,
        summary,
        error_count,
        warning_count,
        distinct_codes,
    }
}

/// Parse a single line against the known diagnostic formats.
fn parse_line(line: &str) -> Option<CompilerError> {
    if let Some(caps) = MSBUILD_RE.captures(line) {
        return Some(CompilerError {
            code: caps["code"].to_string(),
            message: caps["msg"].to_string(),
            severity: parse_severity(&caps["sev"]),
            location: SourceLocation {
                file: caps["file"].trim().to_string(),
                line: caps["line"].parse().ok()?,
                column: caps["col"].parse().ok()?,
            },
            raw_text: line.to_string(),
        });
    }

    if let Some(caps) = GCC_RE.captures(line) {
        let code = caps
            .name("flag")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| UNSPECIFIED_CODE.to_string());
        return Some(CompilerError {
            code,
            message: caps["msg"].to_string(),
            severity: parse_severity(&caps["sev"]),
            location: SourceLocation {
                file: caps["file"].trim().to_string(),
                line: caps["line"].parse().ok()?,
                column: caps["col"].parse().ok()?,
            },
            raw_text: line.to_string(),
        });
    }

    None
}

fn parse_severity(s: &str) -> Severity {
    if s.eq_ignore_ascii_case("warning") {
        Severity::Warning
    } else {
        Severity::Error
    }
}

/// One-line human-readable batch description.
fn summarize(error_count: usize, warning_count: usize, codes: &[String]) -> String {
    if error_count == 0 && warning_count == 0 {
        return "no diagnostics found".to_string();
    }

    let mut parts = Vec::new();
    if error_count > 0 {
        parts.push(format!(
            "{error_count} error{}",
            if error_count == 1 { "" } else { "s" }
        ));
    }
    if warning_count > 0 {
        parts.push(format!(
            "{warning_count} warning{}",
            if warning_count == 1 { "" } else { "s" }
        ));
    }

    format!("{} ({})", parts.join(", "), codes.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_msbuild_error_line() {
        let raw = "Program.cs(10,5): error CS0103: The name 'Console' does not exist";
        let batch = parse(raw);

        assert_eq!(batch.errors.len(), 1);
        let err = &batch.errors[0];
        assert_eq!(err.code, "CS0103");
        assert_eq!(err.severity, Severity::Error);
        assert_eq!(err.location.file, "Program.cs");
        assert_eq!(err.location.line, 10);
        assert_eq!(err.location.column, 5);
        assert!(err.message.contains("'Console'"));
        assert_eq!(batch.error_count, 1);
        assert_eq!(batch.warning_count, 0);
        assert_eq!(batch.distinct_codes, vec!["CS0103"]);
    }

    #[test]
    fn parses_msbuild_warning_line() {
        let raw = "Helpers.cs(3,17): warning CS0168: The variable 'x' is declared but never used";
        let batch = parse(raw);

        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].severity, Severity::Warning);
        assert_eq!(batch.error_count, 0);
        assert_eq!(batch.warning_count, 1);
    }

    #[test]
    fn parses_gcc_line_with_flag() {
        let raw = "main.c:12:3: warning: unused variable 'x' [-Wunused-variable]";
        let batch = parse(raw);

        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].code, "-Wunused-variable");
        assert_eq!(batch.errors[0].location.line, 12);
        assert!(!batch.errors[0].message.contains("[-W"));
    }

    #[test]
    fn parses_gcc_line_without_flag() {
        let raw = "src/engine.c:44:9: error: expected ';' before 'return'";
        let batch = parse(raw);

        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].code, "unspecified");
        assert_eq!(batch.errors[0].severity, Severity::Error);
    }

    #[test]
    fn build_success_output_yields_empty_batch() {
        let raw = "Build succeeded. 0 Warning(s) 0 Error(s)";
        let batch = parse(raw);

        assert!(batch.is_empty());
        assert_eq!(batch.error_count, 0);
        assert_eq!(batch.summary, "no diagnostics found");
    }

    #[test]
    fn collapses_duplicate_lines() {
        let raw = "\
Program.cs(10,5): error CS0103: The name 'Console' does not exist
Program.cs(10,5): error CS0103: The name 'Console' does not exist
Program.cs(22,1): error CS0246: The type or namespace 'Foo' could not be found";
        let batch = parse(raw);

        assert_eq!(batch.errors.len(), 2);
        assert_eq!(batch.distinct_codes, vec!["CS0103", "CS0246"]);
    }

    #[test]
    fn preserves_input_order() {
        let raw = "\
B.cs(1,1): error CS0246: missing type
A.cs(2,2): error CS0103: missing name
B.cs(3,3): error CS0246: missing type again";
        let batch = parse(raw);

        assert_eq!(batch.errors.len(), 3);
        assert_eq!(batch.errors[0].code, "CS0246");
        assert_eq!(batch.errors[1].code, "CS0103");
        assert_eq!(batch.distinct_codes, vec!["CS0246", "CS0103"]);
    }

    #[test]
    fn mixed_output_counts_and_summary() {
        let raw = "\
Restoring packages...
Program.cs(10,5): error CS0103: The name 'Console' does not exist
main.c:12:3: warning: unused variable 'x' [-Wunused-variable]
Done.";
        let batch = parse(raw);

        assert_eq!(batch.error_count, 1);
        assert_eq!(batch.warning_count, 1);
        assert!(batch.summary.contains("1 error"));
        assert!(batch.summary.contains("1 warning"));
        assert!(batch.summary.contains("CS0103"));
    }

    #[test]
    fn raw_text_preserved_verbatim() {
        let line = "Program.cs(10,5): error CS0103: The name 'Console' does not exist";
        let batch = parse(line);
        assert_eq!(batch.errors[0].raw_text, line);
    }
}
