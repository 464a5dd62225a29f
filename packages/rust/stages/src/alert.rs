//! Alerting seam.
//!
//! Stage failures raise severity-tiered alerts through [`AlertPublisher`].
//! Publishing is fire-and-forget: an implementation must never block or
//! fail the pipeline.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::{error, warn};

/// Alert severity tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertSeverity {
    /// Recoverable by caller retry.
    Warning,
    /// Significant completed work was lost, or the failure was unexpected.
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// Fire-and-forget notification sink for pipeline failures.
pub trait AlertPublisher: Send + Sync {
    fn raise(
        &self,
        severity: AlertSeverity,
        source: &str,
        message: &str,
        context: &BTreeMap<String, serde_json::Value>,
    );
}

/// Production publisher: structured tracing events at the matching level.
#[derive(Debug, Default)]
pub struct LogAlertPublisher;

impl AlertPublisher for LogAlertPublisher {
    fn raise(
        &self,
        severity: AlertSeverity,
        source: &str,
        message: &str,
        context: &BTreeMap<String, serde_json::Value>,
    ) {
        let context = serde_json::to_string(context).unwrap_or_default();
        match severity {
            AlertSeverity::Warning => {
                warn!(source, %context, "pipeline alert: {message}");
            }
            AlertSeverity::Critical => {
                error!(source, %context, "pipeline alert: {message}");
            }
        }
    }
}

/// Test publisher that records every raised alert.
#[derive(Debug, Default)]
pub struct RecordingAlertPublisher {
    alerts: Mutex<Vec<RecordedAlert>>,
}

/// One captured alert.
#[derive(Debug, Clone)]
pub struct RecordedAlert {
    pub severity: AlertSeverity,
    pub source: String,
    pub message: String,
    pub context: BTreeMap<String, serde_json::Value>,
}

impl RecordingAlertPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of alerts raised so far.
    pub fn recorded(&self) -> Vec<RecordedAlert> {
        self.alerts.lock().expect("alert lock").clone()
    }
}

impl AlertPublisher for RecordingAlertPublisher {
    fn raise(
        &self,
        severity: AlertSeverity,
        source: &str,
        message: &str,
        context: &BTreeMap<String, serde_json::Value>,
    ) {
        self.alerts.lock().expect("alert lock").push(RecordedAlert {
            severity,
            source: source.to_string(),
            message: message.to_string(),
            context: context.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_publisher_captures_alerts() {
        let publisher = RecordingAlertPublisher::new();
        let context = BTreeMap::from([("stage".to_string(), serde_json::json!("documentation"))]);

        publisher.raise(
            AlertSeverity::Warning,
            "pipeline",
            "documentation stage failed",
            &context,
        );

        let recorded = publisher.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].severity, AlertSeverity::Warning);
        assert_eq!(recorded[0].source, "pipeline");
        assert_eq!(recorded[0].context["stage"], "documentation");
    }

    #[test]
    fn severity_display() {
        assert_eq!(AlertSeverity::Warning.to_string(), "warning");
        assert_eq!(AlertSeverity::Critical.to_string(), "critical");
    }
}
