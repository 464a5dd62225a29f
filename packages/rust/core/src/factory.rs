//! Strategy selection.
//!
//! [`CoordinatorFactory`] is the seam at which the execution strategy is
//! chosen: pure selection over [`CoordinatorMode`], no business logic.

use std::collections::BTreeMap;
use std::sync::Arc;

use errscribe_artifacts::ArtifactStore;
use errscribe_shared::{AppConfig, ConfigError};
use errscribe_stages::{AlertPublisher, ModelHealthClient, StageSuite};

use crate::Coordinator;
use crate::parallel::ParallelCoordinator;
use crate::sequential::SequentialCoordinator;
use crate::throttled::ThrottledCoordinator;

/// The three interchangeable execution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinatorMode {
    Sequential,
    ConcurrentThrottled,
    FullyParallel,
}

impl CoordinatorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::ConcurrentThrottled => "concurrent",
            Self::FullyParallel => "parallel",
        }
    }
}

impl std::fmt::Display for CoordinatorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CoordinatorMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" | "throttled" => Ok(Self::ConcurrentThrottled),
            "parallel" => Ok(Self::FullyParallel),
            other => Err(ConfigError::new(format!(
                "unknown strategy '{other}': expected 'sequential', 'concurrent', or 'parallel'"
            ))),
        }
    }
}

/// Static capability flags common to all strategies, plus the mode flags
/// identifying which strategy instance answered.
pub(crate) fn base_status(mode: CoordinatorMode) -> BTreeMap<String, bool> {
    BTreeMap::from([
        ("parse_available".to_string(), true),
        ("doc_stage_available".to_string(), true),
        ("context_stage_available".to_string(), true),
        ("pattern_stage_available".to_string(), true),
        ("synthesis_stage_available".to_string(), true),
        ("store_available".to_string(), true),
        (
            "sequential_mode".to_string(),
            mode == CoordinatorMode::Sequential,
        ),
        (
            "concurrent_mode".to_string(),
            mode == CoordinatorMode::ConcurrentThrottled,
        ),
        (
            "parallel_mode".to_string(),
            mode == CoordinatorMode::FullyParallel,
        ),
    ])
}

/// Builds a coordinator for the requested strategy.
pub struct CoordinatorFactory;

impl CoordinatorFactory {
    /// Pure strategy selection. Fails only when the collaborators cannot be
    /// constructed from the configuration (e.g., an invalid endpoint URL).
    pub fn create(
        mode: CoordinatorMode,
        config: &AppConfig,
        store: Arc<dyn ArtifactStore>,
        alerts: Arc<dyn AlertPublisher>,
    ) -> Result<Coordinator, ConfigError> {
        let stages = StageSuite::from_config(&config.models)?;
        let alert_on_analysis = config.pipeline.alert_on_analysis_stages;

        let coordinator = match mode {
            CoordinatorMode::Sequential => Coordinator::Sequential(SequentialCoordinator::new(
                stages,
                store,
                alerts,
                alert_on_analysis,
            )),
            CoordinatorMode::ConcurrentThrottled => {
                let health = ModelHealthClient::new(&config.models.endpoint)?;
                Coordinator::Throttled(ThrottledCoordinator::new(
                    stages,
                    store,
                    alerts,
                    alert_on_analysis,
                    config.pipeline.max_in_flight,
                    health,
                ))
            }
            CoordinatorMode::FullyParallel => Coordinator::Parallel(ParallelCoordinator::new(
                stages,
                store,
                alerts,
                alert_on_analysis,
            )),
        };

        Ok(coordinator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FailingStore, temp_store, cleanup};
    use errscribe_stages::RecordingAlertPublisher;

    #[test]
    fn mode_parses_from_str() {
        assert_eq!(
            "sequential".parse::<CoordinatorMode>().unwrap(),
            CoordinatorMode::Sequential
        );
        assert_eq!(
            "Concurrent".parse::<CoordinatorMode>().unwrap(),
            CoordinatorMode::ConcurrentThrottled
        );
        assert_eq!(
            "parallel".parse::<CoordinatorMode>().unwrap(),
            CoordinatorMode::FullyParallel
        );
        assert!("eager".parse::<CoordinatorMode>().is_err());
    }

    #[test]
    fn create_builds_each_strategy() {
        let config = AppConfig::default();
        let alerts = Arc::new(RecordingAlertPublisher::new());
        let (store, root) = temp_store();
        let store: Arc<dyn ArtifactStore> = Arc::new(store);

        for mode in [
            CoordinatorMode::Sequential,
            CoordinatorMode::ConcurrentThrottled,
            CoordinatorMode::FullyParallel,
        ] {
            let coordinator =
                CoordinatorFactory::create(mode, &config, store.clone(), alerts.clone())
                    .expect("create coordinator");
            assert_eq!(coordinator.mode(), mode);
            assert_eq!(
                coordinator.status().get(&format!("{}_mode", mode.as_str())),
                Some(&true)
            );
        }

        cleanup(root);
    }

    #[test]
    fn create_fails_on_unresolvable_endpoint() {
        let mut config = AppConfig::default();
        config.models.endpoint = "not a url".into();

        let err = CoordinatorFactory::create(
            CoordinatorMode::Sequential,
            &config,
            Arc::new(FailingStore),
            Arc::new(RecordingAlertPublisher::new()),
        )
        .unwrap_err();

        assert!(err.to_string().contains("invalid model endpoint"));
    }
}
