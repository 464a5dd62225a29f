//! Shared types, error model, and configuration for errscribe.
//!
//! This crate is the foundation depended on by all other errscribe crates.
//! It provides:
//! - [`PipelineError`] — the closed failure taxonomy returned to callers
//! - Domain types ([`ErrorBatch`], [`Finding`], [`ResearchBooklet`], ids)
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConfigError, DefaultsConfig, ModelsConfig, PipelineConfig, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from,
};
pub use error::{PipelineError, PipelineErrorCode};
pub use types::{
    BatchId, BookletId, BookletSection, CompilerError, ErrorBatch, Finding, PatternIssue,
    ResearchBooklet, Severity, SourceLocation, StageKind,
};
