//! Shared types, error model, and configuration for docflow.
//!
//! The error type ([`DocflowError`]), the pipeline data model
//! ([`Pipeline`], [`ProcessingStep`], [`Document`], [`StepResult`]) and
//! configuration loading ([`AppConfig`], [`ProviderSettings`]).

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CodeConfig, LlmConfig, ModelCost, Provider, ProviderSettings, config_dir,
    config_file_path, init_config, init_config_in, load_config, load_config_from,
    resolve_credential, validate_config,
};
pub use error::{DocflowError, Result};
pub use types::{
    Document, InputMode, OUTPUT_ID, OutputConfig, Pipeline, PipelineStatus, ProcessingStep,
    SOURCE_ID, SourceNode, StepKind, StepResult, Usage, new_step_id,
};
