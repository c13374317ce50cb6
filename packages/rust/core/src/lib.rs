//! Execution engine for docflow pipelines.
//!
//! A pipeline is a source collection of documents plus a graph of steps.
//! This crate resolves each step's input, runs it as an LLM prompt or a
//! sandboxed code transform, and upserts the results into a copy of the
//! pipeline that is committed only when the whole run succeeds.

pub mod code_step;
pub mod dispatch;
pub mod engine;
pub mod graph;
pub mod harness;
pub mod input;
pub mod llm_step;
pub mod loader;
pub mod pipeline;
pub mod provider;
pub mod stats;

#[cfg(test)]
mod testing;

pub use code_step::{CodeOutput, CodeRunner, strip_code_fences};
pub use dispatch::{StepExecutor, upsert_result};
pub use engine::{Engine, EngineConfig};
pub use graph::{PipelineGraph, Predecessor};
pub use harness::test_step;
pub use input::{InputScope, StepInput};
pub use llm_step::{
    ChatMessage, LlmOutput, LlmStepRunner, PromptRequest, PromptResponse, PromptRunner, Role,
};
pub use loader::{DirectoryLoader, DocumentLoader};
pub use pipeline::{SilentStatus, StatusSink, run_pipeline};
pub use provider::HttpPromptRunner;
pub use stats::{StepStats, step_stats};
