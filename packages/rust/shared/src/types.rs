//! Core domain types for docflow pipelines.
//!
//! JSON field names are camelCase so pipelines round-trip with the editor
//! that produces them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DocflowError;

/// Reserved id of the source node.
pub const SOURCE_ID: &str = "source";

/// Reserved id of the output sentinel that terminates the graph.
pub const OUTPUT_ID: &str = "output";

/// Generate a fresh, time-sortable step id.
pub fn new_step_id() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Token usage reported by the prompt runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(alias = "prompt_tokens")]
    pub prompt_tokens: u64,
    #[serde(alias = "completion_tokens")]
    pub completion_tokens: u64,
}

/// Output of one step for one document (or for the aggregate slot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub timing_ms: f64,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A unit of text content plus its accumulated per-step results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub content: String,
    /// At most one entry per `step_id`.
    #[serde(default)]
    pub processing_results: Vec<StepResult>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            processing_results: Vec::new(),
        }
    }

    /// The live result for `step_id`, if any.
    pub fn result_for(&self, step_id: &str) -> Option<&StepResult> {
        self.processing_results.iter().find(|r| r.step_id == step_id)
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// What data a step receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputMode {
    /// The document's own content.
    Doc,
    /// The predecessor's result for this document.
    Result,
    /// Content of every document.
    AggregateDocs,
    /// The predecessor's result across every document.
    AggregateResults,
}

impl InputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doc => "doc",
            Self::Result => "result",
            Self::AggregateDocs => "aggregate-docs",
            Self::AggregateResults => "aggregate-results",
        }
    }

    /// Aggregate modes execute once per run instead of once per document.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::AggregateDocs | Self::AggregateResults)
    }
}

/// Step kind with its kind-specific payload.
///
/// An LLM step always has a prompt and a code step always has code, so the
/// combination is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepKind {
    Llm { prompt: String },
    Code { code: String },
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm { .. } => "llm",
            Self::Code { .. } => "code",
        }
    }
}

/// A single transform applied per document or per aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStep {
    /// Stable for the step's lifetime.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub kind: StepKind,
    pub input_mode: InputMode,
    /// Ids of downstream steps (or [`OUTPUT_ID`]).
    #[serde(default)]
    pub connects_to: Vec<String>,
}

impl ProcessingStep {
    /// New LLM step with a fresh id.
    pub fn llm(name: impl Into<String>, prompt: impl Into<String>, input_mode: InputMode) -> Self {
        Self {
            id: new_step_id(),
            name: name.into(),
            description: String::new(),
            kind: StepKind::Llm {
                prompt: prompt.into(),
            },
            input_mode,
            connects_to: Vec::new(),
        }
    }

    /// New code step with a fresh id.
    pub fn code(name: impl Into<String>, code: impl Into<String>, input_mode: InputMode) -> Self {
        Self {
            id: new_step_id(),
            name: name.into(),
            description: String::new(),
            kind: StepKind::Code { code: code.into() },
            input_mode,
            connects_to: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn connect_to(mut self, id: impl Into<String>) -> Self {
        self.connects_to.push(id.into());
        self
    }
}

/// Pseudo-step holding the document collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceNode {
    #[serde(default)]
    pub docs: Vec<Document>,
    /// Ids of the first real step(s).
    #[serde(default)]
    pub connects_to: Vec<String>,
}

/// Display settings for the output sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    #[serde(default = "default_output_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            name: default_output_name(),
            description: String::new(),
        }
    }
}

fn default_output_name() -> String {
    "Output".into()
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run-status state machine: `init → (sourcing | running) → done`, or
/// `error` on the first unrecoverable failure.
#[derive(Debug, Clone, Default)]
pub enum PipelineStatus {
    #[default]
    Init,
    Sourcing,
    Refine,
    Running {
        /// Zero-based index into the declared step order.
        step_index: usize,
        total_steps: usize,
        step_id: String,
    },
    Done,
    Error {
        cause: DocflowError,
    },
}

impl PipelineStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Sourcing => "sourcing",
            Self::Refine => "refine",
            Self::Running { .. } => "running",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running {
                step_index,
                total_steps,
                step_id,
            } => write!(f, "running [{}/{total_steps}] {step_id}", step_index + 1),
            Self::Error { cause } => write!(f, "error: {cause}"),
            other => f.write_str(other.name()),
        }
    }
}

/// A source collection plus an ordered list of processing steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    #[serde(default)]
    pub pipeline_description: String,
    #[serde(default)]
    pub pipeline_plan: String,
    #[serde(default)]
    pub source: SourceNode,
    /// Execution order.
    #[serde(default)]
    pub steps: Vec<ProcessingStep>,
    #[serde(default)]
    pub output: OutputConfig,
    /// Results of aggregate-mode steps, at most one per step.
    #[serde(default)]
    pub aggregate_results: Vec<StepResult>,
    #[serde(skip)]
    pub status: PipelineStatus,
}

impl Pipeline {
    pub fn documents(&self) -> &[Document] {
        &self.source.docs
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.source.docs.iter().find(|d| d.id == id)
    }

    pub fn step(&self, id: &str) -> Option<&ProcessingStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut ProcessingStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// The aggregate-slot result for `step_id`, if any.
    pub fn aggregate_result(&self, step_id: &str) -> Option<&StepResult> {
        self.aggregate_results.iter().find(|r| r.step_id == step_id)
    }

    /// Build a linear `source → steps... → output` pipeline.
    pub fn linear(docs: Vec<Document>, mut steps: Vec<ProcessingStep>) -> Self {
        let mut source = SourceNode {
            docs,
            connects_to: Vec::new(),
        };
        let ids: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
        if let Some(first) = ids.first() {
            source.connects_to.push(first.clone());
        }
        for (i, step) in steps.iter_mut().enumerate() {
            step.connects_to = vec![ids.get(i + 1).cloned().unwrap_or_else(|| OUTPUT_ID.into())];
        }
        Self {
            source,
            steps,
            ..Default::default()
        }
    }
}
