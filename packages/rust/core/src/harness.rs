//! Single-step preview against one document, outside a full run.

use tracing::{debug, instrument};

use docflow_shared::{DocflowError, Pipeline, ProcessingStep, Result, StepResult};

use crate::dispatch::StepExecutor;
use crate::graph::PipelineGraph;
use crate::input::InputScope;

/// Execute `step` against the document `document_id` and return its result.
///
/// The predecessor is looked up exactly as a full run would, but the graph
/// is not validated, so pipelines that are mid-edit can still be previewed.
/// Nothing in `pipeline` is modified and no status is emitted.
#[instrument(skip_all, fields(step = %step.id, doc = document_id))]
pub async fn test_step(
    executor: &StepExecutor,
    pipeline: &Pipeline,
    step: &ProcessingStep,
    document_id: &str,
) -> Result<StepResult> {
    let document = pipeline
        .document(document_id)
        .ok_or_else(|| DocflowError::DocumentNotFound {
            doc_id: document_id.to_string(),
        })?;

    let graph = PipelineGraph::index(pipeline);
    let scope = InputScope {
        document: (!step.input_mode.is_aggregate()).then_some(document),
        documents: pipeline.documents(),
        aggregate: &pipeline.aggregate_results,
    };

    let result = executor.execute(step, graph.predecessor(&step.id), &scope).await?;
    debug!(timing_ms = result.timing_ms, "step preview finished");
    Ok(result)
}
