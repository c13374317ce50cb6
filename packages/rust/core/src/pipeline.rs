//! Full pipeline run: every step, in declared order, across every document.
//!
//! A run works on a copy of the documents and the aggregate slot and only
//! hands back the updated pipeline once every step has succeeded. The
//! caller's pipeline is never touched, so a failed run leaves it exactly
//! as it was.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use docflow_shared::{Pipeline, PipelineStatus, Result};

use crate::dispatch::StepExecutor;
use crate::graph::PipelineGraph;

/// Receives every status transition of a run.
pub trait StatusSink: Send + Sync {
    fn status(&self, status: &PipelineStatus);
}

/// No-op sink for headless/test usage.
pub struct SilentStatus;

impl StatusSink for SilentStatus {
    fn status(&self, _status: &PipelineStatus) {}
}

impl<F> StatusSink for F
where
    F: Fn(&PipelineStatus) + Send + Sync,
{
    fn status(&self, status: &PipelineStatus) {
        self(status)
    }
}

/// Run every step of `pipeline` and return the updated snapshot.
///
/// Emits `init`, then `running` before each step, then `done`. On the first
/// failure no further step or document is processed, `error` is emitted
/// with the cause, and the same error is returned.
#[instrument(skip_all, fields(steps = pipeline.steps.len(), docs = pipeline.documents().len()))]
pub async fn run_pipeline(
    executor: &StepExecutor,
    pipeline: &Pipeline,
    sink: &dyn StatusSink,
) -> Result<Pipeline> {
    let start = Instant::now();
    sink.status(&PipelineStatus::Init);
    info!("starting pipeline run");

    match execute_steps(executor, pipeline, sink).await {
        Ok(mut finished) => {
            finished.status = PipelineStatus::Done;
            sink.status(&finished.status);
            info!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                "pipeline run complete"
            );
            Ok(finished)
        }
        Err(err) => {
            warn!(
                error = %err,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "pipeline run failed"
            );
            sink.status(&PipelineStatus::Error { cause: err.clone() });
            Err(err)
        }
    }
}

async fn execute_steps(
    executor: &StepExecutor,
    pipeline: &Pipeline,
    sink: &dyn StatusSink,
) -> Result<Pipeline> {
    let graph = PipelineGraph::build(pipeline)?;

    let mut documents = pipeline.source.docs.clone();
    let mut aggregate = pipeline.aggregate_results.clone();
    let total_steps = pipeline.steps.len();

    for (step_index, step) in pipeline.steps.iter().enumerate() {
        sink.status(&PipelineStatus::Running {
            step_index,
            total_steps,
            step_id: step.id.clone(),
        });

        let predecessor = graph.predecessor(&step.id);
        let step_start = Instant::now();

        if step.input_mode.is_aggregate() {
            executor
                .dispatch_aggregate(step, predecessor, &documents, &mut aggregate)
                .await?;
        } else {
            // Every document finishes this step before any starts the next.
            for index in 0..documents.len() {
                executor
                    .dispatch(step, predecessor, &mut documents, index, &aggregate)
                    .await?;
            }
        }

        debug!(
            step = %step.id,
            name = %step.name,
            elapsed_ms = step_start.elapsed().as_millis() as u64,
            "step complete"
        );
    }

    let mut finished = pipeline.clone();
    finished.source.docs = documents;
    finished.aggregate_results = aggregate;
    Ok(finished)
}
