//! Step dispatch: resolve input, route by step kind, upsert the result.

use tracing::{debug, instrument};

use docflow_shared::{Document, DocflowError, ProcessingStep, Result, StepKind, StepResult};

use crate::code_step::CodeRunner;
use crate::graph::Predecessor;
use crate::input::{self, InputScope};
use crate::llm_step::LlmStepRunner;

/// Insert `result`, or replace the live entry for the same step in place.
///
/// Returns `true` when an existing entry was replaced.
pub fn upsert_result(results: &mut Vec<StepResult>, result: StepResult) -> bool {
    match results.iter_mut().find(|r| r.step_id == result.step_id) {
        Some(existing) => {
            existing.result = result.result;
            existing.usage = result.usage;
            existing.timing_ms = result.timing_ms;
            true
        }
        None => {
            results.push(result);
            false
        }
    }
}

/// Single entry point for running one step, shared by full runs and the
/// step test harness.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    llm: LlmStepRunner,
    code: CodeRunner,
}

impl StepExecutor {
    pub fn new(llm: LlmStepRunner, code: CodeRunner) -> Self {
        Self { llm, code }
    }

    pub fn llm(&self) -> &LlmStepRunner {
        &self.llm
    }

    pub fn llm_mut(&mut self) -> &mut LlmStepRunner {
        &mut self.llm
    }

    /// Resolve input and run the step, without writing the result anywhere.
    ///
    /// Neither runner is invoked when input resolution fails.
    #[instrument(
        skip_all,
        fields(step = %step.id, kind = step.kind.as_str(), mode = step.input_mode.as_str())
    )]
    pub async fn execute(
        &self,
        step: &ProcessingStep,
        predecessor: Option<Predecessor<'_>>,
        scope: &InputScope<'_>,
    ) -> Result<StepResult> {
        let input = input::resolve(step, predecessor, scope)?;

        let result = match &step.kind {
            StepKind::Llm { prompt } => {
                let out = self.llm.execute(&step.id, prompt, &input).await?;
                StepResult {
                    step_id: step.id.clone(),
                    result: out.text,
                    usage: Some(out.usage),
                    timing_ms: out.timing_ms,
                }
            }
            StepKind::Code { code } => {
                let out = self.code.execute(&step.id, code, input).await?;
                StepResult {
                    step_id: step.id.clone(),
                    result: out.text,
                    usage: None,
                    timing_ms: out.timing_ms,
                }
            }
        };

        Ok(result)
    }

    /// Run a per-document step against `documents[index]` and upsert the
    /// result into that document.
    pub async fn dispatch<'d>(
        &self,
        step: &ProcessingStep,
        predecessor: Option<Predecessor<'_>>,
        documents: &'d mut [Document],
        index: usize,
        aggregate: &[StepResult],
    ) -> Result<&'d Document> {
        let result = {
            let scope = InputScope {
                document: documents.get(index),
                documents: &*documents,
                aggregate,
            };
            self.execute(step, predecessor, &scope).await?
        };

        let document = documents.get_mut(index).ok_or_else(|| {
            DocflowError::validation(format!("no document at index {index}"))
        })?;
        let replaced = upsert_result(&mut document.processing_results, result);
        debug!(doc = %document.id, replaced, "document result stored");
        Ok(document)
    }

    /// Run an aggregate step once and upsert the result into the aggregate slot.
    pub async fn dispatch_aggregate<'a>(
        &self,
        step: &ProcessingStep,
        predecessor: Option<Predecessor<'_>>,
        documents: &[Document],
        aggregate: &'a mut Vec<StepResult>,
    ) -> Result<&'a StepResult> {
        let result = {
            let scope = InputScope {
                document: None,
                documents,
                aggregate: aggregate.as_slice(),
            };
            self.execute(step, predecessor, &scope).await?
        };

        let replaced = upsert_result(aggregate, result);
        debug!(replaced, "aggregate result stored");
        aggregate
            .iter()
            .find(|r| r.step_id == step.id)
            .ok_or_else(|| DocflowError::validation("aggregate result missing after upsert"))
    }
}
