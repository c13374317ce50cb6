//! Per-step timing, token and cost averages over a finished pipeline.

use serde::Serialize;

use docflow_shared::{ModelCost, Pipeline, StepResult};

/// Averages for one step across every result it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStats {
    pub step_id: String,
    pub step_name: String,
    /// Number of live results (documents, or 1 for aggregate steps).
    pub runs: usize,
    pub avg_timing_ms: f64,
    /// `None` when no result reported usage (code steps).
    pub avg_prompt_tokens: Option<f64>,
    pub avg_completion_tokens: Option<f64>,
    /// `None` when the model has no price entry or no usage was reported.
    pub avg_cost_usd: Option<f64>,
}

/// Compute stats for every step, in declared order.
///
/// Results are read from the documents for per-document steps and from the
/// aggregate slot for aggregate steps. Steps with no results are skipped.
pub fn step_stats(pipeline: &Pipeline, model: Option<&str>, costs: &[ModelCost]) -> Vec<StepStats> {
    let price = model.and_then(|m| costs.iter().find(|c| c.model == m));

    pipeline
        .steps
        .iter()
        .filter_map(|step| {
            let results: Vec<&StepResult> = if step.input_mode.is_aggregate() {
                pipeline.aggregate_result(&step.id).into_iter().collect()
            } else {
                pipeline
                    .documents()
                    .iter()
                    .filter_map(|doc| doc.result_for(&step.id))
                    .collect()
            };
            if results.is_empty() {
                return None;
            }

            let runs = results.len();
            let avg_timing_ms = results.iter().map(|r| r.timing_ms).sum::<f64>() / runs as f64;

            let usages: Vec<_> = results.iter().filter_map(|r| r.usage).collect();
            let (avg_prompt_tokens, avg_completion_tokens, avg_cost_usd) = if usages.is_empty() {
                (None, None, None)
            } else {
                let n = usages.len() as f64;
                let prompt = usages.iter().map(|u| u.prompt_tokens).sum::<u64>();
                let completion = usages.iter().map(|u| u.completion_tokens).sum::<u64>();
                (
                    Some(prompt as f64 / n),
                    Some(completion as f64 / n),
                    price.map(|p| p.cost_usd(prompt, completion) / n),
                )
            };

            Some(StepStats {
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                runs,
                avg_timing_ms,
                avg_prompt_tokens,
                avg_completion_tokens,
                avg_cost_usd,
            })
        })
        .collect()
}
