//! Reverse index over the step graph.
//!
//! Steps declare forward edges (`connectsTo`); execution needs the reverse
//! direction. The index is built once per run instead of scanning every
//! node for every step and document.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use docflow_shared::{DocflowError, OUTPUT_ID, Pipeline, ProcessingStep, Result, SOURCE_ID};

/// Upstream producer of a step.
#[derive(Debug, Clone, Copy)]
pub enum Predecessor<'p> {
    Source,
    Step(&'p ProcessingStep),
}

impl<'p> Predecessor<'p> {
    pub fn id(&self) -> &'p str {
        match self {
            Self::Source => SOURCE_ID,
            Self::Step(step) => &step.id,
        }
    }

    /// Whether this producer's output lives in the pipeline's aggregate slot
    /// rather than on each document.
    pub fn writes_aggregate(&self) -> bool {
        match self {
            Self::Source => false,
            Self::Step(step) => step.input_mode.is_aggregate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Producer {
    Source,
    Step(usize),
}

/// Step id → producers, borrowed from a pipeline.
#[derive(Debug)]
pub struct PipelineGraph<'p> {
    steps: &'p [ProcessingStep],
    producers: HashMap<&'p str, Vec<Producer>>,
    feeds_output: bool,
}

impl<'p> PipelineGraph<'p> {
    /// Build the reverse index without validating the graph.
    ///
    /// Used for previews of pipelines that are still being edited.
    pub fn index(pipeline: &'p Pipeline) -> Self {
        let mut producers: HashMap<&'p str, Vec<Producer>> = HashMap::new();
        let mut feeds_output = false;

        let edges = pipeline
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (Producer::Step(i), &step.connects_to))
            .chain(std::iter::once((Producer::Source, &pipeline.source.connects_to)));

        for (producer, targets) in edges {
            for target in targets {
                if target == OUTPUT_ID {
                    feeds_output = true;
                    continue;
                }
                let entry = producers.entry(target.as_str()).or_default();
                if !entry.contains(&producer) {
                    entry.push(producer);
                }
            }
        }

        Self {
            steps: &pipeline.steps,
            producers,
            feeds_output,
        }
    }

    /// Build the reverse index and reject malformed graphs.
    ///
    /// Every step must have exactly one producer, declared before it, so
    /// the graph is acyclic, rooted at the source, and consistent with the
    /// declared execution order.
    pub fn build(pipeline: &'p Pipeline) -> Result<Self> {
        let graph = Self::index(pipeline);

        let mut seen: HashSet<&str> = HashSet::new();
        for step in &pipeline.steps {
            if step.id.is_empty() {
                return Err(DocflowError::invalid_pipeline(format!(
                    "step `{}` has an empty id",
                    step.name
                )));
            }
            if step.id == SOURCE_ID || step.id == OUTPUT_ID {
                return Err(DocflowError::invalid_pipeline(format!(
                    "step id `{}` is reserved",
                    step.id
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(DocflowError::invalid_pipeline(format!(
                    "duplicate step id `{}`",
                    step.id
                )));
            }
        }

        for target in graph.producers.keys() {
            if !seen.contains(target) {
                return Err(DocflowError::invalid_pipeline(format!(
                    "edge points at unknown step `{target}`"
                )));
            }
        }

        for (index, step) in pipeline.steps.iter().enumerate() {
            let producers = graph
                .producers
                .get(step.id.as_str())
                .map(Vec::as_slice)
                .unwrap_or_default();

            match producers {
                [] => {
                    return Err(DocflowError::MissingPredecessor {
                        step_id: step.id.clone(),
                    });
                }
                [Producer::Source] => {}
                [Producer::Step(upstream)] if *upstream < index => {}
                [Producer::Step(upstream)] => {
                    return Err(DocflowError::invalid_pipeline(format!(
                        "step `{}` is declared before its predecessor `{}`",
                        step.id, pipeline.steps[*upstream].id
                    )));
                }
                _ => {
                    return Err(DocflowError::invalid_pipeline(format!(
                        "step `{}` has {} predecessors, expected exactly one",
                        step.id,
                        producers.len()
                    )));
                }
            }
        }

        if !pipeline.steps.is_empty() && !graph.feeds_output {
            warn!("no node connects to the output sentinel");
        }

        Ok(graph)
    }

    /// The node whose `connectsTo` contains `step_id`.
    pub fn predecessor(&self, step_id: &str) -> Option<Predecessor<'p>> {
        let producer = self.producers.get(step_id)?.first()?;
        Some(match producer {
            Producer::Source => Predecessor::Source,
            Producer::Step(i) => Predecessor::Step(&self.steps[*i]),
        })
    }

    /// Whether any node feeds the output sentinel.
    pub fn feeds_output(&self) -> bool {
        self.feeds_output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_shared::{Document, InputMode};

    fn step(id: &str) -> ProcessingStep {
        ProcessingStep::llm(id, "prompt", InputMode::Doc).with_id(id)
    }

    #[test]
    fn linear_pipeline_indexes_predecessors() {
        let pipeline = Pipeline::linear(
            vec![Document::new("d1", "x")],
            vec![step("a"), step("b")],
        );
        let graph = PipelineGraph::build(&pipeline).expect("valid graph");
        assert_eq!(graph.predecessor("a").map(|p| p.id()), Some(SOURCE_ID));
        assert_eq!(graph.predecessor("b").map(|p| p.id()), Some("a"));
        assert!(graph.feeds_output());
    }

    #[test]
    fn orphan_step_is_missing_predecessor() {
        let mut pipeline = Pipeline::linear(vec![], vec![step("a")]);
        pipeline.steps.push(step("orphan").connect_to(OUTPUT_ID));

        let graph = PipelineGraph::index(&pipeline);
        assert!(graph.predecessor("orphan").is_none());

        let err = PipelineGraph::build(&pipeline).unwrap_err();
        assert!(matches!(err, DocflowError::MissingPredecessor { step_id } if step_id == "orphan"));
    }

    #[test]
    fn two_producers_are_rejected() {
        let mut pipeline = Pipeline::linear(vec![], vec![step("a"), step("b")]);
        pipeline.source.connects_to.push("b".into());
        let err = PipelineGraph::build(&pipeline).unwrap_err();
        assert!(err.to_string().contains("2 predecessors"));
    }

    #[test]
    fn cycle_is_rejected() {
        let mut pipeline = Pipeline::linear(vec![], vec![step("a"), step("b")]);
        // b → a and source → a gives `a` two producers; drop the source edge.
        pipeline.source.connects_to.clear();
        pipeline.steps[1].connects_to = vec!["a".into()];
        let err = PipelineGraph::build(&pipeline).unwrap_err();
        assert!(matches!(err, DocflowError::InvalidPipeline { .. }));
    }

    #[test]
    fn out_of_order_declaration_is_rejected() {
        let mut pipeline = Pipeline::linear(vec![], vec![step("a"), step("b")]);
        pipeline.steps.swap(0, 1);
        let err = PipelineGraph::build(&pipeline).unwrap_err();
        assert!(err.to_string().contains("declared before its predecessor"));
    }

    #[test]
    fn duplicate_and_reserved_ids_are_rejected() {
        let pipeline = Pipeline::linear(vec![], vec![step("a"), step("a")]);
        assert!(PipelineGraph::build(&pipeline).is_err());

        let pipeline = Pipeline::linear(vec![], vec![step(OUTPUT_ID)]);
        let err = PipelineGraph::build(&pipeline).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let mut pipeline = Pipeline::linear(vec![], vec![step("a")]);
        pipeline.steps[0].connects_to.push("ghost".into());
        let err = PipelineGraph::build(&pipeline).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn missing_output_edge_is_accepted() {
        let mut pipeline = Pipeline::linear(vec![], vec![step("a")]);
        pipeline.steps[0].connects_to.clear();
        let graph = PipelineGraph::build(&pipeline).expect("accepted with warning");
        assert!(!graph.feeds_output());
    }

    #[test]
    fn aggregate_step_writes_aggregate_slot() {
        let agg = ProcessingStep::code("agg", "", InputMode::AggregateDocs).with_id("agg");
        let pipeline = Pipeline::linear(vec![], vec![agg, step("b")]);
        let graph = PipelineGraph::build(&pipeline).expect("valid");
        let pred = graph.predecessor("b").expect("has predecessor");
        assert!(pred.writes_aggregate());
        assert!(!Predecessor::Source.writes_aggregate());
    }
}
