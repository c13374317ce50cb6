//! Input resolution: what a step receives for one invocation.

use docflow_shared::{Document, DocflowError, InputMode, ProcessingStep, Result, StepResult};

use crate::graph::Predecessor;

/// Separator used when an aggregate input is flattened into one prompt.
const AGGREGATE_SEPARATOR: &str = "\n---\n";

/// Resolved input for a single step invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepInput {
    Text(String),
    List(Vec<String>),
}

impl StepInput {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::List(items) => items.is_empty(),
        }
    }

    /// Single text form, joining aggregate entries.
    pub fn to_prompt_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::List(items) => items.join(AGGREGATE_SEPARATOR),
        }
    }
}

/// The data a step may read from.
#[derive(Debug, Clone, Copy)]
pub struct InputScope<'a> {
    /// Target document; `None` for aggregate invocations.
    pub document: Option<&'a Document>,
    pub documents: &'a [Document],
    /// The pipeline's aggregate slot.
    pub aggregate: &'a [StepResult],
}

/// Resolve the input for `step` according to its input mode.
///
/// Fails with [`DocflowError::MissingPredecessor`] when no node feeds the
/// step, and with [`DocflowError::EmptyInput`] when nothing is left after
/// filtering, for every mode.
pub fn resolve(
    step: &ProcessingStep,
    predecessor: Option<Predecessor<'_>>,
    scope: &InputScope<'_>,
) -> Result<StepInput> {
    let predecessor = predecessor.ok_or_else(|| DocflowError::MissingPredecessor {
        step_id: step.id.clone(),
    })?;

    let input = match step.input_mode {
        InputMode::Doc => StepInput::Text(
            scope
                .document
                .map(|doc| doc.content.clone())
                .unwrap_or_default(),
        ),
        InputMode::Result => {
            let result = if predecessor.writes_aggregate() {
                find_result(scope.aggregate, predecessor.id())
            } else {
                scope
                    .document
                    .and_then(|doc| doc.result_for(predecessor.id()))
            };
            StepInput::Text(result.map(|r| r.result.clone()).unwrap_or_default())
        }
        InputMode::AggregateDocs => StepInput::List(non_empty(
            scope.documents.iter().map(|doc| doc.content.as_str()),
        )),
        InputMode::AggregateResults => {
            let items = if predecessor.writes_aggregate() {
                non_empty(
                    find_result(scope.aggregate, predecessor.id())
                        .map(|r| r.result.as_str())
                        .into_iter(),
                )
            } else {
                non_empty(scope.documents.iter().map(|doc| {
                    doc.result_for(predecessor.id())
                        .map(|r| r.result.as_str())
                        .unwrap_or_default()
                }))
            };
            StepInput::List(items)
        }
    };

    if input.is_empty() {
        return Err(DocflowError::EmptyInput {
            step_id: step.id.clone(),
        });
    }

    Ok(input)
}

fn find_result<'a>(results: &'a [StepResult], step_id: &str) -> Option<&'a StepResult> {
    results.iter().find(|r| r.step_id == step_id)
}

fn non_empty<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    items
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<Document> {
        vec![
            Document::new("d1", "A"),
            Document::new("d2", ""),
            Document::new("d3", "B"),
        ]
    }

    fn result(step_id: &str, text: &str) -> StepResult {
        StepResult {
            step_id: step_id.into(),
            result: text.into(),
            usage: None,
            timing_ms: 1.0,
        }
    }

    fn step(mode: InputMode) -> ProcessingStep {
        ProcessingStep::llm("s", "prompt", mode).with_id("s")
    }

    #[test]
    fn doc_mode_returns_content() {
        let docs = docs();
        let scope = InputScope {
            document: Some(&docs[0]),
            documents: &docs,
            aggregate: &[],
        };
        let input = resolve(&step(InputMode::Doc), Some(Predecessor::Source), &scope)
            .expect("resolve");
        assert_eq!(input, StepInput::Text("A".into()));
    }

    #[test]
    fn aggregate_docs_drops_empty_content() {
        let docs = docs();
        let scope = InputScope {
            document: None,
            documents: &docs,
            aggregate: &[],
        };
        let input = resolve(&step(InputMode::AggregateDocs), Some(Predecessor::Source), &scope)
            .expect("resolve");
        assert_eq!(input, StepInput::List(vec!["A".into(), "B".into()]));
    }

    #[test]
    fn aggregate_results_drops_empty_results() {
        let upstream = ProcessingStep::llm("up", "p", InputMode::Doc).with_id("up");
        let mut docs = docs();
        docs[0].processing_results.push(result("up", "A"));
        docs[1].processing_results.push(result("up", ""));
        docs[2].processing_results.push(result("up", "B"));
        let scope = InputScope {
            document: None,
            documents: &docs,
            aggregate: &[],
        };
        let input = resolve(
            &step(InputMode::AggregateResults),
            Some(Predecessor::Step(&upstream)),
            &scope,
        )
        .expect("resolve");
        assert_eq!(input, StepInput::List(vec!["A".into(), "B".into()]));
    }

    #[test]
    fn result_mode_reads_predecessor_result() {
        let upstream = ProcessingStep::llm("up", "p", InputMode::Doc).with_id("up");
        let mut docs = docs();
        docs[0].processing_results.push(result("other", "nope"));
        docs[0].processing_results.push(result("up", "positive"));
        let scope = InputScope {
            document: Some(&docs[0]),
            documents: &docs,
            aggregate: &[],
        };
        let input = resolve(
            &step(InputMode::Result),
            Some(Predecessor::Step(&upstream)),
            &scope,
        )
        .expect("resolve");
        assert_eq!(input, StepInput::Text("positive".into()));
    }

    #[test]
    fn result_mode_reads_aggregate_slot_of_aggregate_predecessor() {
        let upstream = ProcessingStep::code("up", "", InputMode::AggregateDocs).with_id("up");
        let docs = docs();
        let aggregate = vec![result("up", "summary")];
        let scope = InputScope {
            document: Some(&docs[0]),
            documents: &docs,
            aggregate: &aggregate,
        };
        let input = resolve(
            &step(InputMode::Result),
            Some(Predecessor::Step(&upstream)),
            &scope,
        )
        .expect("resolve");
        assert_eq!(input, StepInput::Text("summary".into()));

        let input = resolve(
            &step(InputMode::AggregateResults),
            Some(Predecessor::Step(&upstream)),
            &scope,
        )
        .expect("resolve");
        assert_eq!(input, StepInput::List(vec!["summary".into()]));
    }

    #[test]
    fn missing_result_is_empty_input() {
        let upstream = ProcessingStep::llm("up", "p", InputMode::Doc).with_id("up");
        let docs = docs();
        let scope = InputScope {
            document: Some(&docs[0]),
            documents: &docs,
            aggregate: &[],
        };
        let err = resolve(
            &step(InputMode::Result),
            Some(Predecessor::Step(&upstream)),
            &scope,
        )
        .unwrap_err();
        assert!(matches!(err, DocflowError::EmptyInput { .. }));
    }

    #[test]
    fn empty_doc_is_empty_input() {
        let docs = docs();
        let scope = InputScope {
            document: Some(&docs[1]),
            documents: &docs,
            aggregate: &[],
        };
        let err = resolve(&step(InputMode::Doc), Some(Predecessor::Source), &scope).unwrap_err();
        assert!(matches!(err, DocflowError::EmptyInput { step_id } if step_id == "s"));
    }

    #[test]
    fn all_empty_aggregate_is_empty_input() {
        let docs = vec![Document::new("d1", ""), Document::new("d2", "")];
        let scope = InputScope {
            document: None,
            documents: &docs,
            aggregate: &[],
        };
        let err = resolve(&step(InputMode::AggregateDocs), Some(Predecessor::Source), &scope)
            .unwrap_err();
        assert!(matches!(err, DocflowError::EmptyInput { .. }));
    }

    #[test]
    fn no_predecessor_fails_first() {
        let docs = docs();
        let scope = InputScope {
            document: Some(&docs[0]),
            documents: &docs,
            aggregate: &[],
        };
        let err = resolve(&step(InputMode::Doc), None, &scope).unwrap_err();
        assert!(matches!(err, DocflowError::MissingPredecessor { .. }));
    }

    #[test]
    fn list_input_joins_for_prompts() {
        let input = StepInput::List(vec!["a".into(), "b".into()]);
        assert_eq!(input.to_prompt_text(), "a\n---\nb");
    }
}
