//! The engine facade: provider settings, runners, and the current pipeline.
//!
//! The engine owns one [`Pipeline`] whose `status` field is the shared
//! status state. Observers can read it with [`Engine::status`] or follow
//! every transition through [`Engine::subscribe`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, instrument};

use docflow_shared::{
    AppConfig, Document, Pipeline, PipelineStatus, ProcessingStep, ProviderSettings, Result,
    StepResult,
};

use crate::code_step::CodeRunner;
use crate::dispatch::StepExecutor;
use crate::harness;
use crate::llm_step::{ChatMessage, LlmStepRunner, PromptResponse, PromptRunner};
use crate::loader::DocumentLoader;
use crate::pipeline::{self, StatusSink};
use crate::provider::HttpPromptRunner;

/// Portable engine state: provider settings plus the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(flatten)]
    pub settings: ProviderSettings,
    #[serde(default)]
    pub pipeline: Pipeline,
}

/// Forwards each status to the caller's sink and to the shared state.
struct Broadcast<'a> {
    shared: &'a watch::Sender<PipelineStatus>,
    sink: &'a dyn StatusSink,
}

impl StatusSink for Broadcast<'_> {
    fn status(&self, status: &PipelineStatus) {
        self.shared.send_replace(status.clone());
        self.sink.status(status);
    }
}

#[derive(Debug)]
pub struct Engine {
    executor: StepExecutor,
    pipeline: Pipeline,
    status: watch::Sender<PipelineStatus>,
}

impl Engine {
    pub fn new(
        prompt_runner: Arc<dyn PromptRunner>,
        code: CodeRunner,
        settings: ProviderSettings,
    ) -> Self {
        let (status, _) = watch::channel(PipelineStatus::Init);
        Self {
            executor: StepExecutor::new(LlmStepRunner::new(prompt_runner, settings), code),
            pipeline: Pipeline::default(),
            status,
        }
    }

    /// Engine backed by the HTTP prompt runner and the configured sandbox limits.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let runner = HttpPromptRunner::from_config(&config.llm)?;
        Ok(Self::new(
            Arc::new(runner),
            CodeRunner::new(&config.code),
            ProviderSettings::from_config(config),
        ))
    }

    // --- Settings ---

    pub fn settings(&self) -> &ProviderSettings {
        self.executor.llm().settings()
    }

    pub fn set_settings(&mut self, settings: ProviderSettings) {
        self.executor.llm_mut().set_settings(settings);
    }

    pub fn export_config(&self) -> EngineConfig {
        EngineConfig {
            settings: self.settings().clone(),
            pipeline: self.pipeline.clone(),
        }
    }

    /// Replace settings and pipeline; status returns to `init`.
    pub fn import_config(&mut self, config: EngineConfig) {
        self.set_settings(config.settings);
        self.set_pipeline(config.pipeline);
    }

    // --- Pipeline state ---

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Mutable access for editors; must not be used while a run is in flight.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    pub fn set_pipeline(&mut self, mut pipeline: Pipeline) {
        pipeline.status = PipelineStatus::Init;
        self.pipeline = pipeline;
        self.status.send_replace(PipelineStatus::Init);
    }

    pub fn reset_pipeline(&mut self) {
        self.set_pipeline(Pipeline::default());
    }

    pub fn documents(&self) -> &[Document] {
        self.pipeline.documents()
    }

    pub fn set_documents(&mut self, docs: Vec<Document>) {
        self.pipeline.source.docs = docs;
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    fn set_status(&mut self, status: PipelineStatus, sink: &dyn StatusSink) {
        self.status.send_replace(status.clone());
        sink.status(&status);
        self.pipeline.status = status;
    }

    // --- Operations ---

    /// Replace the source documents from `loader`.
    ///
    /// Status goes `sourcing → done`, or `error` if loading fails, in which
    /// case the current documents are kept.
    #[instrument(skip_all)]
    pub async fn load_documents(
        &mut self,
        loader: &dyn DocumentLoader,
        sink: &dyn StatusSink,
    ) -> Result<usize> {
        self.set_status(PipelineStatus::Sourcing, sink);
        match loader.load().await {
            Ok(docs) => {
                let count = docs.len();
                self.set_documents(docs);
                self.set_status(PipelineStatus::Done, sink);
                info!(count, "documents sourced");
                Ok(count)
            }
            Err(err) => {
                self.set_status(PipelineStatus::Error { cause: err.clone() }, sink);
                Err(err)
            }
        }
    }

    /// Run the current pipeline and commit the result only on success.
    ///
    /// On failure the documents and aggregate slot stay as they were before
    /// the run and the pipeline status is `error`.
    pub async fn run_pipeline(&mut self, sink: &dyn StatusSink) -> Result<&Pipeline> {
        let outcome = {
            let broadcast = Broadcast {
                shared: &self.status,
                sink,
            };
            pipeline::run_pipeline(&self.executor, &self.pipeline, &broadcast).await
        };

        match outcome {
            Ok(finished) => {
                self.pipeline = finished;
                Ok(&self.pipeline)
            }
            Err(err) => {
                self.pipeline.status = PipelineStatus::Error { cause: err.clone() };
                Err(err)
            }
        }
    }

    /// Ask the provider to revise the pipeline plan.
    ///
    /// `messages` is the caller's full refinement conversation. Status goes
    /// `refine → init` and the reply replaces `pipeline_plan`. On failure the
    /// plan is kept and the status is `error`.
    #[instrument(skip_all, fields(messages = messages.len()))]
    pub async fn refine_plan(
        &mut self,
        messages: Vec<ChatMessage>,
        sink: &dyn StatusSink,
    ) -> Result<&str> {
        self.set_status(PipelineStatus::Refine, sink);
        match self.executor.llm().run_messages(messages).await {
            Ok(response) => {
                self.pipeline.pipeline_plan = response.text;
                self.set_status(PipelineStatus::Init, sink);
                info!(len = self.pipeline.pipeline_plan.len(), "pipeline plan refined");
                Ok(&self.pipeline.pipeline_plan)
            }
            Err(err) => {
                self.set_status(PipelineStatus::Error { cause: err.clone() }, sink);
                Err(err)
            }
        }
    }

    /// Preview one step against one document of the current pipeline.
    pub async fn test_step(&self, step: &ProcessingStep, document_id: &str) -> Result<StepResult> {
        harness::test_step(&self.executor, &self.pipeline, step, document_id).await
    }

    /// Send a system/user prompt pair through the configured provider.
    pub async fn run_prompt(&self, system: &str, user: &str) -> Result<PromptResponse> {
        self.run_prompt_from_messages(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .await
    }

    pub async fn run_prompt_from_messages(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<PromptResponse> {
        self.executor.llm().run_messages(messages).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::pipeline::SilentStatus;
    use crate::testing::ScriptedRunner;
    use docflow_shared::{DocflowError, InputMode, Provider};

    fn settings() -> ProviderSettings {
        ProviderSettings {
            provider: Some(Provider::OpenAi),
            model: Some("gpt-4o-mini".into()),
            credential: Some("sk-test".into()),
            runtime_handle: None,
        }
    }

    fn engine(runner: Arc<ScriptedRunner>) -> Engine {
        let mut engine = Engine::new(runner, CodeRunner::default(), settings());
        let step = ProcessingStep::llm("Sentiment", "Classify sentiment.", InputMode::Doc)
            .with_id("step1");
        engine.set_pipeline(Pipeline::linear(
            vec![Document::new("d1", "Great product!")],
            vec![step],
        ));
        engine
    }

    struct FixedLoader(Result<Vec<Document>>);

    #[async_trait]
    impl DocumentLoader for FixedLoader {
        async fn load(&self) -> Result<Vec<Document>> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn successful_run_commits_and_reports_done() {
        let runner = Arc::new(ScriptedRunner::replying("positive"));
        let mut engine = engine(runner);
        let mut updates = engine.subscribe();

        engine.run_pipeline(&SilentStatus).await.expect("run");

        assert!(updates.has_changed().expect("sender alive"));
        assert!(matches!(*updates.borrow_and_update(), PipelineStatus::Done));
        assert!(matches!(engine.status(), PipelineStatus::Done));
        assert!(matches!(engine.pipeline().status, PipelineStatus::Done));
        let d1 = &engine.documents()[0];
        assert_eq!(d1.result_for("step1").map(|r| r.result.as_str()), Some("positive"));
    }

    #[tokio::test]
    async fn failed_run_keeps_documents_and_sets_error() {
        let runner = Arc::new(ScriptedRunner::replying("first"));
        let mut engine = engine(runner);
        engine.run_pipeline(&SilentStatus).await.expect("first run");
        let committed = engine.documents().to_vec();

        engine.pipeline_mut().steps.push(
            ProcessingStep::code(
                "Broken",
                "return function(s) error('nope') end",
                InputMode::Result,
            )
            .with_id("step2"),
        );
        engine.pipeline_mut().steps[0].connects_to = vec!["step2".into()];
        engine.pipeline_mut().steps[1].connects_to = vec!["output".into()];

        let err = engine.run_pipeline(&SilentStatus).await.unwrap_err();

        assert!(matches!(err, DocflowError::CodeRuntime { .. }));
        assert!(engine.status().is_error());
        assert!(engine.pipeline().status.is_error());
        assert_eq!(engine.documents(), committed.as_slice());
    }

    #[tokio::test]
    async fn load_documents_goes_sourcing_then_done() {
        let mut engine = engine(Arc::new(ScriptedRunner::replying("unused")));
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |status: &PipelineStatus| seen.lock().expect("lock").push(status.name());

        let loader = FixedLoader(Ok(vec![Document::new("x", "1"), Document::new("y", "2")]));
        let count = engine.load_documents(&loader, &sink).await.expect("load");

        assert_eq!(count, 2);
        assert_eq!(engine.documents().len(), 2);
        assert_eq!(*seen.lock().expect("lock"), ["sourcing", "done"]);
    }

    #[tokio::test]
    async fn failed_load_keeps_documents() {
        let mut engine = engine(Arc::new(ScriptedRunner::replying("unused")));
        let loader = FixedLoader(Err(DocflowError::validation("bad source")));

        assert!(engine.load_documents(&loader, &SilentStatus).await.is_err());
        assert_eq!(engine.documents()[0].id, "d1");
        assert!(engine.status().is_error());
    }

    #[tokio::test]
    async fn config_round_trips_through_json() {
        let mut engine = engine(Arc::new(ScriptedRunner::replying("unused")));
        let exported = engine.export_config();
        let json = serde_json::to_value(&exported).expect("serialize");
        assert_eq!(json["provider"], "openai");
        assert_eq!(json["pipeline"]["steps"][0]["id"], "step1");

        engine.reset_pipeline();
        assert!(engine.pipeline().steps.is_empty());

        let imported: EngineConfig = serde_json::from_value(json).expect("deserialize");
        engine.import_config(imported);
        assert_eq!(engine.pipeline().steps.len(), 1);
        assert_eq!(engine.settings(), &settings());
        assert!(matches!(engine.status(), PipelineStatus::Init));
    }

    #[tokio::test]
    async fn run_prompt_uses_settings() {
        let runner = Arc::new(ScriptedRunner::replying("a plan"));
        let engine = engine(runner.clone());

        let response = engine
            .run_prompt("You plan pipelines.", "Count words")
            .await
            .expect("prompt");

        assert_eq!(response.text, "a plan");
        assert_eq!(runner.requests()[0].messages[0], ChatMessage::system("You plan pipelines."));
    }

    #[tokio::test]
    async fn refine_plan_stores_reply_and_returns_to_init() {
        let runner = Arc::new(ScriptedRunner::replying("1. Classify\n2. Summarize"));
        let mut engine = engine(runner.clone());
        engine.pipeline_mut().pipeline_plan = "1. Classify".into();
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |status: &PipelineStatus| seen.lock().expect("lock").push(status.name());

        let messages = vec![
            ChatMessage::system("You refine pipeline plans."),
            ChatMessage::user("Add a summary step."),
        ];
        let plan = engine
            .refine_plan(messages.clone(), &sink)
            .await
            .expect("refine")
            .to_owned();

        assert_eq!(plan, "1. Classify\n2. Summarize");
        assert_eq!(engine.pipeline().pipeline_plan, plan);
        assert_eq!(*seen.lock().expect("lock"), ["refine", "init"]);
        assert!(matches!(engine.status(), PipelineStatus::Init));
        assert_eq!(runner.requests()[0].messages, messages);
    }

    #[tokio::test]
    async fn failed_refine_keeps_plan() {
        let runner = Arc::new(ScriptedRunner::failing(DocflowError::provider_call(
            "openai",
            "rate limited",
        )));
        let mut engine = engine(runner);
        engine.pipeline_mut().pipeline_plan = "1. Classify".into();

        let err = engine
            .refine_plan(vec![ChatMessage::user("Add a step.")], &SilentStatus)
            .await
            .unwrap_err();

        assert!(matches!(err, DocflowError::ProviderCall { .. }));
        assert_eq!(engine.pipeline().pipeline_plan, "1. Classify");
        assert!(engine.status().is_error());
    }

    #[tokio::test]
    async fn test_step_does_not_touch_pipeline() {
        let runner = Arc::new(ScriptedRunner::replying("positive"));
        let engine = engine(runner);
        let step = engine.pipeline().steps[0].clone();

        let result = engine.test_step(&step, "d1").await.expect("preview");

        assert_eq!(result.result, "positive");
        assert!(engine.documents()[0].processing_results.is_empty());
        assert!(matches!(engine.status(), PipelineStatus::Init));
    }
}
