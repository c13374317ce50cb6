//! LLM step runner and the prompt-runner seam it calls through.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use docflow_shared::{DocflowError, Provider, ProviderSettings, Result, Usage};

use crate::input::StepInput;

// ---------------------------------------------------------------------------
// Prompt-runner protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A fully specified request for the prompt runner.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRequest {
    pub provider: Provider,
    pub model: String,
    /// `None` only for providers that need no credential.
    pub credential: Option<String>,
    pub runtime_handle: Option<String>,
    pub messages: Vec<ChatMessage>,
}

/// Generated text plus reported token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptResponse {
    pub text: String,
    pub usage: Usage,
}

/// Executes an LLM request against a configured provider.
///
/// Failures are returned as-is; callers do not retry.
#[async_trait]
pub trait PromptRunner: Send + Sync {
    async fn invoke(&self, request: PromptRequest) -> Result<PromptResponse>;
}

// ---------------------------------------------------------------------------
// LLM step runner
// ---------------------------------------------------------------------------

/// Output of a single LLM step invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmOutput {
    pub text: String,
    pub usage: Usage,
    pub timing_ms: f64,
}

/// Formats step prompts and calls the prompt runner with validated settings.
#[derive(Clone)]
pub struct LlmStepRunner {
    prompt_runner: Arc<dyn PromptRunner>,
    settings: ProviderSettings,
}

impl std::fmt::Debug for LlmStepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmStepRunner")
            .field("provider", &self.settings.provider)
            .field("model", &self.settings.model)
            .finish_non_exhaustive()
    }
}

impl LlmStepRunner {
    pub fn new(prompt_runner: Arc<dyn PromptRunner>, settings: ProviderSettings) -> Self {
        Self {
            prompt_runner,
            settings,
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ProviderSettings) {
        self.settings = settings;
    }

    /// Run one LLM step: the step prompt is the system message and the
    /// resolved input the user message.
    #[instrument(skip_all, fields(step = step_id))]
    pub async fn execute(
        &self,
        step_id: &str,
        prompt: &str,
        input: &StepInput,
    ) -> Result<LlmOutput> {
        let messages = vec![
            ChatMessage::system(prompt.trim()),
            ChatMessage::user(input.to_prompt_text()),
        ];

        let started = Instant::now();
        let response = self.run_messages(messages).await?;
        let timing_ms = started.elapsed().as_secs_f64() * 1000.0;

        debug!(
            timing_ms,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "llm step finished"
        );

        Ok(LlmOutput {
            text: response.text,
            usage: response.usage,
            timing_ms,
        })
    }

    /// Send arbitrary messages through the same validated path.
    pub async fn run_messages(&self, messages: Vec<ChatMessage>) -> Result<PromptResponse> {
        let request = build_request(&self.settings, messages)?;
        self.prompt_runner.invoke(request).await
    }
}

/// Validate settings and assemble a request.
///
/// Provider and model are always required; the credential is required for
/// every provider except the local runtime.
pub fn build_request(
    settings: &ProviderSettings,
    messages: Vec<ChatMessage>,
) -> Result<PromptRequest> {
    let provider = settings
        .provider
        .ok_or_else(|| DocflowError::provider_config("no provider set"))?;

    let model = settings
        .model
        .as_deref()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| DocflowError::provider_config("no model set"))?
        .to_string();

    let credential = settings.credential.clone().filter(|c| !c.is_empty());
    if credential.is_none() && provider.requires_credential() {
        return Err(DocflowError::provider_config(format!(
            "no credential set for provider `{provider}`"
        )));
    }

    Ok(PromptRequest {
        provider,
        model,
        credential,
        runtime_handle: settings.runtime_handle.clone(),
        messages,
    })
}
