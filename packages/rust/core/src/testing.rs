//! Test doubles shared by the unit tests in this crate.

use std::sync::Mutex;

use async_trait::async_trait;

use docflow_shared::{DocflowError, Result, Usage};

use crate::llm_step::{PromptRequest, PromptResponse, PromptRunner};

type Responder = Box<dyn Fn(&PromptRequest) -> Result<PromptResponse> + Send + Sync>;

/// Prompt runner that records every request and answers from a script.
pub(crate) struct ScriptedRunner {
    respond: Responder,
    requests: Mutex<Vec<PromptRequest>>,
}

impl ScriptedRunner {
    pub(crate) fn new(
        respond: impl Fn(&PromptRequest) -> Result<PromptResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `text` with a fixed usage of 10 prompt / 5 completion tokens.
    pub(crate) fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| {
            Ok(PromptResponse {
                text: text.clone(),
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                },
            })
        })
    }

    pub(crate) fn failing(err: DocflowError) -> Self {
        Self::new(move |_| Err(err.clone()))
    }

    pub(crate) fn requests(&self) -> Vec<PromptRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl PromptRunner for ScriptedRunner {
    async fn invoke(&self, request: PromptRequest) -> Result<PromptResponse> {
        let response = (self.respond)(&request);
        self.requests.lock().expect("requests lock").push(request);
        response
    }
}
