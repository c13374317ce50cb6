//! OpenAI-compatible chat-completions client.
//!
//! Every supported provider exposes (or can be fronted by) the
//! `/chat/completions` endpoint, so one client covers them all. The local
//! runtime is addressed through the request's runtime handle.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use docflow_shared::{DocflowError, LlmConfig, Provider, Result, Usage};

use crate::llm_step::{ChatMessage, PromptRequest, PromptResponse, PromptRunner};

/// Longest slice of an error body carried into the error message.
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`PromptRunner`] speaking the OpenAI chat-completions protocol over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPromptRunner {
    client: reqwest::Client,
}

impl HttpPromptRunner {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("docflow/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| DocflowError::config(format!("http client build: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(Duration::from_secs(config.request_timeout_secs))
    }

    /// API root: the runtime handle when given, else the provider default.
    fn base_url(request: &PromptRequest) -> Result<String> {
        request
            .runtime_handle
            .as_deref()
            .or_else(|| request.provider.default_base_url())
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                DocflowError::provider_call(
                    request.provider.as_str(),
                    "no runtime handle for the local model runtime",
                )
            })
    }
}

#[async_trait]
impl PromptRunner for HttpPromptRunner {
    #[instrument(skip_all, fields(provider = %request.provider, model = %request.model))]
    async fn invoke(&self, request: PromptRequest) -> Result<PromptResponse> {
        let provider = request.provider;
        let call_err = |msg: String| DocflowError::provider_call(provider.as_str(), msg);

        let url = format!("{}/chat/completions", Self::base_url(&request)?);
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &request.credential {
            builder = builder.bearer_auth(key);
        }
        if provider == Provider::OpenRouter {
            builder = builder.header("X-Title", "docflow");
        }

        let response = builder.send().await.map_err(|e| call_err(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(call_err(format!("HTTP {status}: {snippet}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| call_err(format!("invalid response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| call_err("response contained no message".into()))?;

        let usage = parsed.usage.unwrap_or_default();
        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "prompt completed"
        );

        Ok(PromptResponse { text, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(base: &str) -> PromptRequest {
        PromptRequest {
            provider: Provider::OpenAi,
            model: "gpt-4o-mini".into(),
            credential: Some("sk-test".into()),
            runtime_handle: Some(base.to_string()),
            messages: vec![
                ChatMessage::system("Classify sentiment."),
                ChatMessage::user("Great product!"),
            ],
        }
    }

    #[tokio::test]
    async fn parses_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "positive"}}],
                "usage": {"prompt_tokens": 21, "completion_tokens": 1, "total_tokens": 22}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let runner = HttpPromptRunner::new(Duration::from_secs(5)).expect("client");
        let response = runner.invoke(request(&server.uri())).await.expect("invoke");

        assert_eq!(response.text, "positive");
        assert_eq!(response.usage.prompt_tokens, 21);
        assert_eq!(response.usage.completion_tokens, 1);
    }

    #[tokio::test]
    async fn http_error_is_provider_call_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let runner = HttpPromptRunner::new(Duration::from_secs(5)).expect("client");
        let err = runner.invoke(request(&server.uri())).await.unwrap_err();

        match err {
            DocflowError::ProviderCall { provider, message } => {
                assert_eq!(provider, "openai");
                assert!(message.contains("429"));
                assert!(message.contains("rate limited"));
            }
            other => panic!("expected ProviderCall, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_provider_call_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let runner = HttpPromptRunner::new(Duration::from_secs(5)).expect("client");
        let err = runner.invoke(request(&server.uri())).await.unwrap_err();
        assert!(err.to_string().contains("no message"));
    }

    #[test]
    fn local_provider_without_handle_fails() {
        let mut req = request("http://unused");
        req.provider = Provider::Local;
        req.runtime_handle = None;
        assert!(HttpPromptRunner::base_url(&req).is_err());
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let req = request("http://127.0.0.1:9000/v1/");
        assert_eq!(
            HttpPromptRunner::base_url(&req).expect("url"),
            "http://127.0.0.1:9000/v1"
        );
    }
}
