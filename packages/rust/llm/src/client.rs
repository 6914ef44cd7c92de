//! Text-generation client abstraction and the chat-completions implementation.
//!
//! The pipeline only ever needs "system + user prompt in, text + token counts
//! out", so that is the whole trait surface. Tests substitute a scripted
//! generator; production uses [`OpenAiClient`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sourcestream_shared::{Result, SourcestreamError};

/// One generation call: prompts plus the model to run them on.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system: String,
    pub user: String,
}

/// Generated text with the token counts the API billed for it.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Black-box text generation. Object-safe so the pipeline can hold
/// `Arc<dyn TextGenerator>`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse>;
}

// ---------------------------------------------------------------------------
// Chat-completions client
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

/// Chat-completions API client with a configurable base URL.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourcestreamError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    #[instrument(skip_all, fields(model = %request.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: 0.7,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SourcestreamError::Generation(format!("generation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourcestreamError::Generation(format!(
                "generation API returned {status}"
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            SourcestreamError::Generation(format!("undecodable generation response: {e}"))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SourcestreamError::Generation("response had no choices".into()))?;

        debug!(
            input_tokens = parsed.usage.prompt_tokens,
            output_tokens = parsed.usage.completion_tokens,
            "generation completed"
        );

        Ok(GenerationResponse {
            text: choice.message.content,
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "gpt-4o-mini".into(),
            system: "You are concise.".into(),
            user: "Say hello.".into(),
        }
    }

    #[tokio::test]
    async fn sends_messages_and_reads_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "You are concise."},
                    {"role": "user", "content": "Say hello."}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Hello."}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::new(server.uri(), "sk-test", Duration::from_secs(5)).unwrap();
        let response = client.generate(&request()).await.unwrap();
        assert_eq!(response.text, "Hello.");
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 3);
    }

    #[tokio::test]
    async fn missing_usage_defaults_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(server.uri(), "sk-test", Duration::from_secs(5)).unwrap();
        let response = client.generate(&request()).await.unwrap();
        assert_eq!(response.input_tokens, 0);
        assert_eq!(response.output_tokens, 0);
    }

    #[tokio::test]
    async fn api_error_is_a_generation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(server.uri(), "sk-test", Duration::from_secs(5)).unwrap();
        let err = client.generate(&request()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
