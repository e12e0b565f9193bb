//! HTTP gateways to hosted and local language models.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use schemata_core::config::{LlmConfig, LlmProvider};

use crate::llm::{GatewayError, LlmClient};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 4096;

/// Chat Completions client for OpenAI and for Ollama's OpenAI-compatible endpoint.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: 0.0,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text, retry_after));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|err| {
            GatewayError::InvalidResponse(format!("chat completion body was not understood: {err}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                GatewayError::InvalidResponse("chat completion returned no content".to_string())
            })
    }
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl AnthropicClient {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        let body = CreateMessageRequest {
            model: &self.model,
            max_tokens: ANTHROPIC_MAX_TOKENS,
            temperature: 0.0,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text, retry_after));
        }

        let parsed: CreateMessageResponse = response.json().await.map_err(|err| {
            GatewayError::InvalidResponse(format!("messages body was not understood: {err}"))
        })?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(GatewayError::InvalidResponse(
                "messages response contained no text".to_string(),
            ));
        }
        Ok(text)
    }
}

/// Builds the gateway selected by `[llm]` configuration.
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, GatewayError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let api_key =
        config.api_key.as_ref().map(|key| SecretString::from(key.expose_secret().to_owned()));

    match config.provider {
        LlmProvider::OpenAi => {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
            Ok(Arc::new(OpenAiCompatibleClient::new(base_url, api_key, &config.model, timeout)?))
        }
        LlmProvider::Ollama => {
            let base_url = config.base_url.as_deref().unwrap_or("http://localhost:11434");
            let base_url = format!("{}/v1", base_url.trim_end_matches('/'));
            Ok(Arc::new(OpenAiCompatibleClient::new(&base_url, api_key, &config.model, timeout)?))
        }
        LlmProvider::Anthropic => {
            let api_key = api_key.ok_or_else(|| GatewayError::Authentication {
                message: "anthropic provider requires llm.api_key".to_string(),
            })?;
            let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_BASE_URL);
            Ok(Arc::new(AnthropicClient::new(base_url, api_key, &config.model, timeout)?))
        }
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder().timeout(timeout).build().map_err(|err| GatewayError::Transport {
        message: format!("could not build HTTP client: {err}"),
        retryable: false,
    })
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Transport {
        message: format!("request to language model failed: {err}"),
        retryable: err.is_connect() || err.is_timeout(),
    }
}

fn map_http_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> GatewayError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GatewayError::Authentication { message }
        }
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited { message, retry_after },
        status => GatewayError::Provider {
            status: status.as_u16(),
            message,
            retryable: status.is_server_error(),
        },
    }
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct CreateMessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

// OpenAI and Anthropic both wrap errors as {"error": {"message": ...}}
#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}
