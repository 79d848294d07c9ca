use super::{classify_status, classify_transport, parse_retry_after};
use crate::client::RemoteService;
use crate::types::{CompletionRequest, CompletionResponse, Result, ServiceFailure};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_TITLE_MODEL: &str = "claude-haiku-4-5";
const API_VERSION: &str = "2023-06-01";

/// Completion service speaking the Anthropic Messages API.
pub struct AnthropicCompletionService {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl AnthropicCompletionService {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        // Per-attempt timeouts are enforced by the throttled client.
        let client = Client::builder().gzip(true).build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[async_trait]
impl RemoteService for AnthropicCompletionService {
    type Request = CompletionRequest;
    type Response = CompletionResponse;

    fn service_name(&self) -> &str {
        "completion"
    }

    async fn invoke(&self, request: &CompletionRequest) -> std::result::Result<CompletionResponse, ServiceFailure> {
        let body = MessagesRequest {
            model: request.model.as_deref().unwrap_or(&self.model),
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };
        debug!("Sending {} char prompt to {}", request.prompt.len(), body.model);

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &text));
        }

        let raw = response.text().await.map_err(|e| classify_transport(&e))?;
        let parsed: MessagesResponse = serde_json::from_str(&raw)
            .map_err(|e| ServiceFailure::fatal(format!("malformed completion response: {}", e)))?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(ServiceFailure::fatal("completion response has no text content"));
        }
        Ok(CompletionResponse { text })
    }
}
