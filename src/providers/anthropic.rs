use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    build_user_message, check_finish_reason, decode_json, endpoint_url, http_client, send, Provider,
    ProviderSettings,
};
use crate::errors::ProviderError;

/// Anthropic client for interacting with Anthropic API
#[derive(Debug)]
pub struct Anthropic {
    /// HTTP client for API requests
    client: Client,
    settings: ProviderSettings,
}

/// Anthropic message request
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    /// The model to use
    model: String,

    /// The messages for the conversation
    messages: Vec<AnthropicMessage>,

    /// System prompt to guide the AI
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,

    /// Temperature for generation
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    /// Maximum number of tokens to generate
    max_tokens: u32,
}

/// Anthropic message format
#[derive(Debug, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// Role of the message sender (user, assistant)
    pub role: String,

    /// Content of the message
    pub content: String,
}

/// Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    /// The content of the response
    pub content: Vec<AnthropicContent>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Individual content block in an Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicContent {
    /// The type of content
    #[serde(rename = "type")]
    pub content_type: String,

    /// The actual text content
    #[serde(default)]
    pub text: String,
}

impl AnthropicRequest {
    /// Create a new Anthropic request
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            system: None,
            temperature: None,
            max_tokens,
        }
    }

    /// Add a message to the request
    pub fn add_message(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.messages.push(AnthropicMessage {
            role: role.into(),
            content: content.into(),
        });
        self
    }

    /// Set the system prompt
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

impl Anthropic {
    /// Output budget per call; sub-chunks are far below this
    const MAX_OUTPUT_TOKENS: u32 = 8192;
    const API_VERSION: &'static str = "2023-06-01";

    /// Create a new Anthropic client
    pub fn new(settings: ProviderSettings) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(settings.timeout)?,
            settings,
        })
    }

    /// Complete a messages request
    pub async fn complete(&self, request: &AnthropicRequest) -> Result<AnthropicResponse, ProviderError> {
        let url = endpoint_url(&self.settings.endpoint, "v1/messages")?;
        let response = send(
            self.name(),
            self.client
                .post(url)
                .header("x-api-key", &self.settings.api_key)
                .header("anthropic-version", Self::API_VERSION)
                .json(request),
        )
        .await?;
        decode_json(self.name(), response).await
    }

    /// Extract text from Anthropic response
    pub fn extract_text_from_response(response: &AnthropicResponse) -> String {
        response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect()
    }
}

#[async_trait]
impl Provider for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn translate(&self, text: &str, context: Option<&str>) -> Result<String, ProviderError> {
        let request = AnthropicRequest::new(&self.settings.model, Self::MAX_OUTPUT_TOKENS)
            .system(&self.settings.system_prompt)
            .add_message("user", build_user_message(text, context))
            .temperature(self.settings.temperature);

        let response = self.complete(&request).await?;
        check_finish_reason(self.name(), response.stop_reason.as_deref(), "max_tokens")?;
        self.settings
            .check_translation(text, Self::extract_text_from_response(&response))
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let request = AnthropicRequest::new(&self.settings.model, 10).add_message("user", "Hello");
        self.complete(&request).await?;
        Ok(())
    }
}
