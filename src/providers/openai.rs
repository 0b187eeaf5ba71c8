use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    build_user_message, check_finish_reason, decode_json, endpoint_url, http_client, language_name, send,
    Provider, ProviderSettings,
};
use crate::errors::ProviderError;
use crate::translation::validation::{judge_message, judge_prompt, parse_judge_reply, TranslationValidation};

/// Temperature of judge requests
const JUDGE_TEMPERATURE: f32 = 0.1;

/// OpenAI client for the chat completions API
#[derive(Debug)]
pub struct OpenAI {
    /// HTTP client for API requests
    client: Client,
    settings: ProviderSettings,
}

/// Chat completion request
#[derive(Debug, Serialize)]
pub struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

/// Constrains the reply format (`json_object` forces a JSON reply)
#[derive(Debug, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Chat message
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenAIMessage {
    /// Role of the message sender (system, user, assistant)
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
pub struct OpenAIResponse {
    pub choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChoice {
    pub message: OpenAIMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl OpenAIRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
            response_format: None,
        }
    }

    /// Add a message to the request
    pub fn add_message(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.messages.push(OpenAIMessage {
            role: role.into(),
            content: Some(content.into()),
        });
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Ask for a JSON object reply
    pub fn json_object(mut self) -> Self {
        self.response_format = Some(ResponseFormat {
            kind: "json_object".to_string(),
        });
        self
    }
}

impl OpenAI {
    /// Create a new OpenAI client
    pub fn new(settings: ProviderSettings) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(settings.timeout)?,
            settings,
        })
    }

    /// Complete a chat request
    pub async fn complete(&self, request: &OpenAIRequest) -> Result<OpenAIResponse, ProviderError> {
        let url = endpoint_url(&self.settings.endpoint, "chat/completions")?;
        let response = send(
            self.name(),
            self.client
                .post(url)
                .bearer_auth(&self.settings.api_key)
                .json(request),
        )
        .await?;
        decode_json(self.name(), response).await
    }

    /// Extract text from the first choice
    pub fn extract_text_from_response(response: &OpenAIResponse) -> Option<String> {
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
    }
}

#[async_trait]
impl Provider for OpenAI {
    fn name(&self) -> &str {
        "openai"
    }

    async fn translate(&self, text: &str, context: Option<&str>) -> Result<String, ProviderError> {
        let request = OpenAIRequest::new(&self.settings.model)
            .add_message("system", &self.settings.system_prompt)
            .add_message("user", build_user_message(text, context))
            .temperature(self.settings.temperature);

        let response = self.complete(&request).await?;
        let choice = response
            .choices
            .first()
            .ok_or_else(|| ProviderError::invalid_response("openai: response has no choices"))?;
        check_finish_reason(self.name(), choice.finish_reason.as_deref(), "length")?;
        let translated = choice.message.content.clone().unwrap_or_default();
        self.settings.check_translation(text, translated)
    }

    async fn validate(&self, source: &str, translated: &str) -> Result<TranslationValidation, ProviderError> {
        let prompt = judge_prompt(
            &language_name(&self.settings.source_language),
            &language_name(&self.settings.target_language),
        );
        let request = OpenAIRequest::new(&self.settings.model)
            .add_message("system", prompt)
            .add_message("user", judge_message(source, translated))
            .temperature(JUDGE_TEMPERATURE)
            .json_object();

        let response = self.complete(&request).await?;
        let reply = Self::extract_text_from_response(&response).unwrap_or_default();
        parse_judge_reply(&reply)
            .ok_or_else(|| ProviderError::invalid_response("openai: judge reply is not a JSON verdict"))
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let url = endpoint_url(&self.settings.endpoint, "models")?;
        send(self.name(), self.client.get(url).bearer_auth(&self.settings.api_key)).await?;
        Ok(())
    }
}
