use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    build_user_message, check_finish_reason, decode_json, endpoint_url, http_client, send, Provider,
    ProviderSettings,
};
use crate::errors::ProviderError;

/// Google Gemini client for the generateContent API
#[derive(Debug)]
pub struct Gemini {
    client: Client,
    settings: ProviderSettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub prompt_feedback: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl GeminiContent {
    fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![GeminiPart { text: text.into() }],
        }
    }
}

impl Gemini {
    pub fn new(settings: ProviderSettings) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(settings.timeout)?,
            settings,
        })
    }

    pub async fn generate(&self, request: &GeminiRequest) -> Result<GeminiResponse, ProviderError> {
        let path = format!("models/{}:generateContent", self.settings.model);
        let url = endpoint_url(&self.settings.endpoint, &path)?;
        let response = send(
            self.name(),
            self.client
                .post(url)
                .header("x-goog-api-key", &self.settings.api_key)
                .json(request),
        )
        .await?;
        decode_json(self.name(), response).await
    }

    /// Text of the first candidate; blocked prompts have no candidates
    pub fn extract_text_from_response(response: &GeminiResponse) -> Option<String> {
        let content = response.candidates.first()?.content.as_ref()?;
        Some(content.parts.iter().map(|part| part.text.as_str()).collect())
    }
}

#[async_trait]
impl Provider for Gemini {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn translate(&self, text: &str, context: Option<&str>) -> Result<String, ProviderError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent::text(Some("user"), build_user_message(text, context))],
            system_instruction: Some(GeminiContent::text(None, &self.settings.system_prompt)),
            generation_config: Some(GenerationConfig {
                temperature: self.settings.temperature,
            }),
        };

        let response = self.generate(&request).await?;
        let finish_reason = response
            .candidates
            .first()
            .and_then(|candidate| candidate.finish_reason.as_deref());
        check_finish_reason(self.name(), finish_reason, "MAX_TOKENS")?;
        let translated = Self::extract_text_from_response(&response).ok_or_else(|| {
            ProviderError::invalid_response(format!(
                "gemini: no candidates in response (feedback: {:?})",
                response.prompt_feedback
            ))
        })?;
        self.settings.check_translation(text, translated)
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let url = endpoint_url(&self.settings.endpoint, &format!("models/{}", self.settings.model))?;
        send(
            self.name(),
            self.client.get(url).header("x-goog-api-key", &self.settings.api_key),
        )
        .await?;
        Ok(())
    }
}
