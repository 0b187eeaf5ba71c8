use async_trait::async_trait;
use log::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{build_user_message, check_finish_reason, endpoint_url, http_client, send, Provider, ProviderSettings};
use crate::errors::ProviderError;

/// Ollama client for interacting with a local Ollama server
#[derive(Debug)]
pub struct Ollama {
    /// HTTP client for making requests
    client: Client,
    settings: ProviderSettings,
}

/// Generate request for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model name to use for generation
    model: String,
    /// Prompt to generate from
    prompt: String,
    /// System message to guide the model
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    /// Additional model parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerationOptions>,
    /// Whether to stream the response
    stream: bool,
}

/// Generation options for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Generation response from the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Model name
    #[serde(default)]
    pub model: String,
    /// Generated text
    #[serde(default)]
    pub response: String,
    /// Whether the generation is complete
    #[serde(default)]
    pub done: bool,
    /// Why generation stopped (`stop`, `length`), on newer servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
}

impl GenerationRequest {
    /// Create a new non-streaming generation request
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            options: None,
            stream: false,
        }
    }

    /// Set the system prompt
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options = Some(GenerationOptions {
            temperature: Some(temperature),
        });
        self
    }
}

impl Ollama {
    pub fn new(settings: ProviderSettings) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(settings.timeout)?,
            settings,
        })
    }

    /// Generate text from the Ollama API
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let url = endpoint_url(&self.settings.endpoint, "api/generate")?;
        let response = send(self.name(), self.client.post(url).json(request)).await?;

        let response_text = response
            .text()
            .await
            .map_err(|e| ProviderError::transient(format!("ollama: failed to read response: {}", e)))?;
        Self::parse_generation(&response_text)
    }

    /// Parse a generation body.
    ///
    /// Some Ollama versions stream JSONL even when `stream` is false; the
    /// pieces are concatenated in that case.
    pub fn parse_generation(body: &str) -> Result<GenerationResponse, ProviderError> {
        if let Ok(response) = serde_json::from_str::<GenerationResponse>(body) {
            return Ok(response);
        }

        let mut combined = GenerationResponse {
            model: String::new(),
            response: String::new(),
            done: false,
            done_reason: None,
        };
        let mut parsed_any = false;
        for line in body.lines().filter(|line| !line.trim().is_empty()) {
            let piece: GenerationResponse = serde_json::from_str(line).map_err(|e| {
                error!("Failed to parse Ollama API response line: {}", e);
                ProviderError::invalid_response(format!("ollama: undecodable response: {}", e))
            })?;
            parsed_any = true;
            combined.model = piece.model;
            combined.response.push_str(&piece.response);
            combined.done |= piece.done;
            if piece.done_reason.is_some() {
                combined.done_reason = piece.done_reason;
            }
        }

        if parsed_any {
            Ok(combined)
        } else {
            Err(ProviderError::invalid_response("ollama: empty response body"))
        }
    }
}

#[async_trait]
impl Provider for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn translate(&self, text: &str, context: Option<&str>) -> Result<String, ProviderError> {
        let request = GenerationRequest::new(&self.settings.model, build_user_message(text, context))
            .system(&self.settings.system_prompt)
            .temperature(self.settings.temperature);

        let response = self.generate(&request).await?;
        check_finish_reason(self.name(), response.done_reason.as_deref(), "length")?;
        self.settings.check_translation(text, response.response)
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let url = endpoint_url(&self.settings.endpoint, "api/tags")?;
        send(self.name(), self.client.get(url)).await?;
        Ok(())
    }
}
