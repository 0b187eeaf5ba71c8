use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{decode_json, endpoint_url, http_client, send, Provider, ProviderSettings};
use crate::errors::ProviderError;
use crate::language_utils;

/// Endpoint for keys of the free API plan (suffix `:fx`)
const FREE_ENDPOINT: &str = "https://api-free.deepl.com/v2";
const PRO_ENDPOINT: &str = "https://api.deepl.com/v2";

/// DeepL client for the v2 translate API
///
/// DeepL is not a chat model: the system prompt is unused, and preceding
/// text is passed through the native `context` parameter.
#[derive(Debug)]
pub struct DeepL {
    client: Client,
    settings: ProviderSettings,
    endpoint: String,
    source_lang: String,
    target_lang: String,
}

#[derive(Debug, Serialize)]
pub struct DeepLRequest {
    text: Vec<String>,
    target_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_lang: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeepLResponse {
    pub translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
pub struct DeepLTranslation {
    #[serde(default)]
    pub detected_source_language: Option<String>,
    pub text: String,
}

impl DeepL {
    pub fn new(settings: ProviderSettings) -> anyhow::Result<Self> {
        // Source languages never carry a region in DeepL
        let source_lang = language_utils::to_deepl_code(&settings.source_language)?
            .split('-')
            .next()
            .unwrap_or_default()
            .to_string();
        let target_lang = language_utils::to_deepl_code(&settings.target_language)?;

        let endpoint = if settings.api_key.ends_with(":fx")
            && settings.endpoint.trim_end_matches('/') == PRO_ENDPOINT
        {
            FREE_ENDPOINT.to_string()
        } else {
            settings.endpoint.clone()
        };

        Ok(Self {
            client: http_client(settings.timeout)?,
            settings,
            endpoint,
            source_lang,
            target_lang,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, text: &str, context: Option<&str>) -> DeepLRequest {
        DeepLRequest {
            text: vec![text.to_string()],
            target_lang: self.target_lang.clone(),
            source_lang: Some(self.source_lang.clone()),
            context: context.filter(|c| !c.trim().is_empty()).map(str::to_string),
        }
    }

    fn authorization(&self) -> String {
        format!("DeepL-Auth-Key {}", self.settings.api_key)
    }
}

#[async_trait]
impl Provider for DeepL {
    fn name(&self) -> &str {
        "deepl"
    }

    async fn translate(&self, text: &str, context: Option<&str>) -> Result<String, ProviderError> {
        let url = endpoint_url(&self.endpoint, "translate")?;
        let response = send(
            self.name(),
            self.client
                .post(url)
                .header("Authorization", self.authorization())
                .json(&self.request(text, context)),
        )
        .await?;

        let body: DeepLResponse = decode_json(self.name(), response).await?;
        let translated = body
            .translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| ProviderError::invalid_response("deepl: response has no translations"))?;
        self.settings.check_translation(text, translated)
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let url = endpoint_url(&self.endpoint, "usage")?;
        send(self.name(), self.client.get(url).header("Authorization", self.authorization())).await?;
        Ok(())
    }
}
