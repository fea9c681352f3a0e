//! Machine translation client
//!
//! Suggestions are a convenience: when no service is configured or a call
//! fails, the editor simply gets no suggestion.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::TranslatorConfig;
use crate::models::Project;

const USER_AGENT: &str = concat!("lingo/", env!("CARGO_PKG_VERSION"));

/// Translation service errors
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, TranslateError>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    source: &'a str,
    target: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translation: String,
}

/// JSON-over-HTTP translation endpoint
pub struct HttpTranslator {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTranslator {
    pub fn new(config: &TranslatorConfig) -> Result<Self, TranslateError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TranslateError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, TranslateError> {
        tracing::debug!(endpoint = %self.endpoint, from, to, "Requesting machine translation");

        let mut request = self.http_client.post(&self.endpoint).json(&TranslateRequest {
            text,
            source: from,
            target: to,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranslateError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TranslateError::Api(status.as_u16(), error_text));
        }

        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::Parse(e.to_string()))?;
        Ok(body.translation)
    }
}

/// Build the configured translator, if any
pub fn translator_from_config(config: Option<&TranslatorConfig>) -> Option<Arc<dyn Translator>> {
    let config = config?;
    match HttpTranslator::new(config) {
        Ok(translator) => Some(Arc::new(translator)),
        Err(e) => {
            tracing::warn!(error = %e, "Machine translation disabled");
            None
        }
    }
}

/// Suggested `lang` value for the master string at `path`
pub async fn suggest_translation(
    translator: Option<&dyn Translator>,
    project: &Project,
    lang: &str,
    path: &str,
) -> Option<String> {
    let translator = translator?;
    let text = project.master_value(path)?.as_str()?;
    if text.trim().is_empty() {
        return None;
    }

    match translator
        .translate(text, &project.master_language, lang)
        .await
    {
        Ok(translation) => Some(translation),
        Err(e) => {
            tracing::warn!(project_id = %project.id, path, lang, error = %e, "Translation suggestion failed");
            None
        }
    }
}
