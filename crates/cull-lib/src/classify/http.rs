//! HTTP transport for hosted language-model backends
//!
//! Supports the Anthropic Messages API, OpenAI-compatible chat
//! completions (OpenAI, Groq) and Gemini `generateContent`.

use super::ClassificationBackend;
use crate::error::BackendError;
use crate::models::Telemetry;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Instructions sent with every classification request
pub const SYSTEM_PROMPT: &str = "You are a cloud FinOps auditor. Classify the GPU instance as 'ZOMBIE' (idle waste) or 'ACTIVE'.
RULES:
1. If max CPU is below 2% and network input is below 0.1 MB over the last hour, classify as ZOMBIE.
2. If metadata indicates 'production' or 'critical', be more conservative.
Respond ONLY with a JSON object with keys: decision, reasoning, confidence.";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Hosted backend families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
    Groq,
    Google,
    Simulated,
}

impl Provider {
    /// Resolve a configured provider name, accepting model-family aliases
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "openai" | "gpt4" | "gpt-4" => Some(Provider::OpenAi),
            "groq" | "llama" => Some(Provider::Groq),
            "google" | "gemini" => Some(Provider::Google),
            "simulated" | "mock" => Some(Provider::Simulated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Groq => "groq",
            Provider::Google => "google",
            Provider::Simulated => "simulated",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-3-5-sonnet-20241022",
            Provider::OpenAi => "gpt-4o",
            Provider::Groq => "llama-3.3-70b-versatile",
            Provider::Google => "gemini-2.0-flash",
            Provider::Simulated => "simulated",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Anthropic => "https://api.anthropic.com/",
            Provider::OpenAi => "https://api.openai.com/",
            Provider::Groq => "https://api.groq.com/openai/",
            Provider::Google => "https://generativelanguage.googleapis.com/",
            Provider::Simulated => "http://localhost/",
        }
    }
}

/// Backend calling a hosted model over HTTPS
pub struct HttpBackend {
    client: Client,
    provider: Provider,
    model: String,
    api_key: String,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(
        provider: Provider,
        api_key: impl Into<String>,
        model: Option<String>,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(BackendError::MissingApiKey(provider.as_str().to_string()));
        }

        let mut base = base_url.unwrap_or(provider.default_base_url()).to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            provider,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            api_key,
            base_url: Url::parse(&base)?,
        })
    }

    async fn post(&self, path: &str, request: reqwest::RequestBuilder) -> Result<Value, BackendError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        debug!(provider = self.provider.as_str(), path = %path, "Backend replied");
        Ok(response.json().await?)
    }

    async fn anthropic(&self, user_message: String) -> Result<String, BackendError> {
        let url = self.base_url.join("v1/messages")?;
        let body = json!({
            "model": self.model,
            "max_tokens": 1024,
            "system": SYSTEM_PROMPT,
            "messages": [{"role": "user", "content": user_message}]
        });
        let request = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let reply = self.post("v1/messages", request).await?;
        reply["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or(BackendError::EmptyResponse)
    }

    async fn chat_completions(&self, user_message: String) -> Result<String, BackendError> {
        let url = self.base_url.join("v1/chat/completions")?;
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_message}
            ],
            "response_format": {"type": "json_object"}
        });
        let request = self.client.post(url).bearer_auth(&self.api_key).json(&body);

        let reply = self.post("v1/chat/completions", request).await?;
        reply["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or(BackendError::EmptyResponse)
    }

    async fn generate_content(&self, user_message: String) -> Result<String, BackendError> {
        let path = format!("v1beta/models/{}:generateContent", self.model);
        let url = self.base_url.join(&path)?;
        let body = json!({
            "systemInstruction": {"parts": [{"text": SYSTEM_PROMPT}]},
            "contents": [{"role": "user", "parts": [{"text": user_message}]}],
            "generationConfig": {"responseMimeType": "application/json"}
        });
        let request = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);

        let reply = self.post(&path, request).await?;
        reply["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or(BackendError::EmptyResponse)
    }
}

#[async_trait]
impl ClassificationBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, metadata: &Value, telemetry: &Telemetry) -> Result<String, BackendError> {
        let metrics = json!({
            "max_cpu": telemetry.max_cpu_percent,
            "network_in": telemetry.network_in_mb,
        });
        let user_message = format!("METADATA: {}\nMETRICS: {}", metadata, metrics);

        match self.provider {
            Provider::Anthropic => self.anthropic(user_message).await,
            Provider::OpenAi | Provider::Groq => self.chat_completions(user_message).await,
            Provider::Google => self.generate_content(user_message).await,
            Provider::Simulated => Err(BackendError::Unavailable(
                "simulated provider has no HTTP transport".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry() -> Telemetry {
        Telemetry {
            max_cpu_percent: 0.4,
            network_in_mb: 0.01,
        }
    }

    #[test]
    fn test_provider_aliases() {
        assert_eq!(Provider::from_name("claude"), Some(Provider::Anthropic));
        assert_eq!(Provider::from_name("GPT4"), Some(Provider::OpenAi));
        assert_eq!(Provider::from_name("llama"), Some(Provider::Groq));
        assert_eq!(Provider::from_name("gemini"), Some(Provider::Google));
        assert_eq!(Provider::from_name("Google"), Some(Provider::Google));
        assert_eq!(Provider::from_name("palm"), None);
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let result = HttpBackend::new(Provider::OpenAi, "  ", None, None, Duration::from_secs(5));
        assert!(matches!(result, Err(BackendError::MissingApiKey(_))));
    }

    #[tokio::test]
    async fn test_anthropic_text_extracted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content": [{"type": "text", "text": "{\"decision\": \"ZOMBIE\"}"}]}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new(
            Provider::Anthropic,
            "test-key",
            None,
            Some(&server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        let text = backend.classify(&json!({"id": "i-1"}), &telemetry()).await.unwrap();

        assert_eq!(text, r#"{"decision": "ZOMBIE"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_completions_text_extracted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer groq-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": [{"message": {"content": "{\"decision\": \"ACTIVE\"}"}}]}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new(
            Provider::Groq,
            "groq-key",
            None,
            Some(&server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        let text = backend.classify(&json!({}), &telemetry()).await.unwrap();

        assert_eq!(text, r#"{"decision": "ACTIVE"}"#);
    }

    #[tokio::test]
    async fn test_gemini_text_extracted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1beta/models/gemini-2.0-flash:generateContent")
            .match_header("x-goog-api-key", "gemini-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"candidates": [{"content": {"parts": [{"text": "{\"decision\": \"ZOMBIE\"}"}]}}]}"#,
            )
            .create_async()
            .await;

        let backend = HttpBackend::new(
            Provider::Google,
            "gemini-key",
            None,
            Some(&server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(backend.name(), "gemini-2.0-flash");
        let text = backend.classify(&json!({"id": "vm-1"}), &telemetry()).await.unwrap();

        assert_eq!(text, r#"{"decision": "ZOMBIE"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let backend = HttpBackend::new(
            Provider::OpenAi,
            "key",
            None,
            Some(&server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = backend.classify(&json!({}), &telemetry()).await.unwrap_err();

        assert!(matches!(err, BackendError::Status { status: 429, .. }));
    }
}
