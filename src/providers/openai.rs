use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{CompletionProvider, ProviderError};
use crate::config::CompletionConfig;

/// Client for an OpenAI-compatible chat-completions API
#[derive(Debug, Clone)]
pub struct OpenAi {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

/// Chat-completions request body
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    /// `null` when the model produced no text
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

impl ChatRequest {
    /// A request with a single user message.
    pub fn user(model: impl Into<String>, prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: Some(prompt.into()),
            }],
            temperature,
        }
    }
}

impl OpenAi {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &CompletionConfig) -> Result<Self, ProviderError> {
        Self::new(
            config.api_key.clone(),
            config.endpoint.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut builder = self.client.post(self.chat_url()).json(request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Completion API error ({}): {}", status, message);
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message,
            });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }

    /// Text of the first choice, empty when the model returned none.
    pub fn extract_text(response: &ChatResponse) -> Option<String> {
        let choice = response.choices.first()?;
        Some(choice.message.content.clone().unwrap_or_default())
    }
}

#[async_trait]
impl CompletionProvider for OpenAi {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, ProviderError> {
        let request = ChatRequest::user(&self.model, prompt, temperature);
        debug!(model = %self.model, prompt_chars = prompt.len(), "requesting completion");
        let response = self.chat(&request).await?;
        Self::extract_text(&response).ok_or(ProviderError::EmptyCompletion)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest::user("gpt-3.5-turbo", "How many customers?", 0.2);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "How many customers?");
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_chat_url_handles_trailing_slash() {
        let client = OpenAi::new("k", "https://api.openai.com/", "m", Duration::from_secs(5)).unwrap();
        assert_eq!(client.chat_url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_extract_text_from_first_choice() {
        let response: ChatResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "{\"query\": \"SELECT 1\"}"}},
                {"index": 1, "message": {"role": "assistant", "content": "ignored"}}
            ]
        }))
        .unwrap();
        assert_eq!(
            OpenAi::extract_text(&response).as_deref(),
            Some("{\"query\": \"SELECT 1\"}")
        );
    }

    #[test]
    fn test_null_content_becomes_empty_text() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        }))
        .unwrap();
        assert_eq!(OpenAi::extract_text(&response).as_deref(), Some(""));

        let empty: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(OpenAi::extract_text(&empty), None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_request_failure() {
        let client = OpenAi::new("k", "http://127.0.0.1:9", "m", Duration::from_secs(2)).unwrap();
        let err = client.complete("hi", 0.2).await.unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed(_)));
    }
}
