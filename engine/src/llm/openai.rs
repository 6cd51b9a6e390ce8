//! OpenAI-compatible chat-completions provider
//!
//! Works with any endpoint that speaks the `/chat/completions` shape
//! (OpenRouter, OpenAI, vLLM, ...). The API key is sent as a bearer token.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ChatMessage, LLMError, LLMProvider, Result};
use crate::config::{ApiKey, LLMConfig};

#[derive(Debug, Clone)]
pub struct OpenAICompatibleProvider {
    base_url: String,
    model: String,
    api_key: Option<ApiKey>,
    max_tokens: u32,
    temperature: f64,
    client: Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAICompatibleProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<ApiKey>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LLMError::ProviderUnavailable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            max_tokens: 1500,
            temperature: 0.7,
            client,
        })
    }

    pub fn from_config(config: &LLMConfig) -> Result<Self> {
        Ok(Self::new(
            &config.base_url,
            &config.model,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )?
        .with_sampling(config.max_tokens, config.temperature))
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f64) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn check_health(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| LLMError::AuthenticationFailed("API key not configured".to_string()))?;

        let url = format!("{}/chat/completions", self.base_url);
        let payload = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!(
            "Chat completion request: model={}, messages={}, total_chars={}",
            self.model,
            messages.len(),
            messages.iter().map(|m| m.content.len()).sum::<usize>()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!("Cannot connect to {}", self.base_url))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    LLMError::AuthenticationFailed(body)
                }
                StatusCode::TOO_MANY_REQUESTS => LLMError::RateLimitExceeded,
                _ => LLMError::Api {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        let data: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        data.choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?
            .message
            .content
            .ok_or_else(|| LLMError::ParseError("Empty content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAICompatibleProvider {
        OpenAICompatibleProvider::new(
            format!("{}/v1/", server.uri()),
            "test-model",
            Some(ApiKey::new("sk-test")),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_shape_and_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "max_tokens": 1500,
                "temperature": 0.7,
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hi"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello!"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = provider(&server)
            .generate(&[ChatMessage::system("sys"), ChatMessage::user("hi")])
            .await
            .unwrap();
        assert_eq!(reply, "hello!");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        for (code, check) in [
            (401u16, "auth"),
            (403, "auth"),
            (429, "rate"),
            (500, "api"),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(code).set_body_string("nope"))
                .mount(&server)
                .await;

            let err = provider(&server)
                .generate(&[ChatMessage::user("hi")])
                .await
                .unwrap_err();
            match check {
                "auth" => assert!(matches!(err, LLMError::AuthenticationFailed(_))),
                "rate" => assert!(matches!(err, LLMError::RateLimitExceeded)),
                _ => assert!(matches!(err, LLMError::Api { status: 500, .. })),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_missing_key_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let provider =
            OpenAICompatibleProvider::new(server.uri(), "m", None, Duration::from_secs(5)).unwrap();
        assert!(!provider.check_health().await);
        assert!(matches!(
            provider.generate(&[ChatMessage::user("hi")]).await,
            Err(LLMError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let provider = OpenAICompatibleProvider::new(
            "http://127.0.0.1:9",
            "m",
            Some(ApiKey::new("k")),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = provider
            .generate(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LLMError::ProviderUnavailable(_) | LLMError::NetworkError(_) | LLMError::Timeout
        ));
    }
}
