//! Optional language-model collaborator used to distil recalled memories.
//!
//! The recall layer treats it as opaque: a prompt goes in, text comes out, or a
//! [`TransformError`] says why not.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TransformBackend;
use crate::error::TransformError;

#[async_trait]
pub trait TextTransform: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, TransformError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

/// Any server speaking the OpenAI chat-completions protocol (llama-server, vLLM, hosted APIs)
pub struct OpenAiCompatibleTransform {
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl OpenAiCompatibleTransform {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("Text transform initialized with backend: {}", base_url);
        Self {
            base_url,
            model: model.into(),
            api_key,
            timeout,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait]
impl TextTransform for OpenAiCompatibleTransform {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    async fn complete(&self, prompt: &str) -> Result<String, TransformError> {
        debug!("Requesting completion from {}", self.completions_url());
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: 2000,
            temperature: 0.3,
            stream: false,
        };

        let mut builder = self.http_client.post(self.completions_url()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransformError::TimedOut(self.timeout)
            } else {
                TransformError::Unavailable(format!("request failed: {}", e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransformError::Unavailable(format!("backend returned {}: {}", status, body)));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| TransformError::Malformed(format!("failed to parse response: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(TransformError::Malformed("response contained no text".into()));
        }
        Ok(content)
    }
}

/// Construct the configured collaborator, if any.
pub fn build_transform(backend: &TransformBackend) -> Option<Arc<dyn TextTransform>> {
    match backend {
        TransformBackend::None => None,
        TransformBackend::OpenAiCompatible {
            url,
            model,
            api_key,
            timeout,
        } => Some(Arc::new(OpenAiCompatibleTransform::new(
            url.clone(),
            model.clone(),
            api_key.clone(),
            *timeout,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform(url: &str) -> OpenAiCompatibleTransform {
        OpenAiCompatibleTransform::new(url, "local-llm", Some("secret".into()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn returns_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"We chose SQLite."}}]}"#)
            .create_async()
            .await;

        let text = transform(&server.url()).complete("what did we choose?").await.unwrap();
        assert_eq!(text, "We chose SQLite.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body("loading model")
            .create_async()
            .await;

        let err = transform(&server.url()).complete("hi").await.unwrap_err();
        assert!(matches!(err, TransformError::Unavailable(ref msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = transform(&server.url()).complete("hi").await.unwrap_err();
        assert!(matches!(err, TransformError::Malformed(_)));
    }

    #[tokio::test]
    async fn empty_choice_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let err = transform(&server.url()).complete("hi").await.unwrap_err();
        assert!(matches!(err, TransformError::Malformed(_)));
    }

    #[test]
    fn none_backend_builds_nothing() {
        assert!(build_transform(&TransformBackend::None).is_none());
        let backend = TransformBackend::OpenAiCompatible {
            url: "http://localhost:8080/".into(),
            model: "local-llm".into(),
            api_key: None,
            timeout: Duration::from_secs(1),
        };
        assert_eq!(build_transform(&backend).unwrap().name(), "openai_compatible");
    }
}
