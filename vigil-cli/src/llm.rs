//! OpenRouter-compatible chat-completions client for the advisor path.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vigil_broker::{AdvisorError, AdvisorModel, ChatMessage, Completion, CompletionParams};

/// HTTP advisor client speaking the chat-completions wire format.
#[derive(Clone)]
pub struct HttpAdvisor {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpAdvisor {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl AdvisorModel for HttpAdvisor {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: CompletionParams,
    ) -> Result<Completion, AdvisorError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: Some(params.temperature),
            max_tokens: Some(params.max_tokens),
        };

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AdvisorError::Timeout(Duration::from_secs(30))
                } else {
                    AdvisorError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            return Err(AdvisorError::Api {
                status: status.as_u16(),
                body: snippet,
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|err| AdvisorError::Transport(err.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .map(|message| message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(AdvisorError::Empty);
        }
        Ok(Completion { content })
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Deserialize)]
struct ChatMessageOut {
    content: String,
}
