use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::Config;
use crate::constants::SYSTEM_PROMPT;
use crate::transcript::{ChatTurn, Role};

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("request to the completion service failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("completion service rejected the API key ({status}): {body}")]
    Authentication { status: StatusCode, body: String },
    #[error("completion service rate limit or quota exceeded: {0}")]
    RateLimited(String),
    #[error("completion service returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("failed to parse completion response: {0}")]
    Parse(String),
    #[error("completion response contained no message")]
    EmptyResponse,
}

// Structures matching the OpenAI-compatible /chat/completions endpoint
#[derive(Serialize, Debug)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Serialize, Debug, PartialEq)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}

/// Client for the hosted chat completion service.
#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    history_window: usize,
}

impl CompletionClient {
    pub fn new(config: &Config) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(CompletionError::Network)?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url),
            model: config.model.clone(),
            history_window: config.history_window,
        })
    }

    /// Asks the model for a reply to `user_text`, given the turns before it.
    #[instrument(skip(self, history, user_text), fields(model = %self.model, history = history.len()))]
    pub async fn complete(
        &self,
        history: &[ChatTurn],
        user_text: &str,
    ) -> Result<String, CompletionError> {
        let payload = ChatCompletionRequest {
            model: &self.model,
            messages: build_messages(history, user_text, self.history_window),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(CompletionError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Completion request failed");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    CompletionError::Authentication { status, body }
                }
                StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited(body),
                _ => CompletionError::Api { status, body },
            });
        }

        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| CompletionError::Parse(e.to_string()))?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(CompletionError::EmptyResponse)?;

        debug!(?reply, "Received completion");
        Ok(reply)
    }
}

/// System prompt, the last `window` turns of history, then the new message.
fn build_messages<'a>(
    history: &'a [ChatTurn],
    user_text: &'a str,
    window: usize,
) -> Vec<RequestMessage<'a>> {
    let recent = &history[history.len().saturating_sub(window)..];
    let mut messages = Vec::with_capacity(recent.len() + 2);
    messages.push(RequestMessage {
        role: "system",
        content: SYSTEM_PROMPT,
    });
    messages.extend(recent.iter().map(|turn| RequestMessage {
        role: match turn.role {
            Role::User => "user",
            Role::Bot => "assistant",
        },
        content: &turn.text,
    }));
    messages.push(RequestMessage {
        role: "user",
        content: user_text,
    });
    messages
}
