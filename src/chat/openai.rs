//! `OpenAI` chat completions over HTTP

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::ChatCompletion;
use crate::conversation::{ConversationTurn, Role};
use crate::{Error, Result};

/// Chat completion client for `POST /v1/chat/completions`
pub struct OpenAiChatClient {
    client: Client,
    api_key: SecretString,
    model: String,
    endpoint: String,
}

impl OpenAiChatClient {
    /// Create a client against `base_url` (e.g. `https://api.openai.com`)
    ///
    /// The key is not validated here: an empty key is reported as a
    /// configuration error on the first request, so the person can still
    /// enter one before speaking.
    #[must_use]
    pub fn new(api_key: SecretString, model: impl Into<String>, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.into(),
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
        }
    }

    /// Model identifier sent with each request
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChatClient {
    async fn complete(&self, turns: &[ConversationTurn]) -> Result<ConversationTurn> {
        let key = self.api_key.expose_secret();
        if key.is_empty() {
            return Err(Error::Config("OpenAI API key is not set".to_string()));
        }

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: turns
                .iter()
                .map(|t| Message {
                    role: t.role.as_str(),
                    content: &t.content,
                })
                .collect(),
        };

        tracing::debug!(model = %self.model, turns = turns.len(), "requesting chat completion");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat completion request failed");
                Error::Connectivity(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion API error");
            return Err(Error::Connectivity(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Connectivity(e.to_string()))?;

        let content = parse_reply(&body)?;
        tracing::debug!(response_len = content.len(), "chat completion received");
        Ok(ConversationTurn::assistant(content))
    }
}

/// Pull the assistant text out of a completion response body
fn parse_reply(body: &[u8]) -> Result<String> {
    let parsed: ChatCompletionResponse = serde_json::from_slice(body).map_err(|e| {
        tracing::error!(error = %e, "failed to parse chat completion response");
        Error::ResponseFormat(e.to_string())
    })?;

    let message = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::ResponseFormat("response has no choices".to_string()))?
        .message;

    if message.role.is_some_and(|r| r != Role::Assistant) {
        return Err(Error::ResponseFormat(
            "first choice is not an assistant message".to_string(),
        ));
    }

    message
        .content
        .ok_or_else(|| Error::ResponseFormat("message has no content".to_string()))
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    role: Option<Role>,
    content: Option<String>,
}
