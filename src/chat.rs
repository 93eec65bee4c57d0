//! Chat-completion client for the hosted model service.
//!
//! Speaks the OpenAI-compatible `POST {base_url}/chat/completions` protocol
//! with bearer-token authentication. One attempt per call, bounded by the
//! configured timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::error::{RagError, Result};
use crate::models::ChatMessage;
use crate::traits::ChatModel;

const SERVICE_LABEL: &str = "chat model";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ArkChatClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl ArkChatClient {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            http,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|_| {
            RagError::Configuration("ARK_API_KEY contains invalid header characters".to_string())
        })?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::to_vec(&ChatRequest {
            model: &self.model,
            messages,
        })?;

        debug!(model = %self.model, messages = messages.len(), "chat completion request");

        let resp = self
            .http
            .post(self.endpoint())
            .headers(self.headers()?)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(model = %self.model, error = %e, "chat completion request failed");
                RagError::network(&self.base_url, e)
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RagError::network(&self.base_url, e))?;

        if !status.is_success() {
            warn!(model = %self.model, status = status.as_u16(), "chat model returned error status");
            return Err(RagError::RemoteRejection {
                service: SERVICE_LABEL,
                status: status.as_u16(),
                code: None,
                body: text,
            });
        }

        let answer = parse_completion(status.as_u16(), &text)?;
        info!(model = %self.model, chars = answer.len(), "chat completion success");
        Ok(answer)
    }
}

#[async_trait]
impl ChatModel for ArkChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        self.complete(messages).await
    }
}

/// Extract the first choice's content. A reply with no choices, or a first
/// choice without content, counts as a rejection.
fn parse_completion(status: u16, body: &str) -> Result<String> {
    let resp: ChatResponse = serde_json::from_str(body)?;
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| RagError::RemoteRejection {
            service: SERVICE_LABEL,
            status,
            code: None,
            body: body.to_string(),
        })
}
