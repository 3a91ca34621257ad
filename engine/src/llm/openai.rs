//! OpenAI-compatible streaming client
//!
//! Talks to any server exposing `POST {base_url}/chat/completions` with
//! server-sent event streaming (OpenAI, vLLM, llama.cpp server, Ollama's
//! OpenAI endpoint, ...). Only the first choice is streamed back.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{ChunkStream, CompletionChunk, LLMError, ModelClient, Result};
use crate::chat::{ConversationConfig, Message};

pub struct OpenAIProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAIProvider {
    /// Create a new provider
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. "https://api.openai.com/v1"
    /// * `api_key` - Bearer token, omitted from requests when `None`
    /// * `timeout` - Upper bound for a whole request, stream included
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LLMError::ProviderUnavailable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Build the JSON body of a streaming chat completion request
///
/// `stop` is omitted when empty and `max_tokens` when 0.
pub fn build_request_body(messages: &[Message], config: &ConversationConfig) -> serde_json::Value {
    let api_messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|msg| {
            json!({
                "role": msg.role().as_str(),
                "content": msg.content(),
            })
        })
        .collect();

    let mut payload = json!({
        "model": config.model.name(),
        "messages": api_messages,
        "stream": true,
        "temperature": config.temperature,
        "top_p": config.top_p,
        "n": config.n,
        "presence_penalty": config.presence_penalty,
        "frequency_penalty": config.frequency_penalty,
    });

    if !config.stop.is_empty() {
        payload["stop"] = json!(config.stop);
    }
    if config.max_tokens > 0 {
        payload["max_tokens"] = json!(config.max_tokens);
    }

    payload
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

/// Meaning of one line of a server-sent event stream
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine {
    /// Text appended to the first choice
    Delta(String),
    /// `data: [DONE]`
    Done,
    /// Blank lines, comments, other fields and events without first-choice text
    Skip,
}

/// Interpret one line of the event stream
pub fn parse_sse_line(line: &str) -> Result<SseLine> {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();

    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let event: StreamResponse =
        serde_json::from_str(data).map_err(|e| LLMError::ParseError(e.to_string()))?;

    if let Some(error) = event.error {
        return Err(LLMError::InvalidRequest(error.message));
    }

    let delta = event
        .choices
        .into_iter()
        .find(|choice| choice.index == 0)
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty());

    Ok(match delta {
        Some(content) => SseLine::Delta(content),
        None => SseLine::Skip,
    })
}

fn map_send_error(base_url: &str, e: reqwest::Error) -> LLMError {
    if e.is_timeout() {
        LLMError::Timeout
    } else if e.is_connect() {
        LLMError::ProviderUnavailable(format!("Cannot connect to {}", base_url))
    } else {
        LLMError::NetworkError(e.to_string())
    }
}

#[async_trait]
impl ModelClient for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_completion(
        &self,
        messages: &[Message],
        config: &ConversationConfig,
    ) -> Result<ChunkStream> {
        let payload = build_request_body(messages, config);

        tracing::debug!(
            model = config.model.name(),
            messages = messages.len(),
            "opening completion stream"
        );

        let mut request = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(&self.base_url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LLMError::AuthenticationFailed(text));
            } else if status.as_u16() == 429 {
                return Err(LLMError::RateLimitExceeded);
            } else {
                return Err(LLMError::InvalidRequest(format!("{}: {}", status, text)));
            }
        }

        let mut bytes = response.bytes_stream();

        Ok(Box::pin(stream! {
            // Raw bytes, so a UTF-8 sequence split across reads stays intact
            let mut buffer: Vec<u8> = Vec::new();

            'read: loop {
                let next = bytes.next().await;
                let at_end = next.is_none();

                match next {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        yield Err(if e.is_timeout() {
                            LLMError::Timeout
                        } else {
                            LLMError::NetworkError(e.to_string())
                        });
                        break 'read;
                    }
                    // Flush a final line that has no trailing newline
                    None => buffer.push(b'\n'),
                }

                while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&line[..line_end]);

                    match parse_sse_line(&line) {
                        Ok(SseLine::Delta(delta)) => yield Ok(CompletionChunk { delta }),
                        Ok(SseLine::Done) => break 'read,
                        Ok(SseLine::Skip) => {}
                        Err(e) => {
                            yield Err(e);
                            break 'read;
                        }
                    }
                }

                if at_end {
                    break;
                }
            }
        }))
    }
}
