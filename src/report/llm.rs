// OpenAI chat-completions streaming client using reqwest-eventsource.
//
// Posts the report prompt with `stream: true` and forwards each text delta as
// an `LlmEvent` over an mpsc channel. The SSE handler on the other end turns
// those into `token` / `done` / `error` events for the browser.

use futures_util::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::Prompt;
use crate::config::LlmConfig;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    Token { text: String },
    Complete { full_text: String },
    Error { message: String },
}

// ---------------------------------------------------------------------------
// OpenAiClient
// ---------------------------------------------------------------------------

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(api_key: String, config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn request_body(&self, prompt: &Prompt) -> Value {
        serde_json::json!({
            "model": self.model,
            "stream": true,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user }
            ]
        })
    }

    /// Stream a completion as `LlmEvent`s over `tx`.
    ///
    /// Returns when the stream completes, fails, or the receiver is dropped.
    /// Exactly one terminal event (`Complete` or `Error`) is sent unless the
    /// receiver went away first.
    pub async fn stream_chat(&self, prompt: &Prompt, tx: mpsc::Sender<LlmEvent>) -> anyhow::Result<()> {
        let request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&self.request_body(prompt));

        let mut es = match request.eventsource() {
            Ok(es) => es,
            Err(e) => {
                let _ = tx
                    .send(LlmEvent::Error {
                        message: format!("Failed to create event source: {e}"),
                    })
                    .await;
                return Ok(());
            }
        };

        let mut full_text = String::new();

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("completion stream opened");
                }
                Ok(Event::Message(msg)) => {
                    if msg.data.trim() == "[DONE]" {
                        debug!("completion stream done");
                        break;
                    }

                    if let Some(text) = parse_delta_content(&msg.data) {
                        if text.is_empty() {
                            continue;
                        }
                        full_text.push_str(&text);
                        if tx.send(LlmEvent::Token { text }).await.is_err() {
                            // Receiver dropped: client disconnected.
                            es.close();
                            return Ok(());
                        }
                    }

                    if let Some(reason) = parse_finish_reason(&msg.data) {
                        debug!(reason = %reason, "completion finished");
                        break;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(err) => {
                    warn!(?err, "completion stream error");
                    let _ = tx
                        .send(LlmEvent::Error {
                            message: extract_error_message(&err),
                        })
                        .await;
                    es.close();
                    return Ok(());
                }
            }
        }
        es.close();

        let terminal = if full_text.trim().is_empty() {
            LlmEvent::Error {
                message: "Model returned no content".to_string(),
            }
        } else {
            LlmEvent::Complete { full_text }
        };
        let _ = tx.send(terminal).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// Either a configured OpenAI client or disabled (no API key).
pub enum LlmClient {
    Active(OpenAiClient),
    Disabled,
}

impl LlmClient {
    pub fn from_config(config: &LlmConfig) -> Self {
        match config.api_key() {
            Some(key) => LlmClient::Active(OpenAiClient::new(key.to_string(), config)),
            None => LlmClient::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, LlmClient::Active(_))
    }

    /// Model name recorded on saved reports
    pub fn model(&self) -> &str {
        match self {
            LlmClient::Active(client) => &client.model,
            LlmClient::Disabled => "disabled",
        }
    }

    pub async fn stream_chat(&self, prompt: &Prompt, tx: mpsc::Sender<LlmEvent>) -> anyhow::Result<()> {
        match self {
            LlmClient::Active(client) => client.stream_chat(prompt, tx).await,
            LlmClient::Disabled => {
                let _ = tx
                    .send(LlmEvent::Error {
                        message: "Report generation is not configured (set OPENAI_API_KEY)".to_string(),
                    })
                    .await;
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SSE JSON parsing helpers
// ---------------------------------------------------------------------------

/// Extract `choices[0].delta.content` from a chunk.
///
/// Expected shape: `{ "choices": [ { "delta": { "content": "..." } } ] }`
pub(crate) fn parse_delta_content(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

/// Extract a non-null `choices[0].finish_reason`.
pub(crate) fn parse_finish_reason(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("choices")?
        .get(0)?
        .get("finish_reason")?
        .as_str()
        .map(|s| s.to_string())
}

fn extract_error_message(err: &reqwest_eventsource::Error) -> String {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _response) => {
            format!("Model API returned status {status}")
        }
        reqwest_eventsource::Error::Transport(e) => {
            format!("Network error: {e}")
        }
        other => format!("Stream error: {other}"),
    }
}
