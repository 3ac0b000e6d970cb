use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{CompletionEvent, CompletionProvider, CompletionRequest, LlmError, PromptMessage};

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<PromptMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format
/// (OpenAI itself, Gemini's compatibility layer, local servers).
pub struct OpenAiCompatible {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatible {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let body = ChatCompletionsRequest {
            model: &self.model,
            messages: request.wire_messages(),
            stream,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        self.client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
    }
}

impl CompletionProvider for OpenAiCompatible {
    fn model(&self) -> &str {
        &self.model
    }

    fn stream_chat<'a>(
        &'a self,
        request: CompletionRequest,
        tx: mpsc::Sender<CompletionEvent>,
    ) -> BoxFuture<'a, Result<(), LlmError>> {
        Box::pin(async move {
            let mut source = EventSource::new(self.request(&request, true))
                .map_err(|e| LlmError::Stream(e.to_string()))?;

            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => debug!("Completion stream open ({})", self.model),
                    Ok(Event::Message(message)) => {
                        if handle_payload(&message.data, &tx).await? {
                            source.close();
                            return Ok(());
                        }
                    }
                    Err(EventSourceError::StreamEnded) => {
                        source.close();
                        break;
                    }
                    Err(err) => {
                        source.close();
                        return Err(stream_error(err).await);
                    }
                }
            }

            // Some servers close the stream without sending [DONE]
            debug!("Completion stream ended without [DONE]");
            tx.send(CompletionEvent::Done)
                .await
                .map_err(|_| LlmError::ChannelClosed)
        })
    }

    fn complete<'a>(&'a self, request: CompletionRequest) -> BoxFuture<'a, Result<String, LlmError>> {
        Box::pin(async move {
            let response = self.request(&request, false).send().await?;
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::Status { status, body });
            }
            let body: Value = response.json().await?;

            let text = body["choices"][0]["message"]["content"]
                .as_str()
                .ok_or_else(|| LlmError::Decode("missing choices[0].message.content".into()))?
                .trim()
                .to_string();

            if text.is_empty() {
                return Err(LlmError::Empty);
            }
            Ok(text)
        })
    }
}

async fn stream_error(err: EventSourceError) -> LlmError {
    match err {
        EventSourceError::InvalidStatusCode(status, response) => LlmError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        },
        EventSourceError::Transport(e) => LlmError::Http(e),
        other => LlmError::Stream(other.to_string()),
    }
}

/// Forward one event payload. Returns true once the stream is finished.
async fn handle_payload(payload: &str, tx: &mpsc::Sender<CompletionEvent>) -> Result<bool, LlmError> {
    match parse_payload(payload)? {
        Some(CompletionEvent::Done) => {
            tx.send(CompletionEvent::Done)
                .await
                .map_err(|_| LlmError::ChannelClosed)?;
            Ok(true)
        }
        Some(event) => {
            tx.send(event).await.map_err(|_| LlmError::ChannelClosed)?;
            Ok(false)
        }
        None => Ok(false),
    }
}

/// Decode one `data:` payload of a chat-completions stream.
fn parse_payload(payload: &str) -> Result<Option<CompletionEvent>, LlmError> {
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(Some(CompletionEvent::Done));
    }

    let value: Value =
        serde_json::from_str(payload).map_err(|e| LlmError::Decode(e.to_string()))?;

    if let Some(error) = value.get("error") {
        warn!("Provider reported an error mid-stream: {}", error);
        return Err(LlmError::Decode(error.to_string()));
    }

    match value["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => Ok(Some(CompletionEvent::Delta(text.to_string()))),
        _ => Ok(None),
    }
}
