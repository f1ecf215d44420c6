//! OpenAI-compatible streaming chat completions client.

use crate::provider::{ChatRequest, ChatStream, ModelClient, StreamEvent};
use crate::sse::SseDecoder;
use anyhow::Context;
use async_trait::async_trait;
use ember_common::{LlmConfig, ToolCall};
use futures_util::{stream, Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::time::Duration;

/// Streaming client for `/chat/completions`.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            // No overall timeout: a streamed reply may legitimately take minutes.
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(&config.base_url, &config.api_key)
    }

    fn request_body(request: &ChatRequest) -> serde_json::Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
        });
        if !request.tools.is_empty() {
            let tools: Vec<_> = request
                .tools
                .iter()
                .map(|spec| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": spec.name,
                            "description": spec.description,
                            "parameters": spec.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_chat(&self, request: ChatRequest) -> anyhow::Result<ChatStream> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Opening chat completion stream"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(&request))
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Model API error ({}): {}", status, body);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        Ok(Box::pin(decode_events(body)))
    }
}

// ============================================================================
// Chunk decoding
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles tool calls streamed as per-index fragments.
///
/// A call is complete once a higher index starts, a `finish_reason` arrives,
/// or the stream ends. Each call is emitted exactly once, in index order.
#[derive(Debug, Default)]
struct ToolCallAssembler {
    open: BTreeMap<usize, PartialCall>,
}

impl ToolCallAssembler {
    fn push(&mut self, fragment: ToolCallFragment) -> Vec<ToolCall> {
        let finished = self.take_below(fragment.index);

        let call = self.open.entry(fragment.index).or_default();
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            call.id = id;
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name {
                call.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                call.arguments.push_str(&arguments);
            }
        }
        finished
    }

    fn take_below(&mut self, index: usize) -> Vec<ToolCall> {
        let still_open = self.open.split_off(&index);
        let done = std::mem::replace(&mut self.open, still_open);
        done.into_iter().map(Self::complete).collect()
    }

    fn finish(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.open)
            .into_iter()
            .map(Self::complete)
            .collect()
    }

    fn complete((index, call): (usize, PartialCall)) -> ToolCall {
        let id = if call.id.is_empty() {
            format!("call_{index}")
        } else {
            call.id
        };
        ToolCall::new(id, call.name, call.arguments)
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct DecodeState {
    body: ByteStream,
    decoder: SseDecoder,
    assembler: ToolCallAssembler,
    ready: VecDeque<anyhow::Result<StreamEvent>>,
    done: bool,
}

impl DecodeState {
    fn handle_payload(&mut self, payload: &str) {
        if self.done {
            return;
        }
        let payload = payload.trim();
        if payload.is_empty() {
            return;
        }
        if payload == "[DONE]" {
            self.finish();
            return;
        }

        let chunk: ChunkPayload = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.fail(anyhow::anyhow!("Malformed stream chunk: {e}"));
                return;
            }
        };

        if let Some(error) = chunk.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| error.to_string());
            self.fail(anyhow::anyhow!("Model stream error: {message}"));
            return;
        }

        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                    self.ready.push_back(Ok(StreamEvent::ContentDelta(content)));
                }
                for fragment in delta.tool_calls.unwrap_or_default() {
                    for call in self.assembler.push(fragment) {
                        self.ready.push_back(Ok(StreamEvent::ToolCallFinished(call)));
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.flush_calls();
            }
        }
    }

    fn flush_calls(&mut self) {
        for call in self.assembler.finish() {
            self.ready.push_back(Ok(StreamEvent::ToolCallFinished(call)));
        }
    }

    fn finish(&mut self) {
        self.flush_calls();
        self.done = true;
    }

    fn fail(&mut self, error: anyhow::Error) {
        self.ready.push_back(Err(error));
        self.done = true;
    }
}

/// Turn a raw SSE body into model events.
fn decode_events<S>(body: S) -> impl Stream<Item = anyhow::Result<StreamEvent>> + Send
where
    S: Stream<Item = reqwest::Result<Vec<u8>>> + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        assembler: ToolCallAssembler::default(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((event, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for payload in state.decoder.push(&chunk) {
                        state.handle_payload(&payload);
                    }
                }
                Some(Err(e)) => {
                    state.fail(anyhow::Error::new(e).context("Model stream interrupted"));
                }
                None => {
                    if let Some(payload) = state.decoder.finish() {
                        state.handle_payload(&payload);
                    }
                    state.finish();
                }
            }
        }
    })
}
