//! Shared test helpers for agent tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use scarlett_core::error::{ProviderError, ToolError};
use scarlett_core::message::{Message, MessageToolCall};
use scarlett_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk};
use scarlett_core::tool::{Tool, ToolOutput};
use tokio::sync::mpsc;

type StreamScript = Result<Vec<Result<StreamChunk, ProviderError>>, ProviderError>;

/// A mock provider that plays back scripted decide responses and streams.
///
/// Each `complete` call pops the next decide outcome, each `stream` call the
/// next stream. Panics if more calls are made than were scripted.
pub struct SequentialMockProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>, streams: Vec<StreamScript>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            streams: Mutex::new(streams.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Model answers directly, then streams `answer` in the given fragments.
    pub fn direct_answer(fragments: &[&str]) -> Self {
        Self::new(vec![Ok(make_text_response("draft"))], vec![Ok(text_chunks(fragments))])
    }

    /// Every request seen so far, decide and stream alike.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn decide_calls(&self) -> usize {
        self.requests().iter().filter(|r| !r.stream).count()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("SequentialMockProvider: no more decide responses")
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let items = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .expect("SequentialMockProvider: no more streams")?;
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(item).unwrap();
        }
        Ok(rx)
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: None,
        model: "mock-model".into(),
    }
}

/// Create a response requesting the given tool calls.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_tool_calls("", tool_calls),
        usage: None,
        model: "mock-model".into(),
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

pub fn text_chunks(fragments: &[&str]) -> Vec<Result<StreamChunk, ProviderError>> {
    fragments
        .iter()
        .map(|f| {
            Ok(StreamChunk {
                content: Some(f.to_string()),
                ..StreamChunk::default()
            })
        })
        .collect()
}

pub fn congested() -> ProviderError {
    ProviderError::ApiError {
        status_code: 429,
        message: "queue_exceeded".into(),
    }
}

/// Tool that echoes its `text` argument after sleeping `delay_ms`.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let delay = arguments["delay_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        Ok(ToolOutput::Text(arguments["text"].as_str().unwrap_or("<none>").to_string()))
    }
}

/// Tool that always fails.
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "backend exploded".into(),
        })
    }
}

/// Tool that panics.
pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panicky"
    }

    fn description(&self) -> &str {
        "Panics"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        panic!("handler bug");
    }
}
