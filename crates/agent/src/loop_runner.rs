//! The agent turn loop.
//!
//! A turn walks an explicit state machine:
//!
//! ```text
//! Deciding ──(tool calls)──▶ ExecutingTools ──▶ Deciding
//!    │
//!    └─(direct answer or round budget spent)──▶ Streaming ──▶ Done
//! ```
//!
//! Decide calls are non-streaming and offer the tool schemas. Once the model
//! stops asking for tools, or the round budget runs out, the answer is
//! requested again as a stream with tools withheld and forwarded token by
//! token. Tool-call scaffolding lives only in the turn's working copy of the
//! history; the caller's history is never touched.

use std::sync::Arc;

use async_trait::async_trait;
use scarlett_core::error::ProviderError;
use scarlett_core::message::{Message, MessageToolCall};
use scarlett_core::tool::{ToolCall, ToolRegistry, ToolResult};
use scarlett_providers::{AnswerChunk, CompletionClient, RetryNotice, RetryObserver};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::stream_event::AgentEvent;

/// Characters of a tool result kept in its `tool_done` summary.
const SUMMARY_CHARS: usize = 150;

/// Default cap on decide calls per turn.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;

/// Why a turn ended without a complete answer.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// A decide call, or opening the answer stream, failed fatally.
    #[error("{0}")]
    Provider(#[source] ProviderError),

    /// The answer stream broke after some text was produced.
    #[error("answer stream aborted: {source}")]
    StreamAborted {
        partial: String,
        #[source]
        source: ProviderError,
    },

    /// The event receiver went away mid-turn.
    #[error("client disconnected")]
    Disconnected { partial: String },
}

impl TurnError {
    /// Answer text produced before the turn ended. Empty when none was.
    pub fn partial(&self) -> &str {
        match self {
            Self::Provider(_) => "",
            Self::StreamAborted { partial, .. } | Self::Disconnected { partial } => partial,
        }
    }

    /// The provider error behind this failure, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(e) | Self::StreamAborted { source: e, .. } => Some(e),
            Self::Disconnected { .. } => None,
        }
    }
}

/// What a completed turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSummary {
    /// Exactly the concatenation of the `token` events sent
    pub full_response: String,
    /// Tools run, in execution order
    pub tools_used: Vec<String>,
    /// Decide calls made
    pub rounds: usize,
}

#[derive(Debug)]
enum TurnState {
    Deciding { round: usize },
    ExecutingTools { round: usize, request: Message },
    Streaming,
    Done,
}

/// The receiver hung up.
struct Closed;

async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> Result<(), Closed> {
    tx.send(event).await.map_err(|_| Closed)
}

/// Forwards decide-phase retries to the turn's event channel.
struct ChannelRetries<'a> {
    tx: &'a mpsc::Sender<AgentEvent>,
}

#[async_trait]
impl RetryObserver for ChannelRetries<'_> {
    async fn on_retry(&self, notice: &RetryNotice) {
        let _ = self.tx.send(AgentEvent::LlmRetry(notice.clone())).await;
    }
}

/// The core agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    client: CompletionClient,
    tools: Arc<ToolRegistry>,
    max_tool_rounds: usize,
}

impl AgentLoop {
    pub fn new(client: CompletionClient, tools: Arc<ToolRegistry>) -> Self {
        Self {
            client,
            tools,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    /// Set the maximum number of decide calls per turn.
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn client(&self) -> &CompletionClient {
        &self.client
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one turn over `history` (system prompt, past messages and the new
    /// user message), writing events to `tx` as they happen.
    pub async fn run_turn(
        &self,
        history: &[Message],
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<TurnSummary, TurnError> {
        let mut working = history.to_vec();
        let definitions = self.tools.definitions();
        let retries = ChannelRetries { tx: &tx };

        let mut tools_used = Vec::new();
        let mut full_response = String::new();
        let mut rounds = 0;
        let mut state = TurnState::Deciding { round: 1 };

        loop {
            state = match state {
                TurnState::Deciding { round } if round > self.max_tool_rounds => {
                    warn!(max = self.max_tool_rounds, "Tool round budget spent, streaming the answer");
                    TurnState::Streaming
                }
                TurnState::Deciding { round } => {
                    info!(round, max = self.max_tool_rounds, "Agent round");
                    rounds = round;
                    let decision = self
                        .client
                        .decide(&working, &definitions, &retries)
                        .await
                        .map_err(TurnError::Provider)?;
                    if decision.message.requests_tools() {
                        TurnState::ExecutingTools {
                            round,
                            request: decision.message,
                        }
                    } else {
                        // The direct answer is discarded and asked for again as a stream.
                        debug!(round, "Model answered without tools");
                        TurnState::Streaming
                    }
                }
                TurnState::ExecutingTools { round, request } => {
                    let calls = request.tool_calls.clone();
                    working.push(Message::assistant_tool_calls(request.content, calls.clone()));

                    let results = self
                        .execute_round(&calls, &tx)
                        .await
                        .map_err(|Closed| TurnError::Disconnected { partial: String::new() })?;
                    for result in results {
                        working.push(Message::tool_result(&result.call_id, result.content()));
                        tools_used.push(result.name);
                    }
                    TurnState::Deciding { round: round + 1 }
                }
                TurnState::Streaming => {
                    self.stream_answer(&working, &tx, &mut full_response).await?;
                    TurnState::Done
                }
                TurnState::Done => break,
            };
        }

        if !tools_used.is_empty() {
            emit(&tx, AgentEvent::ToolsSummary { tools: tools_used.clone() })
                .await
                .map_err(|Closed| TurnError::Disconnected {
                    partial: full_response.clone(),
                })?;
        }

        info!(rounds, tools = tools_used.len(), chars = full_response.len(), "Turn complete");
        Ok(TurnSummary {
            full_response,
            tools_used,
            rounds,
        })
    }

    /// Run one round of tool calls concurrently. Events and results come out
    /// in request order regardless of completion order.
    async fn execute_round(
        &self,
        calls: &[MessageToolCall],
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<Vec<ToolResult>, Closed> {
        let calls: Vec<ToolCall> = calls
            .iter()
            .map(|tc| ToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                arguments: tc.parsed_arguments(),
            })
            .collect();

        for call in &calls {
            emit(
                tx,
                AgentEvent::ToolStart {
                    tool: call.name.clone(),
                    call_id: call.id.clone(),
                    args: call.arguments.clone(),
                },
            )
            .await?;
        }

        let handles: Vec<_> = calls
            .iter()
            .map(|call| {
                let tools = Arc::clone(&self.tools);
                let call = call.clone();
                tokio::spawn(async move { tools.execute(&call).await })
            })
            .collect();

        let mut results = Vec::with_capacity(calls.len());
        for (call, handle) in calls.iter().zip(handles) {
            let started = std::time::Instant::now();
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(tool = %call.name, call_id = %call.id, error = %e, "Tool task did not complete");
                    ToolResult::failed(&call.id, &call.name, format!("Error executing {}: handler crashed", call.name))
                }
            };
            debug!(tool = %call.name, success = result.success, waited_ms = started.elapsed().as_millis() as u64, "Tool finished");

            emit(
                tx,
                AgentEvent::ToolDone {
                    tool: result.name.clone(),
                    call_id: result.call_id.clone(),
                    summary: summarize(&result.content()),
                },
            )
            .await?;
            if let Some(descriptor) = result.pending() {
                emit(tx, AgentEvent::ConfirmAction(descriptor.clone())).await?;
            }
            results.push(result);
        }

        Ok(results)
    }

    /// Stream the final answer, appending each fragment to `full_response`
    /// before forwarding it.
    async fn stream_answer(
        &self,
        working: &[Message],
        tx: &mpsc::Sender<AgentEvent>,
        full_response: &mut String,
    ) -> Result<(), TurnError> {
        let mut chunks = self.client.answer_stream(working);

        while let Some(item) = chunks.recv().await {
            let event = match item {
                Ok(AnswerChunk::Retry(notice)) => AgentEvent::LlmRetry(notice),
                Ok(AnswerChunk::Text(token)) => {
                    full_response.push_str(&token);
                    AgentEvent::Token { token }
                }
                Err(source) if full_response.is_empty() => return Err(TurnError::Provider(source)),
                Err(source) => {
                    return Err(TurnError::StreamAborted {
                        partial: std::mem::take(full_response),
                        source,
                    });
                }
            };
            if emit(tx, event).await.is_err() {
                warn!(chars = full_response.len(), "Client went away during the answer stream");
                return Err(TurnError::Disconnected {
                    partial: std::mem::take(full_response),
                });
            }
        }
        Ok(())
    }
}

/// First `SUMMARY_CHARS` characters of a tool result, with `...` when cut.
pub fn summarize(result: &str) -> String {
    match result.char_indices().nth(SUMMARY_CHARS) {
        Some((cut, _)) => format!("{}...", &result[..cut]),
        None => result.to_string(),
    }
}
