//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what let the assistant act: search the web, read a page, tell
//! the time, do arithmetic, manage the calendar. Destructive tools never act
//! directly; they return [`ToolOutput::PendingConfirmation`] and the effect
//! waits in the [`PendingActionStore`](crate::pending::PendingActionStore).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ToolError;
use crate::pending::PendingActionDescriptor;
use crate::provider::ToolDefinition;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON object
    pub arguments: serde_json::Value,
}

/// What a tool produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Plain text fed back to the model.
    Text(String),

    /// A destructive intent was registered and awaits user confirmation.
    PendingConfirmation(PendingActionDescriptor),
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    /// The text the model sees for this output.
    ///
    /// A pending confirmation is rendered as a JSON payload with
    /// `status: "pending_confirmation"` so the model tells the user an
    /// approval is needed instead of claiming the effect happened.
    pub fn to_model_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::PendingConfirmation(descriptor) => {
                let mut payload = serde_json::Map::new();
                payload.insert("status".into(), "pending_confirmation".into());
                payload.insert("action_id".into(), descriptor.action_id.clone().into());
                payload.insert("kind".into(), descriptor.kind.clone().into());
                payload.insert(
                    "message".into(),
                    "Waiting for the user to confirm this action. It has NOT been performed yet.".into(),
                );
                for (key, value) in &descriptor.summary {
                    payload.entry(key.clone()).or_insert_with(|| value.clone());
                }
                serde_json::Value::Object(payload).to_string()
            }
        }
    }
}

/// The result of a tool call as the agent loop sees it.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that was asked for
    pub name: String,

    /// Whether the tool executed successfully
    pub success: bool,

    pub output: ToolOutput,
}

impl ToolResult {
    pub fn failed(call_id: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            success: false,
            output: ToolOutput::Text(message.into()),
        }
    }

    /// Text appended to the working conversation as the tool message.
    pub fn content(&self) -> String {
        self.output.to_model_text()
    }

    pub fn pending(&self) -> Option<&PendingActionDescriptor> {
        match &self.output {
            ToolOutput::PendingConfirmation(descriptor) => Some(descriptor),
            ToolOutput::Text(_) => None,
        }
    }
}

/// The core Tool trait.
///
/// Each tool (web_search, fetch_url, calculate, ...) implements this trait.
/// Tools are registered in the ToolRegistry and made available to the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculate").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// Definitions come out in registration order so the tool list sent to the
/// model is stable between requests.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&slot| self.tools[slot].as_ref())
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call. Never fails: an unknown name or a tool error
    /// becomes a textual result the model can read.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            tracing::warn!(tool = %call.name, "Model asked for an unknown tool");
            return ToolResult::failed(&call.id, &call.name, format!("Unknown tool: {}", call.name));
        };

        match tool.execute(call.arguments.clone()).await {
            Ok(output) => ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                success: true,
                output,
            },
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                ToolResult::failed(&call.id, &call.name, format!("Error executing {}: {e}", call.name))
            }
        }
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
