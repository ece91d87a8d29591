//! Agent-level turn events.
//!
//! `AgentEvent` is what the loop writes to its channel during a turn. The
//! emitter turns each one into a named push message for the client.

use scarlett_core::pending::PendingActionDescriptor;
use scarlett_providers::RetryNotice;
use serde::Serialize;

/// Events emitted by the agent while a turn runs.
///
/// Ordering within a turn:
/// - `tool_start` for a call precedes its `tool_done`
/// - `confirm_action` directly follows the `tool_done` of the call that produced it
/// - `token` events only start once every tool round has finished
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A tool call is about to run.
    ToolStart {
        tool: String,
        call_id: String,
        args: serde_json::Value,
    },

    /// A tool call finished. `summary` is the result, shortened.
    ToolDone {
        tool: String,
        call_id: String,
        summary: String,
    },

    /// A provider call failed transiently and will be retried.
    LlmRetry(RetryNotice),

    /// A tool registered a destructive effect that waits for the user.
    ConfirmAction(PendingActionDescriptor),

    /// Names of the tools run this turn, in execution order.
    ToolsSummary { tools: Vec<String> },

    /// A fragment of the final answer.
    Token { token: String },
}

impl AgentEvent {
    /// Push event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ToolStart { .. } => "tool_start",
            Self::ToolDone { .. } => "tool_done",
            Self::LlmRetry(_) => "llm_retry",
            Self::ConfirmAction(_) => "confirm_action",
            Self::ToolsSummary { .. } => "tools_summary",
            Self::Token { .. } => "token",
        }
    }

    /// The event body without its `type` tag.
    pub fn payload(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(fields) = value.as_object_mut() {
            fields.remove("type");
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tool_start_payload() {
        let event = AgentEvent::ToolStart {
            tool: "calculate".into(),
            call_id: "call_1".into(),
            args: serde_json::json!({"expression": "2+2"}),
        };
        assert_eq!(event.event_type(), "tool_start");
        assert_eq!(
            event.payload(),
            serde_json::json!({"tool": "calculate", "call_id": "call_1", "args": {"expression": "2+2"}})
        );
    }

    #[test]
    fn retry_payload_uses_seconds() {
        let event = AgentEvent::LlmRetry(RetryNotice {
            attempt: 2,
            max_retries: 5,
            wait: Duration::from_millis(2500),
            error: "queue_exceeded".into(),
        });
        let payload = event.payload();
        assert_eq!(event.event_type(), "llm_retry");
        assert_eq!(payload["attempt"], 2);
        assert_eq!(payload["max_retries"], 5);
        assert_eq!(payload["wait_seconds"], 2.5);
        assert_eq!(payload["error"], "queue_exceeded");
    }

    #[test]
    fn confirm_action_flattens_summary() {
        let mut summary = serde_json::Map::new();
        summary.insert("title".into(), "Dentist".into());
        let event = AgentEvent::ConfirmAction(PendingActionDescriptor {
            action_id: "act_1".into(),
            kind: "calendar.delete_event".into(),
            summary,
        });
        let payload = event.payload();
        assert_eq!(payload["action_id"], "act_1");
        assert_eq!(payload["title"], "Dentist");
        assert!(payload.get("type").is_none());
    }

    #[test]
    fn token_serialization() {
        let event = AgentEvent::Token { token: "Hi".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"token""#));
        assert_eq!(event.payload(), serde_json::json!({"token": "Hi"}));
    }
}
