//! Event stream emitter: turns agent events into named push messages.
//!
//! One emitter serves one turn. It closes the turn with exactly one
//! terminal message, `done` or `error`, and drops anything offered after
//! that.

use std::sync::Arc;

use serde::Serialize;

use crate::mood::{Mood, MoodClassifier};
use crate::stream_event::AgentEvent;

/// A message for the client: SSE event name plus JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushEvent {
    pub event: &'static str,
    pub data: serde_json::Value,
}

impl PushEvent {
    fn new(event: &'static str, data: serde_json::Value) -> Self {
        Self { event, data }
    }
}

pub struct EventEmitter {
    classifier: Arc<dyn MoodClassifier>,
    full_response: String,
    tools_used: Vec<String>,
    finished: bool,
}

impl EventEmitter {
    pub fn new(classifier: Arc<dyn MoodClassifier>) -> Self {
        Self {
            classifier,
            full_response: String::new(),
            tools_used: Vec::new(),
            finished: false,
        }
    }

    /// Map one agent event. `tools_summary` is folded into the final `done`
    /// rather than pushed on its own.
    pub fn event(&mut self, event: &AgentEvent) -> Option<PushEvent> {
        if self.finished {
            return None;
        }
        match event {
            AgentEvent::ToolsSummary { tools } => {
                self.tools_used = tools.clone();
                None
            }
            AgentEvent::Token { token } => {
                self.full_response.push_str(token);
                Some(PushEvent::new("token", event.payload()))
            }
            other => Some(PushEvent::new(other.event_type(), other.payload())),
        }
    }

    /// Close the turn successfully.
    pub fn done(&mut self) -> Option<PushEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;

        let mood = self.mood();
        let mut data = serde_json::json!({
            "mode": mood.mode,
            "expression": mood.expression,
            "full_response": self.full_response,
        });
        if !self.tools_used.is_empty() {
            data["tools_used"] = serde_json::json!(self.tools_used);
        }
        Some(PushEvent::new("done", data))
    }

    /// Close the turn with a user-facing error message.
    pub fn error(&mut self, message: impl Into<String>) -> Option<PushEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(PushEvent::new("error", serde_json::json!({ "error": message.into() })))
    }

    /// Concatenation of every token pushed so far.
    pub fn full_response(&self) -> &str {
        &self.full_response
    }

    pub fn tools_used(&self) -> &[String] {
        &self.tools_used
    }

    pub fn mood(&self) -> Mood {
        self.classifier.classify(&self.full_response)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mood::KeywordMoodClassifier;

    fn emitter() -> EventEmitter {
        EventEmitter::new(Arc::new(KeywordMoodClassifier))
    }

    fn token(t: &str) -> AgentEvent {
        AgentEvent::Token { token: t.into() }
    }

    #[test]
    fn tokens_accumulate_into_done() {
        let mut emitter = emitter();
        assert_eq!(emitter.event(&token("Hello, ")).unwrap().data["token"], "Hello, ");
        emitter.event(&token("world"));

        let done = emitter.done().unwrap();
        assert_eq!(done.event, "done");
        assert_eq!(done.data["full_response"], "Hello, world");
        assert_eq!(done.data["mode"], "angel");
        assert_eq!(done.data["expression"], "neutral");
        assert!(done.data.get("tools_used").is_none());
    }

    #[test]
    fn tools_summary_lands_in_done() {
        let mut emitter = emitter();
        let pushed = emitter.event(&AgentEvent::ToolsSummary {
            tools: vec!["web_search".into(), "calculate".into()],
        });
        assert!(pushed.is_none());
        let done = emitter.done().unwrap();
        assert_eq!(done.data["tools_used"], serde_json::json!(["web_search", "calculate"]));
    }

    #[test]
    fn nothing_after_error() {
        let mut emitter = emitter();
        emitter.event(&token("partial"));
        let error = emitter.error("provider is congested").unwrap();
        assert_eq!(error.event, "error");
        assert_eq!(error.data["error"], "provider is congested");

        assert!(emitter.done().is_none());
        assert!(emitter.error("again").is_none());
        assert!(emitter.event(&token("late")).is_none());
        assert!(emitter.is_finished());
    }

    #[test]
    fn tool_events_keep_their_names() {
        let mut emitter = emitter();
        let pushed = emitter
            .event(&AgentEvent::ToolDone {
                tool: "calculate".into(),
                call_id: "c1".into(),
                summary: "2+2 = 4".into(),
            })
            .unwrap();
        assert_eq!(pushed.event, "tool_done");
        assert_eq!(pushed.data["summary"], "2+2 = 4");
    }
}
