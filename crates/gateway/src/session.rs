//! The single-user conversation session behind the gateway.

use scarlett_agent::Mood;
use scarlett_core::message::{Message, Role};

/// System prompt plus the committed conversation.
///
/// Only user and final assistant messages are stored here. Tool-call
/// scaffolding stays inside the agent loop's working copy.
#[derive(Debug, Clone)]
pub struct Session {
    system_prompt: Option<String>,
    messages: Vec<Message>,
    max_history: usize,
    mood: Mood,
}

impl Session {
    /// `max_history` counts exchanges; up to twice that many messages are kept.
    pub fn new(system_prompt: Option<String>, max_history: usize) -> Self {
        Self {
            system_prompt,
            messages: Vec::new(),
            max_history: max_history.max(1),
            mood: Mood::default(),
        }
    }

    /// Append the user's message and drop the oldest messages past the cap.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
        let cap = self.max_history * 2;
        if self.messages.len() > cap {
            let excess = self.messages.len() - cap;
            self.messages.drain(..excess);
        }
    }

    pub fn commit_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    /// Remove the trailing user message of a turn that produced nothing.
    pub fn rollback_user(&mut self) {
        if self.messages.last().is_some_and(|m| m.role == Role::User) {
            self.messages.pop();
        }
    }

    /// What the model sees: system prompt first, then the conversation.
    pub fn transcript(&self) -> Vec<Message> {
        let mut transcript = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            transcript.push(Message::system(prompt));
        }
        transcript.extend(self.messages.iter().cloned());
        transcript
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn mood(&self) -> Mood {
        self.mood
    }

    pub fn set_mood(&mut self, mood: Mood) {
        self.mood = mood;
    }
}
