//! The agent turn engine for Scarlett.
//!
//! A turn follows a **Decide → Act → Answer** cycle:
//!
//! 1. **Decide**: ask the model, with tool schemas, what to do next
//! 2. **Act**: run the requested tools concurrently and feed their results back
//! 3. Repeat until the model stops asking for tools or the round budget is spent
//! 4. **Answer**: stream the final reply token by token, tools withheld
//!
//! Everything that happens is written to a channel of [`AgentEvent`]s, which
//! an [`EventEmitter`] turns into named push messages for the client.

pub mod emitter;
pub mod loop_runner;
pub mod mood;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use emitter::{EventEmitter, PushEvent};
pub use loop_runner::{AgentLoop, TurnError, TurnSummary};
pub use mood::{Expression, KeywordMoodClassifier, Mode, Mood, MoodClassifier};
pub use stream_event::AgentEvent;
