//! # Scarlett Core
//!
//! Domain types, traits, and error definitions for the Scarlett assistant.
//! This crate has **no framework dependencies**: it defines the model that
//! the provider, tool, agent and gateway crates implement against.
//!
//! - [`provider`]: the completion endpoint abstraction
//! - [`tool`]: tool trait and the never-failing registry
//! - [`pending`]: the confirmation gate for destructive effects

pub mod error;
pub mod message;
pub mod pending;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ActionError, Error, ProviderError, Result, ToolError};
pub use message::{Message, MessageToolCall, Role};
pub use pending::{
    ActionDraft, ActionEffect, ActionOutcome, IdGenerator, PendingAction, PendingActionDescriptor,
    PendingActionStore, UuidIds,
};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolOutput, ToolRegistry, ToolResult};
