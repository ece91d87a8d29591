//! Completion providers for Scarlett.
//!
//! [`OpenAiCompatProvider`] implements `scarlett_core::Provider` over HTTP.
//! [`CompletionClient`] wraps any provider with the retry policy and is what
//! the agent loop talks to.

pub mod client;
pub mod openai_compat;
pub mod retry;

use std::sync::Arc;

pub use client::{
    AnswerChunk, AnswerReceiver, CompletionClient, Decision, IgnoreRetries, ModelSettings, RetryNotice,
    RetryObserver,
};
pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryPolicy;

use scarlett_config::AppConfig;

/// Build the completion client described by the configuration.
///
/// A missing API key is not an error here; the provider reports
/// `NotConfigured` on first use so the CLI can still start and explain.
pub fn build_from_config(config: &AppConfig) -> CompletionClient {
    let api_key = config.api_key.clone().unwrap_or_default();
    let provider = Arc::new(OpenAiCompatProvider::new(&config.provider, &config.base_url, api_key));

    let settings = ModelSettings {
        model: config.model.clone(),
        temperature: config.temperature,
        top_p: Some(config.top_p),
        max_tokens: Some(config.max_tokens),
    };

    let retry = &config.retry;
    CompletionClient::new(provider, settings)
        .with_decide_policy(RetryPolicy::new(retry.decide_max_retries, retry.base_delay(), retry.max_delay()))
        .with_stream_policy(RetryPolicy::new(retry.stream_max_retries, retry.base_delay(), retry.max_delay()))
}
