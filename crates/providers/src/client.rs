//! Completion client: the retrying front over a [`Provider`].
//!
//! Two call shapes, matching the two phases of a turn:
//! - [`CompletionClient::decide`]: non-streaming, tools offered, retried as a whole.
//! - [`CompletionClient::answer_stream`]: streaming, tools withheld. Only
//!   establishing the stream is retried; a fault after the first fragment
//!   ends the stream with an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use scarlett_core::error::ProviderError;
use scarlett_core::message::Message;
use scarlett_core::provider::{Provider, ProviderRequest, ToolDefinition};

use crate::retry::{RetryPolicy, is_transient};

/// One retry consumed while talking to the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryNotice {
    /// 1-based number of the attempt that failed
    pub attempt: u32,
    pub max_retries: u32,
    #[serde(rename = "wait_seconds", serialize_with = "as_secs_f64")]
    pub wait: Duration,
    pub error: String,
}

fn as_secs_f64<S: serde::Serializer>(wait: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(wait.as_secs_f64())
}

/// Result of a decide call.
#[derive(Debug, Clone)]
pub struct Decision {
    /// The assistant message, possibly carrying tool call requests
    pub message: Message,
    /// Retries consumed before the call succeeded
    pub retries: Vec<RetryNotice>,
}

/// Item of an answer stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerChunk {
    Retry(RetryNotice),
    Text(String),
}

pub type AnswerReceiver = mpsc::Receiver<Result<AnswerChunk, ProviderError>>;

/// Gets told about each retry as it happens, before the backoff sleep.
#[async_trait]
pub trait RetryObserver: Send + Sync {
    async fn on_retry(&self, notice: &RetryNotice);
}

/// Observer that ignores notices. The notices are still returned in [`Decision`].
pub struct IgnoreRetries;

#[async_trait]
impl RetryObserver for IgnoreRetries {
    async fn on_retry(&self, _notice: &RetryNotice) {}
}

/// Sampling parameters applied to every request.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.45,
            top_p: Some(0.95),
            max_tokens: Some(8192),
        }
    }
}

pub struct CompletionClient {
    provider: Arc<dyn Provider>,
    settings: ModelSettings,
    decide_policy: RetryPolicy,
    stream_policy: RetryPolicy,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn Provider>, settings: ModelSettings) -> Self {
        Self {
            provider,
            settings,
            decide_policy: RetryPolicy::decide(),
            stream_policy: RetryPolicy::stream(),
        }
    }

    pub fn with_decide_policy(mut self, policy: RetryPolicy) -> Self {
        self.decide_policy = policy;
        self
    }

    pub fn with_stream_policy(mut self, policy: RetryPolicy) -> Self {
        self.stream_policy = policy;
        self
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn request(&self, messages: &[Message], tools: &[ToolDefinition], stream: bool) -> ProviderRequest {
        ProviderRequest {
            model: self.settings.model.clone(),
            messages: messages.to_vec(),
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            max_tokens: self.settings.max_tokens,
            tools: tools.to_vec(),
            stream,
        }
    }

    /// Non-streaming call offering `tools`. The model may answer directly or
    /// request tool calls.
    pub async fn decide(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        observer: &dyn RetryObserver,
    ) -> Result<Decision, ProviderError> {
        let request = self.request(messages, tools, false);
        let policy = &self.decide_policy;
        let mut retries = Vec::new();
        let mut attempt = 0;

        loop {
            match self.provider.complete(request.clone()).await {
                Ok(response) => {
                    debug!(attempt = attempt + 1, tool_calls = response.message.tool_calls.len(), "Decide call succeeded");
                    return Ok(Decision {
                        message: response.message,
                        retries,
                    });
                }
                Err(e) => match policy.next_delay(&e, attempt) {
                    Some(wait) => {
                        let notice = notice(policy, attempt, wait, &e);
                        warn!(attempt = notice.attempt, max = policy.max_retries, wait_ms = wait.as_millis() as u64, error = %e, "Decide call failed, retrying");
                        observer.on_retry(&notice).await;
                        retries.push(notice);
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                    }
                    None => return Err(give_up(policy, attempt, e)),
                },
            }
        }
    }

    /// Streaming call with tools withheld.
    ///
    /// The receiver yields retry notices (only before the first fragment),
    /// then text fragments in generation order. A terminal failure arrives
    /// as a single `Err` item, after which the channel closes.
    pub fn answer_stream(&self, messages: &[Message]) -> AnswerReceiver {
        let request = self.request(messages, &[], true);
        let provider = Arc::clone(&self.provider);
        let policy = self.stream_policy.clone();
        let (tx, rx) = mpsc::channel(128);

        tokio::spawn(async move {
            let mut attempt = 0;
            let mut chunks = loop {
                match provider.stream(request.clone()).await {
                    Ok(chunks) => break chunks,
                    Err(e) => match policy.next_delay(&e, attempt) {
                        Some(wait) => {
                            let notice = notice(&policy, attempt, wait, &e);
                            warn!(attempt = notice.attempt, max = policy.max_retries, error = %e, "Opening answer stream failed, retrying");
                            if tx.send(Ok(AnswerChunk::Retry(notice))).await.is_err() {
                                return;
                            }
                            tokio::time::sleep(wait).await;
                            attempt += 1;
                        }
                        None => {
                            let _ = tx.send(Err(give_up(&policy, attempt, e))).await;
                            return;
                        }
                    },
                }
            };

            while let Some(item) = chunks.recv().await {
                match item {
                    Ok(chunk) => {
                        if let Some(text) = chunk.content.filter(|t| !t.is_empty())
                            && tx.send(Ok(AnswerChunk::Text(text))).await.is_err()
                        {
                            debug!("Answer stream receiver dropped");
                            return;
                        }
                        if chunk.done {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Answer stream aborted mid-flight");
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        });

        rx
    }
}

fn notice(policy: &RetryPolicy, attempt: u32, wait: Duration, error: &ProviderError) -> RetryNotice {
    RetryNotice {
        attempt: attempt + 1,
        max_retries: policy.max_retries,
        wait,
        error: error.to_string(),
    }
}

/// Final error once no further attempt will be made.
fn give_up(policy: &RetryPolicy, attempt: u32, error: ProviderError) -> ProviderError {
    if is_transient(&error) {
        error!(attempts = attempt + 1, max = policy.max_retries, error = %error, "Provider retries exhausted");
        ProviderError::Unavailable {
            attempts: attempt + 1,
            last_error: error.to_string(),
        }
    } else {
        error!(error = %error, "Provider call failed with a fatal error");
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scarlett_core::provider::{ChunkReceiver, ProviderResponse, StreamChunk};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider that plays back scripted outcomes, one per call.
    struct ScriptedProvider {
        completions: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
        streams: Mutex<VecDeque<Result<Vec<Result<StreamChunk, ProviderError>>, ProviderError>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn completions(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
            Self {
                completions: Mutex::new(script.into()),
                streams: Mutex::new(VecDeque::new()),
                calls: AtomicU32::new(0),
            }
        }

        fn streams(script: Vec<Result<Vec<Result<StreamChunk, ProviderError>>, ProviderError>>) -> Self {
            Self {
                completions: Mutex::new(VecDeque::new()),
                streams: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.completions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::NotConfigured("script exhausted".into())))
        }

        async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::NotConfigured("script exhausted".into())));
            let items = next?;
            let (tx, rx) = mpsc::channel(items.len().max(1));
            for item in items {
                tx.try_send(item).unwrap();
            }
            Ok(rx)
        }
    }

    fn answer(text: &str) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: None,
            model: "test-model".into(),
        })
    }

    fn congested() -> ProviderError {
        ProviderError::ApiError {
            status_code: 429,
            message: "queue_exceeded".into(),
        }
    }

    fn text(t: &str) -> Result<StreamChunk, ProviderError> {
        Ok(StreamChunk {
            content: Some(t.into()),
            ..StreamChunk::default()
        })
    }

    fn client(provider: Arc<ScriptedProvider>) -> CompletionClient {
        CompletionClient::new(provider, ModelSettings::new("test-model"))
    }

    struct Recorder(Mutex<Vec<RetryNotice>>);

    #[async_trait]
    impl RetryObserver for Recorder {
        async fn on_retry(&self, notice: &RetryNotice) {
            self.0.lock().unwrap().push(notice.clone());
        }
    }

    async fn collect(mut rx: AnswerReceiver) -> Vec<Result<AnswerChunk, ProviderError>> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn decide_succeeds_after_transient_failures() {
        let provider = Arc::new(ScriptedProvider::completions(vec![
            Err(congested()),
            Err(ProviderError::Timeout("read".into())),
            Err(congested()),
            answer("hello"),
        ]));
        let recorder = Recorder(Mutex::new(Vec::new()));

        let decision = client(provider.clone())
            .decide(&[Message::user("hi")], &[], &recorder)
            .await
            .unwrap();

        assert_eq!(decision.message.content, "hello");
        let attempts: Vec<u32> = decision.retries.iter().map(|n| n.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        let waits: Vec<u64> = decision.retries.iter().map(|n| n.wait.as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 4]);
        assert_eq!(*recorder.0.lock().unwrap(), decision.retries);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn decide_waits_are_capped() {
        let provider = Arc::new(ScriptedProvider::completions(vec![
            Err(congested()),
            Err(congested()),
            Err(congested()),
            answer("ok"),
        ]));
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(3));
        let decision = client(provider)
            .with_decide_policy(policy)
            .decide(&[], &[], &IgnoreRetries)
            .await
            .unwrap();
        let waits: Vec<u64> = decision.retries.iter().map(|n| n.wait.as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn decide_gives_up_after_max_attempts() {
        let provider = Arc::new(ScriptedProvider::completions(
            (0..10).map(|_| Err(congested())).collect(),
        ));
        let recorder = Recorder(Mutex::new(Vec::new()));

        let err = client(provider.clone())
            .decide(&[], &[], &recorder)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Unavailable { attempts: 5, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
        assert_eq!(recorder.0.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn decide_fatal_error_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::completions(vec![
            Err(ProviderError::AuthenticationFailed("bad key".into())),
            answer("never reached"),
        ]));
        let err = client(provider.clone())
            .decide(&[], &[], &IgnoreRetries)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn answer_stream_retries_before_first_fragment() {
        let provider = Arc::new(ScriptedProvider::streams(vec![
            Err(congested()),
            Ok(vec![text("Hel"), text("lo"), Ok(StreamChunk { done: true, ..StreamChunk::default() })]),
        ]));

        let items = collect(client(provider).answer_stream(&[Message::user("hi")])).await;
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], Ok(AnswerChunk::Retry(n)) if n.attempt == 1 && n.max_retries == 3));
        assert_eq!(items[1].as_ref().unwrap(), &AnswerChunk::Text("Hel".into()));
        assert_eq!(items[2].as_ref().unwrap(), &AnswerChunk::Text("lo".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn answer_stream_mid_flight_fault_is_fatal() {
        let provider = Arc::new(ScriptedProvider::streams(vec![
            Ok(vec![text("partial"), Err(ProviderError::StreamInterrupted("connection reset".into()))]),
            Ok(vec![text("should not be used")]),
        ]));

        let items = collect(client(provider.clone()).answer_stream(&[])).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(ProviderError::StreamInterrupted(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn answer_stream_exhaustion_reports_unavailable() {
        let provider = Arc::new(ScriptedProvider::streams(
            (0..5).map(|_| Err(congested())).collect(),
        ));
        let items = collect(client(provider.clone()).answer_stream(&[])).await;
        assert_eq!(items.len(), 3);
        assert!(matches!(items[2], Err(ProviderError::Unavailable { attempts: 3, .. })));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_notice_wire_shape() {
        let notice = RetryNotice {
            attempt: 2,
            max_retries: 5,
            wait: Duration::from_millis(1500),
            error: "queue_exceeded".into(),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["attempt"], 2);
        assert_eq!(json["wait_seconds"], 1.5);
    }
}
