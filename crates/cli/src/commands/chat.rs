//! `scarlett chat`: terminal front end for a single session.
//!
//! Tokens are printed as they arrive, tool progress goes to stderr, and any
//! deletion the model asks for is put to the user as a y/n question once the
//! turn has finished.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

use scarlett_agent::{AgentEvent, AgentLoop, EventEmitter, KeywordMoodClassifier, MoodClassifier, TurnError};
use scarlett_config::AppConfig;
use scarlett_core::pending::{ActionOutcome, PendingActionDescriptor, PendingActionStore};
use scarlett_gateway::Session;
use scarlett_gateway::api::user_facing_error;
use scarlett_providers::{AnswerChunk, RetryNotice};
use scarlett_tools::InMemoryCalendar;

type Input = Lines<BufReader<Stdin>>;

struct Chat {
    agent: AgentLoop,
    pending: Arc<PendingActionStore>,
    classifier: Arc<dyn MoodClassifier>,
    session: Session,
    no_tools: bool,
}

pub async fn run(message: Option<String>, no_tools: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    SCARLETT_API_KEY=...   (any OpenAI-compatible provider)");
        eprintln!("    CEREBRAS_API_KEY=...   (Cerebras, the default provider)");
        eprintln!();
        eprintln!("  Or add `api_key` to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let pending = Arc::new(PendingActionStore::new());
    let calendar = Arc::new(InMemoryCalendar::new());
    let tools = Arc::new(scarlett_tools::default_registry(&config.tools, pending.clone(), calendar));
    let agent = AgentLoop::new(scarlett_providers::build_from_config(&config), tools)
        .with_max_tool_rounds(config.agent.max_tool_rounds);

    let mut chat = Chat {
        agent,
        pending,
        classifier: Arc::new(KeywordMoodClassifier),
        session: Session::new(config.system_prompt()?, config.agent.max_history),
        no_tools,
    };
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    if let Some(msg) = message {
        chat.turn(msg, &mut input).await?;
        return Ok(());
    }

    println!();
    println!("  Scarlett, interactive mode");
    println!("  Provider:  {}", config.provider);
    println!("  Model:     {}", config.model);
    if no_tools {
        println!("  Tools:     disabled");
    } else {
        println!("  Tools:     {}", chat.agent.tools().names().join(", "));
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    loop {
        prompt("  You > ")?;
        let Some(line) = input.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        chat.turn(line.to_string(), &mut input).await?;
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}

impl Chat {
    async fn turn(&mut self, message: String, input: &mut Input) -> Result<(), Box<dyn std::error::Error>> {
        self.session.push_user(message);
        let history = self.session.transcript();
        prompt("  Scarlett > ")?;

        let (result, emitter, confirmations) = if self.no_tools {
            self.direct_turn(&history).await
        } else {
            self.agent_turn(&history).await
        };
        println!();

        match result {
            Ok(full_response) => {
                if !full_response.is_empty() {
                    self.session.commit_assistant(full_response);
                }
                let mood = emitter.mood();
                self.session.set_mood(mood);
                if !emitter.tools_used().is_empty() {
                    eprintln!("  [tools used: {}]", emitter.tools_used().join(", "));
                }
                eprintln!("  [{} / {}]", mood.mode.as_str(), mood.expression.as_str());
            }
            Err(e) => {
                tracing::error!(error = %e, detail = ?e, "Chat turn failed");
                if e.partial().is_empty() {
                    self.session.rollback_user();
                } else {
                    self.session.commit_assistant(e.partial());
                }
                eprintln!("  [Error] {}", user_facing_error(&e));
            }
        }
        println!();

        for action in confirmations {
            self.ask_confirmation(&action, input).await?;
        }
        Ok(())
    }

    /// Full agent turn: tool rounds, then the streamed answer.
    async fn agent_turn(
        &self,
        history: &[scarlett_core::message::Message],
    ) -> (Result<String, TurnError>, EventEmitter, Vec<PendingActionDescriptor>) {
        let mut emitter = EventEmitter::new(self.classifier.clone());
        let mut confirmations = Vec::new();
        let (event_tx, mut event_rx) = mpsc::channel(64);

        let turn = self.agent.run_turn(history, event_tx);
        let render = async {
            while let Some(event) = event_rx.recv().await {
                render_event(&event);
                if let AgentEvent::ConfirmAction(action) = &event {
                    confirmations.push(action.clone());
                }
                emitter.event(&event);
            }
        };
        let (result, ()) = tokio::join!(turn, render);

        (result.map(|summary| summary.full_response), emitter, confirmations)
    }

    /// Answer without tools over the stream path and its smaller retry bound.
    async fn direct_turn(
        &self,
        history: &[scarlett_core::message::Message],
    ) -> (Result<String, TurnError>, EventEmitter, Vec<PendingActionDescriptor>) {
        let mut emitter = EventEmitter::new(self.classifier.clone());
        let mut chunks = self.agent.client().answer_stream(history);

        while let Some(item) = chunks.recv().await {
            match item {
                Ok(AnswerChunk::Retry(notice)) => render_retry(&notice),
                Ok(AnswerChunk::Text(token)) => {
                    let event = AgentEvent::Token { token };
                    render_event(&event);
                    emitter.event(&event);
                }
                Err(source) => {
                    let partial = emitter.full_response().to_string();
                    let err = if partial.is_empty() {
                        TurnError::Provider(source)
                    } else {
                        TurnError::StreamAborted { partial, source }
                    };
                    return (Err(err), emitter, Vec::new());
                }
            }
        }

        let full_response = emitter.full_response().to_string();
        (Ok(full_response), emitter, Vec::new())
    }

    async fn ask_confirmation(
        &self,
        action: &PendingActionDescriptor,
        input: &mut Input,
    ) -> Result<(), Box<dyn std::error::Error>> {
        println!("  Confirm {}: {}", action.kind, describe(action));
        prompt("  Proceed? [y/N] ")?;
        let answer = input.next_line().await?.unwrap_or_default();

        let outcome = if matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            self.pending.confirm(&action.action_id).await
        } else {
            self.pending.cancel(&action.action_id)
        };

        match outcome {
            ActionOutcome::Completed { message, .. } => println!("  {message}"),
            ActionOutcome::Cancelled { .. } => println!("  Cancelled."),
            ActionOutcome::NotFound { .. } => println!("  That action is no longer pending."),
            ActionOutcome::Failed { error, .. } => eprintln!("  [Error] {error}"),
        }
        println!();
        Ok(())
    }
}

fn render_event(event: &AgentEvent) {
    match event {
        AgentEvent::Token { token } => {
            print!("{token}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ToolStart { tool, args, .. } => eprintln!("  [{tool}] {args}"),
        AgentEvent::ToolDone { tool, summary, .. } => eprintln!("  [{tool}] {summary}"),
        AgentEvent::LlmRetry(notice) => render_retry(notice),
        AgentEvent::ConfirmAction(_) | AgentEvent::ToolsSummary { .. } => {}
    }
}

fn render_retry(notice: &RetryNotice) {
    eprintln!(
        "  [provider busy, retry {}/{} in {:.1}s]",
        notice.attempt,
        notice.max_retries,
        notice.wait.as_secs_f64()
    );
}

/// `key: value` pairs of the action summary.
fn describe(action: &PendingActionDescriptor) -> String {
    action
        .summary
        .iter()
        .map(|(key, value)| match value.as_str() {
            Some(text) => format!("{key}: {text}"),
            None => format!("{key}: {value}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn prompt(text: &str) -> std::io::Result<()> {
    print!("{text}");
    std::io::stdout().flush()
}
