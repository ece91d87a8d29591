//! HTTP gateway for Scarlett.
//!
//! Serves the chat turn as server-sent events, plus the endpoints a browser
//! front end needs to confirm or cancel pending actions and to poll status.
//!
//! Built on Axum.

pub mod api;
pub mod session;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use scarlett_agent::{AgentLoop, KeywordMoodClassifier, MoodClassifier};
use scarlett_config::{AppConfig, GatewayConfig};
use scarlett_core::pending::PendingActionStore;
use scarlett_tools::InMemoryCalendar;

pub use session::Session;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub agent: Arc<AgentLoop>,
    pub pending: Arc<PendingActionStore>,
    pub classifier: Arc<dyn MoodClassifier>,
    session: Mutex<Session>,
    /// Held for the whole of a turn so turns never interleave.
    turn_gate: tokio::sync::Mutex<()>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(agent: Arc<AgentLoop>, pending: Arc<PendingActionStore>, session: Session) -> Self {
        Self {
            agent,
            pending,
            classifier: Arc::new(KeywordMoodClassifier),
            session: Mutex::new(session),
            turn_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Build the provider, tools and session described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let pending = Arc::new(PendingActionStore::new());
        let calendar = Arc::new(InMemoryCalendar::new());
        let tools = Arc::new(scarlett_tools::default_registry(&config.tools, pending.clone(), calendar));
        let client = scarlett_providers::build_from_config(config);
        let agent = AgentLoop::new(client, tools).with_max_tool_rounds(config.agent.max_tool_rounds);
        let session = Session::new(config.system_prompt()?, config.agent.max_history);

        Ok(Self::new(Arc::new(agent), pending, session))
    }

    /// Brief, synchronous access to the session. Never held across an await.
    pub fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// CORS for a browser front end served from the gateway's own address.
fn cors_layer(gateway: &GatewayConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://{}:{}", gateway.host, gateway.port),
        format!("http://localhost:{}", gateway.port),
    ]
    .iter()
    .filter_map(|origin| HeaderValue::from_str(origin).ok())
    .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState, gateway: &GatewayConfig) -> Router {
    Router::new()
        .route("/health", get(api::health_handler))
        .route("/api/status", get(api::status_handler))
        .route("/api/chat", post(api::chat_handler))
        .route("/api/confirm-action/{action_id}", post(api::confirm_action_handler))
        .route("/api/cancel-action/{action_id}", post(api::cancel_action_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors_layer(gateway))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_config(&config)?);
    let app = build_router(state, &config.gateway);

    info!(addr = %addr, model = %config.model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
