//! Built-in tool implementations for Scarlett.
//!
//! Tools let the assistant look things up (web search, page fetch),
//! do math, tell the time, and manage the user's calendar. Destructive
//! calendar edits go through the pending action store and only take
//! effect once the user confirms them.

pub mod calculator;
pub mod calendar;
pub mod fetch_url;
pub mod time;
pub mod web_search;

use std::sync::Arc;

use scarlett_config::ToolsConfig;
use scarlett_core::pending::PendingActionStore;
use scarlett_core::tool::ToolRegistry;

pub use calendar::{CalendarBackend, InMemoryCalendar};

/// Create the default tool registry and wire the calendar delete effect
/// into `pending`.
pub fn default_registry(
    config: &ToolsConfig,
    pending: Arc<PendingActionStore>,
    calendar: Arc<dyn CalendarBackend>,
) -> ToolRegistry {
    pending.register_effect(
        calendar::DELETE_EVENT_KIND,
        Arc::new(calendar::DeleteEventEffect::new(calendar.clone())),
    );

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(web_search::WebSearchTool::new(
        config.tavily_api_key.clone(),
        config.http_timeout(),
    )));
    registry.register(Box::new(fetch_url::FetchUrlTool::new(
        config.http_timeout(),
        config.fetch_max_length,
    )));
    registry.register(Box::new(time::CurrentTimeTool::new(config.default_timezone.clone())));
    registry.register(Box::new(calculator::CalculateTool));
    registry.register(Box::new(calendar::ListEventsTool::new(calendar.clone())));
    registry.register(Box::new(calendar::CreateEventTool::new(calendar.clone())));
    registry.register(Box::new(calendar::DeleteEventTool::new(calendar, pending)));
    registry
}
