//! Calendar tools over a pluggable [`CalendarBackend`].
//!
//! Reading and creating events happen immediately. Deleting is destructive,
//! so `delete_event` only registers a pending action; the event disappears
//! when the user confirms through the pending action store.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use scarlett_core::error::{ActionError, ToolError};
use scarlett_core::pending::{ActionDraft, ActionEffect, PendingAction, PendingActionStore};
use scarlett_core::tool::{Tool, ToolOutput};

/// Pending action kind handled by [`DeleteEventEffect`].
pub const DELETE_EVENT_KIND: &str = "calendar.delete_event";

const DATETIME_FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
}

impl CalendarEvent {
    fn line(&self) -> String {
        match self.end {
            Some(end) => format!(
                "- [{}] {} ({} - {})",
                self.id,
                self.title,
                self.start.format("%Y-%m-%d %H:%M"),
                end.format("%H:%M")
            ),
            None => format!("- [{}] {} ({})", self.id, self.title, self.start.format("%Y-%m-%d %H:%M")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
}

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("Event not found: {0}")]
    NotFound(String),

    #[error("Calendar backend error: {0}")]
    Backend(String),
}

/// Storage behind the calendar tools.
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// Events ordered by start time, optionally restricted to one day.
    async fn list(&self, date: Option<NaiveDate>) -> Result<Vec<CalendarEvent>, CalendarError>;

    async fn create(&self, event: NewEvent) -> Result<CalendarEvent, CalendarError>;

    async fn get(&self, event_id: &str) -> Result<Option<CalendarEvent>, CalendarError>;

    async fn delete(&self, event_id: &str) -> Result<CalendarEvent, CalendarError>;
}

/// Process-local calendar. Ids are `evt_1`, `evt_2`, ...
#[derive(Default)]
pub struct InMemoryCalendar {
    events: Mutex<BTreeMap<String, CalendarEvent>>,
    next_id: AtomicU64,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalendarBackend for InMemoryCalendar {
    async fn list(&self, date: Option<NaiveDate>) -> Result<Vec<CalendarEvent>, CalendarError> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<CalendarEvent> = events
            .values()
            .filter(|e| date.is_none_or(|d| e.start.date() == d))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn create(&self, event: NewEvent) -> Result<CalendarEvent, CalendarError> {
        let id = format!("evt_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let event = CalendarEvent {
            id: id.clone(),
            title: event.title,
            start: event.start,
            end: event.end,
        };
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.insert(id, event.clone());
        Ok(event)
    }

    async fn get(&self, event_id: &str) -> Result<Option<CalendarEvent>, CalendarError> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        Ok(events.get(event_id).cloned())
    }

    async fn delete(&self, event_id: &str) -> Result<CalendarEvent, CalendarError> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events
            .remove(event_id)
            .ok_or_else(|| CalendarError::NotFound(event_id.to_string()))
    }
}

/// Parse `2026-10-19 14:00` (or the `T`-separated and seconds variants).
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

fn backend_failure(tool_name: &str, e: CalendarError) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool_name.into(),
        reason: e.to_string(),
    }
}

// --- list_events ---

pub struct ListEventsTool {
    backend: Arc<dyn CalendarBackend>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListArgs {
    date: Option<String>,
}

impl ListEventsTool {
    pub fn new(backend: Arc<dyn CalendarBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ListEventsTool {
    fn name(&self) -> &str {
        "list_events"
    }

    fn description(&self) -> &str {
        "List calendar events, optionally for a single day. Use when the user asks about their schedule."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "date": {
                    "type": "string",
                    "description": "Day to list as YYYY-MM-DD. Omit to list everything."
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: ListArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let date = match args.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                Ok(date) => Some(date),
                Err(_) => return Ok(ToolOutput::Text(format!("Error: Invalid date '{raw}'. Use YYYY-MM-DD."))),
            },
            None => None,
        };

        let events = self
            .backend
            .list(date)
            .await
            .map_err(|e| backend_failure(self.name(), e))?;

        if events.is_empty() {
            return Ok(ToolOutput::text("No events found."));
        }
        let lines: Vec<String> = events.iter().map(CalendarEvent::line).collect();
        Ok(ToolOutput::Text(lines.join("\n")))
    }
}

// --- create_event ---

pub struct CreateEventTool {
    backend: Arc<dyn CalendarBackend>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreateArgs {
    title: String,
    start: String,
    end: Option<String>,
}

impl CreateEventTool {
    pub fn new(backend: Arc<dyn CalendarBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for CreateEventTool {
    fn name(&self) -> &str {
        "create_event"
    }

    fn description(&self) -> &str {
        "Add an event to the user's calendar."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Event title" },
                "start": { "type": "string", "description": "Start as 'YYYY-MM-DD HH:MM'" },
                "end": { "type": "string", "description": "Optional end as 'YYYY-MM-DD HH:MM'" }
            },
            "required": ["title", "start"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: CreateArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let title = args.title.trim();
        if title.is_empty() {
            return Ok(ToolOutput::text("Error: Empty event title."));
        }
        let Some(start) = parse_datetime(&args.start) else {
            return Ok(ToolOutput::Text(format!(
                "Error: Invalid start '{}'. Use YYYY-MM-DD HH:MM.",
                args.start
            )));
        };
        let end = match args.end.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            Some(raw) => match parse_datetime(raw) {
                Some(end) if end >= start => Some(end),
                Some(_) => return Ok(ToolOutput::text("Error: Event ends before it starts.")),
                None => return Ok(ToolOutput::Text(format!("Error: Invalid end '{raw}'. Use YYYY-MM-DD HH:MM."))),
            },
            None => None,
        };

        let event = self
            .backend
            .create(NewEvent {
                title: title.to_string(),
                start,
                end,
            })
            .await
            .map_err(|e| backend_failure(self.name(), e))?;

        tracing::info!(event_id = %event.id, "Calendar event created");
        Ok(ToolOutput::Text(format!("Created event:\n{}", event.line())))
    }
}

// --- delete_event (gated) ---

pub struct DeleteEventTool {
    backend: Arc<dyn CalendarBackend>,
    pending: Arc<PendingActionStore>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeleteArgs {
    event_id: String,
}

impl DeleteEventTool {
    pub fn new(backend: Arc<dyn CalendarBackend>, pending: Arc<PendingActionStore>) -> Self {
        Self { backend, pending }
    }
}

#[async_trait]
impl Tool for DeleteEventTool {
    fn name(&self) -> &str {
        "delete_event"
    }

    fn description(&self) -> &str {
        "Delete a calendar event. The deletion waits for the user's confirmation; tell the user what will be \
         deleted and do not claim it is done."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "event_id": { "type": "string", "description": "Id of the event, as shown by list_events" }
            },
            "required": ["event_id"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: DeleteArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let event_id = args.event_id.trim();

        let event = self
            .backend
            .get(event_id)
            .await
            .map_err(|e| backend_failure(self.name(), e))?;
        let Some(event) = event else {
            return Ok(ToolOutput::Text(format!("Error: No event with id '{event_id}'.")));
        };

        let draft = ActionDraft::new(DELETE_EVENT_KIND)
            .with_payload("event_id", event.id.clone())
            .with_summary("title", event.title.clone())
            .with_summary("start", event.start.format("%Y-%m-%d %H:%M").to_string());

        Ok(ToolOutput::PendingConfirmation(self.pending.register(draft)))
    }
}

/// Performs a confirmed `calendar.delete_event`.
pub struct DeleteEventEffect {
    backend: Arc<dyn CalendarBackend>,
}

impl DeleteEventEffect {
    pub fn new(backend: Arc<dyn CalendarBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ActionEffect for DeleteEventEffect {
    async fn perform(&self, action: &PendingAction) -> Result<String, ActionError> {
        let event_id = action
            .payload
            .get("event_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::EffectFailed("missing event_id".into()))?;

        let event = self
            .backend
            .delete(event_id)
            .await
            .map_err(|e| ActionError::EffectFailed(e.to_string()))?;
        Ok(format!("Deleted event '{}'.", event.title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scarlett_core::pending::ActionOutcome;

    fn at(text: &str) -> NaiveDateTime {
        parse_datetime(text).unwrap()
    }

    async fn seeded() -> Arc<InMemoryCalendar> {
        let cal = Arc::new(InMemoryCalendar::new());
        for (title, start) in [("Standup", "2026-10-19 09:00"), ("Dentist", "2026-10-20 15:30"), ("Lunch", "2026-10-19 12:00")] {
            cal.create(NewEvent {
                title: title.into(),
                start: at(start),
                end: None,
            })
            .await
            .unwrap();
        }
        cal
    }

    fn text(output: ToolOutput) -> String {
        match output {
            ToolOutput::Text(t) => t,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn parses_common_formats() {
        assert_eq!(at("2026-10-19 14:00"), at("2026-10-19T14:00"));
        assert_eq!(at("2026-10-19 14:00:00"), at("2026-10-19 14:00"));
        assert!(parse_datetime("tomorrow").is_none());
    }

    #[tokio::test]
    async fn list_filters_by_day_in_start_order() {
        let tool = ListEventsTool::new(seeded().await);
        let out = text(tool.execute(serde_json::json!({"date": "2026-10-19"})).await.unwrap());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Standup"));
        assert!(lines[1].contains("Lunch"));

        let none = text(tool.execute(serde_json::json!({"date": "2026-12-25"})).await.unwrap());
        assert_eq!(none, "No events found.");

        let bad = text(tool.execute(serde_json::json!({"date": "next week"})).await.unwrap());
        assert!(bad.starts_with("Error: Invalid date"));
    }

    #[tokio::test]
    async fn create_validates_input() {
        let cal = Arc::new(InMemoryCalendar::new());
        let tool = CreateEventTool::new(cal.clone());

        let out = text(
            tool.execute(serde_json::json!({"title": "Gym", "start": "2026-10-21 18:00", "end": "2026-10-21 19:00"}))
                .await
                .unwrap(),
        );
        assert!(out.contains("[evt_1] Gym (2026-10-21 18:00 - 19:00)"));

        let backwards = text(
            tool.execute(serde_json::json!({"title": "Gym", "start": "2026-10-21 18:00", "end": "2026-10-21 17:00"}))
                .await
                .unwrap(),
        );
        assert_eq!(backwards, "Error: Event ends before it starts.");

        let untitled = text(tool.execute(serde_json::json!({"start": "2026-10-21 18:00"})).await.unwrap());
        assert_eq!(untitled, "Error: Empty event title.");
        assert_eq!(cal.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_waits_for_confirmation() {
        let cal = seeded().await;
        let store = Arc::new(PendingActionStore::new());
        store.register_effect(DELETE_EVENT_KIND, Arc::new(DeleteEventEffect::new(cal.clone())));
        let tool = DeleteEventTool::new(cal.clone(), store.clone());

        let output = tool.execute(serde_json::json!({"event_id": "evt_2"})).await.unwrap();
        let ToolOutput::PendingConfirmation(descriptor) = output else {
            panic!("expected pending confirmation");
        };
        assert_eq!(descriptor.kind, DELETE_EVENT_KIND);
        assert_eq!(descriptor.summary["title"], "Dentist");

        // Nothing deleted yet.
        assert!(cal.get("evt_2").await.unwrap().is_some());

        let outcome = store.confirm(&descriptor.action_id).await;
        assert!(matches!(outcome, ActionOutcome::Completed { ref message, .. } if message.contains("Dentist")));
        assert!(cal.get("evt_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_delete_keeps_event() {
        let cal = seeded().await;
        let store = Arc::new(PendingActionStore::new());
        store.register_effect(DELETE_EVENT_KIND, Arc::new(DeleteEventEffect::new(cal.clone())));
        let tool = DeleteEventTool::new(cal.clone(), store.clone());

        let output = tool.execute(serde_json::json!({"event_id": "evt_1"})).await.unwrap();
        let ToolOutput::PendingConfirmation(descriptor) = output else {
            panic!("expected pending confirmation");
        };
        assert!(matches!(store.cancel(&descriptor.action_id), ActionOutcome::Cancelled { .. }));
        assert!(cal.get("evt_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_unknown_event_is_error_text() {
        let store = Arc::new(PendingActionStore::new());
        let tool = DeleteEventTool::new(seeded().await, store.clone());
        let out = text(tool.execute(serde_json::json!({"event_id": "evt_99"})).await.unwrap());
        assert_eq!(out, "Error: No event with id 'evt_99'.");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn effect_fails_when_event_vanished() {
        let cal = seeded().await;
        let store = Arc::new(PendingActionStore::new());
        store.register_effect(DELETE_EVENT_KIND, Arc::new(DeleteEventEffect::new(cal.clone())));
        let tool = DeleteEventTool::new(cal.clone(), store.clone());

        let ToolOutput::PendingConfirmation(descriptor) =
            tool.execute(serde_json::json!({"event_id": "evt_3"})).await.unwrap()
        else {
            panic!("expected pending confirmation");
        };
        cal.delete("evt_3").await.unwrap();
        assert!(matches!(store.confirm(&descriptor.action_id).await, ActionOutcome::Failed { .. }));
    }
}
