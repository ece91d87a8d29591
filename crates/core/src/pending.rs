//! Pending action gate: destructive effects wait here for confirmation.
//!
//! Tool handlers never perform an irreversible effect directly. They
//! validate preconditions, [`register`](PendingActionStore::register) a
//! pending action and hand its descriptor back to the model. The effect
//! runs only when the user confirms through [`confirm`](PendingActionStore::confirm).
//!
//! An entry is removed exactly once, by confirm or by cancel. Removal
//! happens under the table lock, so a confirm racing a cancel for the same
//! id resolves to one winner and one `NotFound`. Entries have no expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

use crate::error::ActionError;

/// A registered, not-yet-performed effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub action_id: String,
    /// Effect kind, e.g. `calendar.delete_event`. Selects the effect handler.
    pub kind: String,
    /// Effect parameters handed to the handler on confirm.
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Human-readable fields shown to the user before confirming.
    pub summary: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Descriptor fields that summary entries may not shadow.
pub const RESERVED_SUMMARY_KEYS: [&str; 2] = ["action_id", "kind"];

fn is_reserved(key: &str) -> bool {
    RESERVED_SUMMARY_KEYS.contains(&key)
}

/// What a tool hands to the store when it detects a destructive intent.
#[derive(Debug, Clone, Default)]
pub struct ActionDraft {
    pub kind: String,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub summary: serde_json::Map<String, serde_json::Value>,
}

impl ActionDraft {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Add a user-facing summary field. `action_id` and `kind` are skipped.
    pub fn with_summary(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let key = key.into();
        if is_reserved(&key) {
            warn!(key = %key, "Summary key shadows a descriptor field, skipped");
            return self;
        }
        self.summary.insert(key, value.into());
        self
    }
}

/// The client-facing view of a pending action: id, kind and summary fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingActionDescriptor {
    pub action_id: String,
    pub kind: String,
    #[serde(flatten)]
    pub summary: serde_json::Map<String, serde_json::Value>,
}

impl From<&PendingAction> for PendingActionDescriptor {
    fn from(action: &PendingAction) -> Self {
        Self {
            action_id: action.action_id.clone(),
            kind: action.kind.clone(),
            summary: action.summary.clone(),
        }
    }
}

/// Result of resolving a pending action. Never an exception: a missing id
/// is reported as `NotFound`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Completed { action_id: String, message: String },
    Cancelled { action_id: String },
    NotFound { action_id: String },
    Failed { action_id: String, error: String },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Cancelled { .. })
    }
}

/// Performs the underlying effect of a confirmed action.
#[async_trait]
pub trait ActionEffect: Send + Sync {
    async fn perform(&self, action: &PendingAction) -> Result<String, ActionError>;
}

/// Strategy for minting opaque action ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Default id strategy: random UUID v4.
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Process-wide table of pending actions, shared across turns and requests.
pub struct PendingActionStore {
    actions: Mutex<HashMap<String, PendingAction>>,
    effects: RwLock<HashMap<String, Arc<dyn ActionEffect>>>,
    ids: Box<dyn IdGenerator>,
}

impl PendingActionStore {
    pub fn new() -> Self {
        Self::with_ids(Box::new(UuidIds))
    }

    pub fn with_ids(ids: Box<dyn IdGenerator>) -> Self {
        Self {
            actions: Mutex::new(HashMap::new()),
            effects: RwLock::new(HashMap::new()),
            ids,
        }
    }

    /// Register the handler that performs effects of `kind`.
    pub fn register_effect(&self, kind: impl Into<String>, effect: Arc<dyn ActionEffect>) {
        let mut effects = self.effects.write().unwrap_or_else(|e| e.into_inner());
        effects.insert(kind.into(), effect);
    }

    /// Store a new pending action and return its descriptor.
    pub fn register(&self, mut draft: ActionDraft) -> PendingActionDescriptor {
        draft.summary.retain(|key, _| !is_reserved(key));
        let action = PendingAction {
            action_id: self.ids.next_id(),
            kind: draft.kind,
            payload: draft.payload,
            summary: draft.summary,
            created_at: Utc::now(),
        };
        let descriptor = PendingActionDescriptor::from(&action);

        info!(action_id = %action.action_id, kind = %action.kind, "Pending action registered");
        let mut actions = self.actions.lock().unwrap_or_else(|e| e.into_inner());
        actions.insert(action.action_id.clone(), action);

        descriptor
    }

    fn take(&self, action_id: &str) -> Option<PendingAction> {
        let mut actions = self.actions.lock().unwrap_or_else(|e| e.into_inner());
        actions.remove(action_id)
    }

    /// Remove the action and perform its effect.
    pub async fn confirm(&self, action_id: &str) -> ActionOutcome {
        let Some(action) = self.take(action_id) else {
            warn!(action_id, "Confirm for unknown or already resolved action");
            return ActionOutcome::NotFound {
                action_id: action_id.to_string(),
            };
        };

        let effect = {
            let effects = self.effects.read().unwrap_or_else(|e| e.into_inner());
            effects.get(&action.kind).cloned()
        };

        let result = match effect {
            Some(effect) => effect.perform(&action).await,
            None => Err(ActionError::UnknownKind(action.kind.clone())),
        };

        match result {
            Ok(message) => {
                info!(action_id, kind = %action.kind, "Pending action completed");
                ActionOutcome::Completed {
                    action_id: action.action_id,
                    message,
                }
            }
            Err(e) => {
                warn!(action_id, kind = %action.kind, error = %e, "Pending action effect failed");
                ActionOutcome::Failed {
                    action_id: action.action_id,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Remove the action without performing its effect.
    pub fn cancel(&self, action_id: &str) -> ActionOutcome {
        match self.take(action_id) {
            Some(action) => {
                info!(action_id, kind = %action.kind, "Pending action cancelled");
                ActionOutcome::Cancelled {
                    action_id: action.action_id,
                }
            }
            None => ActionOutcome::NotFound {
                action_id: action_id.to_string(),
            },
        }
    }

    /// Look at a pending action without resolving it.
    pub fn get(&self, action_id: &str) -> Option<PendingAction> {
        let actions = self.actions.lock().unwrap_or_else(|e| e.into_inner());
        actions.get(action_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingActionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEffect {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ActionEffect for CountingEffect {
        async fn perform(&self, action: &PendingAction) -> Result<String, ActionError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(format!("done {}", action.payload["target"]))
        }
    }

    struct FailingEffect;

    #[async_trait]
    impl ActionEffect for FailingEffect {
        async fn perform(&self, _action: &PendingAction) -> Result<String, ActionError> {
            Err(ActionError::EffectFailed("backend offline".into()))
        }
    }

    struct SequentialIds(AtomicUsize);

    impl IdGenerator for SequentialIds {
        fn next_id(&self) -> String {
            format!("act_{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn store_with_counter() -> (PendingActionStore, Arc<CountingEffect>) {
        let store = PendingActionStore::with_ids(Box::new(SequentialIds(AtomicUsize::new(1))));
        let effect = Arc::new(CountingEffect {
            runs: AtomicUsize::new(0),
        });
        store.register_effect("test.delete", effect.clone());
        (store, effect)
    }

    fn draft() -> ActionDraft {
        ActionDraft::new("test.delete")
            .with_payload("target", "evt_1")
            .with_summary("title", "Dentist")
    }

    #[tokio::test]
    async fn confirm_runs_effect_once() {
        let (store, effect) = store_with_counter();
        let descriptor = store.register(draft());
        assert_eq!(descriptor.action_id, "act_1");
        assert_eq!(store.len(), 1);

        let first = store.confirm(&descriptor.action_id).await;
        assert!(matches!(first, ActionOutcome::Completed { ref message, .. } if message.contains("evt_1")));

        let second = store.confirm(&descriptor.action_id).await;
        assert!(matches!(second, ActionOutcome::NotFound { .. }));
        assert_eq!(effect.runs.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn summary_cannot_shadow_descriptor_fields() {
        let (store, _) = store_with_counter();
        let mut draft = draft().with_summary("action_id", "forged").with_summary("kind", "forged");
        draft.summary.insert("kind".into(), "also forged".into());

        let descriptor = store.register(draft);
        assert_eq!(descriptor.summary.len(), 1);
        assert_eq!(descriptor.summary["title"], "Dentist");

        let json = serde_json::to_string(&descriptor).unwrap();
        assert_eq!(json.matches("\"kind\"").count(), 1);
        assert_eq!(json.matches("\"action_id\"").count(), 1);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["kind"], "test.delete");
        assert_eq!(value["action_id"], descriptor.action_id);
    }

    #[tokio::test]
    async fn cancel_after_confirm_is_not_found() {
        let (store, _) = store_with_counter();
        let id = store.register(draft()).action_id;
        assert!(store.confirm(&id).await.is_success());
        assert!(matches!(store.cancel(&id), ActionOutcome::NotFound { .. }));
    }

    #[tokio::test]
    async fn confirm_after_cancel_skips_effect() {
        let (store, effect) = store_with_counter();
        let id = store.register(draft()).action_id;
        assert!(matches!(store.cancel(&id), ActionOutcome::Cancelled { .. }));
        assert!(matches!(store.confirm(&id).await, ActionOutcome::NotFound { .. }));
        assert_eq!(effect.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn racing_confirm_and_cancel_resolve_once() {
        let (store, effect) = store_with_counter();
        let store = Arc::new(store);
        let id = store.register(draft()).action_id;

        let confirm = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { store.confirm(&id).await })
        };
        let cancel = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { store.cancel(&id) })
        };

        let outcomes = [confirm.await.unwrap(), cancel.await.unwrap()];
        let winners = outcomes.iter().filter(|o| o.is_success()).count();
        assert_eq!(winners, 1);
        assert!(effect.runs.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn failing_effect_consumes_action() {
        let store = PendingActionStore::new();
        store.register_effect("test.fail", Arc::new(FailingEffect));
        let id = store.register(ActionDraft::new("test.fail")).action_id;

        let outcome = store.confirm(&id).await;
        assert!(matches!(outcome, ActionOutcome::Failed { ref error, .. } if error.contains("backend offline")));
        assert!(store.get(&id).is_none());
    }

    #[tokio::test]
    async fn unknown_kind_fails() {
        let store = PendingActionStore::new();
        let id = store.register(ActionDraft::new("nobody.handles")).action_id;
        assert!(matches!(store.confirm(&id).await, ActionOutcome::Failed { .. }));
    }

    #[test]
    fn descriptor_flattens_summary() {
        let (store, _) = store_with_counter();
        let descriptor = store.register(draft());
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["action_id"], "act_1");
        assert_eq!(json["kind"], "test.delete");
        assert_eq!(json["title"], "Dentist");
    }

    #[test]
    fn outcome_serializes_status_tag() {
        let json = serde_json::to_value(ActionOutcome::NotFound {
            action_id: "x".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "not_found");
    }
}
