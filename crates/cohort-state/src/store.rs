use crate::snapshot::StoreConfig;
use crate::subscription::{StateChange, SubscriptionId, Subscriptions};
use chrono::{DateTime, Utc};
use cohort_core::{AgentId, CohortResult, CoordinationMessage, MessageType};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// The latest committed value of one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedStateEntry {
    /// Store key.
    pub key: String,
    /// Committed value.
    pub value: serde_json::Value,
    /// Agent (or `orchestrator`) that wrote this version.
    pub writer: AgentId,
    /// Strictly increasing per key, starting at 1.
    pub version: u64,
    /// Commit time.
    pub updated_at: DateTime<Utc>,
}

/// One key. Writers serialize on `writer`, which holds the last version
/// handed out and survives deletes so a re-created key never reuses a
/// version. Readers only touch `committed`, which is swapped after a
/// writer's closure has returned.
#[derive(Default)]
struct Slot {
    writer: Mutex<u64>,
    committed: RwLock<Option<Arc<SharedStateEntry>>>,
}

impl Slot {
    fn load(&self) -> Option<Arc<SharedStateEntry>> {
        self.committed.read().clone()
    }

    fn store(&self, entry: Option<Arc<SharedStateEntry>>) -> Option<Arc<SharedStateEntry>> {
        std::mem::replace(&mut *self.committed.write(), entry)
    }
}

/// Thread-safe key/value store with change notification and an
/// append-only coordination message log.
///
/// `get`, `set` and `update` are synchronous. The map of slots is only
/// write-locked to create a slot; every write after that locks a single key.
/// Reads never wait on a writer's closure, and message queries hold the
/// log lock only long enough to take a reference to it.
pub struct SharedStateStore {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
    messages: RwLock<Arc<Vec<Arc<CoordinationMessage>>>>,
    subscriptions: Subscriptions,
    pub(crate) config: StoreConfig,
}

impl SharedStateStore {
    /// Empty store with default settings.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Empty store with custom settings.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            messages: RwLock::new(Arc::new(Vec::new())),
            subscriptions: Subscriptions::default(),
            config,
        }
    }

    /// Snapshot settings.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn slot(&self, key: &str) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().get(key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    fn existing_slot(&self, key: &str) -> Option<Arc<Slot>> {
        self.slots.read().get(key).map(Arc::clone)
    }

    fn all_slots(&self) -> Vec<Arc<Slot>> {
        self.slots.read().values().map(Arc::clone).collect()
    }

    // --- Key/value ---

    /// Latest committed value, if any.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.get_entry(key).map(|e| e.value)
    }

    /// Latest committed entry including version and writer.
    pub fn get_entry(&self, key: &str) -> Option<SharedStateEntry> {
        let entry = self.existing_slot(key)?.load()?;
        Some(SharedStateEntry::clone(&entry))
    }

    /// Store `value` under `key` and return the new version.
    pub fn set(&self, key: &str, value: serde_json::Value, writer: &str) -> u64 {
        self.update(key, |_| value, writer)
    }

    /// Read-modify-write under the key's writer lock; concurrent updates are
    /// never lost. Readers keep seeing the previous value until `f` returns.
    pub fn update<F>(&self, key: &str, f: F, writer: &str) -> u64
    where
        F: FnOnce(Option<&serde_json::Value>) -> serde_json::Value,
    {
        let slot = self.slot(key);
        let mut last_version = slot.writer.lock();
        let current = slot.load();
        let value = f(current.as_deref().map(|e| &e.value));
        let version = *last_version + 1;
        let entry = Arc::new(SharedStateEntry {
            key: key.to_string(),
            value,
            writer: writer.to_string(),
            version,
            updated_at: Utc::now(),
        });
        *last_version = version;
        slot.store(Some(Arc::clone(&entry)));
        trace!(key, version, writer, "State updated");
        self.subscriptions
            .notify(&StateChange::Updated(SharedStateEntry::clone(&entry)));
        version
    }

    /// Remove a key. Returns whether it held a value.
    pub fn delete(&self, key: &str) -> bool {
        let Some(slot) = self.existing_slot(key) else {
            return false;
        };
        let _writer = slot.writer.lock();
        if slot.store(None).is_none() {
            return false;
        }
        self.subscriptions.notify(&StateChange::Deleted {
            key: key.to_string(),
        });
        true
    }

    /// Keys currently holding a value, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries()
            .into_iter()
            .map(|e| e.key)
            .collect();
        keys.sort();
        keys
    }

    /// Every key/value pair, sorted by key.
    pub fn get_all(&self) -> BTreeMap<String, serde_json::Value> {
        self.entries()
            .into_iter()
            .map(|e| (e.key, e.value))
            .collect()
    }

    /// Remove every value and clear the message log. Versions keep counting.
    pub fn clear(&self) {
        for slot in self.all_slots() {
            let _writer = slot.writer.lock();
            if let Some(entry) = slot.store(None) {
                self.subscriptions.notify(&StateChange::Deleted {
                    key: entry.key.clone(),
                });
            }
        }
        *self.messages.write() = Arc::new(Vec::new());
    }

    /// Entries sorted by key.
    pub(crate) fn entries(&self) -> Vec<SharedStateEntry> {
        let mut entries: Vec<SharedStateEntry> = self
            .all_slots()
            .iter()
            .filter_map(|slot| slot.load())
            .map(|e| SharedStateEntry::clone(&e))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Replace an entry verbatim, keeping its version. Used when restoring.
    pub(crate) fn restore_entry(&self, entry: SharedStateEntry) {
        let slot = self.slot(&entry.key);
        let mut last_version = slot.writer.lock();
        *last_version = (*last_version).max(entry.version);
        slot.store(Some(Arc::new(entry)));
    }

    pub(crate) fn drop_entries(&self) {
        for slot in self.all_slots() {
            let _writer = slot.writer.lock();
            slot.store(None);
        }
    }

    // --- Subscriptions ---

    /// Invoke `callback` on a separate task for each change to a matching key.
    ///
    /// Errors and panics inside the callback are logged and never reach the
    /// writer. Requires a tokio runtime.
    pub fn subscribe<F>(&self, pattern: &str, callback: F) -> CohortResult<SubscriptionId>
    where
        F: Fn(&StateChange) -> CohortResult<()> + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(pattern, callback)
    }

    /// Receive matching changes on a channel instead of a callback.
    pub fn watch(
        &self,
        pattern: &str,
    ) -> CohortResult<(SubscriptionId, mpsc::UnboundedReceiver<StateChange>)> {
        self.subscriptions.watch(pattern)
    }

    /// Receive every message published from now on, in publication order.
    pub fn watch_messages(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<CoordinationMessage>) {
        self.subscriptions.watch_messages()
    }

    /// Remove a subscription created by `subscribe`, `watch` or `watch_messages`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Registered key and message subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    // --- Message log ---

    /// Validate and append a message, then fan it out to message watchers.
    ///
    /// A query holding an older view of the log does not delay the append;
    /// the log is copied on write instead.
    pub fn publish_message(&self, message: CoordinationMessage) -> CohortResult<()> {
        message.ensure_valid()?;
        let mut log = self.messages.write();
        trace!(
            sender = %message.sender(),
            kind = %message.message_type(),
            "Message published"
        );
        self.subscriptions.notify_message(&message);
        Arc::make_mut(&mut log).push(Arc::new(message));
        Ok(())
    }

    /// Messages sent by or addressed to `agent_id` (broadcasts included),
    /// optionally narrowed to one kind, in publication order.
    pub fn get_messages(
        &self,
        agent_id: Option<&str>,
        kind: Option<MessageType>,
    ) -> Vec<CoordinationMessage> {
        self.log()
            .iter()
            .filter(|m| kind.map_or(true, |k| m.message_type() == k))
            .filter(|m| agent_id.map_or(true, |id| m.sender() == id || m.is_for(id)))
            .map(|m| CoordinationMessage::clone(m))
            .collect()
    }

    /// Number of messages in the log.
    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }

    /// The log as of now. Later publishes do not change the returned view.
    fn log(&self) -> Arc<Vec<Arc<CoordinationMessage>>> {
        Arc::clone(&self.messages.read())
    }

    pub(crate) fn all_messages(&self) -> Vec<CoordinationMessage> {
        self.log()
            .iter()
            .map(|m| CoordinationMessage::clone(m))
            .collect()
    }

    pub(crate) fn replace_messages(&self, messages: Vec<CoordinationMessage>) {
        *self.messages.write() = Arc::new(messages.into_iter().map(Arc::new).collect());
    }
}

impl Default for SharedStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get() {
        let store = SharedStateStore::new();
        assert!(store.get("phase.a.output").is_none());
        let v1 = store.set("phase.a.output", json!({"rows": 3}), "agent-1");
        assert_eq!(v1, 1);
        assert_eq!(store.get("phase.a.output").unwrap()["rows"], 3);

        let entry = store.get_entry("phase.a.output").unwrap();
        assert_eq!(entry.writer, "agent-1");
        assert_eq!(entry.version, 1);
    }

    #[test]
    fn test_versions_increase_per_key() {
        let store = SharedStateStore::new();
        assert_eq!(store.set("a", json!(1), "w"), 1);
        assert_eq!(store.set("a", json!(2), "w"), 2);
        assert_eq!(store.set("b", json!(1), "w"), 1);
    }

    #[test]
    fn test_update_reads_current_value() {
        let store = SharedStateStore::new();
        store.update("counter", |v| json!(v.and_then(serde_json::Value::as_u64).unwrap_or(0) + 1), "w");
        store.update("counter", |v| json!(v.and_then(serde_json::Value::as_u64).unwrap_or(0) + 1), "w");
        assert_eq!(store.get("counter"), Some(json!(2)));
    }

    #[test]
    fn test_delete_keeps_version_counting() {
        let store = SharedStateStore::new();
        store.set("k", json!("x"), "w");
        store.set("k", json!("y"), "w");
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert!(store.get("k").is_none());
        assert_eq!(store.set("k", json!("z"), "w"), 3);
    }

    #[test]
    fn test_keys_and_get_all_sorted() {
        let store = SharedStateStore::new();
        store.set("b", json!(2), "w");
        store.set("a", json!(1), "w");
        store.set("c", json!(3), "w");
        store.delete("c");
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
        let all: Vec<_> = store.get_all().into_keys().collect();
        assert_eq!(all, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_clear_removes_values_and_messages() {
        let store = SharedStateStore::new();
        store.set("a", json!(1), "w");
        store
            .publish_message(CoordinationMessage::heartbeat("agent-1").unwrap())
            .unwrap();
        store.clear();
        assert!(store.keys().is_empty());
        assert_eq!(store.message_count(), 0);
        assert_eq!(store.set("a", json!(1), "w"), 2);
    }

    #[test]
    fn test_get_messages_filters() {
        let store = SharedStateStore::new();
        store
            .publish_message(CoordinationMessage::heartbeat("agent-1").unwrap())
            .unwrap();
        store
            .publish_message(
                CoordinationMessage::phase_failed("agent-2", "load", "disk full").unwrap(),
            )
            .unwrap();
        store
            .publish_message(
                CoordinationMessage::help_needed("agent-2", "stuck", Default::default())
                    .unwrap()
                    .with_recipient("agent-3")
                    .unwrap(),
            )
            .unwrap();

        assert_eq!(store.get_messages(None, None).len(), 3);
        assert_eq!(
            store
                .get_messages(None, Some(MessageType::PhaseFailed))
                .len(),
            1
        );
        // agent-3 sees the broadcasts plus the message addressed to it.
        assert_eq!(store.get_messages(Some("agent-3"), None).len(), 3);
        // agent-4 only sees broadcasts.
        assert_eq!(store.get_messages(Some("agent-4"), None).len(), 2);
        assert_eq!(
            store
                .get_messages(Some("agent-4"), Some(MessageType::HelpNeeded))
                .len(),
            0
        );
    }

    #[test]
    fn test_watch_receives_changes_in_order() {
        let store = SharedStateStore::new();
        let (_id, mut rx) = store.watch("phase.*.output").unwrap();
        store.set("phase.a.output", json!(1), "w");
        store.set("phase.a.status", json!("done"), "w");
        store.set("phase.b.output", json!(2), "w");
        store.delete("phase.a.output");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.key(), "phase.a.output");
        assert_eq!(rx.try_recv().unwrap().key(), "phase.b.output");
        assert!(matches!(rx.try_recv().unwrap(), StateChange::Deleted { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_watch_messages_in_publication_order() {
        let store = SharedStateStore::new();
        let (id, mut rx) = store.watch_messages();
        for i in 0..5 {
            store
                .publish_message(
                    CoordinationMessage::status_update("agent-1", format!("step {i}"), None)
                        .unwrap(),
                )
                .unwrap();
        }
        for i in 0..5 {
            match rx.try_recv().unwrap().kind() {
                cohort_core::MessageKind::StatusUpdate { status, .. } => {
                    assert_eq!(status, &format!("step {i}"));
                }
                other => panic!("unexpected kind: {other:?}"),
            }
        }
        assert!(store.unsubscribe(id));
    }
}
