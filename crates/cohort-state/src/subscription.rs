use crate::store::SharedStateEntry;
use cohort_core::{CohortError, CohortResult, CoordinationMessage};
use parking_lot::RwLock;
use regex::Regex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Handle returned by `subscribe`, `watch` and `watch_messages`.
pub type SubscriptionId = u64;

/// A change to one key, delivered to matching subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    /// The key now holds this entry.
    Updated(SharedStateEntry),
    /// The key was removed.
    Deleted { key: String },
}

impl StateChange {
    /// The key that changed.
    pub fn key(&self) -> &str {
        match self {
            StateChange::Updated(entry) => &entry.key,
            StateChange::Deleted { key } => key,
        }
    }
}

/// An exact key or a `*` glob such as `phase.*.output`.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    glob: Option<Regex>,
}

impl KeyPattern {
    /// Parse a pattern. `*` matches any run of characters, including dots.
    pub fn parse(pattern: &str) -> CohortResult<Self> {
        if !pattern.contains('*') {
            return Ok(Self {
                raw: pattern.to_string(),
                glob: None,
            });
        }
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let glob = Regex::new(&format!("^{body}$"))
            .map_err(|e| CohortError::Validation(format!("Invalid key pattern '{pattern}': {e}")))?;
        Ok(Self {
            raw: pattern.to_string(),
            glob: Some(glob),
        })
    }

    /// Whether `key` matches the pattern.
    pub fn matches(&self, key: &str) -> bool {
        match &self.glob {
            Some(re) => re.is_match(key),
            None => self.raw == key,
        }
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

struct KeySubscriber {
    id: SubscriptionId,
    pattern: KeyPattern,
    tx: mpsc::UnboundedSender<StateChange>,
}

struct MessageSubscriber {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<CoordinationMessage>,
}

/// Registry of subscribers. Each subscriber owns an unbounded channel, so a
/// notifying writer never waits on a slow consumer.
#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: AtomicU64,
    keys: RwLock<Vec<KeySubscriber>>,
    messages: RwLock<Vec<MessageSubscriber>>,
}

impl Subscriptions {
    fn next_id(&self) -> SubscriptionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn watch(
        &self,
        pattern: &str,
    ) -> CohortResult<(SubscriptionId, mpsc::UnboundedReceiver<StateChange>)> {
        let pattern = KeyPattern::parse(pattern)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id();
        let mut keys = self.keys.write();
        keys.retain(|s| !s.tx.is_closed());
        keys.push(KeySubscriber { id, pattern, tx });
        Ok((id, rx))
    }

    /// Run `callback` on a spawned task for every matching change, in order.
    pub(crate) fn subscribe<F>(&self, pattern: &str, callback: F) -> CohortResult<SubscriptionId>
    where
        F: Fn(&StateChange) -> CohortResult<()> + Send + Sync + 'static,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            CohortError::Orchestrator(
                "subscribe requires a running tokio runtime; use watch() instead".to_string(),
            )
        })?;
        let (id, mut rx) = self.watch(pattern)?;

        handle.spawn(async move {
            while let Some(change) = rx.recv().await {
                match catch_unwind(AssertUnwindSafe(|| callback(&change))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(subscription = id, key = %change.key(), error = %e, "Subscriber callback failed");
                    }
                    Err(_) => {
                        warn!(subscription = id, key = %change.key(), "Subscriber callback panicked");
                    }
                }
            }
            debug!(subscription = id, "Subscriber task finished");
        });
        Ok(id)
    }

    pub(crate) fn watch_messages(
        &self,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<CoordinationMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id();
        let mut messages = self.messages.write();
        messages.retain(|s| !s.tx.is_closed());
        messages.push(MessageSubscriber { id, tx });
        (id, rx)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        self.keys.write().retain(|s| {
            let keep = s.id != id;
            removed |= !keep;
            keep
        });
        self.messages.write().retain(|s| {
            let keep = s.id != id;
            removed |= !keep;
            keep
        });
        removed
    }

    /// Callers hold the key's lock, which fixes the per-key delivery order.
    pub(crate) fn notify(&self, change: &StateChange) {
        for sub in self.keys.read().iter() {
            if sub.pattern.matches(change.key()) {
                // A closed receiver is pruned on the next registration.
                let _ = sub.tx.send(change.clone());
            }
        }
    }

    /// Callers hold the log's write lock, which fixes publication order.
    pub(crate) fn notify_message(&self, message: &CoordinationMessage) {
        for sub in self.messages.read().iter() {
            let _ = sub.tx.send(message.clone());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.read().len() + self.messages.read().len()
    }
}
