//! Shared, observable state for cooperating Cohort agents.
//!
//! [`SharedStateStore`] is the only resource several agents mutate at once.
//! Writers to the same key serialize on a per-key lock; unrelated keys never
//! contend. Changes fan out to subscribers through one channel per
//! subscriber, and coordination messages are kept in an append-only log that
//! can be snapshotted to disk.

/// Durable snapshot format and persistence.
pub mod snapshot;
/// Keyed storage with per-key locking and the message log.
pub mod store;
/// Key patterns and per-subscriber channels.
pub mod subscription;

pub use snapshot::{read_snapshot, StateSnapshot, StoreConfig};
pub use store::{SharedStateEntry, SharedStateStore};
pub use subscription::{KeyPattern, StateChange, SubscriptionId};
